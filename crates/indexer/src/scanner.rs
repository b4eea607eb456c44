use crate::error::Result;
use forge_code_chunker::Language;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Scanner for finding indexable source files in a project
pub struct FileScanner {
    root: PathBuf,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Scan for source files, honoring .gitignore
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for result in WalkBuilder::new(&self.root).hidden(false).build() {
            match result {
                Ok(entry) => {
                    if entry.file_type().is_some_and(|ft| ft.is_file())
                        && Self::is_indexable(entry.path())
                    {
                        files.push(entry.path().to_path_buf());
                    }
                }
                Err(e) => log::warn!("Failed to read entry: {}", e),
            }
        }

        files.sort();
        log::info!("Found {} indexable files under {:?}", files.len(), self.root);
        Ok(files)
    }

    /// Check if the chunker knows the file's language
    fn is_indexable(path: &Path) -> bool {
        Language::from_path(path) != Language::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_picks_up_source_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("util.py"), "def util(): pass").unwrap();
        std::fs::write(dir.path().join("data.bin"), [0u8, 1, 2]).unwrap();

        let files = FileScanner::new(dir.path()).scan().unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_scan_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "ignored.rs\n").unwrap();
        std::fs::write(dir.path().join("kept.rs"), "fn kept() {}").unwrap();
        std::fs::write(dir.path().join("ignored.rs"), "fn ignored() {}").unwrap();

        let files = FileScanner::new(dir.path()).scan().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("kept.rs"));
    }
}
