use crate::error::{FileToolsError, Result};
use crate::paths::{human_size, is_listing_ignored, resolve, validate_inside};
use regex::RegexBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Configuration for the code viewer
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Files larger than this are refused
    pub max_file_size: u64,

    /// Output lines past this are clipped with a visible marker
    pub max_output_lines: usize,

    /// Directory listing depth
    pub max_depth: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_output_lines: 1000,
            max_depth: 2,
        }
    }
}

/// Request to view a file or directory
#[derive(Debug, Clone)]
pub struct ViewRequest {
    pub path: PathBuf,

    /// 1-based inclusive line range
    pub view_range: Option<(usize, usize)>,

    /// Render only lines matching this pattern, with context
    pub search_query_regex: Option<String>,
    pub case_sensitive: bool,
    pub context_lines_before: usize,
    pub context_lines_after: usize,
}

impl ViewRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            view_range: None,
            search_query_regex: None,
            case_sensitive: false,
            context_lines_before: 5,
            context_lines_after: 5,
        }
    }

    pub fn range(mut self, start: usize, end: usize) -> Self {
        self.view_range = Some((start, end));
        self
    }

    pub fn search(mut self, pattern: impl Into<String>) -> Self {
        self.search_query_regex = Some(pattern.into());
        self
    }

    pub fn context(mut self, before: usize, after: usize) -> Self {
        self.context_lines_before = before;
        self.context_lines_after = after;
        self
    }
}

/// Result of a view operation
#[derive(Debug, Clone)]
pub struct ViewResult {
    pub path: PathBuf,
    pub content: String,
    pub total_lines: usize,
    pub is_truncated: bool,
    /// Matching line count when a search pattern was given
    pub match_count: Option<usize>,
}

/// Viewer for files and directories with line numbers and regex search
pub struct CodeViewer {
    workspace_root: PathBuf,
    config: ViewerConfig,
}

impl CodeViewer {
    pub fn new(workspace_root: impl Into<PathBuf>, config: ViewerConfig) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            config,
        }
    }

    /// View a file with line numbers, an optional range, or a regex search
    pub fn view_file(&self, request: &ViewRequest) -> Result<ViewResult> {
        let path = resolve(&self.workspace_root, &request.path);
        validate_inside(&self.workspace_root, &path)?;

        if !path.exists() {
            return Err(FileToolsError::FileNotFound(path));
        }
        if path.is_dir() {
            return self.view_directory(request);
        }

        let size = std::fs::metadata(&path)?.len();
        if size > self.config.max_file_size {
            return Err(FileToolsError::validation(format!(
                "File too large: {} bytes (max: {})",
                size, self.config.max_file_size
            )));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                FileToolsError::PermissionDenied(path.clone())
            }
            _ => FileToolsError::from(e),
        })?;
        let lines: Vec<&str> = content.split('\n').collect();
        let total_lines = lines.len();

        if let Some(pattern) = &request.search_query_regex {
            return self.search_file(request, pattern, &lines, path, total_lines);
        }

        let (start, numbered) = match request.view_range {
            Some((start, end)) => {
                let start = start.max(1);
                if start > total_lines {
                    return Err(FileToolsError::InvalidRange(format!(
                        "Start line {} exceeds file length ({} lines)",
                        start, total_lines
                    )));
                }
                let end = end.min(total_lines);
                if start > end {
                    return Err(FileToolsError::InvalidRange(format!(
                        "Start line ({}) cannot be greater than end line ({})",
                        start, end
                    )));
                }
                (start, &lines[start - 1..end])
            }
            None => (1, &lines[..]),
        };

        let mut rendered: Vec<String> = numbered
            .iter()
            .enumerate()
            .map(|(offset, line)| format!("{:>6}\t{}", start + offset, line))
            .collect();

        let is_truncated = rendered.len() > self.config.max_output_lines;
        if is_truncated {
            let total_rendered = rendered.len();
            rendered.truncate(self.config.max_output_lines);
            rendered.push(String::new());
            rendered.push(format!(
                "<response clipped - showing {} of {} lines>",
                self.config.max_output_lines, total_rendered
            ));
        }

        Ok(ViewResult {
            path,
            content: rendered.join("\n"),
            total_lines,
            is_truncated,
            match_count: None,
        })
    }

    fn search_file(
        &self,
        request: &ViewRequest,
        pattern: &str,
        lines: &[&str],
        path: PathBuf,
        total_lines: usize,
    ) -> Result<ViewResult> {
        let matcher = RegexBuilder::new(pattern)
            .case_insensitive(!request.case_sensitive)
            .build()
            .map_err(|e| FileToolsError::RegexError(e.to_string()))?;

        let matching: BTreeSet<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| matcher.is_match(line))
            .map(|(idx, _)| idx)
            .collect();

        if matching.is_empty() {
            return Ok(ViewResult {
                path,
                content: "No matches found.".to_string(),
                total_lines,
                is_truncated: false,
                match_count: Some(0),
            });
        }

        let mut output = Vec::new();
        let mut shown: BTreeSet<usize> = BTreeSet::new();

        for &match_idx in &matching {
            let start = match_idx.saturating_sub(request.context_lines_before);
            let end = (match_idx + request.context_lines_after + 1).min(lines.len());

            if let Some(&last_shown) = shown.iter().next_back() {
                if start > last_shown + 1 {
                    output.push("...".to_string());
                }
            }

            for idx in start..end {
                if shown.insert(idx) {
                    let marker = if matching.contains(&idx) { ">" } else { " " };
                    output.push(format!("{:>6}{}\t{}", idx + 1, marker, lines[idx]));
                }
            }
        }

        Ok(ViewResult {
            path,
            content: output.join("\n"),
            total_lines,
            is_truncated: false,
            match_count: Some(matching.len()),
        })
    }

    /// Two-level directory listing with human-readable sizes
    pub fn view_directory(&self, request: &ViewRequest) -> Result<ViewResult> {
        let path = resolve(&self.workspace_root, &request.path);
        validate_inside(&self.workspace_root, &path)?;

        if !path.exists() {
            return Err(FileToolsError::FileNotFound(path));
        }
        if !path.is_dir() {
            return self.view_file(request);
        }

        let mut output = vec![format!("Directory: {}", path.display()), String::new()];
        self.list_directory(&path, &mut output, 0)?;

        Ok(ViewResult {
            path,
            content: output.join("\n"),
            total_lines: 0,
            is_truncated: false,
            match_count: None,
        })
    }

    fn list_directory(&self, path: &Path, output: &mut Vec<String>, depth: usize) -> Result<()> {
        if depth > self.config.max_depth {
            return Ok(());
        }
        let indent = "  ".repeat(depth);

        let mut entries: Vec<_> = match std::fs::read_dir(path) {
            Ok(entries) => entries.flatten().collect(),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                output.push(format!("{}(permission denied)", indent));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        entries.sort_by_key(|entry| {
            let is_file = entry.file_type().map(|t| !t.is_dir()).unwrap_or(true);
            (is_file, entry.file_name().to_ascii_lowercase())
        });

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_listing_ignored(&name) {
                continue;
            }

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                output.push(format!("{}{}/", indent, name));
                self.list_directory(&entry.path(), output, depth + 1)?;
            } else {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                output.push(format!("{}{} ({})", indent, name, human_size(size)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn viewer(dir: &TempDir) -> CodeViewer {
        CodeViewer::new(dir.path(), ViewerConfig::default())
    }

    #[test]
    fn test_view_file_adds_line_numbers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "first\nsecond").unwrap();

        let result = viewer(&dir).view_file(&ViewRequest::new("a.txt")).unwrap();
        assert!(result.content.contains("     1\tfirst"));
        assert!(result.content.contains("     2\tsecond"));
        assert!(!result.is_truncated);
    }

    #[test]
    fn test_view_range() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "l1\nl2\nl3\nl4\nl5").unwrap();

        let result = viewer(&dir)
            .view_file(&ViewRequest::new("a.txt").range(2, 4))
            .unwrap();
        assert!(result.content.contains("     2\tl2"));
        assert!(result.content.contains("     4\tl4"));
        assert!(!result.content.contains("l5"));
    }

    #[test]
    fn test_view_range_start_past_end_of_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "only\n").unwrap();

        let err = viewer(&dir)
            .view_file(&ViewRequest::new("a.txt").range(50, 60))
            .unwrap_err();
        assert!(matches!(err, FileToolsError::InvalidRange(_)));
    }

    #[test]
    fn test_output_clipping() {
        let dir = TempDir::new().unwrap();
        let content: String = (1..=50).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(dir.path().join("big.txt"), content).unwrap();

        let viewer = CodeViewer::new(
            dir.path(),
            ViewerConfig {
                max_output_lines: 10,
                ..Default::default()
            },
        );
        let result = viewer.view_file(&ViewRequest::new("big.txt")).unwrap();

        assert!(result.is_truncated);
        assert!(result.content.contains("<response clipped"));
        assert!(result.content.contains("line 10"));
        assert!(!result.content.contains("line 11\t"));
    }

    #[test]
    fn test_file_size_limit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![b'x'; 128]).unwrap();

        let viewer = CodeViewer::new(
            dir.path(),
            ViewerConfig {
                max_file_size: 64,
                ..Default::default()
            },
        );
        let err = viewer.view_file(&ViewRequest::new("big.bin")).unwrap_err();
        assert!(matches!(err, FileToolsError::ValidationError(_)));
    }

    #[test]
    fn test_regex_search_with_context_windows() {
        let dir = TempDir::new().unwrap();
        // def lines at 1, 5, 9
        let content = "def a():\n    pass\nx = 1\ny = 2\ndef b():\n    pass\nz = 3\nw = 4\ndef c():\n    pass\ntail = 5\nmore = 6\n";
        std::fs::write(dir.path().join("sample.py"), content).unwrap();

        let result = viewer(&dir)
            .view_file(
                &ViewRequest::new("sample.py")
                    .search(r"def [a-z]+\(")
                    .context(1, 1),
            )
            .unwrap();

        assert_eq!(result.match_count, Some(3));
        // Matching lines are marked and gaps separated
        assert!(result.content.contains("     1>\tdef a():"));
        assert!(result.content.contains("     5>\tdef b():"));
        assert!(result.content.contains("     9>\tdef c():"));
        assert!(result.content.contains("..."));
        // Context windows never repeat a line
        assert_eq!(
            result.content.matches("def b():").count(),
            1
        );
    }

    #[test]
    fn test_regex_search_no_matches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing here\n").unwrap();

        let result = viewer(&dir)
            .view_file(&ViewRequest::new("a.txt").search("absent_pattern"))
            .unwrap();
        assert_eq!(result.match_count, Some(0));
        assert_eq!(result.content, "No matches found.");
    }

    #[test]
    fn test_invalid_regex() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "text\n").unwrap();

        let err = viewer(&dir)
            .view_file(&ViewRequest::new("a.txt").search("[broken"))
            .unwrap_err();
        assert!(matches!(err, FileToolsError::RegexError(_)));
    }

    #[test]
    fn test_view_directory_listing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "# readme").unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();

        let result = viewer(&dir)
            .view_directory(&ViewRequest::new("."))
            .unwrap();

        assert!(result.content.contains("src/"));
        assert!(result.content.contains("main.rs"));
        assert!(result.content.contains("README.md"));
        assert!(!result.content.contains(".hidden"));
        assert!(result.content.contains("B)"));
    }

    #[test]
    fn test_view_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = viewer(&dir)
            .view_file(&ViewRequest::new("ghost.txt"))
            .unwrap_err();
        assert!(matches!(err, FileToolsError::FileNotFound(_)));
    }
}
