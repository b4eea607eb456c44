use crate::error::{FileToolsError, Result};
use crate::paths::{protected_reason, resolve, validate_inside};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Configuration for the file editor
#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Directory for backups; defaults to `.contextforge/backups` under the root
    pub backup_dir: Option<PathBuf>,

    /// Backups older than this are purged when a new backup is written
    pub backup_max_age: Duration,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            backup_dir: None,
            backup_max_age: Duration::days(7),
        }
    }
}

/// Single string replacement entry
#[derive(Debug, Clone)]
pub struct ReplaceEntry {
    pub old_str: String,
    pub new_str: String,
    /// Restrict the search to a 1-based inclusive line range
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
}

impl ReplaceEntry {
    pub fn new(old_str: impl Into<String>, new_str: impl Into<String>) -> Self {
        Self {
            old_str: old_str.into(),
            new_str: new_str.into(),
            start_line: None,
            end_line: None,
        }
    }

    pub fn within_lines(mut self, start_line: usize, end_line: usize) -> Self {
        self.start_line = Some(start_line);
        self.end_line = Some(end_line);
        self
    }
}

/// Request for string replacement operations
#[derive(Debug, Clone)]
pub struct ReplaceRequest {
    pub path: PathBuf,
    pub replacements: Vec<ReplaceEntry>,
    pub create_backup: bool,
}

impl ReplaceRequest {
    pub fn new(path: impl Into<PathBuf>, replacements: Vec<ReplaceEntry>) -> Self {
        Self {
            path: path.into(),
            replacements,
            create_backup: true,
        }
    }
}

/// Request to create a new file
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub path: PathBuf,
    pub content: String,
    pub overwrite: bool,
    pub create_directories: bool,
    pub add_trailing_newline: bool,
}

impl SaveRequest {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            overwrite: false,
            create_directories: true,
            add_trailing_newline: true,
        }
    }
}

/// Request to remove files safely
#[derive(Debug, Clone)]
pub struct RemoveRequest {
    pub paths: Vec<PathBuf>,
    pub allow_directories: bool,
    pub create_backup: bool,
    /// Skip protected-pattern checks (system roots stay protected)
    pub force: bool,
    /// Report what would be removed without touching anything
    pub dry_run: bool,
}

impl RemoveRequest {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            allow_directories: false,
            create_backup: true,
            force: false,
            dry_run: false,
        }
    }
}

/// Successful edit details
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub path: PathBuf,
    pub changes_made: usize,
    pub backup_path: Option<PathBuf>,
    /// Context snippet around the first replacement
    pub snippet: String,
}

/// What happened to one path in a remove request
#[derive(Debug, Clone)]
pub enum RemoveAction {
    Removed {
        is_directory: bool,
        backup_path: Option<PathBuf>,
    },
    WouldRemove {
        is_directory: bool,
    },
}

/// Per-path result of a remove request, in input order
#[derive(Debug)]
pub struct RemoveReport {
    pub path: PathBuf,
    pub outcome: Result<RemoveAction>,
}

/// File editor for exact string replacement and safe file operations
pub struct FileEditor {
    workspace_root: PathBuf,
    backup_dir: PathBuf,
    backup_max_age: Duration,
}

impl FileEditor {
    pub fn new(workspace_root: impl Into<PathBuf>, config: EditorConfig) -> Self {
        let workspace_root = workspace_root.into();
        let backup_dir = config
            .backup_dir
            .unwrap_or_else(|| workspace_root.join(".contextforge").join("backups"));
        Self {
            workspace_root,
            backup_dir,
            backup_max_age: config.backup_max_age,
        }
    }

    /// Apply exact string replacements to a file
    ///
    /// Entries are applied sequentially; on failure, replacements already
    /// applied are written back and the error carries the backup path as the
    /// recovery handle.
    pub fn str_replace(&self, request: &ReplaceRequest) -> Result<EditOutcome> {
        let path = resolve(&self.workspace_root, &request.path);
        validate_inside(&self.workspace_root, &path)?;

        if !path.exists() {
            return Err(FileToolsError::FileNotFound(path));
        }

        let mut content = read_file(&path)?;
        let backup_path = if request.create_backup {
            self.create_backup(&path)
        } else {
            None
        };

        let mut changes_made = 0;
        for entry in &request.replacements {
            let (start, end) = match find_replacement(&content, entry) {
                Ok(span) => span,
                Err(e) => {
                    if changes_made > 0 {
                        write_file(&path, &content)?;
                    }
                    return Err(attach_backup(e, backup_path));
                }
            };
            content.replace_range(start..end, &entry.new_str);
            changes_made += 1;
        }

        write_file(&path, &content)?;

        let snippet = request
            .replacements
            .first()
            .map(|entry| generate_snippet(&content, &entry.new_str, 3))
            .unwrap_or_default();

        log::info!("Edited {:?}: {} replacement(s)", path, changes_made);
        Ok(EditOutcome {
            path,
            changes_made,
            backup_path,
            snippet,
        })
    }

    /// Create a new file
    pub fn save_file(&self, request: &SaveRequest) -> Result<EditOutcome> {
        let path = resolve(&self.workspace_root, &request.path);
        validate_inside(&self.workspace_root, &path)?;

        if path.exists() && !request.overwrite {
            return Err(FileToolsError::validation(
                "File already exists; pass overwrite to replace it",
            ));
        }

        if request.create_directories {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut content = request.content.clone();
        if request.add_trailing_newline && !content.ends_with('\n') {
            content.push('\n');
        }
        write_file(&path, &content)?;

        log::info!("Saved file: {:?}", path);
        Ok(EditOutcome {
            path,
            changes_made: 1,
            backup_path: None,
            snippet: String::new(),
        })
    }

    /// Remove files, one report per input path in order
    pub fn remove_files(&self, request: &RemoveRequest) -> Vec<RemoveReport> {
        request
            .paths
            .iter()
            .map(|raw| {
                let path = resolve(&self.workspace_root, raw);
                let outcome = self.remove_one(&path, request);
                RemoveReport { path, outcome }
            })
            .collect()
    }

    fn remove_one(&self, path: &Path, request: &RemoveRequest) -> Result<RemoveAction> {
        validate_inside(&self.workspace_root, path)?;

        if !path.exists() {
            return Err(FileToolsError::FileNotFound(path.to_path_buf()));
        }

        if !request.force {
            if let Some(reason) = protected_reason(path) {
                return Err(FileToolsError::validation(format!(
                    "Protected path: {}. Use force to override.",
                    reason
                )));
            }
        }

        let is_directory = path.is_dir();
        if is_directory && !request.allow_directories {
            return Err(FileToolsError::validation(
                "Cannot remove directory; pass allow_directories",
            ));
        }

        if request.dry_run {
            return Ok(RemoveAction::WouldRemove { is_directory });
        }

        let backup_path = if request.create_backup && !is_directory {
            self.create_backup(path)
        } else {
            None
        };

        let removed = if is_directory {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match removed {
            Ok(()) => {
                log::info!("Removed: {:?}", path);
                Ok(RemoveAction::Removed {
                    is_directory,
                    backup_path,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(FileToolsError::PermissionDenied(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot a file into the backup directory
    ///
    /// Backup names are `<name>.<YYYYMMDD_HHMMSS>.<hash8>.bak`; aged-out
    /// backups are purged opportunistically.
    fn create_backup(&self, path: &Path) -> Option<PathBuf> {
        if !path.exists() {
            return None;
        }

        let result = (|| -> Result<PathBuf> {
            std::fs::create_dir_all(&self.backup_dir)?;
            self.purge_old_backups();

            let bytes = std::fs::read(path)?;
            let hash8 = format!("{:x}", Sha256::digest(&bytes))[..8].to_string();
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());

            let backup_path = self.backup_dir.join(format!("{}.{}.{}.bak", name, timestamp, hash8));
            std::fs::write(&backup_path, bytes)?;
            Ok(backup_path)
        })();

        match result {
            Ok(backup_path) => {
                log::info!("Created backup: {:?}", backup_path);
                Some(backup_path)
            }
            Err(e) => {
                log::warn!("Failed to create backup for {:?}: {}", path, e);
                None
            }
        }
    }

    fn purge_old_backups(&self) {
        let Ok(entries) = std::fs::read_dir(&self.backup_dir) else {
            return;
        };
        let cutoff = Utc::now() - self.backup_max_age;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "bak") {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if DateTime::<Utc>::from(modified) < cutoff {
                if std::fs::remove_file(&path).is_ok() {
                    log::debug!("Purged aged backup: {:?}", path);
                }
            }
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FileToolsError::PermissionDenied(path.to_path_buf()),
        _ => e.into(),
    })
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FileToolsError::PermissionDenied(path.to_path_buf()),
        _ => e.into(),
    })
}

fn attach_backup(error: FileToolsError, backup: Option<PathBuf>) -> FileToolsError {
    match error {
        FileToolsError::NoMatch { context, .. } => FileToolsError::NoMatch {
            context,
            backup_path: backup,
        },
        FileToolsError::MultipleMatches { lines, .. } => FileToolsError::MultipleMatches {
            lines,
            backup_path: backup,
        },
        other => other,
    }
}

/// Locate `old_str` in the buffer, honoring an optional line-range restriction
fn find_replacement(content: &str, entry: &ReplaceEntry) -> Result<(usize, usize)> {
    if let (Some(start_line), Some(end_line)) = (entry.start_line, entry.end_line) {
        let lines: Vec<&str> = content.split('\n').collect();
        let start_idx = start_line.saturating_sub(1);
        let end_idx = end_line.min(lines.len());
        if start_idx >= end_idx {
            return Err(FileToolsError::NoMatch {
                context: format!("lines {}-{}", start_line, end_line),
                backup_path: None,
            });
        }

        let region = lines[start_idx..end_idx].join("\n");
        let Some(offset) = region.find(&entry.old_str) else {
            return Err(FileToolsError::NoMatch {
                context: format!("lines {}-{}", start_line, end_line),
                backup_path: None,
            });
        };

        // Byte offset of the region within the full buffer
        let prefix_len: usize = lines[..start_idx].iter().map(|l| l.len() + 1).sum();
        let start = prefix_len + offset;
        return Ok((start, start + entry.old_str.len()));
    }

    let occurrences: Vec<usize> = {
        let mut found = Vec::new();
        let mut search_start = 0;
        while let Some(offset) = content[search_start..].find(&entry.old_str) {
            let position = search_start + offset;
            found.push(position);
            search_start = position + 1;
        }
        found
    };

    match occurrences.len() {
        0 => Err(FileToolsError::NoMatch {
            context: "file".to_string(),
            backup_path: None,
        }),
        1 => Ok((occurrences[0], occurrences[0] + entry.old_str.len())),
        _ => {
            let lines = occurrences
                .iter()
                .map(|&pos| content[..pos].matches('\n').count() + 1)
                .collect();
            Err(FileToolsError::MultipleMatches {
                lines,
                backup_path: None,
            })
        }
    }
}

/// Context snippet around the first line containing `search_str`
fn generate_snippet(content: &str, search_str: &str, context_lines: usize) -> String {
    if search_str.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let needle = search_str.get(..50).unwrap_or(search_str);

    for (idx, line) in lines.iter().enumerate() {
        if line.contains(needle) {
            let start = idx.saturating_sub(context_lines);
            let end = (idx + context_lines + 1).min(lines.len());
            return lines[start..end]
                .iter()
                .enumerate()
                .map(|(offset, l)| format!("{:>4} | {}", start + offset + 1, l))
                .collect::<Vec<_>>()
                .join("\n");
        }
    }
    String::new()
}
