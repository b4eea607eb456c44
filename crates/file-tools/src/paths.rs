use crate::error::{FileToolsError, Result};
use once_cell::sync::Lazy;
use std::path::{Component, Path, PathBuf};

/// Basenames and path components that cannot be deleted without `force`
pub(crate) static PROTECTED_PATTERNS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        ".git",
        ".gitignore",
        ".env",
        "node_modules",
        "__pycache__",
        ".venv",
        "venv",
        ".contextforge",
        "package-lock.json",
        "yarn.lock",
        "poetry.lock",
        "Cargo.lock",
        "Pipfile.lock",
    ]
});

/// Absolute roots that are never deleted, forced or not
pub(crate) static SYSTEM_PROTECTED_PATHS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "/", "/bin", "/usr", "/etc", "/var", "/home", "/root",
        "C:\\", "C:\\Windows", "C:\\Program Files", "C:\\Program Files (x86)", "C:\\Users",
    ]
});

/// Entries skipped by directory listings
pub(crate) fn is_listing_ignored(name: &str) -> bool {
    name.starts_with('.')
        || matches!(name, "__pycache__" | "node_modules" | "venv" | "target")
}

/// Resolve a path against the workspace root
pub(crate) fn resolve(workspace_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&workspace_root.join(path))
    }
}

/// Lexically normalize a path, resolving `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other),
        }
    }
    result
}

/// Reject paths outside the workspace root
pub(crate) fn validate_inside(workspace_root: &Path, resolved: &Path) -> Result<()> {
    if resolved.starts_with(workspace_root) {
        Ok(())
    } else {
        Err(FileToolsError::validation(format!(
            "Path is outside workspace directory: {}",
            resolved.display()
        )))
    }
}

/// Check whether a path is protected from deletion; returns the reason
pub(crate) fn protected_reason(path: &Path) -> Option<String> {
    let path_str = path.to_string_lossy();
    for sys_path in SYSTEM_PROTECTED_PATHS.iter() {
        if path_str.eq_ignore_ascii_case(sys_path)
            || path_str
                .trim_end_matches(['/', '\\'])
                .eq_ignore_ascii_case(sys_path.trim_end_matches(['/', '\\']))
        {
            return Some(format!("system protected path: {}", sys_path));
        }
    }

    for pattern in PROTECTED_PATTERNS.iter() {
        if path.components().any(|c| c.as_os_str() == *pattern) {
            return Some(format!("protected path pattern: {}", pattern));
        }
    }
    None
}

/// Format a byte count in human-readable units
pub(crate) fn human_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if size < 1024 {
        return format!("{}B", size);
    }
    let mut value = size as f64 / 1024.0;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.1}{}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1}PB", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_and_absolute() {
        let root = Path::new("/workspace");
        assert_eq!(resolve(root, Path::new("src/main.rs")), PathBuf::from("/workspace/src/main.rs"));
        assert_eq!(resolve(root, Path::new("/etc/passwd")), PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn test_normalize_parent_components() {
        let root = Path::new("/workspace");
        let resolved = resolve(root, Path::new("src/../../../etc/passwd"));
        assert_eq!(resolved, PathBuf::from("/etc/passwd"));
        assert!(validate_inside(root, &resolved).is_err());
    }

    #[test]
    fn test_validate_inside() {
        let root = Path::new("/workspace");
        assert!(validate_inside(root, Path::new("/workspace/a.txt")).is_ok());
        assert!(validate_inside(root, Path::new("/other/a.txt")).is_err());
    }

    #[test]
    fn test_protected_patterns() {
        assert!(protected_reason(Path::new("/ws/.git")).is_some());
        assert!(protected_reason(Path::new("/ws/node_modules/pkg/index.js")).is_some());
        assert!(protected_reason(Path::new("/ws/src/main.rs")).is_none());
    }

    #[test]
    fn test_system_roots_protected() {
        assert!(protected_reason(Path::new("/")).is_some());
        assert!(protected_reason(Path::new("/usr")).is_some());
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(2048), "2.0KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0MB");
    }
}
