use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structured information about one commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    pub author_email: String,
    /// Author date, ISO 8601 as emitted by git
    pub date: String,
    pub subject: String,
    /// Message body (without the subject line)
    pub message: String,
    pub files_changed: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
    /// Truncated diff content when requested
    pub diff_preview: String,
    pub relevance_score: f32,
}

/// Request for relevance-ranked commit search
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub repo_path: PathBuf,
    pub max_results: usize,
    pub include_diffs: bool,
    pub diff_context_lines: usize,
    pub max_diff_length: usize,
    pub date_after: Option<String>,
    pub date_before: Option<String>,
    pub author: Option<String>,
    pub path_filter: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            repo_path: repo_path.into(),
            max_results: 10,
            include_diffs: true,
            diff_context_lines: 3,
            max_diff_length: 1000,
            date_after: None,
            date_before: None,
            author: None,
            path_filter: None,
            branch: None,
            tag: None,
        }
    }
}

/// Result of a commit search
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub commits: Vec<CommitInfo>,
    pub total_commits_searched: usize,
    pub query: String,
}

/// A single line from blame output
#[derive(Debug, Clone, Serialize)]
pub struct BlameLine {
    pub line_number: usize,
    pub commit_hash: String,
    pub author: String,
    pub author_email: String,
    /// Author time as a unix timestamp string, as emitted by porcelain
    pub date: String,
    pub content: String,
}

/// Result of a blame operation
#[derive(Debug, Clone)]
pub struct BlameResult {
    pub file_path: String,
    pub lines: Vec<BlameLine>,
}

/// Result of a diff between two refs
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub from_ref: String,
    pub to_ref: String,
    pub diff_content: String,
    pub files_changed: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
}
