use crate::error::{GitError, Result};
use crate::git::{commit_count, is_repository, run_git};
use crate::types::{
    BlameLine, BlameResult, CommitInfo, DiffResult, RetrievalResult, SearchRequest,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

const LOG_FORMAT: &str =
    "HASH:%H%nSHORT:%h%nAUTHOR:%an%nEMAIL:%ae%nDATE:%aI%nSUBJECT:%s%nBODY:%b%n---COMMIT_END---";
const MAX_COMMITS_SEARCHED: usize = 500;

static INSERTIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+) insertions?\(\+\)").expect("insertions pattern"));
static DELETIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+) deletions?\(-\)").expect("deletions pattern"));
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("token pattern"));

/// Relevance-ranked retrieval over git commit history
pub struct GitRetrieval {
    workspace_root: PathBuf,
}

impl GitRetrieval {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    /// Search commit history with relevance scoring
    pub async fn search(&self, request: &SearchRequest) -> Result<RetrievalResult> {
        let repo = self.resolve(&request.repo_path);

        if !is_repository(&repo).await {
            return Err(GitError::NotARepository(repo));
        }
        let total = commit_count(&repo).await?;
        if total == 0 {
            return Err(GitError::NoCommits);
        }

        let format_arg = format!("--format={}", LOG_FORMAT);
        let count_arg = format!("-n{}", total.min(MAX_COMMITS_SEARCHED));
        let mut args: Vec<String> = vec!["log".into(), format_arg, count_arg];

        if let Some(after) = &request.date_after {
            args.push(format!("--after={}", after));
        }
        if let Some(before) = &request.date_before {
            args.push(format!("--before={}", before));
        }
        if let Some(author) = &request.author {
            args.push(format!("--author={}", author));
        }
        if let Some(branch) = &request.branch {
            args.push(branch.clone());
        } else if let Some(tag) = &request.tag {
            args.push(format!("refs/tags/{}", tag));
        }
        if let Some(path_filter) = &request.path_filter {
            args.push("--".into());
            args.push(path_filter.clone());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = run_git(&arg_refs, &repo).await?;
        if !output.success {
            return Err(GitError::CommandFailed(output.stderr.trim().to_string()));
        }

        let raw_commits = parse_commit_log(&output.stdout);
        let searched = raw_commits.len();

        let query_tokens: Vec<String> = TOKEN
            .find_iter(&request.query)
            .map(|m| m.as_str().to_lowercase())
            .filter(|t| t.len() >= 2)
            .collect();

        let mut scored: Vec<CommitInfo> = raw_commits
            .into_iter()
            .map(|mut commit| {
                commit.relevance_score = relevance(&commit, &request.query, &query_tokens);
                commit
            })
            .filter(|commit| commit.relevance_score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(request.max_results);

        if scored.is_empty() {
            return Err(GitError::NoMatches(request.query.clone()));
        }

        for commit in &mut scored {
            let (files, insertions, deletions) = commit_stats(&commit.hash, &repo).await?;
            commit.files_changed = files;
            commit.insertions = insertions;
            commit.deletions = deletions;

            if request.include_diffs {
                commit.diff_preview = commit_diff(
                    &commit.hash,
                    &repo,
                    request.diff_context_lines,
                    request.max_diff_length,
                )
                .await?;
            }
        }

        log::info!(
            "Query '{}' matched {} of {} commits",
            request.query,
            scored.len(),
            searched
        );
        Ok(RetrievalResult {
            commits: scored,
            total_commits_searched: searched,
            query: request.query.clone(),
        })
    }

    /// Fetch one commit's full structured info
    pub async fn get_commit(
        &self,
        commit_hash: &str,
        repo_path: impl AsRef<Path>,
    ) -> Result<CommitInfo> {
        let repo = self.resolve(repo_path.as_ref());
        if !is_repository(&repo).await {
            return Err(GitError::NotARepository(repo));
        }

        let format_arg = format!("--format={}", LOG_FORMAT);
        let output = run_git(&["show", &format_arg, "-s", commit_hash], &repo).await?;
        if !output.success {
            return Err(GitError::CommitNotFound(commit_hash.to_string()));
        }

        let mut commits = parse_commit_log(&output.stdout);
        let mut commit = commits
            .drain(..)
            .next()
            .ok_or_else(|| GitError::CommitNotFound(commit_hash.to_string()))?;

        let (files, insertions, deletions) = commit_stats(&commit.hash, &repo).await?;
        commit.files_changed = files;
        commit.insertions = insertions;
        commit.deletions = deletions;
        commit.diff_preview = commit_diff(&commit.hash, &repo, 3, 1000).await?;
        commit.relevance_score = 1.0;

        Ok(commit)
    }

    /// Per-line blame for a file, optionally restricted to a line range
    pub async fn blame(
        &self,
        file_path: &str,
        repo_path: impl AsRef<Path>,
        range: Option<(usize, usize)>,
    ) -> Result<BlameResult> {
        let repo = self.resolve(repo_path.as_ref());
        if !is_repository(&repo).await {
            return Err(GitError::NotARepository(repo));
        }

        let mut args: Vec<String> = vec!["blame".into(), "--line-porcelain".into()];
        if let Some((start, end)) = range {
            args.push(format!("-L{},{}", start, end));
        }
        args.push(file_path.to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = run_git(&arg_refs, &repo).await?;
        if !output.success {
            return Err(GitError::CommandFailed(output.stderr.trim().to_string()));
        }

        Ok(BlameResult {
            file_path: file_path.to_string(),
            lines: parse_blame(&output.stdout, range.map(|(start, _)| start).unwrap_or(1)),
        })
    }

    /// Diff between two refs, with per-file changes and aggregate counts
    pub async fn diff(
        &self,
        from_ref: &str,
        to_ref: &str,
        repo_path: impl AsRef<Path>,
        file_path: Option<&str>,
        context_lines: usize,
    ) -> Result<DiffResult> {
        let repo = self.resolve(repo_path.as_ref());
        if !is_repository(&repo).await {
            return Err(GitError::NotARepository(repo));
        }

        let context_arg = format!("-U{}", context_lines);
        let mut args: Vec<&str> = vec!["diff", &context_arg, from_ref, to_ref];
        if let Some(file) = file_path {
            args.push("--");
            args.push(file);
        }

        let output = run_git(&args, &repo).await?;
        if !output.success {
            return Err(GitError::CommandFailed(output.stderr.trim().to_string()));
        }

        let mut files_changed = Vec::new();
        let mut insertions = 0;
        let mut deletions = 0;
        for line in output.stdout.lines() {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                if let Some(b_side) = rest.split(' ').nth(1) {
                    files_changed.push(b_side.trim_start_matches("b/").to_string());
                }
            } else if line.starts_with('+') && !line.starts_with("+++") {
                insertions += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                deletions += 1;
            }
        }

        Ok(DiffResult {
            from_ref: from_ref.to_string(),
            to_ref: to_ref.to_string(),
            diff_content: output.stdout,
            files_changed,
            insertions,
            deletions,
        })
    }

    /// Local branch names
    pub async fn list_branches(&self, repo_path: impl AsRef<Path>) -> Result<Vec<String>> {
        let repo = self.resolve(repo_path.as_ref());
        let output = run_git(&["branch", "--format=%(refname:short)"], &repo).await?;
        if !output.success {
            return Err(GitError::CommandFailed(output.stderr.trim().to_string()));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Tag names
    pub async fn list_tags(&self, repo_path: impl AsRef<Path>) -> Result<Vec<String>> {
        let repo = self.resolve(repo_path.as_ref());
        let output = run_git(&["tag", "-l"], &repo).await?;
        if !output.success {
            return Err(GitError::CommandFailed(output.stderr.trim().to_string()));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Score a commit against the query: whole-phrase subject +10, body +5;
/// per-token subject +3, body +2, author +1
fn relevance(commit: &CommitInfo, query: &str, tokens: &[String]) -> f32 {
    let query_lower = query.to_lowercase();
    let subject = commit.subject.to_lowercase();
    let message = commit.message.to_lowercase();
    let author = commit.author.to_lowercase();

    let mut score = 0.0;
    if subject.contains(&query_lower) {
        score += 10.0;
    }
    if message.contains(&query_lower) {
        score += 5.0;
    }

    for token in tokens {
        if subject.contains(token) {
            score += 3.0;
        }
        if message.contains(token) {
            score += 2.0;
        }
        if author.contains(token) {
            score += 1.0;
        }
    }
    score
}

fn parse_commit_log(log_output: &str) -> Vec<CommitInfo> {
    let mut commits = Vec::new();

    for entry in log_output.split("---COMMIT_END---") {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut commit = CommitInfo::default();
        let mut body_lines: Vec<&str> = Vec::new();
        let mut in_body = false;

        for line in entry.lines() {
            if let Some(value) = line.strip_prefix("HASH:") {
                commit.hash = value.trim().to_string();
                in_body = false;
            } else if let Some(value) = line.strip_prefix("SHORT:") {
                commit.short_hash = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("AUTHOR:") {
                commit.author = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("EMAIL:") {
                commit.author_email = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("DATE:") {
                commit.date = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("SUBJECT:") {
                commit.subject = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("BODY:") {
                body_lines.push(value);
                in_body = true;
            } else if in_body {
                body_lines.push(line);
            }
        }

        commit.message = body_lines.join("\n").trim().to_string();
        if !commit.hash.is_empty() {
            commits.push(commit);
        }
    }

    commits
}

async fn commit_stats(hash: &str, repo: &Path) -> Result<(Vec<String>, usize, usize)> {
    let names = run_git(&["show", "--name-only", "--format=", hash], repo).await?;
    let files: Vec<String> = names
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let stat = run_git(&["show", "--shortstat", "--format=", hash], repo).await?;
    let insertions = INSERTIONS
        .captures(&stat.stdout)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let deletions = DELETIONS
        .captures(&stat.stdout)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);

    Ok((files, insertions, deletions))
}

async fn commit_diff(
    hash: &str,
    repo: &Path,
    context_lines: usize,
    max_length: usize,
) -> Result<String> {
    let context_arg = format!("-U{}", context_lines);
    let output = run_git(&["show", &context_arg, "--format=", hash], repo).await?;
    if !output.success {
        return Ok(String::new());
    }

    let diff = output.stdout.trim();
    if diff.len() > max_length {
        let mut truncated = diff
            .char_indices()
            .take_while(|(idx, _)| *idx < max_length)
            .map(|(_, c)| c)
            .collect::<String>();
        truncated.push_str("\n... (truncated)");
        Ok(truncated)
    } else {
        Ok(diff.to_string())
    }
}

fn parse_blame(porcelain: &str, start_line: usize) -> Vec<BlameLine> {
    let mut lines = Vec::new();
    let mut line_number = start_line;
    let mut hash = String::new();
    let mut author = String::new();
    let mut author_email = String::new();
    let mut date = String::new();

    for line in porcelain.lines() {
        if let Some(content) = line.strip_prefix('\t') {
            lines.push(BlameLine {
                line_number,
                commit_hash: hash.clone(),
                author: author.clone(),
                author_email: author_email.clone(),
                date: date.clone(),
                content: content.to_string(),
            });
            line_number += 1;
        } else if let Some((key, value)) = line.split_once(' ') {
            if key.len() == 40 && key.chars().all(|c| c.is_ascii_hexdigit()) {
                hash = key.to_string();
            } else {
                match key {
                    "author" => author = value.to_string(),
                    "author-mail" => {
                        author_email = value.trim_matches(['<', '>']).to_string();
                    }
                    "author-time" => date = value.to_string(),
                    _ => {}
                }
            }
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn git_in(dir: &Path, args: &[&str]) {
        let output = run_git(args, dir).await.unwrap();
        assert!(output.success, "git {:?} failed: {}", args, output.stderr);
    }

    async fn repo_with_commits() -> TempDir {
        let dir = TempDir::new().unwrap();
        let path = dir.path();
        git_in(path, &["init", "-q", "-b", "main"]).await;
        git_in(path, &["config", "user.email", "dev@example.com"]).await;
        git_in(path, &["config", "user.name", "Dev Author"]).await;

        std::fs::write(path.join("auth.py"), "def login():\n    pass\n").unwrap();
        git_in(path, &["add", "."]).await;
        git_in(path, &["commit", "-q", "-m", "Add authentication module"]).await;

        std::fs::write(path.join("auth.py"), "def login():\n    return True\n").unwrap();
        git_in(path, &["add", "."]).await;
        git_in(
            path,
            &["commit", "-q", "-m", "Fix authentication bug in login"],
        )
        .await;

        std::fs::write(path.join("docs.md"), "# docs\n").unwrap();
        git_in(path, &["add", "."]).await;
        git_in(path, &["commit", "-q", "-m", "Write documentation"]).await;

        dir
    }

    #[tokio::test]
    async fn test_search_ranks_phrase_match_first() {
        let repo = repo_with_commits().await;
        let retrieval = GitRetrieval::new(repo.path());

        let result = retrieval
            .search(&SearchRequest::new("authentication bug", "."))
            .await
            .unwrap();

        assert!(!result.commits.is_empty());
        assert!(result.commits[0].subject.contains("Fix authentication bug"));
        assert!(result.commits[0].relevance_score >= 10.0);
        assert_eq!(result.total_commits_searched, 3);
    }

    #[tokio::test]
    async fn test_search_includes_stats_and_diff() {
        let repo = repo_with_commits().await;
        let retrieval = GitRetrieval::new(repo.path());

        let result = retrieval
            .search(&SearchRequest::new("authentication", "."))
            .await
            .unwrap();

        let top = &result.commits[0];
        assert!(top.files_changed.iter().any(|f| f == "auth.py"));
        assert!(!top.diff_preview.is_empty());
    }

    #[tokio::test]
    async fn test_search_not_a_repository() {
        let dir = TempDir::new().unwrap();
        let retrieval = GitRetrieval::new(dir.path());

        let err = retrieval
            .search(&SearchRequest::new("anything", "."))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::NotARepository(_)));
    }

    #[tokio::test]
    async fn test_search_empty_repository() {
        let dir = TempDir::new().unwrap();
        git_in(dir.path(), &["init", "-q"]).await;
        let retrieval = GitRetrieval::new(dir.path());

        let err = retrieval
            .search(&SearchRequest::new("anything", "."))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::NoCommits));
    }

    #[tokio::test]
    async fn test_search_no_matches() {
        let repo = repo_with_commits().await;
        let retrieval = GitRetrieval::new(repo.path());

        let err = retrieval
            .search(&SearchRequest::new("zzqqxyzzy", "."))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::NoMatches(_)));
    }

    #[tokio::test]
    async fn test_get_commit() {
        let repo = repo_with_commits().await;
        let retrieval = GitRetrieval::new(repo.path());

        let found = retrieval
            .search(&SearchRequest::new("documentation", "."))
            .await
            .unwrap();
        let hash = found.commits[0].hash.clone();

        let commit = retrieval.get_commit(&hash, ".").await.unwrap();
        assert_eq!(commit.hash, hash);
        assert_eq!(commit.subject, "Write documentation");

        let missing = retrieval.get_commit("0000000000000000", ".").await;
        assert!(matches!(missing, Err(GitError::CommitNotFound(_))));
    }

    #[tokio::test]
    async fn test_blame_lines() {
        let repo = repo_with_commits().await;
        let retrieval = GitRetrieval::new(repo.path());

        let blame = retrieval.blame("auth.py", ".", None).await.unwrap();
        assert_eq!(blame.lines.len(), 2);
        assert_eq!(blame.lines[0].line_number, 1);
        assert_eq!(blame.lines[0].author, "Dev Author");
        assert_eq!(blame.lines[0].content, "def login():");
    }

    #[tokio::test]
    async fn test_diff_between_refs() {
        let repo = repo_with_commits().await;
        let retrieval = GitRetrieval::new(repo.path());

        let diff = retrieval
            .diff("HEAD~2", "HEAD", ".", None, 3)
            .await
            .unwrap();
        assert!(diff.files_changed.iter().any(|f| f == "auth.py"));
        assert!(diff.files_changed.iter().any(|f| f == "docs.md"));
        assert!(diff.insertions > 0);
    }

    #[tokio::test]
    async fn test_list_branches_and_tags() {
        let repo = repo_with_commits().await;
        let retrieval = GitRetrieval::new(repo.path());
        git_in(repo.path(), &["tag", "v1.0"]).await;

        let branches = retrieval.list_branches(".").await.unwrap();
        assert!(branches.iter().any(|b| b == "main"));

        let tags = retrieval.list_tags(".").await.unwrap();
        assert_eq!(tags, vec!["v1.0"]);
    }
}
