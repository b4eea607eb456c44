use crate::error::{ContentStoreError, Result};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use uuid::Uuid;

/// Configuration for the content store
#[derive(Debug, Clone)]
pub struct ContentStoreConfig {
    /// How long references stay retrievable
    pub expiry: Duration,

    /// Hard cap on stored references
    pub max_references: usize,

    /// Hard cap on matches returned by a single search
    pub max_search_results: usize,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::hours(1),
            max_references: 100,
            max_search_results: 100,
        }
    }
}

/// Reference to stored truncated content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentReference {
    /// Short shareable id
    pub reference_id: String,

    /// The stored content
    pub content: String,

    /// Source description (file path, command line, ...)
    pub source: String,

    /// Line count of the content
    pub total_lines: usize,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Caller-supplied metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Decorated view of a line range from a reference
#[derive(Debug, Clone)]
pub struct RangeView {
    pub reference_id: String,
    /// Lines decorated with right-aligned 6-digit line numbers
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub total_lines: usize,
}

/// Request to search within a stored reference
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub reference_id: String,
    pub pattern: String,
    pub use_regex: bool,
    pub case_sensitive: bool,
    /// Lines of context before and after each match
    pub context_lines: usize,
}

impl SearchRequest {
    pub fn new(reference_id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            pattern: pattern.into(),
            use_regex: false,
            case_sensitive: false,
            context_lines: 2,
        }
    }

    pub fn regex(mut self, use_regex: bool) -> Self {
        self.use_regex = use_regex;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn context_lines(mut self, context_lines: usize) -> Self {
        self.context_lines = context_lines;
        self
    }
}

/// A single search match with decorated context lines
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub line_number: usize,
    pub line_content: String,
    /// Byte offset of the match within the line
    pub match_start: usize,
    pub match_end: usize,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

/// Result of searching a stored reference
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub reference_id: String,
    pub matches: Vec<SearchMatch>,
    pub total_matches: usize,
    pub total_lines: usize,
    /// True when the match cap was hit
    pub truncated: bool,
}

struct StoreInner {
    cache: LruCache<String, ContentReference>,
    total_size: usize,
}

/// Keyed cache of truncated content for later retrieval
///
/// References expire after a configured TTL and are evicted oldest-first when
/// the count cap is reached. Expired entries are swept lazily on every access
/// and proactively before each insert.
pub struct ContentStore {
    config: ContentStoreConfig,
    inner: Mutex<StoreInner>,
}

fn decorate(line_number: usize, line: &str) -> String {
    format!("{:>6}\t{}", line_number, line)
}

impl ContentStore {
    pub fn new(config: ContentStoreConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_references.max(1)).expect("non-zero cap");
        Self {
            config,
            inner: Mutex::new(StoreInner {
                cache: LruCache::new(cap),
                total_size: 0,
            }),
        }
    }

    /// Store content and return its reference id
    pub fn store_content(
        &self,
        content: impl Into<String>,
        source: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> String {
        let content = content.into();
        let source = source.into();
        let mut inner = self.inner.lock().expect("content store poisoned");

        Self::sweep_expired(&mut inner);
        while inner.cache.len() >= self.config.max_references {
            if let Some((id, evicted)) = inner.cache.pop_lru() {
                inner.total_size -= evicted.content.len();
                log::debug!("Evicted oldest reference {} to stay under cap", id);
            } else {
                break;
            }
        }

        let reference_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let now = Utc::now();
        let total_lines = content.split('\n').count();
        let size = content.len();

        let reference = ContentReference {
            reference_id: reference_id.clone(),
            content,
            source: source.clone(),
            total_lines,
            created_at: now,
            expires_at: now + self.config.expiry,
            metadata,
        };

        inner.cache.push(reference_id.clone(), reference);
        inner.total_size += size;

        log::info!(
            "Stored content reference {}: {} lines from {}",
            reference_id,
            total_lines,
            source
        );
        reference_id
    }

    /// Look up a reference, sweeping expired entries first
    pub fn get_reference(&self, reference_id: &str) -> Option<ContentReference> {
        let mut inner = self.inner.lock().expect("content store poisoned");
        Self::sweep_expired(&mut inner);
        // peek keeps insertion order intact so eviction stays oldest-first
        inner.cache.peek(reference_id).cloned()
    }

    /// View a 1-based inclusive line range from a stored reference
    ///
    /// `end_line` past the end of the content is clamped silently; a start
    /// before line 1, after the end, or past `end_line` is rejected.
    pub fn view_range(
        &self,
        reference_id: &str,
        start_line: usize,
        end_line: usize,
    ) -> Result<RangeView> {
        let reference = self
            .get_reference(reference_id)
            .ok_or_else(|| ContentStoreError::ReferenceNotFound(reference_id.to_string()))?;

        let lines: Vec<&str> = reference.content.split('\n').collect();
        let total_lines = lines.len();

        if start_line < 1 || end_line < 1 {
            return Err(ContentStoreError::invalid_range("Line numbers must be >= 1"));
        }
        if start_line > end_line {
            return Err(ContentStoreError::invalid_range(format!(
                "Start line ({}) cannot be greater than end line ({})",
                start_line, end_line
            )));
        }
        if start_line > total_lines {
            return Err(ContentStoreError::invalid_range(format!(
                "Start line ({}) exceeds total lines ({})",
                start_line, total_lines
            )));
        }

        let end_line = end_line.min(total_lines);
        let content = lines[start_line - 1..end_line]
            .iter()
            .enumerate()
            .map(|(offset, line)| decorate(start_line + offset, line))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(RangeView {
            reference_id: reference_id.to_string(),
            content,
            start_line,
            end_line,
            total_lines,
        })
    }

    /// Search within a stored reference, with context lines around matches
    pub fn search(&self, request: &SearchRequest) -> Result<SearchReport> {
        let reference = self
            .get_reference(&request.reference_id)
            .ok_or_else(|| ContentStoreError::ReferenceNotFound(request.reference_id.clone()))?;

        let pattern = if request.use_regex {
            request.pattern.clone()
        } else {
            regex::escape(&request.pattern)
        };
        let matcher = RegexBuilder::new(&pattern)
            .case_insensitive(!request.case_sensitive)
            .build()
            .map_err(|e| ContentStoreError::RegexError(e.to_string()))?;

        let lines: Vec<&str> = reference.content.split('\n').collect();
        let total_lines = lines.len();
        let cap = self.config.max_search_results;

        let mut matches = Vec::new();
        let mut truncated = false;

        'outer: for (idx, line) in lines.iter().enumerate() {
            for found in matcher.find_iter(line) {
                if matches.len() >= cap {
                    truncated = true;
                    break 'outer;
                }

                let line_number = idx + 1;
                let context_before = (idx.saturating_sub(request.context_lines)..idx)
                    .map(|i| decorate(i + 1, lines[i]))
                    .collect();
                let context_after = (idx + 1..(idx + 1 + request.context_lines).min(total_lines))
                    .map(|i| decorate(i + 1, lines[i]))
                    .collect();

                matches.push(SearchMatch {
                    line_number,
                    line_content: (*line).to_string(),
                    match_start: found.start(),
                    match_end: found.end(),
                    context_before,
                    context_after,
                });
            }
        }

        if matches.is_empty() {
            return Err(ContentStoreError::NoMatches(request.pattern.clone()));
        }

        let total_matches = matches.len();
        Ok(SearchReport {
            reference_id: request.reference_id.clone(),
            matches,
            total_matches,
            total_lines,
            truncated,
        })
    }

    /// Render a search report with match markers and separators
    pub fn format_search_results(report: &SearchReport) -> String {
        let mut output = Vec::new();
        for m in &report.matches {
            output.extend(m.context_before.iter().cloned());

            let highlighted = format!(
                "{}>>>{}<<<{}",
                &m.line_content[..m.match_start],
                &m.line_content[m.match_start..m.match_end],
                &m.line_content[m.match_end..]
            );
            output.push(decorate(m.line_number, &highlighted));

            output.extend(m.context_after.iter().cloned());
            output.push("...".to_string());
        }
        output.join("\n")
    }

    /// All unexpired references, oldest first
    pub fn list_references(&self) -> Vec<ContentReference> {
        let mut inner = self.inner.lock().expect("content store poisoned");
        Self::sweep_expired(&mut inner);
        let mut refs: Vec<ContentReference> = inner.cache.iter().map(|(_, r)| r.clone()).collect();
        refs.sort_by_key(|r| r.created_at);
        refs
    }

    /// Drop all references
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("content store poisoned");
        inner.cache.clear();
        inner.total_size = 0;
    }

    /// Number of unexpired references
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().expect("content store poisoned");
        Self::sweep_expired(&mut inner);
        inner.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes currently stored
    pub fn total_size(&self) -> usize {
        self.inner.lock().expect("content store poisoned").total_size
    }

    fn sweep_expired(inner: &mut StoreInner) {
        let now = Utc::now();
        let expired: Vec<String> = inner
            .cache
            .iter()
            .filter(|(_, r)| r.expires_at < now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(removed) = inner.cache.pop(&id) {
                inner.total_size -= removed.content.len();
                log::debug!("Removed expired reference: {}", id);
            }
        }
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new(ContentStoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> ContentStore {
        ContentStore::default()
    }

    fn strip_decoration(decorated: &str) -> String {
        decorated
            .split('\n')
            .map(|line| line.split_once('\t').map(|(_, rest)| rest).unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_store_and_roundtrip() {
        let store = store();
        let content = "alpha\nbeta\ngamma";
        let id = store.store_content(content, "test.txt", HashMap::new());
        assert_eq!(id.len(), 8);

        let view = store.view_range(&id, 1, 3).unwrap();
        assert_eq!(strip_decoration(&view.content), content);
        assert_eq!(view.total_lines, 3);
    }

    #[test]
    fn test_roundtrip_preserves_trailing_newline() {
        let store = store();
        let content = "alpha\nbeta\n";
        let id = store.store_content(content, "", HashMap::new());

        let reference = store.get_reference(&id).unwrap();
        assert_eq!(reference.total_lines, 3);

        let view = store.view_range(&id, 1, reference.total_lines).unwrap();
        assert_eq!(strip_decoration(&view.content), content);
    }

    #[test]
    fn test_view_range_clamps_end() {
        let store = store();
        let id = store.store_content("a\nb\nc", "", HashMap::new());
        let view = store.view_range(&id, 2, 100).unwrap();
        assert_eq!(view.end_line, 3);
        assert_eq!(strip_decoration(&view.content), "b\nc");
    }

    #[test]
    fn test_view_range_rejects_bad_ranges() {
        let store = store();
        let id = store.store_content("a\nb", "", HashMap::new());

        assert!(matches!(
            store.view_range(&id, 0, 1),
            Err(ContentStoreError::InvalidRange(_))
        ));
        assert!(matches!(
            store.view_range(&id, 2, 1),
            Err(ContentStoreError::InvalidRange(_))
        ));
        assert!(matches!(
            store.view_range(&id, 5, 6),
            Err(ContentStoreError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_view_range_unknown_reference() {
        let store = store();
        assert!(matches!(
            store.view_range("nope1234", 1, 1),
            Err(ContentStoreError::ReferenceNotFound(_))
        ));
    }

    #[test]
    fn test_search_plain_text() {
        let store = store();
        let id = store.store_content("one\ntwo target\nthree\nfour target", "", HashMap::new());

        let report = store.search(&SearchRequest::new(&id, "target")).unwrap();
        assert_eq!(report.total_matches, 2);
        assert_eq!(report.matches[0].line_number, 2);
        assert_eq!(report.matches[1].line_number, 4);
        assert!(!report.truncated);
    }

    #[test]
    fn test_search_regex_and_context() {
        let store = store();
        let id = store.store_content("a\nfn alpha()\nb\nc\nfn beta()\nd", "", HashMap::new());

        let request = SearchRequest::new(&id, r"fn \w+\(\)").regex(true).context_lines(1);
        let report = store.search(&request).unwrap();
        assert_eq!(report.total_matches, 2);
        assert_eq!(report.matches[0].context_before.len(), 1);
        assert_eq!(report.matches[0].context_after.len(), 1);
    }

    #[test]
    fn test_search_case_insensitive_by_default() {
        let store = store();
        let id = store.store_content("Hello World", "", HashMap::new());
        let report = store.search(&SearchRequest::new(&id, "hello world")).unwrap();
        assert_eq!(report.total_matches, 1);

        let sensitive = SearchRequest::new(&id, "hello world").case_sensitive(true);
        assert!(matches!(
            store.search(&sensitive),
            Err(ContentStoreError::NoMatches(_))
        ));
    }

    #[test]
    fn test_search_invalid_regex() {
        let store = store();
        let id = store.store_content("text", "", HashMap::new());
        let request = SearchRequest::new(&id, "[unclosed").regex(true);
        assert!(matches!(
            store.search(&request),
            Err(ContentStoreError::RegexError(_))
        ));
    }

    #[test]
    fn test_search_cap_reported() {
        let store = ContentStore::new(ContentStoreConfig {
            max_search_results: 3,
            ..Default::default()
        });
        let content = (0..10).map(|i| format!("hit {}", i)).collect::<Vec<_>>().join("\n");
        let id = store.store_content(content, "", HashMap::new());

        let report = store.search(&SearchRequest::new(&id, "hit")).unwrap();
        assert_eq!(report.total_matches, 3);
        assert!(report.truncated);
    }

    #[test]
    fn test_count_cap_evicts_oldest() {
        let store = ContentStore::new(ContentStoreConfig {
            max_references: 2,
            ..Default::default()
        });
        let first = store.store_content("first", "", HashMap::new());
        let second = store.store_content("second", "", HashMap::new());
        let third = store.store_content("third", "", HashMap::new());

        assert!(store.get_reference(&first).is_none());
        assert!(store.get_reference(&second).is_some());
        assert!(store.get_reference(&third).is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expired_reference_not_returned() {
        let store = ContentStore::new(ContentStoreConfig {
            expiry: Duration::seconds(-1),
            ..Default::default()
        });
        let id = store.store_content("gone", "", HashMap::new());
        assert!(store.get_reference(&id).is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_size(), 0);
    }

    #[test]
    fn test_format_search_results_markers() {
        let store = store();
        let id = store.store_content("before\nthe target line\nafter", "", HashMap::new());
        let report = store
            .search(&SearchRequest::new(&id, "target").context_lines(1))
            .unwrap();

        let rendered = ContentStore::format_search_results(&report);
        assert!(rendered.contains(">>>target<<<"));
        assert!(rendered.contains("..."));
    }

    #[test]
    fn test_clear() {
        let store = store();
        store.store_content("data", "", HashMap::new());
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_size(), 0);
    }
}
