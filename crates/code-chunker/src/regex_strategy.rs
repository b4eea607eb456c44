use crate::language::Language;
use crate::split::slice_lines;
use crate::types::{ChunkMetadata, ChunkType, CodeChunk};
use once_cell::sync::Lazy;
use regex::Regex;

static PY_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)(?:async\s+)?def\s+(\w+)").expect("py def pattern"));
static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^class\s+(\w+)").expect("py class pattern"));

static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^import\s+.*?from\s+['"][^'"]+['"];?"#).expect("js import pattern")
});
static JS_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)\s*\([^)]*\)\s*\{")
        .expect("js function pattern")
});
static JS_ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?\([^)]*\)\s*=>\s*\{")
        .expect("js arrow pattern")
});
static JS_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:export\s+)?class\s+(\w+)(?:\s+extends\s+[\w.]+)?\s*\{")
        .expect("js class pattern")
});

static RUST_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]+"\s+)?fn\s+(\w+)"#)
        .expect("rust fn pattern")
});
static RUST_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(\w+)")
        .expect("rust type pattern")
});
static RUST_IMPL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^impl(?:<[^>]*>)?\s+(?:[\w:]+\s+for\s+)?([\w:]+)").expect("rust impl pattern")
});

static GO_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^func\s+(\([^)]*\)\s+)?(\w+)\s*\(").expect("go func pattern")
});
static GO_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^type\s+(\w+)\s+(?:struct|interface)\s*\{").expect("go type pattern")
});

static MD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("md heading pattern"));
static MD_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^```(\w+)?").expect("md fence pattern"));

/// Regex-based chunking strategy
///
/// Language-specific patterns for functions, arrow functions, classes, and
/// imports; brace matching and indentation tracking extract block bodies.
/// Content that yields no structured chunk falls back to fixed-size text
/// blocks on line boundaries.
pub struct RegexStrategy {
    max_chunk_size: usize,
}

impl RegexStrategy {
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    pub fn chunk(&self, content: &str, file_path: &str, language: Language) -> Vec<CodeChunk> {
        let lines: Vec<&str> = content.split('\n').collect();

        let mut chunks = match language {
            Language::Python => self.chunk_python(content, &lines, file_path),
            Language::JavaScript | Language::TypeScript => {
                self.chunk_js(content, &lines, file_path, language)
            }
            Language::Rust => self.chunk_rust(content, &lines, file_path),
            Language::Go => self.chunk_go(content, &lines, file_path),
            Language::Markdown => self.chunk_markdown(&lines, file_path),
            Language::Unknown => Vec::new(),
        };

        if chunks.is_empty() {
            chunks = self.fallback(&lines, file_path, language);
        }

        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        chunks
    }

    fn chunk_python(&self, _content: &str, lines: &[&str], file_path: &str) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();

        if let Some((start, end)) = module_docstring_range(lines) {
            chunks.push(make_chunk(
                lines,
                file_path,
                start,
                end,
                Language::Python,
                ChunkType::Docstring,
                None,
                None,
            ));
        }

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("import ")
                || (trimmed.starts_with("from ") && trimmed.contains(" import "))
            {
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    idx + 1,
                    idx + 1,
                    Language::Python,
                    ChunkType::Import,
                    None,
                    None,
                ));
            }
        }

        // Classes first so methods can resolve their parent scope
        let mut class_ranges: Vec<(usize, usize, String)> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(captures) = PY_CLASS.captures(line) {
                let name = captures[1].to_string();
                let end = indent_block_end(lines, idx, 0);
                class_ranges.push((idx + 1, end + 1, name.clone()));
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    idx + 1,
                    end + 1,
                    Language::Python,
                    ChunkType::Class,
                    Some(name),
                    None,
                ));
            }
        }

        for (idx, line) in lines.iter().enumerate() {
            let Some(captures) = PY_DEF.captures(line) else {
                continue;
            };
            let indent = captures[1].len();
            let name = captures[2].to_string();
            let end = indent_block_end(lines, idx, indent);
            let line_number = idx + 1;

            if indent == 0 {
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    line_number,
                    end + 1,
                    Language::Python,
                    ChunkType::Function,
                    Some(name),
                    None,
                ));
            } else if let Some((_, _, class_name)) = class_ranges
                .iter()
                .find(|(start, class_end, _)| line_number > *start && line_number <= *class_end)
            {
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    line_number,
                    end + 1,
                    Language::Python,
                    ChunkType::Method,
                    Some(name),
                    Some(class_name.clone()),
                ));
            }
        }

        chunks
    }

    fn chunk_js(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        language: Language,
    ) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();

        for found in JS_IMPORT.find_iter(content) {
            let start = line_of_offset(content, found.start());
            let end = line_of_offset(content, found.end());
            chunks.push(make_chunk(
                lines, file_path, start, end, language, ChunkType::Import, None, None,
            ));
        }

        for (pattern, chunk_type) in [
            (&*JS_FUNCTION, ChunkType::Function),
            (&*JS_ARROW, ChunkType::Function),
            (&*JS_CLASS, ChunkType::Class),
        ] {
            for captures in pattern.captures_iter(content) {
                let whole = captures.get(0).expect("capture 0");
                let name = captures.get(1).map(|m| m.as_str().to_string());
                // The pattern ends at the opening brace
                let Some(close) = brace_block_end(content, whole.end() - 1) else {
                    continue;
                };
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    line_of_offset(content, whole.start()),
                    line_of_offset(content, close),
                    language,
                    chunk_type,
                    name,
                    None,
                ));
            }
        }

        chunks
    }

    fn chunk_rust(&self, content: &str, lines: &[&str], file_path: &str) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();

        let mut idx = 0;
        while idx < lines.len() {
            if lines[idx].starts_with("use ") || lines[idx].starts_with("extern crate ") {
                // Use groups may span lines until the terminating semicolon
                let mut end = idx;
                while end < lines.len() && !lines[end].trim_end().ends_with(';') {
                    end += 1;
                }
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    idx + 1,
                    end.min(lines.len() - 1) + 1,
                    Language::Rust,
                    ChunkType::Import,
                    None,
                    None,
                ));
                idx = end + 1;
            } else {
                idx += 1;
            }
        }

        for captures in RUST_FN.captures_iter(content) {
            let whole = captures.get(0).expect("capture 0");
            if !at_line_start(content, whole.start()) {
                continue;
            }
            let name = captures[1].to_string();
            let Some((_, close)) = block_after(content, whole.end()) else {
                continue;
            };
            chunks.push(make_chunk(
                lines,
                file_path,
                line_of_offset(content, whole.start()),
                line_of_offset(content, close),
                Language::Rust,
                ChunkType::Function,
                Some(name),
                None,
            ));
        }

        for captures in RUST_TYPE.captures_iter(content) {
            let whole = captures.get(0).expect("capture 0");
            if !at_line_start(content, whole.start()) {
                continue;
            }
            let name = captures[1].to_string();
            // Unit and tuple structs terminate at a semicolon, not a block
            let end = match block_after(content, whole.end()) {
                Some((open, close)) if !content[whole.end()..open].contains(';') => close,
                _ => match content[whole.end()..].find(';') {
                    Some(offset) => whole.end() + offset,
                    None => continue,
                },
            };
            chunks.push(make_chunk(
                lines,
                file_path,
                line_of_offset(content, whole.start()),
                line_of_offset(content, end),
                Language::Rust,
                ChunkType::Class,
                Some(name),
                None,
            ));
        }

        for captures in RUST_IMPL.captures_iter(content) {
            let whole = captures.get(0).expect("capture 0");
            if !at_line_start(content, whole.start()) {
                continue;
            }
            let name = captures[1].split('<').next().unwrap_or(&captures[1]).to_string();
            let Some((_, close)) = block_after(content, whole.end()) else {
                continue;
            };
            chunks.push(make_chunk(
                lines,
                file_path,
                line_of_offset(content, whole.start()),
                line_of_offset(content, close),
                Language::Rust,
                ChunkType::Class,
                Some(name),
                None,
            ));
        }

        chunks
    }

    fn chunk_go(&self, content: &str, lines: &[&str], file_path: &str) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            if line.starts_with("import (") {
                let mut end = idx;
                while end < lines.len() && !lines[end].trim_end().ends_with(')') {
                    end += 1;
                }
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    idx + 1,
                    end.min(lines.len() - 1) + 1,
                    Language::Go,
                    ChunkType::Import,
                    None,
                    None,
                ));
            } else if line.starts_with("import ") {
                chunks.push(make_chunk(
                    lines, file_path, idx + 1, idx + 1, Language::Go, ChunkType::Import, None, None,
                ));
            }
        }

        for captures in GO_FUNC.captures_iter(content) {
            let whole = captures.get(0).expect("capture 0");
            let has_receiver = captures.get(1).is_some();
            let name = captures[2].to_string();
            let Some((_, close)) = block_after(content, whole.end()) else {
                continue;
            };
            chunks.push(make_chunk(
                lines,
                file_path,
                line_of_offset(content, whole.start()),
                line_of_offset(content, close),
                Language::Go,
                if has_receiver { ChunkType::Method } else { ChunkType::Function },
                Some(name),
                None,
            ));
        }

        for captures in GO_TYPE.captures_iter(content) {
            let whole = captures.get(0).expect("capture 0");
            let name = captures[1].to_string();
            let Some(close) = brace_block_end(content, whole.end() - 1) else {
                continue;
            };
            chunks.push(make_chunk(
                lines,
                file_path,
                line_of_offset(content, whole.start()),
                line_of_offset(content, close),
                Language::Go,
                ChunkType::Class,
                Some(name),
                None,
            ));
        }

        chunks
    }

    fn chunk_markdown(&self, lines: &[&str], file_path: &str) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();
        let mut section_start = 0usize;
        let mut heading: Option<(String, usize)> = None;

        let flush = |start: usize, end: usize, heading: &Option<(String, usize)>, chunks: &mut Vec<CodeChunk>| {
            if start > end {
                return;
            }
            let body = slice_lines(lines, start + 1, end + 1);
            if body.trim().is_empty() {
                return;
            }

            let mut metadata = ChunkMetadata {
                language: Some(Language::Markdown.as_str().to_string()),
                chunk_type: Some(ChunkType::TextBlock),
                ..Default::default()
            };
            if let Some((text, level)) = heading {
                metadata.name = Some(text.clone());
                metadata
                    .extra
                    .insert("heading_level".to_string(), serde_json::json!(level));
            }
            let fence_langs: Vec<String> = MD_FENCE
                .captures_iter(&body)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect();
            if !fence_langs.is_empty() {
                metadata
                    .extra
                    .insert("code_languages".to_string(), serde_json::json!(fence_langs));
            }

            chunks.push(CodeChunk::new(
                file_path.to_string(),
                start + 1,
                end + 1,
                body,
                metadata,
            ));
        };

        for (idx, line) in lines.iter().enumerate() {
            if let Some(captures) = MD_HEADING.captures(line.trim_end()) {
                if idx > section_start || heading.is_some() {
                    flush(section_start, idx.saturating_sub(1), &heading, &mut chunks);
                }
                heading = Some((captures[2].trim().to_string(), captures[1].len()));
                section_start = idx;
            }
        }
        flush(section_start, lines.len() - 1, &heading, &mut chunks);

        chunks
    }

    fn fallback(&self, lines: &[&str], file_path: &str, language: Language) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();
        let mut block_start = 0usize;
        let mut block_size = 0usize;

        for (idx, line) in lines.iter().enumerate() {
            let line_size = line.len() + 1;
            if block_size + line_size > self.max_chunk_size && idx > block_start {
                chunks.push(make_chunk(
                    lines,
                    file_path,
                    block_start + 1,
                    idx,
                    language,
                    ChunkType::TextBlock,
                    None,
                    None,
                ));
                block_start = idx;
                block_size = 0;
            }
            block_size += line_size;
        }

        let tail = slice_lines(lines, block_start + 1, lines.len());
        if !tail.trim().is_empty() {
            chunks.push(make_chunk(
                lines,
                file_path,
                block_start + 1,
                lines.len(),
                language,
                ChunkType::TextBlock,
                None,
                None,
            ));
        }

        chunks
    }
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    lines: &[&str],
    file_path: &str,
    start_line: usize,
    end_line: usize,
    language: Language,
    chunk_type: ChunkType,
    name: Option<String>,
    parent_scope: Option<String>,
) -> CodeChunk {
    let metadata = ChunkMetadata {
        language: Some(language.as_str().to_string()),
        chunk_type: Some(chunk_type),
        name,
        parent_scope,
        ..Default::default()
    };
    CodeChunk::new(
        file_path.to_string(),
        start_line,
        end_line,
        slice_lines(lines, start_line, end_line),
        metadata,
    )
}

/// 1-based line number containing a byte offset
fn line_of_offset(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

fn at_line_start(content: &str, offset: usize) -> bool {
    offset == 0 || content.as_bytes()[offset - 1] == b'\n'
}

/// Byte offset of the `}` matching the `{` at `open`
fn brace_block_end(content: &str, open: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    for (idx, &byte) in bytes.iter().enumerate().skip(open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find the next `{` after `from` and return `(open, close)` offsets
fn block_after(content: &str, from: usize) -> Option<(usize, usize)> {
    let open = from + content[from..].find('{')?;
    brace_block_end(content, open).map(|close| (open, close))
}

/// Indentation-delimited block: last line index belonging to the block at `start_idx`
fn indent_block_end(lines: &[&str], start_idx: usize, base_indent: usize) -> usize {
    let mut end = start_idx;
    let mut idx = start_idx + 1;
    while idx < lines.len() {
        let line = lines[idx];
        if line.trim().is_empty() {
            idx += 1;
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        if indent <= base_indent {
            break;
        }
        end = idx;
        idx += 1;
    }
    end
}

/// Line range (1-based, inclusive) of the module docstring, if present
fn module_docstring_range(lines: &[&str]) -> Option<(usize, usize)> {
    let first_code = lines.iter().position(|line| !line.trim().is_empty())?;
    let trimmed = lines[first_code].trim_start();
    let delim = if trimmed.starts_with("\"\"\"") {
        "\"\"\""
    } else if trimmed.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    // Single-line docstring closes on the opening line
    let rest = &trimmed[delim.len()..];
    if rest.contains(delim) {
        return Some((first_code + 1, first_code + 1));
    }

    for (offset, line) in lines.iter().enumerate().skip(first_code + 1) {
        if line.contains(delim) {
            return Some((first_code + 1, offset + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON_CODE: &str = r#""""Module docstring."""

import os
from typing import List

def top_level(x):
    return x + 1

class Shape:
    def area(self):
        return 0

    def name(self):
        return "shape"
"#;

    #[test]
    fn test_python_docstring_and_imports() {
        let strategy = RegexStrategy::new(2000);
        let chunks = strategy.chunk(PYTHON_CODE, "shape.py", Language::Python);

        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Docstring)));
        let imports = chunks
            .iter()
            .filter(|c| c.metadata.chunk_type == Some(ChunkType::Import))
            .count();
        assert_eq!(imports, 2);
    }

    #[test]
    fn test_python_methods_get_parent_scope() {
        let strategy = RegexStrategy::new(2000);
        let chunks = strategy.chunk(PYTHON_CODE, "shape.py", Language::Python);

        let methods: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.chunk_type == Some(ChunkType::Method))
            .collect();
        assert_eq!(methods.len(), 2);
        for method in methods {
            assert_eq!(method.metadata.parent_scope.as_deref(), Some("Shape"));
        }

        let function = chunks
            .iter()
            .find(|c| c.metadata.chunk_type == Some(ChunkType::Function))
            .unwrap();
        assert_eq!(function.metadata.name.as_deref(), Some("top_level"));
    }

    #[test]
    fn test_javascript_brace_matching() {
        let code = "import { x } from 'mod';\n\nfunction outer(a) {\n  if (a) {\n    return 1;\n  }\n  return 2;\n}\n\nconst arrow = (b) => {\n  return b;\n};\n\nclass Thing {\n  go() {}\n}\n";
        let strategy = RegexStrategy::new(2000);
        let chunks = strategy.chunk(code, "thing.js", Language::JavaScript);

        let outer = chunks
            .iter()
            .find(|c| c.metadata.name.as_deref() == Some("outer"))
            .unwrap();
        assert_eq!(outer.start_line, 3);
        assert_eq!(outer.end_line, 8);

        assert!(chunks
            .iter()
            .any(|c| c.metadata.name.as_deref() == Some("arrow")));
        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Class)
                && c.metadata.name.as_deref() == Some("Thing")));
        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Import)));
    }

    #[test]
    fn test_rust_functions_and_types() {
        let code = "use std::fmt;\n\npub fn alpha() -> u32 {\n    1\n}\n\nstruct Beta {\n    field: u32,\n}\n\nimpl Beta {\n    fn gamma(&self) {}\n}\n";
        let strategy = RegexStrategy::new(2000);
        let chunks = strategy.chunk(code, "beta.rs", Language::Rust);

        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Function)
                && c.metadata.name.as_deref() == Some("alpha")));
        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Class)
                && c.metadata.name.as_deref() == Some("Beta")));
        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Import)));
    }

    #[test]
    fn test_markdown_heading_sections() {
        let code = "intro text\n\n# Title\n\nbody one\n\n## Section\n\n```rust\nfn x() {}\n```\n";
        let strategy = RegexStrategy::new(2000);
        let chunks = strategy.chunk(code, "doc.md", Language::Markdown);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.name, None);
        assert_eq!(chunks[1].metadata.name.as_deref(), Some("Title"));
        assert_eq!(chunks[2].metadata.name.as_deref(), Some("Section"));
        assert_eq!(
            chunks[2].metadata.extra.get("code_languages"),
            Some(&serde_json::json!(["rust"]))
        );
    }

    #[test]
    fn test_unknown_language_falls_back_to_text_blocks() {
        let code = (0..100).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let strategy = RegexStrategy::new(200);
        let chunks = strategy.chunk(&code, "data.txt", Language::Unknown);

        assert!(chunks.len() > 1);
        assert!(chunks
            .iter()
            .all(|c| c.metadata.chunk_type == Some(ChunkType::TextBlock)));

        // Blocks tile the file without gaps
        assert_eq!(chunks[0].start_line, 1);
        for window in chunks.windows(2) {
            assert_eq!(window[0].end_line + 1, window[1].start_line);
        }
    }

    #[test]
    fn test_chunk_content_matches_line_slice() {
        let strategy = RegexStrategy::new(2000);
        let chunks = strategy.chunk(PYTHON_CODE, "shape.py", Language::Python);
        let lines: Vec<&str> = PYTHON_CODE.split('\n').collect();

        for chunk in chunks {
            let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
            assert_eq!(chunk.content, expected, "chunk {:?}", chunk.metadata.name);
        }
    }
}
