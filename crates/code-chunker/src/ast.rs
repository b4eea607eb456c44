use crate::error::{ChunkerError, Result};
use crate::language::Language;
use crate::split::slice_lines;
use crate::types::{ChunkMetadata, ChunkType, CodeChunk};
use tree_sitter::{Node, Parser};

/// AST-based chunking strategy
///
/// Parses the source with tree-sitter and emits function, class, and method
/// nodes with their identifier names and exact line ranges.
pub struct AstStrategy {
    parser: Parser,
    language: Language,
}

impl AstStrategy {
    /// Create a new AST strategy for a language
    pub fn new(language: Language) -> Result<Self> {
        if !language.supports_ast() {
            return Err(ChunkerError::unsupported_language(language.as_str()));
        }

        let ts_language = language.tree_sitter_language()?;
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ChunkerError::tree_sitter(format!("Failed to set language: {e}")))?;

        Ok(Self { parser, language })
    }

    /// Parse and chunk code using the AST
    pub fn chunk(&mut self, content: &str, file_path: &str) -> Result<Vec<CodeChunk>> {
        let tree = self
            .parser
            .parse(content, None)
            .ok_or_else(|| ChunkerError::parse("Failed to parse source code"))?;

        let lines: Vec<&str> = content.split('\n').collect();
        let mut chunks = Vec::new();

        let root = tree.root_node();
        match self.language {
            Language::Rust => self.extract_rust(content, &lines, file_path, root, &mut chunks),
            Language::Python => self.extract_python(content, &lines, file_path, root, &mut chunks),
            Language::JavaScript | Language::TypeScript => {
                self.extract_js(content, &lines, file_path, root, &mut chunks);
            }
            _ => {}
        }

        Ok(chunks)
    }

    fn extract_rust(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        node: Node,
        chunks: &mut Vec<CodeChunk>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "function_item" => {
                    chunks.push(self.node_to_chunk(content, lines, file_path, child, ChunkType::Function, None));
                }
                "struct_item" | "enum_item" | "trait_item" => {
                    chunks.push(self.node_to_chunk(content, lines, file_path, child, ChunkType::Class, None));
                }
                "impl_item" => {
                    self.extract_rust_impl(content, lines, file_path, child, chunks);
                }
                _ => {}
            }
        }
    }

    fn extract_rust_impl(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        impl_node: Node,
        chunks: &mut Vec<CodeChunk>,
    ) {
        let target = impl_node
            .child_by_field_name("type")
            .map(|node| node_text(content, node))
            .map(|text| text.split('<').next().unwrap_or(&text).trim().to_string());

        let mut cursor = impl_node.walk();
        for child in impl_node.children(&mut cursor) {
            if child.kind() != "declaration_list" {
                continue;
            }
            let mut body_cursor = child.walk();
            for item in child.children(&mut body_cursor) {
                if item.kind() == "function_item" {
                    chunks.push(self.node_to_chunk(
                        content,
                        lines,
                        file_path,
                        item,
                        ChunkType::Method,
                        target.as_deref(),
                    ));
                }
            }
        }
    }

    fn extract_python(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        node: Node,
        chunks: &mut Vec<CodeChunk>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let definition = unwrap_decorated(child);
            match definition.kind() {
                "function_definition" => {
                    chunks.push(self.node_to_chunk(content, lines, file_path, child, ChunkType::Function, None));
                }
                "class_definition" => {
                    chunks.push(self.node_to_chunk(content, lines, file_path, child, ChunkType::Class, None));
                    self.extract_python_methods(content, lines, file_path, definition, chunks);
                }
                _ => {}
            }
        }
    }

    fn extract_python_methods(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        class_node: Node,
        chunks: &mut Vec<CodeChunk>,
    ) {
        let class_name = class_node
            .child_by_field_name("name")
            .map(|node| node_text(content, node));

        let Some(body) = class_node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for child in body.children(&mut cursor) {
            let definition = unwrap_decorated(child);
            if definition.kind() == "function_definition" {
                chunks.push(self.node_to_chunk(
                    content,
                    lines,
                    file_path,
                    child,
                    ChunkType::Method,
                    class_name.as_deref(),
                ));
            }
        }
    }

    fn extract_js(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        node: Node,
        chunks: &mut Vec<CodeChunk>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            // export wrappers carry the declaration as a child
            let target = if child.kind() == "export_statement" {
                child
                    .child_by_field_name("declaration")
                    .unwrap_or(child)
            } else {
                child
            };

            match target.kind() {
                "function_declaration" => {
                    chunks.push(self.node_to_chunk(content, lines, file_path, child, ChunkType::Function, None));
                }
                "class_declaration" => {
                    chunks.push(self.node_to_chunk(content, lines, file_path, child, ChunkType::Class, None));
                    self.extract_js_methods(content, lines, file_path, target, chunks);
                }
                _ => {}
            }
        }
    }

    fn extract_js_methods(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        class_node: Node,
        chunks: &mut Vec<CodeChunk>,
    ) {
        let class_name = class_node
            .child_by_field_name("name")
            .map(|node| node_text(content, node));

        let Some(body) = class_node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        for child in body.children(&mut cursor) {
            if child.kind() == "method_definition" {
                chunks.push(self.node_to_chunk(
                    content,
                    lines,
                    file_path,
                    child,
                    ChunkType::Method,
                    class_name.as_deref(),
                ));
            }
        }
    }

    fn node_to_chunk(
        &self,
        content: &str,
        lines: &[&str],
        file_path: &str,
        node: Node,
        chunk_type: ChunkType,
        parent_scope: Option<&str>,
    ) -> CodeChunk {
        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;

        let name = unwrap_decorated(node)
            .child_by_field_name("name")
            .map(|n| node_text(content, n));

        let metadata = ChunkMetadata {
            language: Some(self.language.as_str().to_string()),
            chunk_type: Some(chunk_type),
            name,
            parent_scope: parent_scope.map(str::to_string),
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
}

fn node_text(content: &str, node: Node) -> String {
    content[node.byte_range()].to_string()
}

/// Look through a `decorated_definition` wrapper to the inner definition
fn unwrap_decorated(node: Node) -> Node {
    if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition").unwrap_or(node)
    } else {
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUST_CODE: &str = r#"use std::collections::HashMap;

fn standalone() -> u32 {
    42
}

struct Point {
    x: i32,
    y: i32,
}

impl Point {
    fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn magnitude(&self) -> f64 {
        ((self.x * self.x + self.y * self.y) as f64).sqrt()
    }
}
"#;

    const PYTHON_CODE: &str = r#"import os

def top_level():
    return 1

class Widget:
    def render(self):
        pass

    def hide(self):
        pass
"#;

    #[test]
    fn test_rust_functions_and_methods() {
        let mut strategy = AstStrategy::new(Language::Rust).unwrap();
        let chunks = strategy.chunk(RUST_CODE, "point.rs").unwrap();

        let names: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.metadata.name.as_deref())
            .collect();
        assert!(names.contains(&"standalone"));
        assert!(names.contains(&"Point"));
        assert!(names.contains(&"new"));
        assert!(names.contains(&"magnitude"));

        let magnitude = chunks
            .iter()
            .find(|c| c.metadata.name.as_deref() == Some("magnitude"))
            .unwrap();
        assert_eq!(magnitude.metadata.chunk_type, Some(ChunkType::Method));
        assert_eq!(magnitude.metadata.parent_scope.as_deref(), Some("Point"));
    }

    #[test]
    fn test_python_class_and_methods() {
        let mut strategy = AstStrategy::new(Language::Python).unwrap();
        let chunks = strategy.chunk(PYTHON_CODE, "widget.py").unwrap();

        let class_chunk = chunks
            .iter()
            .find(|c| c.metadata.chunk_type == Some(ChunkType::Class))
            .unwrap();
        assert_eq!(class_chunk.metadata.name.as_deref(), Some("Widget"));

        let methods: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.chunk_type == Some(ChunkType::Method))
            .collect();
        assert_eq!(methods.len(), 2);
        for method in methods {
            assert_eq!(method.metadata.parent_scope.as_deref(), Some("Widget"));
        }
    }

    #[test]
    fn test_chunk_content_matches_line_slice() {
        let mut strategy = AstStrategy::new(Language::Rust).unwrap();
        let chunks = strategy.chunk(RUST_CODE, "point.rs").unwrap();
        let lines: Vec<&str> = RUST_CODE.split('\n').collect();

        for chunk in chunks {
            let expected = lines[chunk.start_line - 1..chunk.end_line].join("\n");
            assert_eq!(chunk.content, expected);
        }
    }

    #[test]
    fn test_javascript_class() {
        let code = "class Greeter {\n  greet(name) {\n    return `hi ${name}`;\n  }\n}\n";
        let mut strategy = AstStrategy::new(Language::JavaScript).unwrap();
        let chunks = strategy.chunk(code, "greeter.js").unwrap();

        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Class)
                && c.metadata.name.as_deref() == Some("Greeter")));
        assert!(chunks
            .iter()
            .any(|c| c.metadata.chunk_type == Some(ChunkType::Method)
                && c.metadata.name.as_deref() == Some("greet")));
    }

    #[test]
    fn test_unsupported_language_rejected() {
        assert!(AstStrategy::new(Language::Markdown).is_err());
    }
}
