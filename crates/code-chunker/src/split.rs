use crate::types::{ChunkMetadata, CodeChunk};

/// Exact source slice covered by a 1-based inclusive line range
pub(crate) fn slice_lines(lines: &[&str], start_line: usize, end_line: usize) -> String {
    lines[start_line - 1..end_line].join("\n")
}

/// Split chunks exceeding `max_chunk_size` characters on line boundaries
///
/// Sub-chunks keep contiguous line ranges and are named `{name}_partN`.
pub(crate) fn split_oversize(chunks: Vec<CodeChunk>, max_chunk_size: usize) -> Vec<CodeChunk> {
    let mut result = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        if chunk.content.len() <= max_chunk_size {
            result.push(chunk);
            continue;
        }

        let lines: Vec<&str> = chunk.content.split('\n').collect();
        let base_name = chunk
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "chunk".to_string());

        let mut part = 1;
        let mut part_start = 0;
        let mut part_size = 0;

        let flush = |part: &mut usize, part_start: usize, part_end: usize, result: &mut Vec<CodeChunk>| {
            let content = lines[part_start..part_end].join("\n");
            let metadata = ChunkMetadata {
                name: Some(format!("{}_part{}", base_name, part)),
                ..chunk.metadata.clone()
            };
            result.push(CodeChunk::new(
                chunk.file_path.clone(),
                chunk.start_line + part_start,
                chunk.start_line + part_end - 1,
                content,
                metadata,
            ));
            *part += 1;
        };

        for (idx, line) in lines.iter().enumerate() {
            let line_size = line.len() + 1;
            if part_size + line_size > max_chunk_size && idx > part_start {
                flush(&mut part, part_start, idx, &mut result);
                part_start = idx;
                part_size = 0;
            }
            part_size += line_size;
        }
        flush(&mut part, part_start, lines.len(), &mut result);
    }

    result
}
