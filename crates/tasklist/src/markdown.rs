use crate::types::TaskState;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

static TASK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)-\s*\[(.)\]\s*(.*?)(?:\s*\(task_id:\s*([^)]+)\))?\s*$")
        .expect("task line pattern")
});

/// One parsed markdown task line
#[derive(Debug, Clone)]
pub(crate) struct ParsedTask {
    /// Explicit id, or `None` for a NEW_UUID token
    pub id: Option<Uuid>,
    pub name: String,
    pub state: TaskState,
    /// Index of the parent within the parsed list
    pub parent: Option<usize>,
    /// 1-based depth of this task (roots are 1)
    pub depth: usize,
}

/// Parse the task-list markdown grammar
///
/// Blank lines are ignored; a line beginning with `-` that does not match
/// the grammar is a parse error at that line number.
pub(crate) fn parse_markdown(markdown: &str) -> (Vec<ParsedTask>, Vec<String>) {
    let mut tasks: Vec<ParsedTask> = Vec::new();
    let mut errors = Vec::new();
    // Stack of (indent, task index)
    let mut parent_stack: Vec<(usize, usize)> = Vec::new();

    for (line_idx, line) in markdown.lines().enumerate() {
        let line_number = line_idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let Some(captures) = TASK_LINE.captures(line) else {
            if line.trim_start().starts_with('-') {
                errors.push(format!("Line {}: invalid task format", line_number));
            }
            continue;
        };

        let indent = captures[1].len();
        let state_char = captures[2].chars().next().unwrap_or(' ');
        let name = captures[3].trim().to_string();
        let raw_id = captures.get(4).map(|m| m.as_str().trim().to_string());

        let Some(state) = TaskState::from_char(state_char) else {
            errors.push(format!(
                "Line {}: invalid state character '{}'",
                line_number, state_char
            ));
            continue;
        };
        if name.is_empty() {
            errors.push(format!("Line {}: task name is empty", line_number));
            continue;
        }

        let id = match raw_id.as_deref() {
            None | Some("NEW_UUID") => None,
            Some(raw) => match Uuid::parse_str(raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    errors.push(format!("Line {}: invalid task id '{}'", line_number, raw));
                    continue;
                }
            },
        };

        while parent_stack
            .last()
            .is_some_and(|&(parent_indent, _)| parent_indent >= indent)
        {
            parent_stack.pop();
        }
        let parent = parent_stack.last().map(|&(_, idx)| idx);
        let depth = parent.map(|idx| tasks[idx].depth + 1).unwrap_or(1);

        tasks.push(ParsedTask {
            id,
            name,
            state,
            parent,
            depth,
        });
        parent_stack.push((indent, tasks.len() - 1));
    }

    (tasks, errors)
}

/// Render one task line
pub(crate) fn render_line(depth: usize, state: TaskState, name: &str, id: Uuid) -> String {
    format!(
        "{}- [{}] {} (task_id: {})",
        "  ".repeat(depth),
        state.as_char(),
        name,
        id
    )
}
