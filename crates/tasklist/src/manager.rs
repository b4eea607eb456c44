use crate::error::{Result, TaskListError};
use crate::markdown::{parse_markdown, render_line};
use crate::templates::{TemplateNode, TEMPLATES};
use crate::types::{Task, TaskState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Configuration for the task list manager
#[derive(Debug, Clone)]
pub struct TaskListManagerConfig {
    /// Maximum hierarchy depth in levels (roots are level 1)
    pub max_depth: usize,

    /// Bounded undo history; oldest snapshots are evicted
    pub max_undo_history: usize,

    /// Load persisted state on construction when the file exists
    pub auto_load: bool,
}

impl Default for TaskListManagerConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_undo_history: 50,
            auto_load: true,
        }
    }
}

/// Fields for creating a task
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub parent_id: Option<Uuid>,
    pub state: TaskState,
}

impl NewTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn under(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }
}

/// Optional updates to a task's fields
#[derive(Debug, Clone, Default)]
pub struct UpdateTask {
    pub name: Option<String>,
    pub description: Option<String>,
    pub state: Option<TaskState>,
}

/// Outcome of a reorganize call
#[derive(Debug, Clone)]
pub struct ReorganizeReport {
    /// False when `validate_only` was set
    pub applied: bool,
    pub tasks_added: usize,
    pub tasks_moved: usize,
    pub tasks_removed: usize,
}

#[derive(Clone)]
struct Snapshot {
    tasks: HashMap<Uuid, Task>,
    root_ids: Vec<Uuid>,
}

struct ManagerState {
    tasks: HashMap<Uuid, Task>,
    root_ids: Vec<Uuid>,
    undo_stack: VecDeque<Snapshot>,
    redo_stack: Vec<Snapshot>,
}

#[derive(Serialize, Deserialize)]
struct PersistedTaskList {
    version: String,
    tasks: HashMap<Uuid, Task>,
    root_task_ids: Vec<Uuid>,
    saved_at: chrono::DateTime<Utc>,
}

/// Task hierarchy manager with undo/redo and markdown I/O
///
/// All mutations are serialized under one mutex; snapshots handed out are
/// deep copies, so later mutations never alias into a caller's data.
pub struct TaskListManager {
    config: TaskListManagerConfig,
    persistence_path: PathBuf,
    state: Mutex<ManagerState>,
}

impl TaskListManager {
    pub fn new(workspace_root: impl Into<PathBuf>, config: TaskListManagerConfig) -> Self {
        let persistence_path = workspace_root
            .into()
            .join(".contextforge")
            .join("tasks.json");
        let manager = Self {
            config,
            persistence_path,
            state: Mutex::new(ManagerState {
                tasks: HashMap::new(),
                root_ids: Vec::new(),
                undo_stack: VecDeque::new(),
                redo_stack: Vec::new(),
            }),
        };

        if manager.config.auto_load {
            if let Err(e) = manager.load(None) {
                log::warn!("Failed to auto-load task list: {}", e);
            }
        }
        manager
    }

    // ---- core operations ----

    /// Add a task, optionally under a parent
    pub fn add_task(&self, new_task: NewTask) -> Result<Task> {
        let mut state = self.state.lock().expect("task list poisoned");

        if let Some(parent_id) = new_task.parent_id {
            if !state.tasks.contains_key(&parent_id) {
                return Err(TaskListError::ParentNotFound(parent_id));
            }
            if depth_of(&state.tasks, parent_id) + 1 > self.config.max_depth {
                return Err(TaskListError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }
        }

        self.push_snapshot(&mut state);

        let mut task = Task::new(new_task.name);
        task.description = new_task.description;
        task.state = new_task.state;
        task.parent_id = new_task.parent_id;

        let id = task.id;
        match new_task.parent_id {
            Some(parent_id) => {
                let parent = state.tasks.get_mut(&parent_id).expect("checked above");
                task.order = parent.children.len();
                parent.children.push(id);
            }
            None => {
                task.order = state.root_ids.len();
                state.root_ids.push(id);
            }
        }
        state.tasks.insert(id, task.clone());

        Ok(task)
    }

    /// Update a task's name, description, or state
    pub fn update_task(&self, id: Uuid, update: UpdateTask) -> Result<Task> {
        let mut state = self.state.lock().expect("task list poisoned");
        if !state.tasks.contains_key(&id) {
            return Err(TaskListError::TaskNotFound(id));
        }

        self.push_snapshot(&mut state);

        let task = state.tasks.get_mut(&id).expect("checked above");
        if let Some(name) = update.name {
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(task_state) = update.state {
            task.state = task_state;
        }
        task.updated_at = Utc::now();

        Ok(task.clone())
    }

    /// Remove a task and its whole subtree
    pub fn remove_task(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().expect("task list poisoned");
        if !state.tasks.contains_key(&id) {
            return Err(TaskListError::TaskNotFound(id));
        }

        self.push_snapshot(&mut state);
        remove_subtree(&mut state, id);
        Ok(())
    }

    /// Move a task under a new parent (or to the roots) at a position
    pub fn move_task(&self, id: Uuid, new_parent: Option<Uuid>, position: Option<usize>) -> Result<()> {
        let mut state = self.state.lock().expect("task list poisoned");
        if !state.tasks.contains_key(&id) {
            return Err(TaskListError::TaskNotFound(id));
        }

        if let Some(parent_id) = new_parent {
            if !state.tasks.contains_key(&parent_id) {
                return Err(TaskListError::ParentNotFound(parent_id));
            }
            if parent_id == id || is_descendant(&state.tasks, parent_id, id) {
                return Err(TaskListError::CycleDetected(
                    "cannot move a task under its own descendant".to_string(),
                ));
            }
            let new_depth = depth_of(&state.tasks, parent_id) + subtree_height(&state.tasks, id);
            if new_depth > self.config.max_depth {
                return Err(TaskListError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }
        }

        self.push_snapshot(&mut state);

        // Detach from the old location
        let old_parent = state.tasks[&id].parent_id;
        match old_parent {
            Some(parent_id) => {
                if let Some(parent) = state.tasks.get_mut(&parent_id) {
                    parent.children.retain(|child| *child != id);
                }
                renumber_children(&mut state, Some(parent_id));
            }
            None => {
                state.root_ids.retain(|root| *root != id);
            }
        }

        // Attach at the new one
        state.tasks.get_mut(&id).expect("checked above").parent_id = new_parent;
        match new_parent {
            Some(parent_id) => {
                let parent = state.tasks.get_mut(&parent_id).expect("checked above");
                let at = position.unwrap_or(parent.children.len()).min(parent.children.len());
                parent.children.insert(at, id);
                renumber_children(&mut state, Some(parent_id));
            }
            None => {
                let at = position.unwrap_or(state.root_ids.len()).min(state.root_ids.len());
                state.root_ids.insert(at, id);
                renumber_children(&mut state, None);
            }
        }

        if let Some(task) = state.tasks.get_mut(&id) {
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    // ---- dependencies ----

    /// Add "task depends on other"; rejects self-dependencies and cycles
    pub fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<()> {
        let mut state = self.state.lock().expect("task list poisoned");
        if !state.tasks.contains_key(&task_id) {
            return Err(TaskListError::TaskNotFound(task_id));
        }
        if !state.tasks.contains_key(&depends_on) {
            return Err(TaskListError::TaskNotFound(depends_on));
        }
        if task_id == depends_on {
            return Err(TaskListError::SelfDependency);
        }
        if dependency_path_exists(&state.tasks, depends_on, task_id) {
            return Err(TaskListError::CycleDetected(format!(
                "{} already depends on {}",
                depends_on, task_id
            )));
        }

        self.push_snapshot(&mut state);

        let task = state.tasks.get_mut(&task_id).expect("checked above");
        if !task.dependencies.contains(&depends_on) {
            task.dependencies.push(depends_on);
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Remove a dependency edge; returns whether it existed
    pub fn remove_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<bool> {
        let mut state = self.state.lock().expect("task list poisoned");
        if !state.tasks.contains_key(&task_id) {
            return Err(TaskListError::TaskNotFound(task_id));
        }

        self.push_snapshot(&mut state);

        let task = state.tasks.get_mut(&task_id).expect("checked above");
        let before = task.dependencies.len();
        task.dependencies.retain(|dep| *dep != depends_on);
        let removed = task.dependencies.len() != before;
        if removed {
            task.updated_at = Utc::now();
        }
        Ok(removed)
    }

    /// Tasks blocked by at least one incomplete dependency
    pub fn get_blocked_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().expect("task list poisoned");
        self.ordered_tasks(&state)
            .into_iter()
            .filter(|task| {
                task.state == TaskState::NotStarted
                    && task.dependencies.iter().any(|dep| {
                        state
                            .tasks
                            .get(dep)
                            .is_some_and(|d| d.state != TaskState::Complete)
                    })
            })
            .collect()
    }

    /// Not-started tasks whose dependencies are all complete
    pub fn get_ready_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().expect("task list poisoned");
        self.ordered_tasks(&state)
            .into_iter()
            .filter(|task| {
                task.state == TaskState::NotStarted
                    && task.dependencies.iter().all(|dep| {
                        state
                            .tasks
                            .get(dep)
                            .is_none_or(|d| d.state == TaskState::Complete)
                    })
            })
            .collect()
    }

    // ---- queries ----

    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        let state = self.state.lock().expect("task list poisoned");
        state.tasks.get(&id).cloned()
    }

    /// All tasks in pre-order
    pub fn list_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().expect("task list poisoned");
        self.ordered_tasks(&state)
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("task list poisoned").tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every task
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("task list poisoned");
        self.push_snapshot(&mut state);
        state.tasks.clear();
        state.root_ids.clear();
    }

    // ---- undo / redo ----

    /// Undo the last mutation; returns whether anything was undone
    pub fn undo(&self) -> bool {
        let mut state = self.state.lock().expect("task list poisoned");
        let Some(snapshot) = state.undo_stack.pop_back() else {
            return false;
        };

        let current = Snapshot {
            tasks: state.tasks.clone(),
            root_ids: state.root_ids.clone(),
        };
        state.redo_stack.push(current);

        state.tasks = snapshot.tasks;
        state.root_ids = snapshot.root_ids;
        true
    }

    /// Redo the last undone mutation
    pub fn redo(&self) -> bool {
        let mut state = self.state.lock().expect("task list poisoned");
        let Some(snapshot) = state.redo_stack.pop() else {
            return false;
        };

        let current = Snapshot {
            tasks: state.tasks.clone(),
            root_ids: state.root_ids.clone(),
        };
        state.undo_stack.push_back(current);

        state.tasks = snapshot.tasks;
        state.root_ids = snapshot.root_ids;
        true
    }

    // ---- markdown ----

    /// Render the hierarchy as markdown, pre-order
    pub fn to_markdown(&self) -> String {
        let state = self.state.lock().expect("task list poisoned");
        let mut lines = Vec::new();

        fn render(
            tasks: &HashMap<Uuid, Task>,
            id: Uuid,
            depth: usize,
            lines: &mut Vec<String>,
        ) {
            let Some(task) = tasks.get(&id) else {
                return;
            };
            lines.push(render_line(depth, task.state, &task.name, task.id));
            for child in &task.children {
                render(tasks, *child, depth + 1, lines);
            }
        }

        for root in &state.root_ids {
            render(&state.tasks, *root, 0, &mut lines);
        }
        lines.join("\n")
    }

    /// Replace the hierarchy from markdown
    ///
    /// With `validate_only`, reports what would change without applying.
    pub fn reorganize(&self, markdown: &str, validate_only: bool) -> Result<ReorganizeReport> {
        let (parsed, mut errors) = parse_markdown(markdown);

        let mut seen_ids = HashSet::new();
        for task in &parsed {
            if task.depth > self.config.max_depth {
                errors.push(format!(
                    "Task '{}' exceeds maximum depth of {}",
                    task.name, self.config.max_depth
                ));
            }
            if let Some(id) = task.id {
                if !seen_ids.insert(id) {
                    errors.push(format!("Duplicate task id: {}", id));
                }
            }
        }
        if parsed.is_empty() {
            errors.push("No tasks found in markdown".to_string());
        }
        if !errors.is_empty() {
            return Err(TaskListError::InvalidMarkdown { errors });
        }

        let mut state = self.state.lock().expect("task list poisoned");
        let old_ids: HashSet<Uuid> = state.tasks.keys().copied().collect();

        // Assign fresh ids to NEW_UUID entries
        let assigned: Vec<Uuid> = parsed
            .iter()
            .map(|task| task.id.unwrap_or_else(Uuid::new_v4))
            .collect();
        let new_ids: HashSet<Uuid> = assigned.iter().copied().collect();

        let tasks_added = new_ids.difference(&old_ids).count();
        let tasks_moved = new_ids.intersection(&old_ids).count();
        let tasks_removed = old_ids.difference(&new_ids).count();

        if validate_only {
            return Ok(ReorganizeReport {
                applied: false,
                tasks_added,
                tasks_moved,
                tasks_removed,
            });
        }

        self.push_snapshot(&mut state);

        let previous = std::mem::take(&mut state.tasks);
        state.root_ids.clear();

        for (idx, parsed_task) in parsed.iter().enumerate() {
            let id = assigned[idx];
            let parent_id = parsed_task.parent.map(|parent_idx| assigned[parent_idx]);

            // Surviving tasks keep their descriptions, dependencies, and stamps
            let mut task = previous.get(&id).cloned().unwrap_or_else(|| {
                let mut task = Task::new(parsed_task.name.clone());
                task.id = id;
                task
            });
            task.name = parsed_task.name.clone();
            task.state = parsed_task.state;
            task.parent_id = parent_id;
            task.children = Vec::new();
            task.dependencies.retain(|dep| new_ids.contains(dep));
            task.updated_at = Utc::now();

            match parent_id {
                Some(parent_id) => {
                    let parent = state
                        .tasks
                        .get_mut(&parent_id)
                        .expect("parents precede children in parse order");
                    task.order = parent.children.len();
                    parent.children.push(id);
                }
                None => {
                    task.order = state.root_ids.len();
                    state.root_ids.push(id);
                }
            }
            state.tasks.insert(id, task);
        }

        log::info!(
            "Reorganized: {} added, {} moved, {} removed",
            tasks_added,
            tasks_moved,
            tasks_removed
        );
        Ok(ReorganizeReport {
            applied: true,
            tasks_added,
            tasks_moved,
            tasks_removed,
        })
    }

    // ---- templates ----

    /// Expand a named template under an optional parent
    pub fn apply_template(
        &self,
        template_name: &str,
        title: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Vec<Task>> {
        let template = TEMPLATES
            .get(template_name)
            .ok_or_else(|| TaskListError::UnknownTemplate(template_name.to_string()))?;

        let mut state = self.state.lock().expect("task list poisoned");
        if let Some(parent_id) = parent_id {
            if !state.tasks.contains_key(&parent_id) {
                return Err(TaskListError::ParentNotFound(parent_id));
            }
        }

        self.push_snapshot(&mut state);

        let mut created = Vec::new();
        fn instantiate(
            state: &mut ManagerState,
            node: &TemplateNode,
            title: &str,
            parent_id: Option<Uuid>,
            created: &mut Vec<Task>,
        ) {
            let mut task = Task::new(node.name.replace("{title}", title));
            task.parent_id = parent_id;
            let id = task.id;

            match parent_id {
                Some(parent_id) => {
                    let parent = state.tasks.get_mut(&parent_id).expect("parent exists");
                    task.order = parent.children.len();
                    parent.children.push(id);
                }
                None => {
                    task.order = state.root_ids.len();
                    state.root_ids.push(id);
                }
            }
            state.tasks.insert(id, task.clone());
            created.push(task);

            for child in node.children {
                instantiate(state, child, title, Some(id), created);
            }
        }
        instantiate(&mut state, template, title, parent_id, &mut created);

        log::info!(
            "Applied template '{}': {} tasks created",
            template_name,
            created.len()
        );
        Ok(created)
    }

    // ---- persistence ----

    /// Save the task list as JSON
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let state = self.state.lock().expect("task list poisoned");
        let save_path = path.unwrap_or(&self.persistence_path);

        if let Some(parent) = save_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = PersistedTaskList {
            version: "1.0".to_string(),
            tasks: state.tasks.clone(),
            root_task_ids: state.root_ids.clone(),
            saved_at: Utc::now(),
        };
        std::fs::write(save_path, serde_json::to_string_pretty(&persisted)?)?;

        log::info!("Task list saved to {:?}", save_path);
        Ok(())
    }

    /// Load the task list from JSON; returns false when the file is absent
    pub fn load(&self, path: Option<&Path>) -> Result<bool> {
        let load_path = path.unwrap_or(&self.persistence_path);
        if !load_path.exists() {
            return Ok(false);
        }

        let persisted: PersistedTaskList =
            serde_json::from_str(&std::fs::read_to_string(load_path)?)?;

        let mut state = self.state.lock().expect("task list poisoned");
        state.tasks = persisted.tasks;
        state.root_ids = persisted.root_task_ids;

        log::info!(
            "Task list loaded from {:?}: {} tasks",
            load_path,
            state.tasks.len()
        );
        Ok(true)
    }

    // ---- internals ----

    fn push_snapshot(&self, state: &mut ManagerState) {
        let snapshot = Snapshot {
            tasks: state.tasks.clone(),
            root_ids: state.root_ids.clone(),
        };
        state.undo_stack.push_back(snapshot);
        while state.undo_stack.len() > self.config.max_undo_history {
            state.undo_stack.pop_front();
        }
        state.redo_stack.clear();
    }

    fn ordered_tasks(&self, state: &ManagerState) -> Vec<Task> {
        let mut ordered = Vec::with_capacity(state.tasks.len());

        fn visit(tasks: &HashMap<Uuid, Task>, id: Uuid, out: &mut Vec<Task>) {
            let Some(task) = tasks.get(&id) else {
                return;
            };
            out.push(task.clone());
            for child in &task.children {
                visit(tasks, *child, out);
            }
        }
        for root in &state.root_ids {
            visit(&state.tasks, *root, &mut ordered);
        }
        ordered
    }
}

/// 1-based depth of a task (roots are 1)
fn depth_of(tasks: &HashMap<Uuid, Task>, id: Uuid) -> usize {
    let mut depth = 1;
    let mut current = id;
    let mut visited = HashSet::new();
    while let Some(parent_id) = tasks.get(&current).and_then(|t| t.parent_id) {
        if !visited.insert(current) {
            break;
        }
        depth += 1;
        current = parent_id;
    }
    depth
}

/// Height of a subtree in levels, including the task itself
fn subtree_height(tasks: &HashMap<Uuid, Task>, id: Uuid) -> usize {
    let Some(task) = tasks.get(&id) else {
        return 0;
    };
    1 + task
        .children
        .iter()
        .map(|child| subtree_height(tasks, *child))
        .max()
        .unwrap_or(0)
}

/// Whether `candidate` lives inside `ancestor`'s subtree
fn is_descendant(tasks: &HashMap<Uuid, Task>, candidate: Uuid, ancestor: Uuid) -> bool {
    let Some(task) = tasks.get(&ancestor) else {
        return false;
    };
    task.children
        .iter()
        .any(|&child| child == candidate || is_descendant(tasks, candidate, child))
}

/// DFS over dependency edges: is there a path `from -> ... -> to`?
fn dependency_path_exists(tasks: &HashMap<Uuid, Task>, from: Uuid, to: Uuid) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![from];
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(task) = tasks.get(&current) {
            stack.extend(task.dependencies.iter().copied());
        }
    }
    false
}

fn remove_subtree(state: &mut ManagerState, id: Uuid) {
    let children = state
        .tasks
        .get(&id)
        .map(|task| task.children.clone())
        .unwrap_or_default();
    for child in children {
        remove_subtree(state, child);
    }

    if let Some(task) = state.tasks.remove(&id) {
        match task.parent_id {
            Some(parent_id) => {
                if let Some(parent) = state.tasks.get_mut(&parent_id) {
                    parent.children.retain(|child| *child != id);
                }
            }
            None => state.root_ids.retain(|root| *root != id),
        }
    }

    // Drop dangling dependency edges
    for task in state.tasks.values_mut() {
        task.dependencies.retain(|dep| *dep != id);
    }
}

fn renumber_children(state: &mut ManagerState, parent: Option<Uuid>) {
    let ids: Vec<Uuid> = match parent {
        Some(parent_id) => state
            .tasks
            .get(&parent_id)
            .map(|p| p.children.clone())
            .unwrap_or_default(),
        None => state.root_ids.clone(),
    };
    for (order, id) in ids.into_iter().enumerate() {
        if let Some(task) = state.tasks.get_mut(&id) {
            task.order = order;
        }
    }
}
