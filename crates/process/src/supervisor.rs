use crate::error::{ProcessError, Result};
use crate::shell::{merged_line_reader, resolve_cwd, spawn_shell, terminate_with_grace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, Mutex as TokioMutex};

/// State of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Completed,
    Failed,
    Killed,
    Timeout,
}

/// Request to launch a new process
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Shell command line
    pub command: String,

    /// Working directory, resolved against the workspace root when relative
    pub cwd: PathBuf,

    /// Wait for completion (true) or return immediately (false)
    pub wait: bool,

    /// Maximum time to wait when `wait` is set
    pub max_wait: Duration,

    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl LaunchRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            wait: true,
            max_wait: Duration::from_secs(600),
            env: HashMap::new(),
        }
    }

    pub fn background(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Snapshot of a managed process
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub terminal_id: u64,
    pub command: String,
    pub cwd: PathBuf,
    pub state: ProcessState,
    pub return_code: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output: String,
}

/// Result of a process operation
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub success: bool,
    pub terminal_id: u64,
    pub message: String,
    pub output: String,
    pub return_code: Option<i32>,
    pub state: ProcessState,
}

struct HandleState {
    state: ProcessState,
    return_code: Option<i32>,
    end_time: Option<DateTime<Utc>>,
    /// Accumulated output drained from the reader queue
    output: String,
}

struct ProcessHandle {
    terminal_id: u64,
    command: String,
    cwd: PathBuf,
    start_time: DateTime<Utc>,
    child: TokioMutex<Child>,
    stdin: TokioMutex<Option<ChildStdin>>,
    lines: TokioMutex<mpsc::UnboundedReceiver<String>>,
    state: Mutex<HandleState>,
}

impl ProcessHandle {
    fn snapshot(&self) -> ProcessInfo {
        let state = self.state.lock().expect("handle state poisoned");
        ProcessInfo {
            terminal_id: self.terminal_id,
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            state: state.state,
            return_code: state.return_code,
            start_time: self.start_time,
            end_time: state.end_time,
            output: state.output.clone(),
        }
    }

    /// Drain queued output lines into the accumulated buffer
    async fn drain_output(&self) -> usize {
        let mut rx = self.lines.lock().await;
        let mut drained = 0;
        let mut state = self.state.lock().expect("handle state poisoned");
        while let Ok(line) = rx.try_recv() {
            state.output.push_str(&line);
            state.output.push('\n');
            drained += 1;
        }
        drained
    }

    /// Lazily refresh state if the underlying process has exited
    async fn refresh(&self) {
        let current = self.state.lock().expect("handle state poisoned").state;
        if current != ProcessState::Running && current != ProcessState::Timeout {
            return;
        }

        let mut child = self.child.lock().await;
        if let Ok(Some(status)) = child.try_wait() {
            let code = status.code();
            let mut state = self.state.lock().expect("handle state poisoned");
            state.state = if code == Some(0) {
                ProcessState::Completed
            } else {
                ProcessState::Failed
            };
            state.return_code = code;
            state.end_time.get_or_insert_with(Utc::now);
        }
    }
}

struct SupervisorInner {
    next_terminal_id: u64,
    handles: HashMap<u64, Arc<ProcessHandle>>,
}

/// Supervisor for foreground and background subprocesses
///
/// Terminal ids are assigned monotonically under one mutex and never reused;
/// handles persist for the supervisor's lifetime, exited or not.
pub struct ProcessSupervisor {
    workspace_root: PathBuf,
    inner: Mutex<SupervisorInner>,
}

impl ProcessSupervisor {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            inner: Mutex::new(SupervisorInner {
                next_terminal_id: 1,
                handles: HashMap::new(),
            }),
        }
    }

    fn handle(&self, terminal_id: u64) -> Result<Arc<ProcessHandle>> {
        let inner = self.inner.lock().expect("supervisor poisoned");
        inner
            .handles
            .get(&terminal_id)
            .cloned()
            .ok_or(ProcessError::TerminalNotFound(terminal_id))
    }

    /// Launch a process; waits for completion when `request.wait` is set
    ///
    /// When the wait deadline passes with the process still running, the
    /// result carries state [`ProcessState::Timeout`] with partial output
    /// and the process is left running for the caller to decide.
    pub async fn launch_process(&self, request: LaunchRequest) -> Result<ProcessResult> {
        let cwd = resolve_cwd(&self.workspace_root, &request.cwd);
        let mut child = spawn_shell(&request.command, &cwd, &request.env)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            ProcessError::IoError(std::io::Error::other("child stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ProcessError::IoError(std::io::Error::other("child stderr not captured"))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(merged_line_reader(stdout, stderr, move |text| {
            tx.send(text).is_ok()
        }));

        let terminal_id = {
            let mut inner = self.inner.lock().expect("supervisor poisoned");
            let terminal_id = inner.next_terminal_id;
            inner.next_terminal_id += 1;

            let handle = Arc::new(ProcessHandle {
                terminal_id,
                command: request.command.clone(),
                cwd: cwd.clone(),
                start_time: Utc::now(),
                child: TokioMutex::new(child),
                stdin: TokioMutex::new(stdin),
                lines: TokioMutex::new(rx),
                state: Mutex::new(HandleState {
                    state: ProcessState::Running,
                    return_code: None,
                    end_time: None,
                    output: String::new(),
                }),
            });
            inner.handles.insert(terminal_id, handle);
            terminal_id
        };

        log::info!("Launched terminal {}: {}", terminal_id, request.command);

        if request.wait {
            self.wait_for_exit(terminal_id, request.max_wait).await
        } else {
            Ok(ProcessResult {
                success: true,
                terminal_id,
                message: "Background process started".to_string(),
                output: String::new(),
                return_code: None,
                state: ProcessState::Running,
            })
        }
    }

    async fn wait_for_exit(&self, terminal_id: u64, max_wait: Duration) -> Result<ProcessResult> {
        let handle = self.handle(terminal_id)?;
        let started = Instant::now();

        loop {
            handle.drain_output().await;
            handle.refresh().await;

            let (state, return_code) = {
                let state = handle.state.lock().expect("handle state poisoned");
                (state.state, state.return_code)
            };

            if state != ProcessState::Running {
                // Give the reader a moment to flush trailing lines
                tokio::time::sleep(Duration::from_millis(50)).await;
                handle.drain_output().await;

                let output = handle.snapshot().output;
                return Ok(ProcessResult {
                    success: return_code == Some(0),
                    terminal_id,
                    message: format!("Process completed with return code {:?}", return_code),
                    output,
                    return_code,
                    state,
                });
            }

            if started.elapsed() > max_wait {
                let mut state = handle.state.lock().expect("handle state poisoned");
                state.state = ProcessState::Timeout;
                let output = state.output.clone();
                drop(state);

                return Ok(ProcessResult {
                    success: true,
                    terminal_id,
                    message: format!(
                        "Process still running after {:?} timeout",
                        max_wait
                    ),
                    output,
                    return_code: None,
                    state: ProcessState::Timeout,
                });
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Read output from a terminal, optionally waiting for exit
    pub async fn read_process(
        &self,
        terminal_id: u64,
        wait: bool,
        max_wait: Duration,
    ) -> Result<ProcessResult> {
        let handle = self.handle(terminal_id)?;

        if wait {
            let started = Instant::now();
            loop {
                handle.drain_output().await;
                handle.refresh().await;

                let state = handle.state.lock().expect("handle state poisoned").state;
                if state != ProcessState::Running && state != ProcessState::Timeout {
                    // Let the reader flush trailing lines before the final drain
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    break;
                }
                if started.elapsed() > max_wait {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        let drained = handle.drain_output().await;
        handle.refresh().await;

        let info = handle.snapshot();
        Ok(ProcessResult {
            success: true,
            terminal_id,
            message: format!("Read {} new lines", drained),
            output: info.output,
            return_code: info.return_code,
            state: info.state,
        })
    }

    /// Write text to a running process's stdin
    pub async fn write_process(&self, terminal_id: u64, input: &str) -> Result<ProcessResult> {
        let handle = self.handle(terminal_id)?;
        handle.refresh().await;

        let state = handle.state.lock().expect("handle state poisoned").state;
        if state != ProcessState::Running {
            return Err(ProcessError::NotRunning(terminal_id));
        }

        let mut stdin = handle.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(ProcessError::NotRunning(terminal_id));
        };
        stdin.write_all(input.as_bytes()).await?;
        stdin.flush().await?;

        Ok(ProcessResult {
            success: true,
            terminal_id,
            message: format!("Wrote {} bytes", input.len()),
            output: String::new(),
            return_code: None,
            state: ProcessState::Running,
        })
    }

    /// Kill a running process: terminate, 5 s grace, then force kill
    ///
    /// Killing an already-exited process succeeds and reports its state.
    pub async fn kill_process(&self, terminal_id: u64) -> Result<ProcessResult> {
        let handle = self.handle(terminal_id)?;
        handle.refresh().await;

        {
            let state = handle.state.lock().expect("handle state poisoned");
            if state.state != ProcessState::Running && state.state != ProcessState::Timeout {
                return Ok(ProcessResult {
                    success: true,
                    terminal_id,
                    message: "Process already terminated".to_string(),
                    output: state.output.clone(),
                    return_code: state.return_code,
                    state: state.state,
                });
            }
        }

        let return_code = {
            let mut child = handle.child.lock().await;
            terminate_with_grace(&mut child, Duration::from_secs(5)).await
        };

        {
            let mut state = handle.state.lock().expect("handle state poisoned");
            state.state = ProcessState::Killed;
            state.return_code = return_code;
            state.end_time.get_or_insert_with(Utc::now);
        }

        handle.drain_output().await;
        log::info!("Killed terminal {}", terminal_id);

        Ok(ProcessResult {
            success: true,
            terminal_id,
            message: "Process killed".to_string(),
            output: handle.snapshot().output,
            return_code,
            state: ProcessState::Killed,
        })
    }

    /// Snapshot every managed process, lazily refreshing exited ones
    pub async fn list_processes(&self) -> Vec<ProcessInfo> {
        let handles: Vec<Arc<ProcessHandle>> = {
            let inner = self.inner.lock().expect("supervisor poisoned");
            inner.handles.values().cloned().collect()
        };

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            handle.drain_output().await;
            handle.refresh().await;
            infos.push(handle.snapshot());
        }
        infos.sort_by_key(|info| info.terminal_id);
        infos
    }
}
