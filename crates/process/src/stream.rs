use crate::error::{ProcessError, Result};
use crate::shell::{merged_line_reader, resolve_cwd, spawn_shell, terminate_with_grace};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, Mutex as TokioMutex};

/// A single line of process output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamLine {
    pub text: String,
    /// 1-based position in the merged output
    pub line_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Callback invoked once per line on the reader task
pub type LineCallback = Arc<dyn Fn(&StreamLine) + Send + Sync>;

/// Configuration for a streamed process
#[derive(Clone)]
pub struct StreamConfig {
    pub command: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    /// Ring buffer capacity; oldest lines are dropped past it
    pub max_buffer_lines: usize,
    pub line_callback: Option<LineCallback>,
}

impl StreamConfig {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: HashMap::new(),
            max_buffer_lines: 10_000,
            line_callback: None,
        }
    }

    pub fn buffer_lines(mut self, max_buffer_lines: usize) -> Self {
        self.max_buffer_lines = max_buffer_lines;
        self
    }

    pub fn on_line(mut self, callback: LineCallback) -> Self {
        self.line_callback = Some(callback);
        self
    }
}

/// Summary of an active stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub stream_id: u64,
    pub command: String,
    pub cwd: PathBuf,
    pub running: bool,
    pub start_time: DateTime<Utc>,
    pub buffer_len: usize,
}

struct StreamHandle {
    stream_id: u64,
    command: String,
    cwd: PathBuf,
    start_time: DateTime<Utc>,
    child: TokioMutex<Child>,
    stdin: TokioMutex<Option<ChildStdin>>,
    queue: TokioMutex<mpsc::UnboundedReceiver<StreamLine>>,
    buffer: Mutex<VecDeque<StreamLine>>,
}

struct StreamMap {
    next_stream_id: u64,
    streams: HashMap<u64, Arc<StreamHandle>>,
}

/// Supervisor for line-streamed subprocesses
///
/// Each stream owns one reader task that merges stdout and stderr into a
/// queue and a bounded ring buffer. Consumers drain the queue exactly once
/// per line; the ring buffer is a best-effort recent-history snapshot.
pub struct StreamSupervisor {
    workspace_root: PathBuf,
    inner: Mutex<StreamMap>,
}

impl StreamSupervisor {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            inner: Mutex::new(StreamMap {
                next_stream_id: 1,
                streams: HashMap::new(),
            }),
        }
    }

    fn handle(&self, stream_id: u64) -> Result<Arc<StreamHandle>> {
        let inner = self.inner.lock().expect("stream map poisoned");
        inner
            .streams
            .get(&stream_id)
            .cloned()
            .ok_or(ProcessError::StreamNotFound(stream_id))
    }

    /// Start streaming a process; returns the stream id
    pub fn start_stream(&self, config: StreamConfig) -> Result<u64> {
        let cwd = resolve_cwd(&self.workspace_root, &config.cwd);
        let mut child = spawn_shell(&config.command, &cwd, &config.env)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            ProcessError::IoError(std::io::Error::other("child stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ProcessError::IoError(std::io::Error::other("child stderr not captured"))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = Mutex::new(VecDeque::with_capacity(config.max_buffer_lines.min(1024)));

        let mut inner = self.inner.lock().expect("stream map poisoned");
        let stream_id = inner.next_stream_id;
        inner.next_stream_id += 1;

        let handle = Arc::new(StreamHandle {
            stream_id,
            command: config.command.clone(),
            cwd,
            start_time: Utc::now(),
            child: TokioMutex::new(child),
            stdin: TokioMutex::new(stdin),
            queue: TokioMutex::new(rx),
            buffer,
        });
        inner.streams.insert(stream_id, Arc::clone(&handle));
        drop(inner);

        let callback = config.line_callback.clone();
        let max_buffer = config.max_buffer_lines.max(1);
        let reader_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            let mut line_number = 0u64;
            merged_line_reader(stdout, stderr, move |text| {
                line_number += 1;
                let line = StreamLine {
                    text,
                    line_number,
                    timestamp: Utc::now(),
                };

                {
                    let mut buffer = reader_handle.buffer.lock().expect("ring buffer poisoned");
                    if buffer.len() >= max_buffer {
                        buffer.pop_front();
                    }
                    buffer.push_back(line.clone());
                }

                if let Some(callback) = &callback {
                    // Callback failures are contained to the line, never the stream
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        callback(&line)
                    }));
                    if outcome.is_err() {
                        log::error!("Line callback panicked; continuing stream");
                    }
                }

                tx.send(line).is_ok()
            })
            .await;
        });

        log::info!("Started stream {}: {}", stream_id, config.command);
        Ok(stream_id)
    }

    /// Read available lines: blocking up to `timeout` for the first line,
    /// then a non-blocking drain up to `max_lines`
    pub async fn read_lines(
        &self,
        stream_id: u64,
        max_lines: usize,
        timeout: Duration,
    ) -> Result<Vec<StreamLine>> {
        let handle = self.handle(stream_id)?;
        let mut queue = handle.queue.lock().await;
        let mut lines = Vec::new();

        if max_lines == 0 {
            return Ok(lines);
        }

        if let Ok(Some(line)) = tokio::time::timeout(timeout, queue.recv()).await {
            lines.push(line);
        }
        while lines.len() < max_lines {
            match queue.try_recv() {
                Ok(line) => lines.push(line),
                Err(_) => break,
            }
        }

        Ok(lines)
    }

    /// Next line of a finite, non-restartable pull sequence
    ///
    /// Returns `None` once the process has exited and the queue is drained.
    pub async fn next_line(&self, stream_id: u64) -> Result<Option<StreamLine>> {
        let handle = self.handle(stream_id)?;

        loop {
            {
                let mut queue = handle.queue.lock().await;
                if let Ok(line) = queue.try_recv() {
                    return Ok(Some(line));
                }
            }

            let exited = {
                let mut child = handle.child.lock().await;
                matches!(child.try_wait(), Ok(Some(_)))
            };
            if exited {
                // Final drain after exit
                let mut queue = handle.queue.lock().await;
                return Ok(queue.try_recv().ok());
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Snapshot of the ring buffer
    pub fn get_buffer(&self, stream_id: u64) -> Result<Vec<StreamLine>> {
        let handle = self.handle(stream_id)?;
        let buffer = handle.buffer.lock().expect("ring buffer poisoned");
        Ok(buffer.iter().cloned().collect())
    }

    /// Write input to a streaming process
    pub async fn write_input(&self, stream_id: u64, input: &str) -> Result<()> {
        let handle = self.handle(stream_id)?;

        {
            let mut child = handle.child.lock().await;
            if matches!(child.try_wait(), Ok(Some(_))) {
                return Err(ProcessError::NotRunning(stream_id));
            }
        }

        let mut stdin = handle.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(ProcessError::NotRunning(stream_id));
        };
        stdin.write_all(input.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Whether the stream's process is still running
    pub async fn is_running(&self, stream_id: u64) -> Result<bool> {
        let handle = self.handle(stream_id)?;
        let mut child = handle.child.lock().await;
        Ok(matches!(child.try_wait(), Ok(None)))
    }

    /// Exit code of a finished stream, if available
    pub async fn return_code(&self, stream_id: u64) -> Result<Option<i32>> {
        let handle = self.handle(stream_id)?;
        let mut child = handle.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => Ok(status.code()),
            _ => Ok(None),
        }
    }

    /// Stop a stream: terminate with grace, then drop the handle
    pub async fn stop_stream(&self, stream_id: u64) -> Result<()> {
        let handle = {
            let mut inner = self.inner.lock().expect("stream map poisoned");
            inner
                .streams
                .remove(&stream_id)
                .ok_or(ProcessError::StreamNotFound(stream_id))?
        };

        let mut child = handle.child.lock().await;
        if matches!(child.try_wait(), Ok(None)) {
            terminate_with_grace(&mut child, Duration::from_secs(5)).await;
        }

        log::info!("Stopped stream {}", stream_id);
        Ok(())
    }

    /// List all active streams
    pub async fn list_streams(&self) -> Vec<StreamInfo> {
        let handles: Vec<Arc<StreamHandle>> = {
            let inner = self.inner.lock().expect("stream map poisoned");
            inner.streams.values().cloned().collect()
        };

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            let running = {
                let mut child = handle.child.lock().await;
                matches!(child.try_wait(), Ok(None))
            };
            let buffer_len = handle.buffer.lock().expect("ring buffer poisoned").len();
            infos.push(StreamInfo {
                stream_id: handle.stream_id,
                command: handle.command.clone(),
                cwd: handle.cwd.clone(),
                running,
                start_time: handle.start_time,
                buffer_len,
            });
        }
        infos.sort_by_key(|info| info.stream_id);
        infos
    }
}
