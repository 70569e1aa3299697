//! Process Supervisor for renderer processes.
//!
//! Owns the table of live renderer processes keyed by pid. Processes are
//! started on request, probed for liveness and terminated with a
//! join-then-kill policy: wait a short time for the process to exit on its
//! own, kill it otherwise, and always drop the table entry afterwards.
//!
//! The supervisor runs as its own task; the UI talks to it through a
//! [`SupervisorHandle`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};

use crate::types::errors::SupervisorError;

/// Default time a process gets to exit before it is killed.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lifecycle of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Terminating,
    Crashed,
    Reaped,
}

/// How a `terminate` request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    NotFound,
    /// The process exited within the join timeout.
    Exited,
    Killed,
}

/// A child process the supervisor can probe and kill.
pub trait ManagedProcess {
    fn pid(&self) -> u32;
    fn has_exited(&mut self) -> bool;
    fn kill(&mut self) -> Result<(), SupervisorError>;
}

/// Starts renderer processes.
pub trait ProcessLauncher {
    type Process: ManagedProcess;
    /// The caller's end of the new process's message channel.
    type Link;

    fn launch(&mut self) -> Result<(Self::Process, Self::Link), SupervisorError>;
}

struct ProcessEntry<P> {
    process: P,
    state: ProcessState,
}

/// The process table and its policies.
pub struct Supervisor<L: ProcessLauncher> {
    launcher: L,
    table: BTreeMap<u32, ProcessEntry<L::Process>>,
    join_timeout: Duration,
    poll_interval: Duration,
}

impl<L: ProcessLauncher> Supervisor<L> {
    pub fn new(launcher: L) -> Self {
        Self::with_timeout(launcher, JOIN_TIMEOUT)
    }

    pub fn with_timeout(launcher: L, join_timeout: Duration) -> Self {
        Self {
            launcher,
            table: BTreeMap::new(),
            join_timeout,
            poll_interval: POLL_INTERVAL.min(join_timeout),
        }
    }

    /// Start a process and record it.
    pub fn new_proc(&mut self) -> Result<(u32, L::Link), SupervisorError> {
        let (process, link) = self.launcher.launch()?;
        let pid = process.pid();
        let mut entry = ProcessEntry {
            process,
            state: ProcessState::Starting,
        };
        entry.state = ProcessState::Running;
        self.table.insert(pid, entry);
        info!("Started renderer process {}", pid);
        Ok((pid, link))
    }

    /// Join with a timeout, then kill. The entry is always removed.
    pub async fn terminate(&mut self, pid: u32) -> TerminateOutcome {
        let Some(mut entry) = self.table.remove(&pid) else {
            debug!("Terminate for unknown process {}", pid);
            return TerminateOutcome::NotFound;
        };
        entry.state = ProcessState::Terminating;

        let deadline = Instant::now() + self.join_timeout;
        loop {
            if entry.process.has_exited() {
                entry.state = ProcessState::Reaped;
                info!("Process {} exited", pid);
                return TerminateOutcome::Exited;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(self.poll_interval).await;
        }

        if let Err(e) = entry.process.kill() {
            error!("{}", e);
        }
        entry.state = ProcessState::Reaped;
        warn!("Process {} did not exit in time and was killed", pid);
        TerminateOutcome::Killed
    }

    /// True if the process is managed and still running.
    pub fn is_alive(&mut self, pid: u32) -> bool {
        match self.table.get_mut(&pid) {
            Some(entry) => {
                if entry.state == ProcessState::Running && entry.process.has_exited() {
                    entry.state = ProcessState::Crashed;
                }
                entry.state == ProcessState::Running
            }
            None => false,
        }
    }

    /// Drop entries whose process has already exited.
    pub fn reap_exited(&mut self) -> Vec<u32> {
        let exited: Vec<u32> = self
            .table
            .iter_mut()
            .filter_map(|(pid, entry)| entry.process.has_exited().then_some(*pid))
            .collect();
        for pid in &exited {
            self.table.remove(pid);
            debug!("Reaped process {}", pid);
        }
        exited
    }

    /// Terminate every remaining process.
    pub async fn shutdown(&mut self) -> Vec<(u32, TerminateOutcome)> {
        let pids: Vec<u32> = self.table.keys().copied().collect();
        let mut outcomes = Vec::with_capacity(pids.len());
        for pid in pids {
            outcomes.push((pid, self.terminate(pid).await));
        }
        info!("Supervisor shut down ({} processes)", outcomes.len());
        outcomes
    }

    pub fn state(&self, pid: u32) -> Option<ProcessState> {
        self.table.get(&pid).map(|entry| entry.state)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.table.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Serve requests until `quit` or until every handle is dropped.
    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request<L::Link>>) {
        while let Some(request) = requests.recv().await {
            match request {
                Request::NewProc { reply } => {
                    let _ = reply.send(self.new_proc());
                }
                Request::Terminate { pid } => {
                    self.terminate(pid).await;
                }
                Request::IsAlive { pid, reply } => {
                    let _ = reply.send(self.is_alive(pid));
                }
                Request::Quit { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        self.shutdown().await;
    }
}

/// Messages understood by a running supervisor.
pub enum Request<Link> {
    NewProc {
        reply: oneshot::Sender<Result<(u32, Link), SupervisorError>>,
    },
    Terminate {
        pid: u32,
    },
    IsAlive {
        pid: u32,
        reply: oneshot::Sender<bool>,
    },
    Quit {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable client of a supervisor task.
pub struct SupervisorHandle<Link> {
    requests: mpsc::UnboundedSender<Request<Link>>,
}

impl<Link> Clone for SupervisorHandle<Link> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
        }
    }
}

impl<Link: Send + 'static> SupervisorHandle<Link> {
    /// Spawn `supervisor` on the current runtime and return its handle.
    pub fn spawn<L>(supervisor: Supervisor<L>) -> Self
    where
        L: ProcessLauncher<Link = Link> + Send + 'static,
        L::Process: Send,
    {
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(supervisor.run(rx));
        Self { requests }
    }

    /// Start a renderer process; replies with its pid and channel end.
    pub async fn new_proc(&self) -> Result<(u32, Link), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::NewProc { reply })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Ask for termination without waiting for it.
    pub fn terminate(&self, pid: u32) {
        if self.requests.send(Request::Terminate { pid }).is_err() {
            debug!("Supervisor gone; cannot terminate {}", pid);
        }
    }

    pub async fn is_alive(&self, pid: u32) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::IsAlive { pid, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Terminate everything and stop the supervisor.
    pub async fn quit(&self) {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::Quit { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

// === Renderer launcher ===

/// A renderer child started by [`RendererLauncher`].
pub struct RendererChild {
    pid: u32,
    child: Child,
}

impl ManagedProcess for RendererChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> Result<(), SupervisorError> {
        self.child
            .start_kill()
            .map_err(|e| SupervisorError::KillFailed(format!("{}: {}", self.pid, e)))
    }
}

/// Pipe ends of a renderer child held by the UI process.
pub struct ProcessLink {
    pub pid: u32,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Starts `plugbrowser-renderer` children with piped stdin/stdout.
pub struct RendererLauncher {
    program: PathBuf,
    verbosity: u8,
}

impl RendererLauncher {
    pub fn new(program: PathBuf, verbosity: u8) -> Self {
        Self { program, verbosity }
    }

    /// The renderer binary installed next to the running executable.
    pub fn sibling_program() -> PathBuf {
        let name = format!("plugbrowser-renderer{}", std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}

impl ProcessLauncher for RendererLauncher {
    type Process = RendererChild;
    type Link = ProcessLink;

    fn launch(&mut self) -> Result<(RendererChild, ProcessLink), SupervisorError> {
        let mut child = Command::new(&self.program)
            .arg("--verbose")
            .arg(self.verbosity.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(format!("{}: {}", self.program.display(), e)))?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::SpawnFailed("child exited immediately".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailed("stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::SpawnFailed("stdout not piped".to_string()))?;

        Ok((RendererChild { pid, child }, ProcessLink { pid, stdin, stdout }))
    }
}
