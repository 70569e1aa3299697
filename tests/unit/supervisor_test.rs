//! Unit tests for the renderer process supervisor, using scripted processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plugbrowser::services::process_supervisor::{
    ManagedProcess, ProcessLauncher, ProcessState, Supervisor, SupervisorHandle, TerminateOutcome,
};
use plugbrowser::types::errors::SupervisorError;
use proptest::prelude::*;

const SHORT: Duration = Duration::from_millis(20);

/// How a scripted process behaves when asked to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    /// Exits as soon as anyone checks.
    Polite,
    /// Never exits by itself; dies when killed.
    Hung,
    /// Never exits and cannot be killed.
    Stubborn,
}

#[derive(Default)]
struct Journal {
    kills: Mutex<Vec<u32>>,
}

struct FakeProcess {
    pid: u32,
    behaviour: Behaviour,
    exited: Arc<AtomicBool>,
    journal: Arc<Journal>,
}

impl ManagedProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        self.behaviour == Behaviour::Polite || self.exited.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> Result<(), SupervisorError> {
        self.journal.kills.lock().unwrap().push(self.pid);
        match self.behaviour {
            Behaviour::Stubborn => Err(SupervisorError::KillFailed(self.pid.to_string())),
            _ => {
                self.exited.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

struct FakeLauncher {
    next_pid: u32,
    script: Vec<Behaviour>,
    journal: Arc<Journal>,
    fail: bool,
}

impl FakeLauncher {
    fn new(script: Vec<Behaviour>) -> (Self, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let launcher = Self {
            next_pid: 1000,
            script,
            journal: Arc::clone(&journal),
            fail: false,
        };
        (launcher, journal)
    }
}

impl ProcessLauncher for FakeLauncher {
    type Process = FakeProcess;
    type Link = u32;

    fn launch(&mut self) -> Result<(FakeProcess, u32), SupervisorError> {
        if self.fail {
            return Err(SupervisorError::SpawnFailed("no binary".to_string()));
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        let behaviour = if self.script.is_empty() {
            Behaviour::Polite
        } else {
            self.script.remove(0)
        };
        let process = FakeProcess {
            pid,
            behaviour,
            exited: Arc::new(AtomicBool::new(false)),
            journal: Arc::clone(&self.journal),
        };
        Ok((process, pid))
    }
}

#[test]
fn test_new_proc_records_running_process() {
    let (launcher, _journal) = FakeLauncher::new(vec![Behaviour::Hung]);
    let mut supervisor = Supervisor::with_timeout(launcher, SHORT);

    let (pid, link) = supervisor.new_proc().unwrap();
    assert_eq!(pid, link);
    assert_eq!(supervisor.state(pid), Some(ProcessState::Running));
    assert_eq!(supervisor.pids(), vec![pid]);
    assert!(supervisor.is_alive(pid));
}

#[test]
fn test_spawn_failure_leaves_table_empty() {
    let (mut launcher, _journal) = FakeLauncher::new(vec![]);
    launcher.fail = true;
    let mut supervisor = Supervisor::new(launcher);
    assert!(matches!(
        supervisor.new_proc(),
        Err(SupervisorError::SpawnFailed(_))
    ));
    assert!(supervisor.is_empty());
}

#[test]
fn test_exited_process_is_not_alive() {
    let (launcher, _journal) = FakeLauncher::new(vec![Behaviour::Polite]);
    let mut supervisor = Supervisor::with_timeout(launcher, SHORT);
    let (pid, _) = supervisor.new_proc().unwrap();

    assert!(!supervisor.is_alive(pid));
    assert_eq!(supervisor.state(pid), Some(ProcessState::Crashed));
    assert!(!supervisor.is_alive(4242));
}

#[test]
fn test_reap_exited_drops_only_dead_entries() {
    let (launcher, _journal) = FakeLauncher::new(vec![Behaviour::Polite, Behaviour::Hung]);
    let mut supervisor = Supervisor::with_timeout(launcher, SHORT);
    let (dead, _) = supervisor.new_proc().unwrap();
    let (alive, _) = supervisor.new_proc().unwrap();

    assert_eq!(supervisor.reap_exited(), vec![dead]);
    assert_eq!(supervisor.pids(), vec![alive]);
}

#[tokio::test]
async fn test_terminate_polite_process_joins_without_kill() {
    let (launcher, journal) = FakeLauncher::new(vec![Behaviour::Polite]);
    let mut supervisor = Supervisor::with_timeout(launcher, SHORT);
    let (pid, _) = supervisor.new_proc().unwrap();

    assert_eq!(supervisor.terminate(pid).await, TerminateOutcome::Exited);
    assert!(supervisor.is_empty());
    assert!(journal.kills.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_terminate_hung_process_kills_it() {
    let (launcher, journal) = FakeLauncher::new(vec![Behaviour::Hung]);
    let mut supervisor = Supervisor::with_timeout(launcher, SHORT);
    let (pid, _) = supervisor.new_proc().unwrap();

    assert_eq!(supervisor.terminate(pid).await, TerminateOutcome::Killed);
    assert!(supervisor.is_empty());
    assert_eq!(*journal.kills.lock().unwrap(), vec![pid]);
}

#[tokio::test]
async fn test_failed_kill_still_drops_entry() {
    let (launcher, journal) = FakeLauncher::new(vec![Behaviour::Stubborn]);
    let mut supervisor = Supervisor::with_timeout(launcher, SHORT);
    let (pid, _) = supervisor.new_proc().unwrap();

    assert_eq!(supervisor.terminate(pid).await, TerminateOutcome::Killed);
    assert!(supervisor.state(pid).is_none());
    assert_eq!(journal.kills.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_terminate_unknown_pid() {
    let (launcher, _journal) = FakeLauncher::new(vec![]);
    let mut supervisor = Supervisor::with_timeout(launcher, SHORT);
    assert_eq!(supervisor.terminate(7).await, TerminateOutcome::NotFound);
}

#[tokio::test]
async fn test_handle_round_trip() {
    let (launcher, journal) = FakeLauncher::new(vec![Behaviour::Hung, Behaviour::Hung]);
    let handle = SupervisorHandle::spawn(Supervisor::with_timeout(launcher, SHORT));

    let (first, _) = handle.new_proc().await.unwrap();
    let (second, _) = handle.new_proc().await.unwrap();
    assert!(handle.is_alive(first).await);

    handle.terminate(first);
    assert!(!handle.is_alive(first).await);
    assert!(handle.is_alive(second).await);

    handle.quit().await;
    assert_eq!(*journal.kills.lock().unwrap(), vec![first, second]);

    // the supervisor task is gone
    assert!(matches!(handle.new_proc().await, Err(SupervisorError::Stopped)));
    assert!(!handle.is_alive(second).await);
}

fn arb_script() -> impl Strategy<Value = Vec<Behaviour>> {
    prop::collection::vec(
        prop_oneof![
            Just(Behaviour::Polite),
            Just(Behaviour::Hung),
            Just(Behaviour::Stubborn),
        ],
        0..8,
    )
}

// **Property 6: Process table convergence**
//
// *For any* mix of well-behaved and hung processes, shutdown SHALL leave the
// process table empty, and every hung entry SHALL have been killed after its
// join timed out.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn shutdown_empties_table(script in arb_script()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let (launcher, journal) = FakeLauncher::new(script.clone());
        let mut supervisor = Supervisor::with_timeout(launcher, Duration::from_millis(5));
        let mut pids = Vec::new();
        for _ in 0..script.len() {
            pids.push(supervisor.new_proc().unwrap().0);
        }

        let outcomes = runtime.block_on(supervisor.shutdown());

        prop_assert!(supervisor.is_empty());
        prop_assert_eq!(outcomes.len(), pids.len());
        let kills = journal.kills.lock().unwrap().clone();
        for ((pid, outcome), behaviour) in outcomes.iter().zip(&script) {
            match behaviour {
                Behaviour::Polite => {
                    prop_assert_eq!(*outcome, TerminateOutcome::Exited);
                    prop_assert!(!kills.contains(pid));
                }
                Behaviour::Hung | Behaviour::Stubborn => {
                    prop_assert_eq!(*outcome, TerminateOutcome::Killed);
                    prop_assert!(kills.contains(pid));
                }
            }
        }
    }
}
