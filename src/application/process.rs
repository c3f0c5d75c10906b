//! # Process Registry
//!
//! Every command invocation runs as a [`Process`]: its own tokio task, registered under a numeric
//! pid for the whole of its execution and removed when it returns, fails, panics or is killed.
//!
//! Killing is a two-step affair. [`ProcessRegistry::interrupt`] flips the process state and fires
//! its [`Interrupt`]; a body suspended in the event waiter wakes with `Interrupted`, and the
//! execution wrapper drops any body still running at its next `.await`.

use chrono::{DateTime, Local};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::application::command::CommandDef;
use crate::application::waiter::DeadlineHandle;
use crate::domain::errors::{CommandError, CommandResult};
use crate::domain::types::{Origin, Pid};

/// Sending half of a process kill signal.
#[derive(Debug)]
pub struct InterruptTrigger(watch::Sender<bool>);

impl InterruptTrigger {
    pub fn fire(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of a process kill signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Interrupt(watch::Receiver<bool>);

impl Interrupt {
    /// Resolves once the signal has fired. Never resolves if the trigger is dropped unfired.
    pub async fn interrupted(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                if *self.0.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn interrupt_pair() -> (InterruptTrigger, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptTrigger(tx), Interrupt(rx))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Interrupted,
    Done,
}

/// Scheduling phase, shown by the `ps` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
    Runnable,
    /// Suspended in the event waiter.
    Waiting,
    Terminated,
}

impl ProcessPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Runnable => "runnable",
            Self::Waiting => "waiting",
            Self::Terminated => "terminated",
        }
    }
}

type Payload = Arc<dyn Any + Send + Sync>;

pub struct Process {
    pid: Pid,
    command: Arc<CommandDef>,
    origin: Origin,
    started_at: DateTime<Local>,
    state: watch::Sender<ProcessState>,
    waits: AtomicUsize,
    deadlines: Mutex<Vec<DeadlineHandle>>,
    trigger: InterruptTrigger,
    interrupt: Interrupt,
    payload: Mutex<Option<Payload>>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("command", &self.command.name)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Process {
    fn new(pid: Pid, command: Arc<CommandDef>, origin: Origin) -> Self {
        let (state, _) = watch::channel(ProcessState::Running);
        let (trigger, interrupt) = interrupt_pair();
        Self {
            pid,
            command,
            origin,
            started_at: Local::now(),
            state,
            waits: AtomicUsize::new(0),
            deadlines: Mutex::default(),
            trigger,
            interrupt,
            payload: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn command(&self) -> &Arc<CommandDef> {
        &self.command
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn phase(&self) -> ProcessPhase {
        if self.state() == ProcessState::Done {
            ProcessPhase::Terminated
        } else if self.waits.load(Ordering::SeqCst) > 0 {
            ProcessPhase::Waiting
        } else {
            ProcessPhase::Runnable
        }
    }

    /// Kill signal observed by waits inside this process.
    pub fn interrupt_signal(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Mark the process as waiting on input until the guard drops. A wait that has a deadline
    /// passes its handle so [`Process::lift_deadlines`] can reach it.
    pub fn enter_wait(self: &Arc<Self>, deadline: Option<DeadlineHandle>) -> WaitGuard {
        let deadline = deadline.map(|handle| {
            let id = handle.id();
            self.lock_deadlines().push(handle);
            id
        });
        self.waits.fetch_add(1, Ordering::SeqCst);
        WaitGuard {
            process: self.clone(),
            deadline,
        }
    }

    fn lock_deadlines(&self) -> MutexGuard<'_, Vec<DeadlineHandle>> {
        self.deadlines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let the current waits run without a deadline. Returns how many were lifted.
    pub fn lift_deadlines(&self) -> usize {
        let deadlines = self.lock_deadlines();
        for handle in deadlines.iter() {
            handle.override_timeout_removal();
        }
        deadlines.len()
    }

    fn lock_payload(&self) -> MutexGuard<'_, Option<Payload>> {
        self.payload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_payload<T: Any + Send + Sync>(&self, value: T) {
        *self.lock_payload() = Some(Arc::new(value));
    }

    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.lock_payload()
            .clone()
            .and_then(|p| p.downcast::<T>().ok())
    }

    pub fn has_payload(&self) -> bool {
        self.lock_payload().is_some()
    }

    /// Resolves once the process has been deregistered.
    pub async fn finished(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this only fails if the predicate never matches.
        let _ = state.wait_for(|s| *s == ProcessState::Done).await;
    }

    fn mark_interrupted(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == ProcessState::Running {
                *s = ProcessState::Interrupted;
                true
            } else {
                false
            }
        })
    }
}

pub struct WaitGuard {
    process: Arc<Process>,
    deadline: Option<u64>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if let Some(id) = self.deadline {
            self.process.lock_deadlines().retain(|h| h.id() != id);
        }
        self.process.waits.fetch_sub(1, Ordering::SeqCst);
    }
}

pub type ProcessBody = BoxFuture<'static, CommandResult>;

/// Called with the outcome after the process has been deregistered.
pub type ExitHandler = Box<dyn FnOnce(Arc<Process>, CommandResult) -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
pub struct ProcessRegistry {
    next_pid: AtomicU32,
    processes: Mutex<BTreeMap<Pid, Arc<Process>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn starting_at(pid: Pid) -> Self {
        Self {
            next_pid: AtomicU32::new(pid),
            processes: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Pid, Arc<Process>>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new process and start `body` on its own task.
    ///
    /// `body` receives the process so it can observe its interrupt signal and attach a payload.
    /// It is called on the new task, so a panic while building the future is reported like a
    /// panic inside it. The process stays listed until the body has finished, then `on_exit` gets
    /// the outcome.
    pub fn run<F>(
        self: &Arc<Self>,
        command: Arc<CommandDef>,
        origin: Origin,
        body: F,
        on_exit: ExitHandler,
    ) -> Arc<Process>
    where
        F: FnOnce(Arc<Process>) -> ProcessBody + Send + 'static,
    {
        let process = {
            let mut processes = self.lock();
            let pid = loop {
                // fetch_add wraps on overflow; skip pids that are still live
                let candidate = self.next_pid.fetch_add(1, Ordering::Relaxed);
                if !processes.contains_key(&candidate) {
                    break candidate;
                }
            };
            let process = Arc::new(Process::new(pid, command, origin));
            processes.insert(pid, process.clone());
            process
        };

        tracing::info!(
            pid = process.pid,
            command = %process.command.name,
            actor = %process.origin.actor,
            room = %process.origin.room,
            "Process started"
        );

        let registry = self.clone();
        let task_process = process.clone();
        tokio::spawn(async move {
            let process = task_process;
            let guard = Deregister {
                registry,
                process: process.clone(),
            };
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| body(process.clone()))) {
                Ok(future) => {
                    let mut interrupt = process.interrupt_signal();
                    tokio::select! {
                        biased;
                        () = interrupt.interrupted() => Err(CommandError::Interrupted),
                        result = AssertUnwindSafe(future).catch_unwind() => {
                            result.unwrap_or_else(|panic| Err(panicked(panic.as_ref())))
                        }
                    }
                }
                Err(panic) => Err(panicked(panic.as_ref())),
            };
            drop(guard);
            on_exit(process, outcome).await;
        });
        process
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.lock().get(&pid).cloned()
    }

    /// All live processes ordered by pid.
    pub fn list(&self) -> Vec<Arc<Process>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Kill a process by pid. Returns `false` if it is unknown or already interrupted.
    pub fn interrupt(&self, pid: Pid) -> bool {
        match self.get(pid) {
            Some(process) => Self::interrupt_process(&process),
            None => false,
        }
    }

    pub fn interrupt_process(process: &Process) -> bool {
        if !process.mark_interrupted() {
            return false;
        }
        tracing::warn!(pid = process.pid, command = %process.command.name, "Interrupting process");
        process.trigger.fire();
        true
    }

    fn deregister(&self, process: &Process) {
        self.lock().remove(&process.pid);
        process.state.send_replace(ProcessState::Done);
        tracing::debug!(pid = process.pid, "Process deregistered");
    }
}

/// Removes the process on every exit path, including task cancellation at shutdown.
struct Deregister {
    registry: Arc<ProcessRegistry>,
    process: Arc<Process>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry.deregister(&self.process);
    }
}

fn panicked(panic: &(dyn Any + Send)) -> CommandError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    CommandError::Internal(anyhow::anyhow!("command panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::waiter::EventWaiter;
    use crate::domain::types::{EventKind, ShredId};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn origin() -> Origin {
        Origin {
            shred: ShredId(0),
            actor: "@alice:x".into(),
            room: "!room:x".into(),
            channel: "!room:x".into(),
        }
    }

    fn command() -> Arc<CommandDef> {
        Arc::new(CommandDef::new("test", "test command"))
    }

    fn capture_exit() -> (ExitHandler, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        let handler: ExitHandler = Box::new(
            move |_process: Arc<Process>, outcome: CommandResult| -> BoxFuture<'static, ()> {
                let _ = tx.send(outcome);
                Box::pin(async {})
            },
        );
        (handler, rx)
    }

    #[tokio::test]
    async fn test_registered_during_execution_and_removed_after() {
        let registry = Arc::new(ProcessRegistry::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (on_exit, exit_rx) = capture_exit();

        let process = registry.run(
            command(),
            origin(),
            |_| {
                Box::pin(async move {
                    let _ = release_rx.await;
                    Ok(())
                })
            },
            on_exit,
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(process.pid()).unwrap().pid(), process.pid());
        assert_eq!(process.state(), ProcessState::Running);

        release_tx.send(()).unwrap();
        process.finished().await;
        assert!(registry.is_empty());
        assert_eq!(process.phase(), ProcessPhase::Terminated);
        assert!(exit_rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failed_body_is_deregistered_and_reported() {
        let registry = Arc::new(ProcessRegistry::new());
        let (on_exit, exit_rx) = capture_exit();
        let process = registry.run(
            command(),
            origin(),
            |_| Box::pin(async { Err(CommandError::failure("bad input")) }),
            on_exit,
        );

        process.finished().await;
        assert!(registry.is_empty());
        assert!(matches!(
            exit_rx.await.unwrap(),
            Err(CommandError::Failure { .. })
        ));
    }

    #[tokio::test]
    async fn test_panicking_body_becomes_internal_fault() {
        let registry = Arc::new(ProcessRegistry::new());
        let (on_exit, exit_rx) = capture_exit();
        let process = registry.run(
            command(),
            origin(),
            |_| {
                Box::pin(async {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(())
                })
            },
            on_exit,
        );

        process.finished().await;
        assert!(registry.is_empty());
        match exit_rx.await.unwrap() {
            Err(CommandError::Internal(e)) => assert!(e.to_string().contains("kaboom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_while_building_body_is_deregistered() {
        let registry = Arc::new(ProcessRegistry::new());
        let (on_exit, exit_rx) = capture_exit();
        let process = registry.run(
            command(),
            origin(),
            |_| -> ProcessBody { panic!("no chat handle") },
            on_exit,
        );

        process.finished().await;
        assert!(registry.is_empty());
        match exit_rx.await.unwrap() {
            Err(CommandError::Internal(e)) => assert!(e.to_string().contains("no chat handle")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_unblocks_waiting_process() {
        let registry = Arc::new(ProcessRegistry::new());
        let waiter = Arc::new(EventWaiter::new());
        let (on_exit, exit_rx) = capture_exit();

        let body_waiter = waiter.clone();
        let (saw_tx, saw_rx) = oneshot::channel();
        let process = registry.run(
            command(),
            origin(),
            move |process| {
                Box::pin(async move {
                    let pending =
                        body_waiter.subscribe(EventKind::MessageReceived, Box::new(|_| false));
                    let _waiting = process.enter_wait(Some(pending.deadline_handle()));
                    let mut interrupt = process.interrupt_signal();
                    let result = pending
                        .wait(Some(Duration::from_secs(5)), None, &mut interrupt)
                        .await;
                    let _ = saw_tx.send(result);
                    Ok(())
                })
            },
            on_exit,
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(process.phase(), ProcessPhase::Waiting);
        assert_eq!(waiter.pending(), 1);
        assert_eq!(process.lift_deadlines(), 1);

        assert!(registry.interrupt(process.pid()));
        assert!(!registry.interrupt(process.pid()));
        tokio::time::timeout(Duration::from_secs(1), process.finished())
            .await
            .unwrap();

        assert!(registry.is_empty());
        assert_eq!(waiter.pending(), 0);
        assert_eq!(process.lift_deadlines(), 0);
        assert!(matches!(
            exit_rx.await.unwrap(),
            Err(CommandError::Interrupted)
        ));
        // the wrapper won the race, so the body never reported back
        assert!(saw_rx.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_reaches_body_outside_waits() {
        let registry = Arc::new(ProcessRegistry::new());
        let (on_exit, exit_rx) = capture_exit();
        let process = registry.run(
            command(),
            origin(),
            |_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(86_400)).await;
                    Ok(())
                })
            },
            on_exit,
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(process.phase(), ProcessPhase::Runnable);
        registry.interrupt(process.pid());
        process.finished().await;
        assert!(matches!(
            exit_rx.await.unwrap(),
            Err(CommandError::Interrupted)
        ));
    }

    #[tokio::test]
    async fn test_pids_wrap_and_skip_live_ids() {
        let registry = Arc::new(ProcessRegistry::starting_at(u32::MAX));
        let (hold_tx, hold_rx) = oneshot::channel::<()>();
        let (on_exit, _exit_rx) = capture_exit();
        let held = registry.run(
            command(),
            origin(),
            |_| {
                Box::pin(async move {
                    let _ = hold_rx.await;
                    Ok(())
                })
            },
            on_exit,
        );
        assert_eq!(held.pid(), u32::MAX);

        let (on_exit, _exit_rx) = capture_exit();
        let next = registry.run(command(), origin(), |_| Box::pin(async { Ok(()) }), on_exit);
        assert_eq!(next.pid(), 0);
        next.finished().await;

        // force the counter back onto the live pid
        registry.next_pid.store(u32::MAX, Ordering::Relaxed);
        let (on_exit, _exit_rx) = capture_exit();
        let skipped = registry.run(command(), origin(), |_| Box::pin(async { Ok(()) }), on_exit);
        assert_eq!(skipped.pid(), 0);

        hold_tx.send(()).unwrap();
        held.finished().await;
        skipped.finished().await;
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_roundtrip() {
        let registry = Arc::new(ProcessRegistry::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (on_exit, _exit_rx) = capture_exit();
        let process = registry.run(
            command(),
            origin(),
            move |process| {
                process.set_payload(String::from("round 3"));
                Box::pin(async move {
                    let _ = release_rx.await;
                    Ok(())
                })
            },
            on_exit,
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(process.has_payload());
        assert_eq!(process.payload::<String>().unwrap().as_str(), "round 3");
        assert!(process.payload::<u64>().is_none());
        release_tx.send(()).unwrap();
        process.finished().await;
    }
}
