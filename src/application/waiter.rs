//! # Event Waiter
//!
//! Lets command logic suspend until a follow-up event (a reply, a reaction) arrives.
//!
//! Subscriptions are registered per [`EventKind`]. The gateway's event handlers call
//! [`EventWaiter::dispatch`] for every inbound event; predicates run synchronously on the
//! dispatching task and a match resolves the subscription's own [`Handoff`]. Dispatch never
//! awaits, so a slow command cannot stall the gateway.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::application::handoff::Handoff;
use crate::application::process::Interrupt;
use crate::domain::errors::{HandoffError, WaitError};
use crate::domain::types::{EventKind, InboundEvent};

pub type Predicate = Box<dyn Fn(&InboundEvent) -> bool + Send + Sync>;

/// Async check reporting whether the watched resource still exists.
pub type LivenessCheck = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Clone)]
pub struct Liveness {
    check: LivenessCheck,
    poll_every: Option<Duration>,
}

impl Liveness {
    /// `poll_every` additionally runs the check while waiting; the check always runs once at the deadline.
    pub fn new(check: LivenessCheck, poll_every: Option<Duration>) -> Self {
        Self { check, poll_every }
    }

    async fn alive(&self) -> bool {
        (self.check)().await
    }
}

/// What to wait for, as passed to `CommandContext::wait_for`.
pub struct WaitRequest {
    pub kind: EventKind,
    pub predicate: Predicate,
    pub timeout: Option<Duration>,
    pub liveness: Option<Liveness>,
}

impl WaitRequest {
    pub fn new(
        kind: EventKind,
        predicate: impl Fn(&InboundEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            predicate: Box::new(predicate),
            timeout: None,
            liveness: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = Some(liveness);
        self
    }
}

struct Subscription {
    id: u64,
    kind: EventKind,
    predicate: Predicate,
    handoff: Handoff<InboundEvent>,
}

#[derive(Default)]
pub struct EventWaiter {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<EventKind, Vec<Arc<Subscription>>>>,
}

impl EventWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Arc<Subscription>>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a predicate now. Events dispatched from this point on can resolve it,
    /// even before [`PendingWait::wait`] is called.
    pub fn subscribe(self: &Arc<Self>, kind: EventKind, predicate: Predicate) -> PendingWait {
        let sub = Arc::new(Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            predicate,
            handoff: Handoff::new(),
        });
        self.lock().entry(kind).or_default().push(sub.clone());
        PendingWait {
            waiter: self.clone(),
            sub,
        }
    }

    fn unsubscribe(&self, kind: EventKind, id: u64) {
        let mut subs = self.lock();
        if let Some(list) = subs.get_mut(&kind) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subs.remove(&kind);
            }
        }
    }

    /// Offer an event to every subscription of its kind. Returns how many were resolved.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let kind = event.kind();
        let candidates: Vec<Arc<Subscription>> = match self.lock().get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut resolved = 0;
        for sub in candidates {
            if sub.handoff.is_resolved() || !(sub.predicate)(event) {
                continue;
            }
            if sub.handoff.send(event.clone()) {
                resolved += 1;
                self.unsubscribe(sub.kind, sub.id);
            }
        }
        if resolved > 0 {
            tracing::debug!(?kind, room = %event.room, resolved, "Event resolved waiters");
        }
        resolved
    }

    /// Number of live subscriptions.
    pub fn pending(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }
}

/// Lifts the deadline of one subscription while something else holds the wait.
#[derive(Clone)]
pub struct DeadlineHandle(Arc<Subscription>);

impl DeadlineHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn override_timeout_removal(&self) {
        self.0.handoff.override_timeout_removal();
    }
}

/// A registered subscription. Dropping it removes the registration.
pub struct PendingWait {
    waiter: Arc<EventWaiter>,
    sub: Arc<Subscription>,
}

impl PendingWait {
    /// Handle for lifting the deadline after [`PendingWait::wait`] has taken `self`.
    pub fn deadline_handle(&self) -> DeadlineHandle {
        DeadlineHandle(self.sub.clone())
    }

    /// An event that matched while the caller was busy elsewhere, such as in a liveness check.
    fn late_match(&self) -> Option<InboundEvent> {
        self.sub.handoff.try_receive().and_then(Result::ok)
    }

    /// Wait for the first matching event.
    ///
    /// # Errors
    ///
    /// - [`WaitError::Interrupted`] as soon as `interrupt` fires.
    /// - [`WaitError::ResourceGone`] when the liveness check fails, either on a poll or at the deadline.
    /// - [`WaitError::Timeout`] when the deadline passes and the resource still exists.
    pub async fn wait(
        self,
        timeout: Option<Duration>,
        liveness: Option<Liveness>,
        interrupt: &mut Interrupt,
    ) -> Result<InboundEvent, WaitError> {
        let receive = self.sub.handoff.receive(timeout);
        tokio::pin!(receive);
        let mut poll = liveness
            .as_ref()
            .and_then(|l| l.poll_every)
            .filter(|p| !p.is_zero())
            .map(|p| {
                let mut poll = interval_at(Instant::now() + p, p);
                poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
                poll
            });

        loop {
            tokio::select! {
                biased;
                () = interrupt.interrupted() => return Err(WaitError::Interrupted),
                outcome = &mut receive => {
                    return match outcome {
                        Ok(event) => Ok(event),
                        Err(HandoffError::Timeout) => {
                            let gone = match &liveness {
                                Some(l) => !l.alive().await,
                                None => false,
                            };
                            if let Some(event) = self.late_match() {
                                return Ok(event);
                            }
                            Err(if gone { WaitError::ResourceGone } else { WaitError::Timeout })
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Unexpected handoff failure while waiting");
                            Err(WaitError::Timeout)
                        }
                    };
                }
                () = tick(&mut poll) => {
                    if let Some(l) = &liveness
                        && !l.alive().await
                    {
                        return self.late_match().ok_or(WaitError::ResourceGone);
                    }
                }
            }
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        self.waiter.unsubscribe(self.sub.kind, self.sub.id);
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(poll) => {
            poll.tick().await;
        }
        None => std::future::pending().await,
    }
}
