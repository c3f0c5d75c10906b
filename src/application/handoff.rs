//! # Handoff
//!
//! Single-use value/error slot bridging a producer (an event handler running on the gateway's
//! dispatch task) to one consumer suspended in command logic.
//!
//! - The first `send`/`throw` wins; later calls return `false` and change nothing.
//! - `receive` checks the slot before waiting, so a value sent earlier is returned immediately.
//! - A zero or absent timeout waits forever.
//! - `override_timeout_removal` lifts the deadline for current and future receivers.
//!
//! Resolution wakes every receiver subscribed to the instance. Only one receiver is expected;
//! if several race, exactly one gets the value and the rest get [`HandoffError::AlreadyTaken`].

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

use crate::domain::errors::HandoffError;

enum Slot<T> {
    Empty,
    Value(T),
    Error(String),
    Taken,
}

pub struct Handoff<T> {
    slot: Mutex<Slot<T>>,
    resolved: watch::Sender<bool>,
    unbounded: watch::Sender<bool>,
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        let (resolved, _) = watch::channel(false);
        let (unbounded, _) = watch::channel(false);
        Self {
            slot: Mutex::new(Slot::Empty),
            resolved,
            unbounded,
        }
    }

    /// Store a value. Returns `false` if the handoff was already resolved.
    pub fn send(&self, value: T) -> bool {
        self.resolve(Slot::Value(value))
    }

    /// Store an error instead of a value. Returns `false` if already resolved.
    pub fn throw(&self, error: impl Into<String>) -> bool {
        self.resolve(Slot::Error(error.into()))
    }

    pub fn is_resolved(&self) -> bool {
        *self.resolved.borrow()
    }

    /// Make every receiver ignore its deadline from now on.
    pub fn override_timeout_removal(&self) {
        self.unbounded.send_replace(true);
    }

    pub fn is_timeout_removed(&self) -> bool {
        *self.unbounded.borrow()
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, outcome: Slot<T>) -> bool {
        {
            let mut slot = self.lock();
            if !matches!(*slot, Slot::Empty) {
                return false;
            }
            *slot = outcome;
        }
        self.resolved.send_replace(true);
        true
    }

    /// Take the outcome if the slot is resolved, without waiting.
    pub fn try_receive(&self) -> Option<Result<T, HandoffError>> {
        let mut slot = self.lock();
        match &*slot {
            Slot::Empty => None,
            Slot::Taken => Some(Err(HandoffError::AlreadyTaken)),
            Slot::Value(_) | Slot::Error(_) => match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Value(v) => Some(Ok(v)),
                Slot::Error(e) => Some(Err(HandoffError::Failed(e))),
                Slot::Empty | Slot::Taken => None,
            },
        }
    }

    /// Wait for the slot to be resolved.
    ///
    /// The deadline is fixed at entry. Dropping the returned future leaves the handoff intact,
    /// which is how interruption is expressed by callers.
    ///
    /// # Errors
    ///
    /// [`HandoffError::Timeout`] when the deadline passes first, [`HandoffError::Failed`] when the
    /// producer threw, [`HandoffError::AlreadyTaken`] when another receiver won the value.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<T, HandoffError> {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);
        let mut resolved = self.resolved.subscribe();
        let mut unbounded = self.unbounded.subscribe();

        loop {
            if let Some(outcome) = self.try_receive() {
                return outcome;
            }
            let active_deadline = deadline.filter(|_| !*unbounded.borrow_and_update());

            tokio::select! {
                _ = resolved.changed() => {}
                _ = unbounded.changed() => {}
                () = sleep_until_opt(active_deadline) => {
                    if self.is_timeout_removed() {
                        continue;
                    }
                    return match self.try_receive() {
                        Some(outcome) => outcome,
                        None => Err(HandoffError::Timeout),
                    };
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Convert a millisecond timeout into the form `receive` takes. Zero means forever.
///
/// # Errors
///
/// Negative values are rejected with [`HandoffError::InvalidTimeout`].
pub fn timeout_from_millis(millis: i64) -> Result<Option<Duration>, HandoffError> {
    match u64::try_from(millis) {
        Err(_) => Err(HandoffError::InvalidTimeout(millis)),
        Ok(0) => Ok(None),
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_send_before_receive_returns_immediately() {
        let handoff = Handoff::new();
        assert!(handoff.send(7));
        let started = Instant::now();
        assert_eq!(handoff.receive(Some(Duration::from_secs(5))).await.unwrap(), 7);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let handoff = Handoff::new();
        assert!(handoff.send("first"));
        assert!(!handoff.send("second"));
        assert!(!handoff.throw("late error"));
        assert_eq!(handoff.receive(None).await.unwrap(), "first");

        let failing: Handoff<u8> = Handoff::new();
        assert!(failing.throw("boom"));
        assert!(!failing.send(1));
        match failing.receive(None).await {
            Err(HandoffError::Failed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_or_absent_timeout_waits_forever() {
        let handoff: Handoff<u8> = Handoff::new();
        let forever = tokio::time::timeout(Duration::from_secs(3600), handoff.receive(None)).await;
        assert!(forever.is_err());
        let zero = tokio::time::timeout(
            Duration::from_secs(3600),
            handoff.receive(Some(Duration::ZERO)),
        )
        .await;
        assert!(zero.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let handoff: Handoff<u8> = Handoff::new();
        let started = Instant::now();
        let result = handoff.receive(Some(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(HandoffError::Timeout)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_arriving_mid_wait_wakes_receiver() {
        let handoff = Arc::new(Handoff::new());
        let producer = handoff.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            producer.send(42);
        });
        let value = handoff.receive(Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_removes_deadline_of_blocked_receiver() {
        let handoff = Arc::new(Handoff::new());
        let receiver = {
            let handoff = handoff.clone();
            tokio::spawn(async move { handoff.receive(Some(Duration::from_secs(1))).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        handoff.override_timeout_removal();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!receiver.is_finished());

        handoff.send("done");
        assert_eq!(receiver.await.unwrap().unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_before_receive_applies_too() {
        let handoff: Handoff<u8> = Handoff::new();
        handoff.override_timeout_removal();
        let waited = tokio::time::timeout(
            Duration::from_secs(60),
            handoff.receive(Some(Duration::from_secs(1))),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_sent_after_timeout_is_still_taken() {
        let handoff = Handoff::new();
        let result = handoff.receive(Some(Duration::from_secs(1))).await;
        assert!(matches!(result, Err(HandoffError::Timeout)));
        assert!(handoff.try_receive().is_none());

        assert!(handoff.send(3));
        assert_eq!(handoff.try_receive().unwrap().unwrap(), 3);
        assert!(matches!(handoff.try_receive(), Some(Err(HandoffError::AlreadyTaken))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_competing_receivers_get_one_value() {
        let handoff = Arc::new(Handoff::new());
        let spawn_receiver = |h: Arc<Handoff<u32>>| tokio::spawn(async move { h.receive(None).await });
        let a = spawn_receiver(handoff.clone());
        let b = spawn_receiver(handoff.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        handoff.send(5);
        let results = [a.await.unwrap(), b.await.unwrap()];
        let winners = results.iter().filter(|r| matches!(r, Ok(5))).count();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(HandoffError::AlreadyTaken)))
            .count();
        assert_eq!((winners, losers), (1, 1));
    }

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(timeout_from_millis(0).unwrap(), None);
        assert_eq!(
            timeout_from_millis(250).unwrap(),
            Some(Duration::from_millis(250))
        );
        assert!(matches!(
            timeout_from_millis(-1),
            Err(HandoffError::InvalidTimeout(-1))
        ));
    }
}
