//! Single-use rendezvous slots keyed by message kind.
//!
//! A scenario registers interest in a kind *before* triggering the action
//! that causes it, then waits. The receive loop delivers whatever arrives;
//! a message nobody is waiting for is dropped without blocking.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cpat_proto::MessageKind;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

type Slots<K, P> = HashMap<K, (u64, oneshot::Sender<P>)>;

/// Concurrency-safe map from kind to a pending waiter.
pub struct ChannelRegistry<K, P> {
    slots: Arc<Mutex<Slots<K, P>>>,
    next_token: AtomicU64,
}

impl<K, P> Default for ChannelRegistry<K, P>
where
    K: Eq + Hash + Copy + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> ChannelRegistry<K, P>
where
    K: Eq + Hash + Copy + Display,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register the single waiter for `kind`.
    ///
    /// A second registration while the first is pending is a harness defect.
    pub fn register(&self, kind: K) -> std::result::Result<Waiter<K, P>, K> {
        let mut slots = lock(&self.slots);
        if let Some((_, sender)) = slots.get(&kind) {
            // A waiter that gave up leaves a closed sender behind.
            if !sender.is_closed() {
                return Err(kind);
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        slots.insert(kind, (token, tx));
        debug!(kind = %kind, "Registered waiter");

        Ok(Waiter {
            kind,
            token,
            rx: Some(rx),
            slots: Arc::clone(&self.slots),
        })
    }

    /// Hand `payload` to the waiter for `kind`, if any.
    ///
    /// Never blocks. Returns whether a waiter took the payload.
    pub fn deliver(&self, kind: K, payload: P) -> bool {
        let entry = lock(&self.slots).remove(&kind);
        match entry {
            Some((_, sender)) => {
                let delivered = sender.send(payload).is_ok();
                if !delivered {
                    debug!(kind = %kind, "Waiter gone before delivery");
                }
                delivered
            }
            None => {
                debug!(kind = %kind, "No waiter, dropping message");
                false
            }
        }
    }

    /// Whether a waiter for `kind` is pending.
    pub fn is_pending(&self, kind: K) -> bool {
        lock(&self.slots)
            .get(&kind)
            .is_some_and(|(_, sender)| !sender.is_closed())
    }
}

impl<P> ChannelRegistry<MessageKind, P> {
    /// Register, mapping a duplicate to the harness usage error.
    pub fn expect(&self, kind: MessageKind) -> Result<Waiter<MessageKind, P>> {
        self.register(kind).map_err(HarnessError::DuplicateWaiter)
    }
}

/// The receiving half of one registration.
///
/// Dropping it frees the slot, so the kind can be registered again.
pub struct Waiter<K, P>
where
    K: Eq + Hash + Copy + Display,
{
    kind: K,
    token: u64,
    rx: Option<oneshot::Receiver<P>>,
    slots: Arc<Mutex<Slots<K, P>>>,
}

impl<K, P> Waiter<K, P>
where
    K: Eq + Hash + Copy + Display,
{
    pub fn kind(&self) -> K {
        self.kind
    }

    /// Block until the payload is delivered or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> std::result::Result<P, WaitError<K>> {
        let Some(rx) = self.rx.take() else {
            return Err(WaitError::Closed(self.kind));
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(WaitError::Closed(self.kind)),
            Err(_) => {
                warn!(kind = %self.kind, waited = ?timeout, "Timed out waiting for message");
                Err(WaitError::Timeout {
                    kind: self.kind,
                    waited: timeout,
                })
            }
        }
    }
}

impl<K, P> Drop for Waiter<K, P>
where
    K: Eq + Hash + Copy + Display,
{
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        if slots
            .get(&self.kind)
            .is_some_and(|(token, _)| *token == self.token)
        {
            slots.remove(&self.kind);
        }
    }
}

/// Why a wait ended without a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<K> {
    Timeout { kind: K, waited: Duration },
    /// The registry entry was removed without delivery.
    Closed(K),
}

impl From<WaitError<MessageKind>> for HarnessError {
    fn from(err: WaitError<MessageKind>) -> Self {
        match err {
            WaitError::Timeout { kind, waited } => HarnessError::ProtocolTimeout { kind, waited },
            WaitError::Closed(kind) => {
                HarnessError::Protocol(format!("waiter for {} closed without delivery", kind))
            }
        }
    }
}

fn lock<K, P>(slots: &Mutex<Slots<K, P>>) -> MutexGuard<'_, Slots<K, P>> {
    // Slots stay consistent even if a holder panicked.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpat_proto::{CommandKind, EventKind};

    const STOP: MessageKind = MessageKind::Command(CommandKind::Stop);
    const STOPPED: MessageKind = MessageKind::Event(EventKind::InstanceStopped);

    #[tokio::test]
    async fn test_delivered_payload_reaches_waiter() {
        let registry = ChannelRegistry::<MessageKind, String>::new();
        let waiter = registry.expect(STOP).unwrap();
        assert!(registry.deliver(STOP, "inst-1".to_string()));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await.unwrap(), "inst-1");
    }

    #[tokio::test]
    async fn test_delivery_from_another_task() {
        let registry = Arc::new(ChannelRegistry::<MessageKind, u32>::new());
        let waiter = registry.expect(STOP).unwrap();

        let sender = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.deliver(STOP, 7);
        });

        assert_eq!(waiter.wait(Duration::from_secs(2)).await.unwrap(), 7);
    }

    #[test]
    fn test_deliver_without_waiter_is_dropped() {
        let registry = ChannelRegistry::<MessageKind, u32>::new();
        assert!(!registry.deliver(STOP, 1));
        assert!(!registry.is_pending(STOP));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let registry = ChannelRegistry::<MessageKind, u32>::new();
        let waiter = registry.expect(STOP).unwrap();
        let err = waiter.wait(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(
            err,
            WaitError::Timeout {
                kind: STOP,
                waited: Duration::from_millis(20)
            }
        );
        let err: HarnessError = err.into();
        assert_eq!(err.class(), crate::FailureClass::Protocol);
    }

    #[test]
    fn test_duplicate_registration_is_a_usage_error() {
        let registry = ChannelRegistry::<MessageKind, u32>::new();
        let _first = registry.expect(STOP).unwrap();
        let err = registry.expect(STOP).err().unwrap();
        assert_eq!(err.class(), crate::FailureClass::Usage);

        // Other kinds are independent.
        assert!(registry.expect(STOPPED).is_ok());
    }

    #[tokio::test]
    async fn test_timed_out_kind_can_be_registered_again() {
        let registry = ChannelRegistry::<MessageKind, u32>::new();
        let waiter = registry.expect(STOP).unwrap();
        let _ = waiter.wait(Duration::from_millis(5)).await;
        assert!(!registry.is_pending(STOP));

        let again = registry.expect(STOP).unwrap();
        assert!(registry.deliver(STOP, 3));
        assert_eq!(again.wait(Duration::from_secs(1)).await.unwrap(), 3);
    }

    #[test]
    fn test_dropped_waiter_frees_slot() {
        let registry = ChannelRegistry::<MessageKind, u32>::new();
        drop(registry.expect(STOP).unwrap());
        assert!(registry.expect(STOP).is_ok());
    }

    #[test]
    fn test_stale_waiter_does_not_remove_newer_registration() {
        let registry = ChannelRegistry::<MessageKind, u32>::new();
        let first = registry.expect(STOP).unwrap();
        assert!(registry.deliver(STOP, 1));
        let second = registry.expect(STOP).unwrap();
        drop(first);
        assert!(registry.is_pending(STOP));
        drop(second);
    }

    #[tokio::test]
    async fn test_each_delivery_is_consumed_once() {
        let registry = ChannelRegistry::<MessageKind, u32>::new();
        let waiter = registry.expect(STOP).unwrap();
        assert!(registry.deliver(STOP, 1));
        assert!(!registry.deliver(STOP, 2));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await.unwrap(), 1);
    }
}
