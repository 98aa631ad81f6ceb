//! Call Registry
//!
//! Correlates replies with the calls that produced them. Each call gets the
//! next id from a counter that never repeats for the lifetime of the session.
//! An entry is removed on its first resolution (reply, timeout, or teardown),
//! so a reply can never settle a call twice.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::deadline_after;
use crate::error::SocketError;

pub type ReplySender = oneshot::Sender<Result<Value, SocketError>>;

/// Who is waiting on a reply.
#[derive(Debug)]
pub enum ReplyTarget {
    /// A `call()`/`auth()` caller
    Caller(ReplySender),
    /// A `no_reply` call whose caller has already been released
    Detached,
    /// The re-authentication step of the unspool sequence
    Unspool,
    /// The fallback keepalive probe
    Probe,
}

#[derive(Debug)]
pub struct PendingCall {
    pub method: String,
    pub target: ReplyTarget,
    pub timeout: Duration,
    /// Set once the frame has actually been sent
    pub deadline: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct CallRegistry {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
    deadlines: BTreeSet<(Instant, u64)>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and register a pending call under it.
    pub fn register(&mut self, method: &str, target: ReplyTarget, timeout: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                target,
                timeout,
                deadline: None,
            },
        );
        id
    }

    /// Start the reply clock for a call whose frame just went out.
    pub fn arm(&mut self, id: u64, now: Instant) {
        if let Some(call) = self.pending.get_mut(&id) {
            if let Some(old) = call.deadline.take() {
                self.deadlines.remove(&(old, id));
            }
            let deadline = deadline_after(now, call.timeout);
            call.deadline = Some(deadline);
            self.deadlines.insert((deadline, id));
        }
    }

    /// Remove a call, returning it if it was still outstanding.
    pub fn take(&mut self, id: u64) -> Option<PendingCall> {
        let call = self.pending.remove(&id)?;
        if let Some(deadline) = call.deadline {
            self.deadlines.remove(&(deadline, id));
        }
        Some(call)
    }

    /// Remove every call whose deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> Vec<(u64, PendingCall)> {
        let mut expired = Vec::new();
        while let Some(&(deadline, id)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.remove(&(deadline, id));
            if let Some(call) = self.pending.remove(&id) {
                expired.push((id, call));
            }
        }
        expired
    }

    /// Remove everything, e.g. when the session closes for good.
    pub fn drain(&mut self) -> Vec<(u64, PendingCall)> {
        self.deadlines.clear();
        let mut all: Vec<(u64, PendingCall)> = self.pending.drain().collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(20);

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut calls = CallRegistry::new();
        let a = calls.register("a", ReplyTarget::Detached, TIMEOUT);
        let b = calls.register("b", ReplyTarget::Detached, TIMEOUT);
        calls.take(a);
        let c = calls.register("c", ReplyTarget::Detached, TIMEOUT);
        assert!(a < b && b < c);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn test_take_removes_exactly_once() {
        let mut calls = CallRegistry::new();
        let id = calls.register("x", ReplyTarget::Detached, TIMEOUT);
        assert!(calls.take(id).is_some());
        assert!(calls.take(id).is_none());
        assert!(!calls.contains(id));
    }

    #[test]
    fn test_unarmed_calls_never_expire() {
        let mut calls = CallRegistry::new();
        calls.register("parked", ReplyTarget::Detached, TIMEOUT);
        assert!(calls.next_deadline().is_none());
        assert!(calls.take_expired(Instant::now() + TIMEOUT * 10).is_empty());
    }

    #[test]
    fn test_expiry_in_deadline_order() {
        let mut calls = CallRegistry::new();
        let t0 = Instant::now();
        let slow = calls.register("slow", ReplyTarget::Detached, Duration::from_secs(10));
        let fast = calls.register("fast", ReplyTarget::Detached, Duration::from_secs(1));
        calls.arm(slow, t0);
        calls.arm(fast, t0);

        assert_eq!(calls.next_deadline(), Some(t0 + Duration::from_secs(1)));
        let expired = calls.take_expired(t0 + Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, fast);
        assert_eq!(expired[0].1.method, "fast");
        assert!(calls.contains(slow));
    }

    #[test]
    fn test_take_disarms_deadline() {
        let mut calls = CallRegistry::new();
        let t0 = Instant::now();
        let id = calls.register("x", ReplyTarget::Detached, TIMEOUT);
        calls.arm(id, t0);
        calls.take(id);
        assert!(calls.next_deadline().is_none());
        assert!(calls.take_expired(t0 + TIMEOUT).is_empty());
    }

    #[tokio::test]
    async fn test_drain_returns_everything() {
        let mut calls = CallRegistry::new();
        let (tx, rx) = oneshot::channel();
        calls.register("a", ReplyTarget::Caller(tx), TIMEOUT);
        calls.register("b", ReplyTarget::Unspool, TIMEOUT);

        let drained = calls.drain();
        assert_eq!(drained.len(), 2);
        assert!(calls.is_empty());
        for (_, call) in drained {
            if let ReplyTarget::Caller(tx) = call.target {
                let _ = tx.send(Err(SocketError::Closed));
            }
        }
        assert_eq!(rx.await.unwrap(), Err(SocketError::Closed));
    }
}
