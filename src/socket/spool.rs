//! Outbound spool.
//!
//! Frames written while the session is not ready are parked here and flushed
//! in FIFO order once the session is re-established. The spool only promises
//! the frame gets *sent*; replies are tracked by the call registry.

use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::oneshot;

use crate::error::SocketError;

/// A frame waiting for a connection.
#[derive(Debug)]
pub struct Spooled {
    pub frame: String,
    /// Call id, used to arm the reply deadline once the frame is sent
    pub call_id: u64,
    /// Completion for `no_reply` calls, which settle as soon as they are sent
    pub on_sent: Option<oneshot::Sender<Result<Value, SocketError>>>,
}

#[derive(Debug, Default)]
pub struct Spool {
    queue: VecDeque<Spooled>,
    capacity: Option<usize>,
}

impl Spool {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Park a frame. Hands it back when the spool is full.
    pub fn push(&mut self, message: Spooled) -> Result<(), Spooled> {
        match self.capacity {
            Some(cap) if self.queue.len() >= cap => Err(message),
            _ => {
                self.queue.push_back(message);
                Ok(())
            }
        }
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<Spooled> {
        self.queue.drain(..).collect()
    }

    /// Put frames back at the front, preserving their order.
    pub fn requeue_front(&mut self, messages: Vec<Spooled>) {
        for message in messages.into_iter().rev() {
            self.queue.push_front(message);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64) -> Spooled {
        Spooled {
            frame: format!("frame-{}", id),
            call_id: id,
            on_sent: None,
        }
    }

    #[test]
    fn test_drains_in_fifo_order() {
        let mut spool = Spool::new(None);
        for id in 1..=4 {
            spool.push(message(id)).unwrap();
        }
        let ids: Vec<u64> = spool.drain().iter().map(|m| m.call_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(spool.is_empty());
    }

    #[test]
    fn test_capacity_rejects_overflow() {
        let mut spool = Spool::new(Some(2));
        spool.push(message(1)).unwrap();
        spool.push(message(2)).unwrap();
        let rejected = spool.push(message(3)).unwrap_err();
        assert_eq!(rejected.call_id, 3);
        assert_eq!(spool.len(), 2);
    }

    #[test]
    fn test_requeue_front_keeps_order_ahead_of_newer() {
        let mut spool = Spool::new(None);
        spool.push(message(1)).unwrap();
        spool.push(message(2)).unwrap();
        let unsent = spool.drain();
        spool.push(message(3)).unwrap();
        spool.requeue_front(unsent);
        let ids: Vec<u64> = spool.drain().iter().map(|m| m.call_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
