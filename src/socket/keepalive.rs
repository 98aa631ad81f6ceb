//! Keepalive Monitor
//!
//! Tracks two deadlines for the active connection:
//!
//! - **cadence**: when to send the next probe. Pushed back whenever the server
//!   talks to us, so a busy connection is never probed.
//! - **response**: how long an in-flight probe may go unanswered before the
//!   connection is declared dead.
//!
//! The monitor only does bookkeeping. Sending the probe and tearing down the
//! connection belong to the session actor, which polls [`Keepalive::next_deadline`].

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::deadline_after;
use crate::error::SocketError;

/// A probe waiting for its pong (or ping reply).
#[derive(Debug)]
pub struct Probe {
    /// Generation of the transport the probe was sent on
    pub generation: u64,
    /// Id of the fallback `ping` call, if the transport lacks native ping
    pub call_id: Option<u64>,
    pub deadline: Instant,
    /// Callers of `SocketClient::ping()` riding on this probe
    pub waiters: Vec<oneshot::Sender<Result<(), SocketError>>>,
}

impl Probe {
    pub fn resolve(self, result: Result<(), SocketError>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    timeout: Duration,
    running: bool,
    next_probe: Option<Instant>,
    in_flight: Option<Probe>,
}

impl Keepalive {
    /// A zero `interval` disables periodic probes; on-demand probes still work.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            running: false,
            next_probe: None,
            in_flight: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start(&mut self, now: Instant) {
        self.running = true;
        self.arm(now);
    }

    /// Stop monitoring. Hands back any in-flight probe so its waiters can be failed.
    pub fn stop(&mut self) -> Option<Probe> {
        self.running = false;
        self.next_probe = None;
        self.in_flight.take()
    }

    /// The server sent us something; no need to probe for a while.
    pub fn on_traffic(&mut self, now: Instant) {
        if self.running {
            self.arm(now);
        }
    }

    /// Whether the cadence deadline has passed and no probe is outstanding.
    pub fn probe_due(&self, now: Instant) -> bool {
        self.in_flight.is_none() && self.next_probe.is_some_and(|at| at <= now)
    }

    pub fn in_flight_mut(&mut self) -> Option<&mut Probe> {
        self.in_flight.as_mut()
    }

    pub fn begin(
        &mut self,
        generation: u64,
        call_id: Option<u64>,
        waiters: Vec<oneshot::Sender<Result<(), SocketError>>>,
        now: Instant,
    ) {
        self.next_probe = None;
        self.in_flight = Some(Probe {
            generation,
            call_id,
            deadline: deadline_after(now, self.timeout),
            waiters,
        });
    }

    /// The probe was answered. Returns it if it belonged to `generation`.
    pub fn complete(&mut self, generation: u64, now: Instant) -> Option<Probe> {
        if self.in_flight.as_ref()?.generation != generation {
            return None;
        }
        let probe = self.in_flight.take();
        if self.running {
            self.arm(now);
        }
        probe
    }

    /// The fallback `ping` call with `call_id` was answered.
    pub fn complete_call(&mut self, call_id: u64, now: Instant) -> Option<Probe> {
        let generation = self
            .in_flight
            .as_ref()
            .filter(|probe| probe.call_id == Some(call_id))?
            .generation;
        self.complete(generation, now)
    }

    /// Take the in-flight probe if its response deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> Option<Probe> {
        if self.in_flight.as_ref()?.deadline <= now {
            self.in_flight.take()
        } else {
            None
        }
    }

    /// Earliest instant at which the monitor needs attention.
    pub fn next_deadline(&self) -> Option<Instant> {
        let cadence = if self.in_flight.is_none() {
            self.next_probe
        } else {
            None
        };
        let response = self.in_flight.as_ref().map(|probe| probe.deadline);
        match (cadence, response) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn arm(&mut self, now: Instant) {
        self.next_probe = if self.interval.is_zero() {
            None
        } else {
            Some(deadline_after(now, self.interval))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(15);
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn keepalive() -> Keepalive {
        Keepalive::new(INTERVAL, TIMEOUT)
    }

    #[test]
    fn test_idle_until_started() {
        let ka = keepalive();
        assert!(ka.next_deadline().is_none());
        assert!(!ka.probe_due(Instant::now() + INTERVAL * 2));
    }

    #[test]
    fn test_probe_due_after_interval() {
        let mut ka = keepalive();
        let t0 = Instant::now();
        ka.start(t0);
        assert_eq!(ka.next_deadline(), Some(t0 + INTERVAL));
        assert!(!ka.probe_due(t0 + INTERVAL - Duration::from_millis(1)));
        assert!(ka.probe_due(t0 + INTERVAL));
    }

    #[test]
    fn test_traffic_postpones_probe() {
        let mut ka = keepalive();
        let t0 = Instant::now();
        ka.start(t0);
        let t1 = t0 + Duration::from_secs(10);
        ka.on_traffic(t1);
        assert!(!ka.probe_due(t0 + INTERVAL));
        assert_eq!(ka.next_deadline(), Some(t1 + INTERVAL));
    }

    #[test]
    fn test_in_flight_probe_uses_response_deadline() {
        let mut ka = keepalive();
        let t0 = Instant::now();
        ka.start(t0);
        ka.begin(1, None, Vec::new(), t0 + INTERVAL);
        assert!(!ka.probe_due(t0 + INTERVAL * 3));
        assert_eq!(ka.next_deadline(), Some(t0 + INTERVAL + TIMEOUT));

        assert!(ka.take_expired(t0 + INTERVAL + Duration::from_secs(1)).is_none());
        let probe = ka.take_expired(t0 + INTERVAL + TIMEOUT).unwrap();
        assert_eq!(probe.generation, 1);
    }

    #[test]
    fn test_completion_rearms_cadence() {
        let mut ka = keepalive();
        let t0 = Instant::now();
        ka.start(t0);
        ka.begin(2, Some(9), Vec::new(), t0);

        assert!(ka.complete(1, t0).is_none(), "stale generation must not complete");
        assert!(ka.complete_call(8, t0).is_none());

        let t1 = t0 + Duration::from_secs(1);
        let probe = ka.complete_call(9, t1).unwrap();
        assert_eq!(probe.generation, 2);
        assert_eq!(ka.next_deadline(), Some(t1 + INTERVAL));
    }

    #[tokio::test]
    async fn test_stop_hands_back_waiters() {
        let mut ka = keepalive();
        let t0 = Instant::now();
        ka.start(t0);
        let (tx, rx) = oneshot::channel();
        ka.begin(1, None, vec![tx], t0);

        let probe = ka.stop().unwrap();
        probe.resolve(Err(SocketError::Closed));
        assert_eq!(rx.await.unwrap(), Err(SocketError::Closed));
        assert!(ka.next_deadline().is_none());
    }

    #[test]
    fn test_zero_interval_disables_cadence() {
        let mut ka = Keepalive::new(Duration::ZERO, TIMEOUT);
        ka.start(Instant::now());
        assert!(ka.next_deadline().is_none());
    }
}
