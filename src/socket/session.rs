//! Session Actor
//!
//! Single responsibility: own the logical session and drive it through
//! connect → welcome → authenticate → ready → (error | close) → reconnect.
//!
//! # The Key Abstraction
//!
//! One task owns *all* session state: status, the active transport, the id
//! counter, pending calls, the spool, keepalive and backoff. Nothing else can
//! touch it. The outside world talks to the actor through [`Command`]s, and
//! transports talk to it through generation-stamped [`TransportEvent`]s.
//! Every timer is a deadline raced in the same `select!` loop, so handlers
//! never overlap and never need locks.
//!
//! # Generations
//!
//! Each `boot()` bumps the generation. Events stamped with any other
//! generation than the active transport's are ignored, so a superseded or
//! force-closed transport can never move the state machine.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::addresses::AddressPool;
use super::auth::AuthCredentials;
use super::backoff::Backoff;
use super::calls::{CallRegistry, ReplySender, ReplyTarget};
use super::deadline_after;
use super::events::{Notification, Status};
use super::keepalive::{Keepalive, Probe};
use super::protocol::{encode, Envelope, AUTH_METHOD, PING_METHOD, WELCOME_EVENT};
use super::router::{route, Inbound};
use super::spool::{Spool, Spooled};
use super::transport::{Connector, EventSink, Frame, Transport, TransportEvent};
use crate::config::SocketConfig;
use crate::error::SocketError;

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    /// Settle as soon as the frame is sent instead of waiting for a reply
    pub no_reply: bool,
    /// Override the configured call timeout
    pub timeout: Option<Duration>,
    /// Send on the current transport even if the session is not ready yet
    pub force: bool,
}

impl CallOptions {
    pub fn no_reply() -> Self {
        Self {
            no_reply: true,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Requests from `SocketClient` handles.
pub(crate) enum Command {
    Boot,
    Close,
    Call {
        method: String,
        arguments: Vec<Value>,
        options: CallOptions,
        reply: ReplySender,
    },
    Auth {
        credentials: AuthCredentials,
        reply: ReplySender,
    },
    Ping {
        reply: oneshot::Sender<Result<(), SocketError>>,
    },
}

/// The transport currently owned by the session.
struct ActiveLink {
    generation: u64,
    address: String,
    transport: Box<dyn Transport>,
    open: bool,
}

pub(crate) struct SessionActor<C: Connector> {
    config: SocketConfig,
    connector: C,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    notifications: broadcast::Sender<Notification>,
    status_tx: watch::Sender<Status>,

    status: Status,
    generation: u64,
    link: Option<ActiveLink>,
    /// Connect / welcome / close deadline for the active transport
    link_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,

    addresses: AddressPool,
    backoff: Backoff,
    keepalive: Keepalive,
    spool: Spool,
    calls: CallRegistry,

    credentials: Option<AuthCredentials>,
    /// `auth()` callers waiting for the next re-authentication
    auth_waiters: Vec<ReplySender>,
    /// Id of the in-flight re-authentication call
    unspool_call: Option<u64>,
}

impl<C: Connector> SessionActor<C> {
    pub(crate) fn new(
        config: SocketConfig,
        connector: C,
        addresses: AddressPool,
        commands: mpsc::UnboundedReceiver<Command>,
        notifications: broadcast::Sender<Notification>,
        status_tx: watch::Sender<Status>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            keepalive: Keepalive::new(config.ping_interval(), config.ping_timeout()),
            spool: Spool::new(config.max_spool_size),
            config,
            connector,
            commands,
            events_tx,
            events_rx,
            notifications,
            status_tx,
            status: Status::Idle,
            generation: 0,
            link: None,
            link_deadline: None,
            reconnect_at: None,
            addresses,
            backoff: Backoff::default(),
            calls: CallRegistry::new(),
            credentials: None,
            auth_waiters: Vec::new(),
            unspool_call: None,
        }
    }

    /// Run until every `SocketClient` handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!(addresses = self.addresses.len(), "Session actor started");

        loop {
            let wake = self.next_deadline();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some((generation, event)) = self.events_rx.recv() => {
                    self.handle_transport_event(generation, event);
                }
                _ = sleep_until(wake) => self.fire_timers(Instant::now()),
            }
        }

        self.shutdown();
        debug!("Session actor ended");
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Boot => self.boot(),
            Command::Close => self.close(),
            Command::Call {
                method,
                arguments,
                options,
                reply,
            } => self.call(&method, arguments, options, reply),
            Command::Auth { credentials, reply } => self.auth(credentials, reply),
            Command::Ping { reply } => {
                if self.status == Status::Connected {
                    self.start_probe(vec![reply]);
                } else {
                    let _ = reply.send(Err(SocketError::NotConnected));
                }
            }
        }
    }

    /// Open a transport to the next address, superseding any current one.
    fn boot(&mut self) {
        self.reconnect_at = None;
        self.drop_link_state();
        if let Some(mut old) = self.link.take() {
            debug!(generation = old.generation, "Superseding active transport");
            old.transport.close();
        }

        self.generation += 1;
        let generation = self.generation;
        let address = self.addresses.next_address().to_string();
        info!(address = %address, generation, "Connecting");

        self.set_status(Status::Connecting);
        self.link_deadline = Some(self.establish_deadline());

        let sink = EventSink::new(generation, self.events_tx.clone());
        match self.connector.open(&address, sink) {
            Ok(transport) => {
                self.link = Some(ActiveLink {
                    generation,
                    address,
                    transport,
                    open: false,
                });
            }
            Err(e) => {
                warn!(address = %address, error = %e, "Failed to open transport");
                self.emit(Notification::Error(e));
                self.on_link_lost();
            }
        }
    }

    fn close(&mut self) {
        if let Some(probe) = self.keepalive.stop() {
            self.abandon_probe(probe, SocketError::Closed);
        }

        let Some(link) = self.link.as_mut() else {
            if self.status != Status::Closed {
                self.finish_close();
            }
            return;
        };

        info!(generation = link.generation, "Closing session");
        link.transport.close();
        self.set_status(Status::Closing);
        self.link_deadline = Some(self.establish_deadline());
    }

    fn call(
        &mut self,
        method: &str,
        arguments: Vec<Value>,
        options: CallOptions,
        reply: ReplySender,
    ) {
        if self.status == Status::Closed {
            let _ = reply.send(Err(SocketError::Closed));
            return;
        }

        let timeout = options.timeout.unwrap_or_else(|| self.config.call_timeout());
        let (target, on_sent) = if options.no_reply {
            (ReplyTarget::Detached, Some(reply))
        } else {
            (ReplyTarget::Caller(reply), None)
        };

        let id = self.calls.register(method, target, timeout);
        debug!(id, method = %method, "Registered call");

        match encode(&Envelope::method(id, method, arguments)) {
            Ok(frame) => self.dispatch(
                Spooled {
                    frame,
                    call_id: id,
                    on_sent,
                },
                options.force,
            ),
            Err(e) => self.reject(id, on_sent, e),
        }
    }

    fn auth(&mut self, credentials: AuthCredentials, reply: ReplySender) {
        if self.status == Status::Closed {
            let _ = reply.send(Err(SocketError::Closed));
            return;
        }

        let arguments = credentials.arguments();
        info!(
            channel_id = credentials.channel_id,
            anonymous = credentials.is_anonymous(),
            "Saving credentials"
        );
        self.credentials = Some(credentials);

        if self.status == Status::Connected {
            self.call(AUTH_METHOD, arguments, CallOptions::default(), reply);
        } else {
            self.auth_waiters.push(reply);
        }
    }

    // ── Outbound ────────────────────────────────────────────────────────

    /// Send now if the session is ready (or the send is forced), otherwise spool.
    fn dispatch(&mut self, message: Spooled, force: bool) {
        let link_open = self.link.as_ref().is_some_and(|link| link.open);

        if self.status == Status::Connected || (force && link_open) {
            match self.transmit(&message.frame) {
                Ok(()) => {
                    self.after_sent(message);
                    return;
                }
                Err(e) if force => {
                    self.reject(message.call_id, message.on_sent, e);
                    return;
                }
                Err(e) => {
                    warn!(id = message.call_id, error = %e, "Send failed, spooling");
                }
            }
        } else if force {
            self.reject(message.call_id, message.on_sent, SocketError::NotConnected);
            return;
        }

        let frame = message.frame.clone();
        match self.spool.push(message) {
            Ok(()) => {
                debug!(queued = self.spool.len(), "Spooled frame");
                self.emit(Notification::Spooled(frame));
            }
            Err(message) => {
                let queued = self.spool.len();
                warn!(id = message.call_id, queued, "Spool full");
                self.reject(message.call_id, message.on_sent, SocketError::SpoolFull(queued));
            }
        }
    }

    /// Hand a frame to the open transport.
    fn transmit(&mut self, frame: &str) -> Result<(), SocketError> {
        let link = self
            .link
            .as_mut()
            .filter(|link| link.open)
            .ok_or(SocketError::NotConnected)?;
        link.transport.send(frame.to_string())?;
        debug!(generation = link.generation, "Sent frame");
        self.emit(Notification::Sent(frame.to_string()));
        Ok(())
    }

    /// The frame is out: start its reply clock, release `no_reply` callers.
    fn after_sent(&mut self, message: Spooled) {
        self.calls.arm(message.call_id, Instant::now());
        if let Some(on_sent) = message.on_sent {
            let _ = on_sent.send(Ok(Value::Null));
        }
    }

    fn reject(&mut self, id: u64, on_sent: Option<ReplySender>, err: SocketError) {
        let call = self.calls.take(id);
        if let Some(tx) = on_sent {
            let _ = tx.send(Err(err));
        } else if let Some(ReplyTarget::Caller(tx)) = call.map(|c| c.target) {
            let _ = tx.send(Err(err));
        }
    }

    // ── Transport events ────────────────────────────────────────────────

    fn handle_transport_event(&mut self, generation: u64, event: TransportEvent) {
        let active = self
            .link
            .as_ref()
            .is_some_and(|link| link.generation == generation);
        if !active {
            debug!(
                generation,
                current = self.generation,
                event = ?event,
                "Ignoring event from stale transport"
            );
            return;
        }

        match event {
            TransportEvent::Open => {
                if let Some(link) = self.link.as_mut() {
                    link.open = true;
                    info!(address = %link.address, generation, "Transport open, awaiting welcome");
                }
                if self.status != Status::Closing {
                    self.link_deadline = Some(self.establish_deadline());
                }
            }
            TransportEvent::Message(frame) => self.on_frame(frame),
            TransportEvent::Pong => {
                if let Some(probe) = self.keepalive.complete(generation, Instant::now()) {
                    debug!(generation, "Pong received");
                    probe.resolve(Ok(()));
                }
            }
            TransportEvent::Close => {
                info!(generation, "Transport closed");
                self.link = None;
                self.on_link_lost();
            }
            TransportEvent::Error(message) => {
                warn!(generation, error = %message, "Transport error");
                self.emit(Notification::Error(SocketError::Transport(message)));
                self.fail_link();
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        self.keepalive.on_traffic(Instant::now());

        match route(frame) {
            Inbound::Malformed(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.emit(Notification::Error(e));
            }
            Inbound::Reply {
                envelope,
                id,
                outcome,
            } => {
                self.emit(Notification::Packet(envelope));
                self.on_reply(id, outcome);
            }
            Inbound::Welcome { envelope, data } => {
                self.emit(Notification::Packet(envelope));
                self.emit(Notification::Event {
                    name: WELCOME_EVENT.to_string(),
                    data,
                });
                self.on_welcome();
            }
            Inbound::Event {
                envelope,
                name,
                data,
            } => {
                self.emit(Notification::Packet(envelope));
                self.emit(Notification::Event { name, data });
            }
        }
    }

    fn on_reply(&mut self, id: u64, outcome: Result<Value, SocketError>) {
        let Some(call) = self.calls.take(id) else {
            warn!(id, "No handler for reply");
            self.emit(Notification::Error(SocketError::NoHandlerForReply(id)));
            return;
        };

        debug!(id, method = %call.method, ok = outcome.is_ok(), "Reply received");
        match call.target {
            ReplyTarget::Caller(tx) => {
                let _ = tx.send(outcome);
            }
            ReplyTarget::Detached => {}
            ReplyTarget::Unspool => {
                self.unspool_call = None;
                self.on_auth_outcome(outcome);
            }
            ReplyTarget::Probe => {
                // Any reply proves liveness; `ping()` callers still see a server error
                if let Some(probe) = self.keepalive.complete_call(id, Instant::now()) {
                    probe.resolve(outcome.map(|_| ()));
                }
            }
        }
    }

    /// The server acknowledged the connection: start keepalive and unspool.
    fn on_welcome(&mut self) {
        if self.status != Status::Connecting || self.unspool_call.is_some() {
            debug!(status = %self.status, "Ignoring welcome");
            return;
        }

        self.link_deadline = None;
        self.backoff.reset();
        self.keepalive.start(Instant::now());

        let Some(credentials) = self.credentials.clone() else {
            self.flush_and_ready();
            return;
        };

        debug!(channel_id = credentials.channel_id, "Re-authenticating");
        let id = self
            .calls
            .register(AUTH_METHOD, ReplyTarget::Unspool, self.config.call_timeout());
        let sent = encode(&Envelope::method(id, AUTH_METHOD, credentials.arguments()))
            .and_then(|frame| self.transmit(&frame));

        match sent {
            Ok(()) => {
                self.calls.arm(id, Instant::now());
                self.unspool_call = Some(id);
            }
            Err(e) => {
                self.calls.take(id);
                warn!(error = %e, "Failed to send re-authentication");
                self.emit(Notification::Error(e));
                self.fail_link();
            }
        }
    }

    fn on_auth_outcome(&mut self, outcome: Result<Value, SocketError>) {
        let outcome = outcome.map_err(|e| match e {
            SocketError::AuthenticationFailed(_) => e,
            other => SocketError::AuthenticationFailed(other.to_string()),
        });

        self.emit(Notification::AuthResult(outcome.clone()));
        for waiter in self.auth_waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }

        match outcome {
            Ok(_) => {
                info!("Re-authenticated");
                self.flush_and_ready();
            }
            Err(e) => {
                error!(error = %e, "Re-authentication rejected, closing session");
                self.emit(Notification::Error(e));
                self.close();
            }
        }
    }

    /// Flush the spool in order, then declare the session connected.
    fn flush_and_ready(&mut self) {
        let mut queued = self.spool.drain().into_iter();
        if queued.len() > 0 {
            info!(count = queued.len(), "Flushing spool");
        }

        while let Some(message) = queued.next() {
            match self.transmit(&message.frame) {
                Ok(()) => self.after_sent(message),
                Err(e) => {
                    warn!(error = %e, "Flush interrupted");
                    let mut unsent = vec![message];
                    unsent.extend(queued);
                    self.spool.requeue_front(unsent);
                    self.fail_link();
                    return;
                }
            }
        }

        self.set_status(Status::Connected);
        info!("Session connected");
        self.emit(Notification::Connected);
    }

    // ── Keepalive ───────────────────────────────────────────────────────

    fn start_probe(&mut self, waiters: Vec<oneshot::Sender<Result<(), SocketError>>>) {
        if let Some(probe) = self.keepalive.in_flight_mut() {
            probe.waiters.extend(waiters);
            return;
        }

        let now = Instant::now();
        let Some((generation, native)) = self
            .link
            .as_ref()
            .filter(|link| link.open)
            .map(|link| (link.generation, link.transport.supports_ping()))
        else {
            for waiter in waiters {
                let _ = waiter.send(Err(SocketError::NotConnected));
            }
            return;
        };

        let sent = if native {
            match self.link.as_mut() {
                Some(link) => link.transport.ping().map(|()| None),
                None => Err(SocketError::NotConnected),
            }
        } else {
            let id = self
                .calls
                .register(PING_METHOD, ReplyTarget::Probe, self.config.ping_timeout());
            let sent = encode(&Envelope::method(id, PING_METHOD, Vec::new()))
                .and_then(|frame| self.transmit(&frame));
            if sent.is_err() {
                self.calls.take(id);
            }
            sent.map(|()| Some(id))
        };

        match sent {
            Ok(call_id) => {
                debug!(generation, native = call_id.is_none(), "Keepalive probe sent");
                self.keepalive.begin(generation, call_id, waiters, now);
            }
            Err(e) => {
                warn!(generation, error = %e, "Keepalive probe could not be sent");
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
                self.emit(Notification::Error(e));
                self.fail_link();
            }
        }
    }

    fn on_probe_timeout(&mut self, probe: Probe) {
        let err = SocketError::timeout(PING_METHOD, self.keepalive.timeout());
        let generation = probe.generation;
        self.abandon_probe(probe, err.clone());

        let still_active = self
            .link
            .as_ref()
            .is_some_and(|link| link.generation == generation);
        if still_active {
            warn!(generation, "Keepalive probe timed out, dropping connection");
            self.emit(Notification::Error(err));
            self.fail_link();
        }
    }

    fn abandon_probe(&mut self, probe: Probe, err: SocketError) {
        if let Some(id) = probe.call_id {
            self.calls.take(id);
        }
        probe.resolve(Err(err));
    }

    // ── Failure & closure ───────────────────────────────────────────────

    /// Force-close the active transport and run the failure path now.
    fn fail_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.transport.close();
        }
        self.on_link_lost();
    }

    /// Per-connection state that dies with the transport.
    fn drop_link_state(&mut self) {
        if let Some(probe) = self.keepalive.stop() {
            self.abandon_probe(probe, SocketError::NotConnected);
        }
        if let Some(id) = self.unspool_call.take() {
            self.calls.take(id);
        }
        self.link_deadline = None;
    }

    /// The active transport is gone: finish closing, or schedule a reconnect.
    fn on_link_lost(&mut self) {
        self.drop_link_state();
        self.link = None;

        if self.status == Status::Closing {
            self.finish_close();
            return;
        }

        if let Some(max) = self.config.max_reconnect_attempts {
            let attempts = self.backoff.failures();
            if attempts >= max {
                error!(attempts, "Giving up on reconnection");
                self.emit(Notification::Error(SocketError::GaveUp { attempts }));
                self.finish_close();
                return;
            }
        }

        let delay = self.backoff.next_delay();
        let attempt = self.backoff.failures();
        self.set_status(Status::Connecting);
        self.reconnect_at = Some(deadline_after(Instant::now(), delay));
        warn!(delay_ms = delay.as_millis() as u64, attempt, "Connection lost, reconnecting");
        self.emit(Notification::Reconnecting { delay, attempt });
    }

    /// Terminal transition: reject everything still waiting.
    fn finish_close(&mut self) {
        self.reconnect_at = None;
        self.drop_link_state();
        if let Some(mut link) = self.link.take() {
            link.transport.close();
        }

        self.set_status(Status::Closed);
        self.reject_all(SocketError::Closed);
        info!("Session closed");
        self.emit(Notification::Closed);
    }

    fn reject_all(&mut self, err: SocketError) {
        for message in self.spool.drain() {
            if let Some(on_sent) = message.on_sent {
                let _ = on_sent.send(Err(err.clone()));
            }
        }
        for (_, call) in self.calls.drain() {
            if let ReplyTarget::Caller(tx) = call.target {
                let _ = tx.send(Err(err.clone()));
            }
        }
        for waiter in self.auth_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Every handle is gone; nobody can observe us any more.
    fn shutdown(&mut self) {
        self.drop_link_state();
        if let Some(mut link) = self.link.take() {
            link.transport.close();
        }
        self.set_status(Status::Closed);
        self.reject_all(SocketError::Closed);
    }

    // ── Timers ──────────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.link_deadline,
            self.reconnect_at,
            self.keepalive.next_deadline(),
            self.calls.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn fire_timers(&mut self, now: Instant) {
        if self.link_deadline.is_some_and(|at| at <= now) {
            self.link_deadline = None;
            self.on_link_deadline();
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.boot();
        }

        if let Some(probe) = self.keepalive.take_expired(now) {
            self.on_probe_timeout(probe);
        }
        if self.keepalive.probe_due(now) {
            self.start_probe(Vec::new());
        }

        for (id, call) in self.calls.take_expired(now) {
            let err = SocketError::timeout(call.method.as_str(), call.timeout);
            match call.target {
                ReplyTarget::Caller(tx) => {
                    debug!(id, method = %call.method, "Call timed out");
                    let _ = tx.send(Err(err));
                }
                ReplyTarget::Unspool => {
                    self.unspool_call = None;
                    self.on_auth_outcome(Err(err));
                }
                ReplyTarget::Detached | ReplyTarget::Probe => {}
            }
        }
    }

    fn on_link_deadline(&mut self) {
        if self.status == Status::Closing {
            warn!("Transport did not close in time, dropping it");
            self.fail_link();
            return;
        }

        let stage = match self.link.as_ref() {
            Some(link) if link.open => "welcome",
            _ => "connect",
        };
        warn!(stage, "Connection establishment timed out");
        self.emit(Notification::Error(SocketError::timeout(
            stage,
            self.config.ping_timeout(),
        )));
        self.fail_link();
    }

    // ── Plumbing ────────────────────────────────────────────────────────

    fn establish_deadline(&self) -> Instant {
        deadline_after(Instant::now(), self.config.ping_timeout())
    }

    fn set_status(&mut self, status: Status) {
        if self.status != status {
            debug!(from = %self.status, to = %status, "Status change");
        }
        self.status = status;
        let _ = self.status_tx.send_replace(status);
    }

    fn emit(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
