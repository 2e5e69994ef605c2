use crate::market::types::ConnectionState;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Side effect the owner of the supervisor has to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    OpenTransport { generation: u64 },
    CloseTransport,
    FetchSnapshot,
    ScheduleReconnect { at: Instant },
    CancelReconnect,
}

/// Streaming connection lifecycle.
///
/// Every opened transport gets a fresh generation; events tagged with an
/// older generation belong to a transport that was already torn down and are
/// ignored. At most one reconnect is pending at any time.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    live_mode: bool,
    generation: u64,
    reconnect_at: Option<Instant>,
    reconnect_delay: Duration,
    last_disconnect: Option<Instant>,
}

impl ConnectionSupervisor {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            live_mode: false,
            generation: 0,
            reconnect_at: None,
            reconnect_delay,
            last_disconnect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn live_mode(&self) -> bool {
        self.live_mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn last_disconnect(&self) -> Option<Instant> {
        self.last_disconnect
    }

    fn open(&mut self) -> SupervisorAction {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        SupervisorAction::OpenTransport {
            generation: self.generation,
        }
    }

    /// Turns live mode on and opens a transport unless one is already active
    /// or a reconnect is already pending.
    pub fn enable(&mut self) -> Vec<SupervisorAction> {
        let already_active = self.live_mode
            && matches!(
                self.state,
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::ReconnectScheduled
            );
        self.live_mode = true;
        if already_active {
            return Vec::new();
        }
        vec![self.open()]
    }

    /// Turns live mode off, closes the transport and drops any pending
    /// reconnect.
    pub fn disable(&mut self) -> Vec<SupervisorAction> {
        if !self.live_mode && self.reconnect_at.is_none() {
            return Vec::new();
        }
        self.live_mode = false;
        // Invalidates events still in flight from the closing transport.
        self.generation += 1;

        let mut actions = Vec::with_capacity(2);
        if self.reconnect_at.take().is_some() {
            actions.push(SupervisorAction::CancelReconnect);
        }
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            actions.push(SupervisorAction::CloseTransport);
        }
        self.state = ConnectionState::Disconnected;
        actions
    }

    pub fn on_open(&mut self, generation: u64) -> Vec<SupervisorAction> {
        if generation != self.generation || !self.live_mode {
            debug!(generation, current = self.generation, "ignoring stale transport open");
            return Vec::new();
        }
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        info!(generation, "price stream connected");
        self.state = ConnectionState::Connected;
        vec![SupervisorAction::FetchSnapshot]
    }

    pub fn on_error(&mut self, generation: u64, now: Instant) -> Vec<SupervisorAction> {
        self.on_disconnect(generation, now, ConnectionState::Errored)
    }

    pub fn on_close(&mut self, generation: u64, now: Instant) -> Vec<SupervisorAction> {
        self.on_disconnect(generation, now, ConnectionState::Closed)
    }

    fn on_disconnect(
        &mut self,
        generation: u64,
        now: Instant,
        terminal: ConnectionState,
    ) -> Vec<SupervisorAction> {
        if generation != self.generation {
            debug!(generation, current = self.generation, "ignoring stale transport event");
            return Vec::new();
        }
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Vec::new();
        }

        self.state = terminal;
        self.last_disconnect = Some(now);
        if !self.live_mode {
            return Vec::new();
        }

        let at = now + self.reconnect_delay;
        warn!(generation, state = ?terminal, delay_ms = self.reconnect_delay.as_millis() as u64, "price stream lost, scheduling reconnect");
        self.state = ConnectionState::ReconnectScheduled;
        self.reconnect_at = Some(at);
        vec![SupervisorAction::ScheduleReconnect { at }]
    }

    /// Fires the pending reconnect if it is due.
    pub fn on_reconnect_timer(&mut self, now: Instant) -> Vec<SupervisorAction> {
        match self.reconnect_at {
            Some(at) if at <= now => {}
            _ => return Vec::new(),
        }
        self.reconnect_at = None;
        if !self.live_mode {
            self.state = ConnectionState::Disconnected;
            return Vec::new();
        }

        info!("reconnecting price stream");
        vec![self.open()]
    }
}
