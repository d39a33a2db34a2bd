//! Socket liveness supervision.
//!
//! Each halremote channel is owned by one supervisor: a state machine
//! that drives the socket, keeps the link alive through heartbeats, and
//! turns wire traffic into a stream of [`SupervisorEvent`]s for the
//! component. Two flavors exist: [`SubscriberSupervisor`] for the update
//! channel and [`RpcSupervisor`] for the command channel. Both share the
//! state set and the transition/emission discipline implemented here.
//!
//! Supervisors spawn nothing: the component's event loop polls
//! `next_event()`, which is cancellation-safe, so the whole core stays on
//! one cooperative task.

mod rpc;
mod subscriber;

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use halremote_proto::{CodecError, Container};
use tokio::time::Instant;

pub use rpc::RpcSupervisor;
pub use subscriber::SubscriberSupervisor;

use crate::transport::FramedConnection;

/// Liveness state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Trying,
    Up,
    Timeout,
    Error,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Down => write!(f, "DOWN"),
            LinkState::Trying => write!(f, "TRYING"),
            LinkState::Up => write!(f, "UP"),
            LinkState::Timeout => write!(f, "TIMEOUT"),
            LinkState::Error => write!(f, "ERROR"),
        }
    }
}

/// Event emitted by a supervisor towards the component.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// The link transitioned to a new state.
    State(LinkState),

    /// The error text changed; empty when the error cleared.
    ErrorText(String),

    /// A deserialized inbound message. Pings and ping acknowledgements
    /// are consumed for heartbeat accounting and never appear here.
    Message {
        /// Topic frame, present on update-channel messages only.
        topic: Option<String>,
        container: Container,
    },
}

/// Link state plus the pending event queue, shared by both supervisor
/// flavors.
#[derive(Debug)]
pub(crate) struct Link {
    state: LinkState,
    error_string: String,
    events: VecDeque<SupervisorEvent>,
}

impl Link {
    pub(crate) fn new() -> Self {
        Self {
            state: LinkState::Down,
            error_string: String::new(),
            events: VecDeque::new(),
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        self.state
    }

    pub(crate) fn error_string(&self) -> &str {
        &self.error_string
    }

    /// Record a transition; state change is queued before the error text
    /// change so observers see them in that order.
    pub(crate) fn update(&mut self, state: LinkState, error_text: &str) {
        if state != self.state {
            self.state = state;
            self.events.push_back(SupervisorEvent::State(state));
        }

        if error_text != self.error_string {
            self.error_string = error_text.to_string();
            self.events
                .push_back(SupervisorEvent::ErrorText(error_text.to_string()));
        }
    }

    pub(crate) fn emit_message(&mut self, topic: Option<String>, container: Container) {
        self.events
            .push_back(SupervisorEvent::Message { topic, container });
    }

    pub(crate) fn next(&mut self) -> Option<SupervisorEvent> {
        self.events.pop_front()
    }
}

/// Heartbeat deadline bookkeeping. A zero period disarms the timer.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    period: Duration,
    deadline: Option<Instant>,
}

impl Heartbeat {
    pub(crate) fn disarmed() -> Self {
        Self {
            period: Duration::ZERO,
            deadline: None,
        }
    }

    pub(crate) fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    /// Restart the countdown from now, if a period is armed.
    pub(crate) fn refresh(&mut self) {
        self.deadline = if self.period.is_zero() {
            None
        } else {
            Some(Instant::now() + self.period)
        };
    }

    pub(crate) fn stop(&mut self) {
        self.deadline = None;
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when the deadline passes; pend forever when disarmed.
    pub(crate) async fn expired(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// What woke a supervisor up.
pub(crate) enum Wake {
    Socket(Option<Result<Vec<Bytes>, CodecError>>),
    Tick,
}

/// Wait for socket traffic or the heartbeat deadline, whichever comes
/// first. With no socket attached there is nothing to supervise; pend
/// until the owner changes that.
pub(crate) async fn wait_wake(
    conn: Option<&mut FramedConnection>,
    deadline: Option<Instant>,
) -> Wake {
    match conn {
        Some(conn) => tokio::select! {
            frames = conn.next() => Wake::Socket(frames),
            () = Heartbeat::expired(deadline) => Wake::Tick,
        },
        None => {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }
}
