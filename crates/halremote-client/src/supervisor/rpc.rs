//! Command-channel supervisor.
//!
//! A dealer-style request socket with a per-instance identity. The
//! supervisor probes the server with PING on every heartbeat tick and
//! counts outstanding probes; any inbound message settles the count and
//! latches the link up, since replies may arrive queued. Too many
//! unanswered probes while up means the server went quiet: the link
//! drops to `Timeout`, but keeps probing so a late reply still recovers.

use bytes::Bytes;
use futures_util::SinkExt;
use halremote_proto::{
    transport::{command_frames, greeting_frames, parse_container},
    Container, MessageType,
};
use std::time::Duration;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::supervisor::{wait_wake, Heartbeat, Link, LinkState, SupervisorEvent, Wake};
use crate::transport::{self, Endpoint, FramedConnection};

/// Supervisor for the halrcmd command channel.
pub struct RpcSupervisor {
    endpoint: Option<Endpoint>,
    ready: bool,
    identity: String,
    conn: Option<FramedConnection>,
    link: Link,
    heartbeat: Heartbeat,
    ping_outstanding: u32,
    ping_error_threshold: u32,
}

impl RpcSupervisor {
    #[must_use]
    pub fn new() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let mut heartbeat = Heartbeat::disarmed();
        heartbeat.set_period(Duration::from_millis(3000));

        Self {
            endpoint: None,
            ready: false,
            identity: format!("{hostname}-{}", Uuid::new_v4()),
            conn: None,
            link: Link::new(),
            heartbeat,
            ping_outstanding: 0,
            ping_error_threshold: 2,
        }
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    pub fn set_heartbeat_period(&mut self, period: Duration) {
        self.heartbeat.set_period(period);
    }

    pub fn set_ping_error_threshold(&mut self, threshold: u32) {
        self.ping_error_threshold = threshold;
    }

    /// The dealer identity presented to the server.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    #[must_use]
    pub fn error_string(&self) -> &str {
        self.link.error_string()
    }

    /// Start or stop the channel. Starting connects, greets and sends
    /// the first probe; stopping tears the socket down and transitions
    /// to `Down`.
    pub async fn set_ready(&mut self, ready: bool) {
        if self.ready == ready {
            return;
        }
        self.ready = ready;

        if ready {
            self.start().await;
        } else {
            self.stop();
        }
    }

    async fn start(&mut self) {
        self.link.update(LinkState::Trying, "");

        let Some(endpoint) = self.endpoint.clone() else {
            self.link.update(LinkState::Error, "no endpoint configured");
            return;
        };

        match transport::connect(&endpoint).await {
            Ok(conn) => {
                debug!("rpc connected to {endpoint} as {}", self.identity);
                self.conn = Some(conn);
                self.ping_outstanding = 0;

                if !self.send_frames(greeting_frames(&self.identity)).await {
                    return;
                }
                let _ = self.send(&Container::ping()).await;
            }
            Err(e) => {
                self.link
                    .update(LinkState::Error, &format!("connect failed: {e}"));
            }
        }
    }

    fn stop(&mut self) {
        self.heartbeat.stop();
        self.conn = None;
        self.ping_outstanding = 0;
        self.link.update(LinkState::Down, "");
    }

    fn fail(&mut self, text: &str) {
        warn!("rpc: {text}");
        self.heartbeat.stop();
        self.conn = None;
        self.link.update(LinkState::Error, text);
    }

    /// Serialize and send a container. Sending a PING re-arms the
    /// heartbeat; a transport failure drops the link to `Error`.
    pub async fn send(&mut self, container: &Container) -> Result<()> {
        if self.conn.is_none() {
            return Err(Error::NotConnected);
        }

        let frames = command_frames(container)?;
        if !self.send_frames(frames).await {
            return Err(Error::NotConnected);
        }

        if container.msg_type == MessageType::Ping {
            self.heartbeat.refresh();
        }
        Ok(())
    }

    async fn send_frames(&mut self, frames: Vec<Bytes>) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };

        match conn.send(frames).await {
            Ok(()) => true,
            Err(e) => {
                self.fail(&format!("send failed: {e}"));
                false
            }
        }
    }

    /// Next supervisor event; cancellation-safe.
    pub async fn next_event(&mut self) -> SupervisorEvent {
        loop {
            if let Some(event) = self.link.next() {
                return event;
            }

            match wait_wake(self.conn.as_mut(), self.heartbeat.deadline()).await {
                Wake::Socket(Some(Ok(frames))) => self.handle_frames(&frames),
                Wake::Socket(Some(Err(e))) => self.fail(&format!("receive failed: {e}")),
                Wake::Socket(None) => self.fail("connection closed by peer"),
                Wake::Tick => self.handle_tick().await,
            }
        }
    }

    async fn handle_tick(&mut self) {
        if self.send(&Container::ping()).await.is_err() {
            return;
        }
        self.ping_outstanding += 1;

        if self.ping_outstanding > self.ping_error_threshold
            && self.link.state() == LinkState::Up
        {
            debug!(
                "rpc heartbeat timeout after {} unanswered pings",
                self.ping_outstanding
            );
            self.link.update(LinkState::Timeout, "");
        }
    }

    fn handle_frames(&mut self, frames: &[Bytes]) {
        let Some(payload) = frames.first() else {
            return;
        };

        let container = match parse_container(payload) {
            Ok(container) => container,
            Err(e) => {
                warn!("undecodable reply dropped: {e}");
                return;
            }
        };

        // Any message counts as a heartbeat since replies can be queued
        self.ping_outstanding = 0;
        self.link.update(LinkState::Up, "");

        if container.msg_type == MessageType::PingAcknowledge {
            trace!("ping acknowledged");
        } else {
            self.link.emit_message(None, container);
        }
    }
}

impl Default for RpcSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
