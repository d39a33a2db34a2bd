//! Update-channel supervisor.
//!
//! Subscribes to the configured topics and supervises the inbound stream
//! with a heartbeat adopted from the server: twice the advertised
//! keepalive period, tolerating one missed update. The subscriber never
//! sends pings; the server's own traffic keeps the link alive.
//!
//! After a timeout the incremental stream cannot be trusted, so the next
//! inbound message triggers a genuine unsubscribe/resubscribe cycle: the
//! server sees a fresh joiner and answers with a full update, which is
//! the only message that brings the link back up.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use futures_util::SinkExt;
use halremote_proto::{
    transport::{parse_container, subscription_frames},
    MessageType, SUBSCRIBE_OP, UNSUBSCRIBE_OP,
};
use tracing::{debug, trace, warn};

use crate::supervisor::{wait_wake, Heartbeat, Link, LinkState, SupervisorEvent, Wake};
use crate::transport::{self, Endpoint, FramedConnection};

/// Supervisor for the halrcomp update channel.
pub struct SubscriberSupervisor {
    endpoint: Option<Endpoint>,
    ready: bool,
    topics: BTreeSet<String>,
    subscriptions: BTreeSet<String>,
    conn: Option<FramedConnection>,
    link: Link,
    heartbeat: Heartbeat,
}

impl SubscriberSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoint: None,
            ready: false,
            topics: BTreeSet::new(),
            subscriptions: BTreeSet::new(),
            conn: None,
            link: Link::new(),
            heartbeat: Heartbeat::disarmed(),
        }
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    /// Add a topic to subscribe; applied on the next (re)subscribe.
    pub fn add_topic(&mut self, name: impl Into<String>) {
        self.topics.insert(name.into());
    }

    pub fn remove_topic(&mut self, name: &str) {
        self.topics.remove(name);
    }

    pub fn clear_topics(&mut self) {
        self.topics.clear();
    }

    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    #[must_use]
    pub fn error_string(&self) -> &str {
        self.link.error_string()
    }

    /// Topics currently subscribed on the wire, as opposed to the
    /// configured set.
    #[must_use]
    pub fn subscriptions(&self) -> &BTreeSet<String> {
        &self.subscriptions
    }

    /// Start or stop the channel. Starting connects and subscribes;
    /// stopping tears the socket down and transitions to `Down`.
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
        let Some(endpoint) = self.endpoint.clone() else {
            self.link.update(LinkState::Error, "no endpoint configured");
            return;
        };

        match transport::connect(&endpoint).await {
            Ok(conn) => {
                debug!("subscriber connected to {endpoint}");
                self.conn = Some(conn);
                self.subscribe().await;
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
        self.subscriptions.clear();
        self.link.update(LinkState::Down, "");
    }

    /// Drop the socket after a transport failure.
    fn fail(&mut self, text: &str) {
        warn!("subscriber: {text}");
        self.heartbeat.stop();
        self.conn = None;
        self.subscriptions.clear();
        self.link.update(LinkState::Error, text);
    }

    /// Subscribe to every configured topic. The heartbeat resets to
    /// disarmed; only the upcoming full update may arm it again.
    async fn subscribe(&mut self) {
        if self.conn.is_none() {
            return;
        }

        self.link.update(LinkState::Trying, "");
        self.heartbeat.set_period(Duration::ZERO);
        self.heartbeat.stop();

        self.subscriptions.clear();
        for topic in self.topics.clone() {
            if !self.send_control(SUBSCRIBE_OP, &topic).await {
                return;
            }
            self.subscriptions.insert(topic);
        }
    }

    /// Unsubscribe every subscribed topic, so the server treats the next
    /// subscribe as a fresh joiner and answers with a full update.
    async fn unsubscribe(&mut self) {
        self.link.update(LinkState::Down, "");
        for topic in std::mem::take(&mut self.subscriptions) {
            if !self.send_control(UNSUBSCRIBE_OP, &topic).await {
                return;
            }
        }
    }

    async fn send_control(&mut self, op: u8, topic: &str) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };

        match conn.send(subscription_frames(op, topic)).await {
            Ok(()) => true,
            Err(e) => {
                self.fail(&format!("subscription send failed: {e}"));
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
                Wake::Socket(Some(Ok(frames))) => self.handle_frames(frames).await,
                Wake::Socket(Some(Err(e))) => self.fail(&format!("receive failed: {e}")),
                Wake::Socket(None) => self.fail("connection closed by peer"),
                Wake::Tick => self.handle_timeout(),
            }
        }
    }

    fn handle_timeout(&mut self) {
        debug!("subscriber heartbeat timeout");
        self.heartbeat.stop();
        self.link.update(LinkState::Timeout, "");
    }

    async fn handle_frames(&mut self, frames: Vec<Bytes>) {
        if frames.len() < 2 {
            trace!("short update message dropped");
            return;
        }

        let topic = String::from_utf8_lossy(&frames[0]).into_owned();
        let container = match parse_container(&frames[1]) {
            Ok(container) => container,
            Err(e) => {
                warn!("undecodable update dropped: {e}");
                return;
            }
        };

        if container.msg_type == MessageType::HalrcompFullUpdate {
            self.link.update(LinkState::Up, "");

            if let Some(pparams) = container.pparams {
                // wait double the advertised interval, tolerating one miss
                self.heartbeat
                    .set_period(Duration::from_millis(pparams.keepalive_timer_ms * 2));
            }
        }

        if self.link.state() == LinkState::Up {
            self.heartbeat.refresh();
            if container.msg_type != MessageType::Ping {
                self.link.emit_message(Some(topic), container);
            }
        } else {
            // A stale stream reached us while not up; rejoin for a fresh
            // full update.
            self.unsubscribe().await;
            self.subscribe().await;
        }
    }
}

impl Default for SubscriberSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
