//! The remote component: bind handshake, update correlation and the
//! composite connection state.
//!
//! A [`RemoteComponent`] owns one supervisor per channel and runs both
//! from a single event loop, together with local pin changes and host
//! commands. The command channel carries the bind handshake and outbound
//! pin changes; the update channel delivers the full update that assigns
//! pin handles, then handle-keyed deltas. The two link states merge into
//! one [`ConnectionState`] for the host.

use std::collections::BTreeSet;
use std::sync::Arc;

use halremote_proto::{ComponentRecord, Container, MessageType, PinRecord};
use halremote_types::{HalPin, PinDirection};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::ComponentConfig;
use crate::error::{ConnectionError, Result};
use crate::registry::PinRegistry;
use crate::supervisor::{LinkState, RpcSupervisor, SubscriberSupervisor, SupervisorEvent};
use crate::transport::Endpoint;

/// Connection state of the composite session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Timeout,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Timeout => write!(f, "timeout"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Host-observable change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentEvent {
    StateChanged(ConnectionState),
    ConnectedChanged(bool),
    ErrorChanged(Option<ConnectionError>),
    ErrorStringChanged(String),
}

enum ComponentCommand {
    SetReady(bool),
    Shutdown,
}

/// Handle for controlling a running [`RemoteComponent`].
#[derive(Clone)]
pub struct ComponentHandle {
    commands: mpsc::UnboundedSender<ComponentCommand>,
}

impl ComponentHandle {
    /// Ready true connects the session; ready false tears it down.
    pub fn set_ready(&self, ready: bool) {
        let _ = self.commands.send(ComponentCommand::SetReady(ready));
    }

    /// Stop the session and end the event loop.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ComponentCommand::Shutdown);
    }
}

/// Merge the two channel states into the composite state.
fn merged(subscriber: LinkState, rpc: LinkState) -> ConnectionState {
    if subscriber == LinkState::Up && rpc == LinkState::Up {
        ConnectionState::Connected
    } else if subscriber == LinkState::Timeout || rpc == LinkState::Timeout {
        ConnectionState::Timeout
    } else if subscriber == LinkState::Trying || rpc == LinkState::Trying {
        ConnectionState::Connecting
    } else {
        ConnectionState::Disconnected
    }
}

/// Strip the leading `component.` qualifier from a wire pin name.
fn local_pin_name(wire_name: &str) -> &str {
    wire_name
        .split_once('.')
        .map_or(wire_name, |(_, rest)| rest)
}

/// A remote HAL component session.
///
/// Construction wires the supervisors and channels; [`run`] drives
/// everything on one task. The host keeps the [`ComponentHandle`] for
/// ready control and the event receiver for observing the session.
///
/// ```no_run
/// use std::sync::Arc;
/// use halremote_client::{ComponentConfig, RemoteComponent};
/// use halremote_types::{HalPin, PinDirection, PinType};
///
/// # async fn example() -> halremote_client::Result<()> {
/// let speed = Arc::new(HalPin::new("speed", PinType::Float, PinDirection::Out));
/// let config = ComponentConfig::new("tcp://10.0.0.5:5001", "tcp://10.0.0.5:5002")
///     .with_component_name("lathe");
///
/// let (component, handle, mut events) = RemoteComponent::new(config, vec![speed.clone()])?;
/// tokio::spawn(component.run());
///
/// handle.set_ready(true);
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct RemoteComponent {
    config: ComponentConfig,
    pins: Vec<Arc<HalPin>>,
    registry: PinRegistry,
    subscriber: SubscriberSupervisor,
    rpc: RpcSupervisor,

    state: ConnectionState,
    connected: bool,
    error: Option<ConnectionError>,
    error_string: String,
    ready: bool,

    events: mpsc::UnboundedSender<ComponentEvent>,
    changes: mpsc::UnboundedSender<String>,
    change_queue: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedReceiver<ComponentCommand>,
}

impl RemoteComponent {
    /// Build a component over the given pins.
    ///
    /// Fails if the config does not validate. The pins are registered on
    /// every ready cycle, so a disabled pin stays unregistered even
    /// across reconnects.
    pub fn new(
        config: ComponentConfig,
        pins: Vec<Arc<HalPin>>,
    ) -> Result<(
        Self,
        ComponentHandle,
        mpsc::UnboundedReceiver<ComponentEvent>,
    )> {
        config.validate()?;

        let mut subscriber = SubscriberSupervisor::new();
        subscriber.set_endpoint(Endpoint::parse(&config.sub_endpoint)?);

        let mut rpc = RpcSupervisor::new();
        rpc.set_endpoint(Endpoint::parse(&config.rpc_endpoint)?);
        rpc.set_heartbeat_period(std::time::Duration::from_millis(config.heartbeat_period_ms));
        rpc.set_ping_error_threshold(config.rpc_ping_error_threshold);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let component = Self {
            config,
            pins,
            registry: PinRegistry::new(),
            subscriber,
            rpc,
            state: ConnectionState::Disconnected,
            connected: false,
            error: None,
            error_string: String::new(),
            ready: false,
            events: event_tx,
            changes: change_tx,
            change_queue: change_rx,
            commands: command_rx,
        };

        let handle = ComponentHandle {
            commands: command_tx,
        };

        Ok((component, handle, event_rx))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.component_name
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn connection_error(&self) -> Option<ConnectionError> {
        self.error
    }

    #[must_use]
    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    /// Drive the session until shutdown.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ComponentCommand::SetReady(true)) => self.start().await,
                    Some(ComponentCommand::SetReady(false)) => self.stop().await,
                    Some(ComponentCommand::Shutdown) | None => {
                        self.stop().await;
                        break;
                    }
                },
                event = self.subscriber.next_event() => self.handle_subscriber_event(event).await,
                event = self.rpc.next_event() => self.handle_rpc_event(event).await,
                Some(name) = self.change_queue.recv() => self.handle_pin_change(name).await,
            }
        }
    }

    async fn start(&mut self) {
        if self.ready {
            return;
        }
        self.ready = true;
        info!(component = %self.config.component_name, "starting");

        // A fresh ready cycle clears the previous error
        self.update_error(None, String::new()).await;

        self.registry.register_all(&self.pins, self.changes.clone());

        self.subscriber.clear_topics();
        self.subscriber.add_topic(self.config.component_name.clone());

        self.rpc.set_ready(true).await;
    }

    async fn stop(&mut self) {
        if !self.ready {
            return;
        }
        self.ready = false;
        info!(component = %self.config.component_name, "stopping");

        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.subscriber.set_ready(false).await;
        self.rpc.set_ready(false).await;
        self.registry.clear();
    }

    async fn handle_subscriber_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::State(state) => {
                debug!("halrcomp {state}");
                self.merge_states();
            }
            SupervisorEvent::ErrorText(text) => self.handle_socket_error(text).await,
            SupervisorEvent::Message { topic, container } => {
                self.handle_update_message(topic.as_deref(), container).await;
            }
        }
    }

    async fn handle_rpc_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::State(state) => {
                debug!("halrcmd {state}");
                self.merge_states();

                if state == LinkState::Up {
                    self.bind().await;
                } else {
                    self.subscriber.set_ready(false).await;
                }
            }
            SupervisorEvent::ErrorText(text) => self.handle_socket_error(text).await,
            SupervisorEvent::Message { container, .. } => {
                self.handle_command_message(container).await;
            }
        }
    }

    async fn handle_socket_error(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.update_error(Some(ConnectionError::Socket), text).await;
    }

    fn merge_states(&mut self) {
        let state = merged(self.subscriber.link_state(), self.rpc.link_state());
        self.update_state(state);
    }

    /// Apply a composite state change. Any exit from `Connected` marks
    /// every pin out of sync before the change becomes observable.
    fn update_state(&mut self, state: ConnectionState) {
        if state == self.state {
            return;
        }

        if self.state == ConnectionState::Connected {
            self.registry.unsync_all();
        }

        self.state = state;
        debug!(component = %self.config.component_name, "{state}");
        self.emit(ComponentEvent::StateChanged(state));

        let connected = state == ConnectionState::Connected;
        if connected != self.connected {
            self.connected = connected;
            self.emit(ComponentEvent::ConnectedChanged(connected));
        }
    }

    /// Record an error classification. Every kind except `PinChange`
    /// tears the session down; the host recovers by toggling ready.
    async fn update_error(&mut self, error: Option<ConnectionError>, error_string: String) {
        if error_string != self.error_string {
            self.error_string = error_string.clone();
            self.emit(ComponentEvent::ErrorStringChanged(error_string));
        }

        if error != self.error {
            if let Some(kind) = error {
                if kind != ConnectionError::PinChange {
                    self.teardown().await;
                }
            }
            self.error = error;
            self.emit(ComponentEvent::ErrorChanged(error));
        }
    }

    /// Register the component and its pin schema with the server.
    async fn bind(&mut self) {
        let name = self.config.component_name.clone();
        let pins: Vec<PinRecord> = self
            .registry
            .pins()
            .map(|pin| {
                PinRecord::named(
                    format!("{name}.{}", pin.name()),
                    pin.direction(),
                    pin.value(),
                )
            })
            .collect();

        debug!("binding '{name}' with {} pins", pins.len());
        let container = Container::new(MessageType::HalrcompBind).with_component(ComponentRecord {
            name,
            no_create: !self.config.create,
            pins,
        });

        if let Err(e) = self.rpc.send(&container).await {
            // The supervisor already recorded the transport failure
            warn!("bind send failed: {e}");
        }
    }

    async fn handle_command_message(&mut self, container: Container) {
        match container.msg_type {
            MessageType::HalrcompBindConfirm => {
                info!(component = %self.config.component_name, "bind confirmed");
                self.subscriber.set_ready(true).await;
            }
            MessageType::HalrcompBindReject => {
                let text = container.joined_notes();
                warn!(component = %self.config.component_name, "bind rejected: {text}");
                self.rpc.set_ready(false).await;
                self.update_state(ConnectionState::Error);
                self.update_error(Some(ConnectionError::Bind), text).await;
            }
            MessageType::HalrcompSetReject => {
                let text = container.joined_notes();
                warn!(component = %self.config.component_name, "pin change rejected: {text}");
                self.update_state(ConnectionState::Error);
                self.update_error(Some(ConnectionError::PinChange), text)
                    .await;
            }
            other => debug!("unexpected command reply: {other:?}"),
        }
    }

    async fn handle_update_message(&mut self, _topic: Option<&str>, container: Container) {
        match container.msg_type {
            MessageType::HalrcompFullUpdate => self.apply_full_update(&container).await,
            MessageType::HalrcompIncrementalUpdate => {
                self.apply_incremental_update(&container).await;
            }
            MessageType::HalrcommandError => {
                let text = container.joined_notes();
                warn!(component = %self.config.component_name, "command error: {text}");
                self.update_state(ConnectionState::Error);
                self.update_error(Some(ConnectionError::Command), text).await;
            }
            other => debug!("unexpected update message: {other:?}"),
        }
    }

    /// A full snapshot: the only place handles enter the registry. Wire
    /// names carry the `component.` qualifier; unknown residues are
    /// skipped, the wire may describe more than we registered.
    async fn apply_full_update(&mut self, container: &Container) {
        for component in &container.components {
            for record in &component.pins {
                let Some(wire_name) = record.name.as_deref() else {
                    continue;
                };
                let name = local_pin_name(wire_name);

                let Some(pin) = self.registry.by_name(name) else {
                    warn!("unknown pin '{name}' in full update");
                    continue;
                };

                if let Some(handle) = record.handle {
                    self.registry.bind_handle(name, handle);
                }

                if let Err(e) = pin.apply_remote(record.value) {
                    self.update_state(ConnectionState::Error);
                    self.update_error(Some(ConnectionError::PinChange), e.to_string())
                        .await;
                }
            }
        }
    }

    /// A handle-keyed delta. Unknown handles are dropped; the wire may
    /// race ahead of a local rebind.
    async fn apply_incremental_update(&mut self, container: &Container) {
        for record in &container.pins {
            let Some(handle) = record.handle else {
                trace!("incremental pin without handle dropped");
                continue;
            };

            let Some(pin) = self.registry.by_handle(handle) else {
                debug!("unknown handle {handle} in incremental update");
                continue;
            };

            if let Err(e) = pin.apply_remote(record.value) {
                self.update_state(ConnectionState::Error);
                self.update_error(Some(ConnectionError::PinChange), e.to_string())
                    .await;
            }
        }
    }

    /// Forward local pin changes upstream, batching what queued up into
    /// one envelope.
    async fn handle_pin_change(&mut self, first: String) {
        let mut names = BTreeSet::from([first]);
        while let Ok(name) = self.change_queue.try_recv() {
            names.insert(name);
        }

        // Only a connected session accepts pin changes
        if self.state != ConnectionState::Connected {
            trace!("pin change while {} dropped", self.state);
            return;
        }

        let mut container = Container::new(MessageType::HalrcompSet);
        for name in names {
            let Some(pin) = self.registry.by_name(&name) else {
                continue;
            };

            // Only output and io pins go upstream
            if pin.direction() == PinDirection::In {
                continue;
            }

            let Some(handle) = pin.handle() else {
                warn!("pin '{name}' changed before handle assignment");
                continue;
            };

            container.pins.push(PinRecord::keyed(handle, pin.value()));
        }

        if container.pins.is_empty() {
            return;
        }

        trace!("sending {} pin change(s)", container.pins.len());
        if let Err(e) = self.rpc.send(&container).await {
            warn!("pin change send failed: {e}");
        }
    }

    fn emit(&self, event: ComponentEvent) {
        let _ = self.events.send(event);
    }
}
