//! Session-layer client for remote HAL components.
//!
//! This crate bridges a local application to a haltalk-style hardware
//! abstraction layer: it publishes a named component with its typed pins
//! over the halrcmd command channel, mirrors pin values through the
//! halrcomp update channel, and supervises both links with heartbeats so
//! a stalled session is detected and resynchronized.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`config`]: the [`ComponentConfig`] session options
//! - [`transport`]: endpoint parsing and framed channel connection
//! - [`supervisor`]: per-channel liveness state machines
//! - [`registry`]: the [`PinRegistry`] name and handle indices
//! - [`component`]: the [`RemoteComponent`] composite session
//! - [`error`]: the crate error and the [`ConnectionError`] classification
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use halremote_client::{ComponentConfig, ComponentEvent, RemoteComponent};
//! use halremote_types::{HalPin, PinDirection, PinType, PinValue};
//!
//! # async fn example() -> halremote_client::Result<()> {
//! let speed = Arc::new(HalPin::new("speed", PinType::Float, PinDirection::Out));
//! let enable = Arc::new(HalPin::new("enable", PinType::Bit, PinDirection::In));
//!
//! let config = ComponentConfig::new("tcp://10.0.0.5:5001", "tcp://10.0.0.5:5002")
//!     .with_component_name("lathe");
//! let (component, handle, mut events) =
//!     RemoteComponent::new(config, vec![speed.clone(), enable.clone()])?;
//!
//! tokio::spawn(component.run());
//! handle.set_ready(true);
//!
//! while let Some(event) = events.recv().await {
//!     if event == ComponentEvent::ConnectedChanged(true) {
//!         // Changes on out pins now flow to the remote HAL
//!         speed.set_value(PinValue::Float(120.0))?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod config;
pub mod error;
pub mod registry;
pub mod supervisor;
pub mod transport;

// Re-export the component surface
pub use component::{ComponentEvent, ComponentHandle, ConnectionState, RemoteComponent};
pub use config::ComponentConfig;
pub use error::{ConnectionError, Error, Result};
pub use registry::PinRegistry;
pub use supervisor::{LinkState, RpcSupervisor, SubscriberSupervisor, SupervisorEvent};
pub use transport::Endpoint;

// Re-export the commonly used pin types
pub use halremote_types::{HalPin, PinDirection, PinError, PinType, PinValue};
