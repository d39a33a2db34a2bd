//! Component configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::Endpoint;

fn default_component_name() -> String {
    "default".to_string()
}

fn default_create() -> bool {
    true
}

fn default_heartbeat_period_ms() -> u64 {
    3000
}

fn default_rpc_ping_error_threshold() -> u32 {
    2
}

/// Configuration of one remote component session.
///
/// The two endpoints are required; everything else has the defaults a
/// haltalk server expects. The heartbeat period only seeds the command
/// channel; the update channel adopts the period advertised by the server
/// on the first full update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    /// halrcmd service uri, e.g. `tcp://192.168.1.2:5001`
    pub rpc_endpoint: String,

    /// halrcomp service uri, e.g. `tcp://192.168.1.2:5002`
    pub sub_endpoint: String,

    /// Remote component name; doubles as the subscription topic.
    #[serde(default = "default_component_name")]
    pub component_name: String,

    /// Whether the server may create the component if it does not exist.
    #[serde(default = "default_create")]
    pub create: bool,

    /// Command-channel heartbeat period in milliseconds.
    #[serde(default = "default_heartbeat_period_ms")]
    pub heartbeat_period_ms: u64,

    /// Outstanding pings tolerated before the command channel times out.
    #[serde(default = "default_rpc_ping_error_threshold")]
    pub rpc_ping_error_threshold: u32,
}

impl ComponentConfig {
    /// A config with default options for the given endpoints.
    #[must_use]
    pub fn new(rpc_endpoint: impl Into<String>, sub_endpoint: impl Into<String>) -> Self {
        Self {
            rpc_endpoint: rpc_endpoint.into(),
            sub_endpoint: sub_endpoint.into(),
            component_name: default_component_name(),
            create: default_create(),
            heartbeat_period_ms: default_heartbeat_period_ms(),
            rpc_ping_error_threshold: default_rpc_ping_error_threshold(),
        }
    }

    #[must_use]
    pub fn with_component_name(mut self, name: impl Into<String>) -> Self {
        self.component_name = name.into();
        self
    }

    #[must_use]
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    #[must_use]
    pub fn with_heartbeat_period_ms(mut self, period_ms: u64) -> Self {
        self.heartbeat_period_ms = period_ms;
        self
    }

    #[must_use]
    pub fn with_rpc_ping_error_threshold(mut self, threshold: u32) -> Self {
        self.rpc_ping_error_threshold = threshold;
        self
    }

    /// Check the config for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        Endpoint::parse(&self.rpc_endpoint)?;
        Endpoint::parse(&self.sub_endpoint)?;

        if self.component_name.is_empty() {
            return Err(Error::Config("component name must not be empty".to_string()));
        }

        Ok(())
    }
}
