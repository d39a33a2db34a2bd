//! Pin storage and indexing for one component.
//!
//! The registry holds the pins of the running session twice over: by
//! component-local name from registration, and by server-assigned handle
//! once the first full update arrived. Pins stay owned by the hosting
//! application; the registry keeps shared references and detaches itself
//! on clear.

use std::collections::HashMap;
use std::sync::Arc;

use halremote_types::HalPin;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Name and handle indices over the registered pins.
#[derive(Default)]
pub struct PinRegistry {
    by_name: HashMap<String, Arc<HalPin>>,
    by_handle: HashMap<u32, Arc<HalPin>>,
}

impl PinRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every usable pin from the source and attach the change
    /// notifier. Pins with an empty name and disabled pins are skipped;
    /// a duplicate name overwrites the earlier registration.
    pub fn register_all(&mut self, pins: &[Arc<HalPin>], on_change: mpsc::UnboundedSender<String>) {
        for pin in pins {
            if pin.name().is_empty() || !pin.enabled() {
                debug!("skipping pin '{}'", pin.name());
                continue;
            }

            if self.by_name.contains_key(pin.name()) {
                warn!("duplicate pin '{}', last registration wins", pin.name());
            }

            let notifier = on_change.clone();
            pin.set_change_callback(Box::new(move |name| {
                let _ = notifier.send(name.to_string());
            }));

            self.by_name.insert(pin.name().to_string(), pin.clone());
            debug!("pin registered: {}", pin.name());
        }
    }

    /// Detach every change notifier and drop both indices.
    pub fn clear(&mut self) {
        for pin in self.by_name.values() {
            pin.clear_change_callback();
            pin.clear_handle();
        }
        self.by_name.clear();
        self.by_handle.clear();
    }

    /// Record the server-assigned handle for a named pin. Idempotent for
    /// the same pair; a rebind to a new handle replaces the old entry so
    /// no pin is reachable under two handles.
    pub fn bind_handle(&mut self, name: &str, handle: u32) {
        let Some(pin) = self.by_name.get(name) else {
            return;
        };

        if let Some(old) = pin.handle() {
            if old != handle {
                self.by_handle.remove(&old);
            }
        }

        pin.set_handle(handle);
        self.by_handle.insert(handle, pin.clone());
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Arc<HalPin>> {
        self.by_name.get(name).cloned()
    }

    #[must_use]
    pub fn by_handle(&self, handle: u32) -> Option<Arc<HalPin>> {
        self.by_handle.get(&handle).cloned()
    }

    /// Mark every registered pin out of sync.
    pub fn unsync_all(&self) {
        for pin in self.by_name.values() {
            pin.set_synced(false);
        }
    }

    pub fn pins(&self) -> impl Iterator<Item = &Arc<HalPin>> {
        self.by_name.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.by_handle.len()
    }
}
