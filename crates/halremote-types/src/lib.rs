//! Shared pin data model for halremote components.
//!
//! This crate provides the typed pin primitives used across halremote-proto
//! and halremote-client: the pin type and direction enums, the type-tagged
//! [`PinValue`] union, and the runtime [`HalPin`] object shared between the
//! hosting application and the client core. All wire-facing types are
//! serializable.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// The value type of a HAL pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinType {
    Bit,
    Float,
    S32,
    U32,
}

impl std::fmt::Display for PinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinType::Bit => write!(f, "bit"),
            PinType::Float => write!(f, "float"),
            PinType::S32 => write!(f, "s32"),
            PinType::U32 => write!(f, "u32"),
        }
    }
}

/// The data direction of a HAL pin, seen from the local component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    In,
    Out,
    Io,
}

/// A type-tagged pin value.
///
/// The serialized form carries the type tag next to the value, so a wire
/// pin record is self-describing:
///
/// ```json
/// {"type":"float","value":2.5}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PinValue {
    Bit(bool),
    Float(f64),
    S32(i32),
    U32(u32),
}

impl PinValue {
    /// The type tag of this value.
    #[must_use]
    pub fn pin_type(&self) -> PinType {
        match self {
            PinValue::Bit(_) => PinType::Bit,
            PinValue::Float(_) => PinType::Float,
            PinValue::S32(_) => PinType::S32,
            PinValue::U32(_) => PinType::U32,
        }
    }

    /// The zero value for a pin type.
    #[must_use]
    pub fn default_for(pin_type: PinType) -> Self {
        match pin_type {
            PinType::Bit => PinValue::Bit(false),
            PinType::Float => PinValue::Float(0.0),
            PinType::S32 => PinValue::S32(0),
            PinType::U32 => PinValue::U32(0),
        }
    }
}

impl std::fmt::Display for PinValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinValue::Bit(v) => write!(f, "{v}"),
            PinValue::Float(v) => write!(f, "{v}"),
            PinValue::S32(v) => write!(f, "{v}"),
            PinValue::U32(v) => write!(f, "{v}"),
        }
    }
}

/// Errors raised by checked pin value writes.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PinError {
    #[error("pin '{pin}' is {expected}, got a {got} value")]
    TypeMismatch {
        pin: String,
        expected: PinType,
        got: PinType,
    },
}

/// Callback invoked with the pin name after a local value change.
pub type ChangeCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug)]
struct PinInner {
    value: PinValue,
    handle: Option<u32>,
    synced: bool,
}

/// A typed named value exchanged between the local application and the
/// remote HAL.
///
/// Pins are created by the hosting application and shared with the client
/// core as `Arc<HalPin>`. Name, type, direction and the enabled flag are
/// fixed at construction; value, handle and the synced flag change over
/// the life of a session.
///
/// Local writes through [`set_value`](HalPin::set_value) mark the pin
/// unsynced and fire the registered change callback. Remote writes through
/// [`apply_remote`](HalPin::apply_remote) mark it synced and stay silent,
/// so mirrored values never echo back onto the wire.
pub struct HalPin {
    name: String,
    pin_type: PinType,
    direction: PinDirection,
    enabled: bool,
    inner: Mutex<PinInner>,
    on_change: Mutex<Option<ChangeCallback>>,
}

/// Pin mutexes guard plain data and no code path panics while holding
/// them, but a poisoned lock must not poison the whole session.
fn relock<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl HalPin {
    /// Create an enabled pin holding the zero value of its type.
    #[must_use]
    pub fn new(name: impl Into<String>, pin_type: PinType, direction: PinDirection) -> Self {
        Self {
            name: name.into(),
            pin_type,
            direction,
            enabled: true,
            inner: Mutex::new(PinInner {
                value: PinValue::default_for(pin_type),
                handle: None,
                synced: false,
            }),
            on_change: Mutex::new(None),
        }
    }

    /// Set the initial value. Fails if the value tag does not match the
    /// pin type.
    pub fn with_value(self, value: PinValue) -> Result<Self, PinError> {
        self.check_type(value.pin_type())?;
        relock(self.inner.lock()).value = value;
        Ok(self)
    }

    /// Mark the pin disabled; disabled pins are skipped on registration.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn pin_type(&self) -> PinType {
        self.pin_type
    }

    #[must_use]
    pub fn direction(&self) -> PinDirection {
        self.direction
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn value(&self) -> PinValue {
        relock(self.inner.lock()).value
    }

    /// The server-assigned handle, unknown until the first full update of
    /// the session.
    #[must_use]
    pub fn handle(&self) -> Option<u32> {
        relock(self.inner.lock()).handle
    }

    pub fn set_handle(&self, handle: u32) {
        relock(self.inner.lock()).handle = Some(handle);
    }

    pub fn clear_handle(&self) {
        relock(self.inner.lock()).handle = None;
    }

    #[must_use]
    pub fn synced(&self) -> bool {
        relock(self.inner.lock()).synced
    }

    pub fn set_synced(&self, synced: bool) {
        relock(self.inner.lock()).synced = synced;
    }

    /// Write a value from the hosting application.
    ///
    /// Marks the pin unsynced and fires the change callback. Writing the
    /// current value again is a no-op.
    pub fn set_value(&self, value: PinValue) -> Result<(), PinError> {
        self.check_type(value.pin_type())?;

        {
            let mut inner = relock(self.inner.lock());
            if inner.value == value {
                return Ok(());
            }
            inner.value = value;
            inner.synced = false;
        }

        if let Some(callback) = relock(self.on_change.lock()).as_ref() {
            callback(&self.name);
        }
        Ok(())
    }

    /// Write a value mirrored from the remote HAL.
    ///
    /// Marks the pin synced and does not fire the change callback.
    pub fn apply_remote(&self, value: PinValue) -> Result<(), PinError> {
        self.check_type(value.pin_type())?;

        let mut inner = relock(self.inner.lock());
        inner.value = value;
        inner.synced = true;
        Ok(())
    }

    /// Register the change callback; replaces any previous one.
    pub fn set_change_callback(&self, callback: ChangeCallback) {
        *relock(self.on_change.lock()) = Some(callback);
    }

    pub fn clear_change_callback(&self) {
        *relock(self.on_change.lock()) = None;
    }

    fn check_type(&self, got: PinType) -> Result<(), PinError> {
        if got == self.pin_type {
            Ok(())
        } else {
            Err(PinError::TypeMismatch {
                pin: self.name.clone(),
                expected: self.pin_type,
                got,
            })
        }
    }
}

impl std::fmt::Debug for HalPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = relock(self.inner.lock());
        f.debug_struct("HalPin")
            .field("name", &self.name)
            .field("pin_type", &self.pin_type)
            .field("direction", &self.direction)
            .field("enabled", &self.enabled)
            .field("value", &inner.value)
            .field("handle", &inner.handle)
            .field("synced", &inner.synced)
            .finish()
    }
}
