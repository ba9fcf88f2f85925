//! Per-interface adapter handles
//!
//! A [`NetworkAdapter`] is built for every interface the driver reports. Its
//! identity never changes; the session part (notification event and mode)
//! exists only while a filter is started on it.

use crate::driver::{AdapterHandle, AdapterInfo, AdapterMode, EventHandle, TapDriver};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const DEVICE_PREFIX: &str = "\\DEVICE\\";

/// Well-known NDISWAN pseudo adapters and their display names
const NDISWAN_NAMES: &[(&str, &str)] = &[
    ("\\DEVICE\\NDISWANIPV6", "WAN Network Interface (IPv6)"),
    ("\\DEVICE\\NDISWANIP", "WAN Network Interface (IP)"),
    ("\\DEVICE\\NDISWANBH", "WAN Network Interface (BH)"),
];

/// Display name for an adapter
///
/// NDISWAN pseudo adapters have fixed names. Everything else is looked up
/// through the driver, falling back to the raw name without the device
/// prefix.
pub fn friendly_name(driver: &dyn TapDriver, raw_name: &str) -> String {
    let trimmed = raw_name.trim_end_matches('\0');
    let upper = trimmed.to_ascii_uppercase();

    if let Some((_, name)) = NDISWAN_NAMES.iter().find(|(raw, _)| upper == *raw) {
        return (*name).to_string();
    }

    let short = strip_device_prefix(trimmed);
    driver
        .resolve_friendly_name(trimmed)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| short.to_string())
}

fn strip_device_prefix(name: &str) -> &str {
    if name.len() >= DEVICE_PREFIX.len()
        && name[..DEVICE_PREFIX.len()].eq_ignore_ascii_case(DEVICE_PREFIX)
    {
        &name[DEVICE_PREFIX.len()..]
    } else {
        name
    }
}

#[derive(Debug, Default)]
struct Session {
    event: Option<EventHandle>,
    mode: AdapterMode,
}

/// One tapped interface
#[derive(Debug)]
pub struct NetworkAdapter {
    info: AdapterInfo,
    friendly_name: String,
    session: Mutex<Session>,
}

impl NetworkAdapter {
    /// Build an adapter handle from enumeration data
    pub fn new(driver: &dyn TapDriver, info: AdapterInfo) -> Self {
        let friendly_name = friendly_name(driver, &info.name);
        Self {
            info,
            friendly_name,
            session: Mutex::new(Session::default()),
        }
    }

    /// Driver handle
    pub fn handle(&self) -> AdapterHandle {
        self.info.handle
    }

    /// Enumeration data
    pub fn info(&self) -> &AdapterInfo {
        &self.info
    }

    /// Human-readable name
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Maximum transmission unit
    pub fn mtu(&self) -> u16 {
        self.info.mtu
    }

    /// Notification event of the current session, if any
    pub fn event(&self) -> Option<EventHandle> {
        self.session.lock().event
    }

    /// Mode last set through this handle
    pub fn mode(&self) -> AdapterMode {
        self.session.lock().mode
    }

    /// Create and register the notification event for a new session
    pub fn set_packet_event(&self, driver: &dyn TapDriver) -> Result<EventHandle> {
        let mut session = self.session.lock();
        if let Some(event) = session.event {
            return Ok(event);
        }

        let event = driver
            .register_packet_event(self.handle())
            .map_err(|e| Error::resource("packet event", &self.friendly_name, e.to_string()))?;
        debug!(adapter = %self.friendly_name, ?event, "Registered packet event");
        session.event = Some(event);
        Ok(event)
    }

    /// Set the adapter filter mode
    pub fn set_mode(&self, driver: &dyn TapDriver, mode: AdapterMode) -> Result<()> {
        driver
            .set_adapter_mode(self.handle(), mode)
            .map_err(|e| Error::resource("adapter mode", &self.friendly_name, e.to_string()))?;
        debug!(adapter = %self.friendly_name, ?mode, "Set adapter mode");
        self.session.lock().mode = mode;
        Ok(())
    }

    /// Wait for packets on the current session's event
    ///
    /// Returns `Ok(false)` on timeout or when no session is active.
    pub fn wait_event(&self, driver: &dyn TapDriver, timeout: Option<Duration>) -> Result<bool> {
        match self.event() {
            Some(event) => driver.wait_event(event, timeout),
            None => Ok(false),
        }
    }

    /// Reset the current session's event
    pub fn reset_event(&self, driver: &dyn TapDriver) -> Result<()> {
        match self.event() {
            Some(event) => driver.reset_event(event),
            None => Ok(()),
        }
    }

    /// Tear down the session: clear the mode and release the event
    ///
    /// Failures are logged; the session is forgotten either way.
    pub fn release(&self, driver: &dyn TapDriver) {
        let mut session = self.session.lock();

        if !session.mode.is_empty() {
            if let Err(e) = driver.set_adapter_mode(self.handle(), AdapterMode::empty()) {
                warn!(adapter = %self.friendly_name, error = %e, "Failed to reset adapter mode");
            }
            session.mode = AdapterMode::empty();
        }

        if let Some(event) = session.event.take() {
            if let Err(e) = driver.release_packet_event(self.handle(), event) {
                warn!(adapter = %self.friendly_name, error = %e, "Failed to release packet event");
            }
        }
    }
}
