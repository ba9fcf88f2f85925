//! Tap driver interface
//!
//! The pipeline talks to the capture driver only through [`TapDriver`].
//! Backends live in `pktq-platform`; tests supply their own.

use crate::error::Result;
use crate::packet::IntermediateBuffer;
use bitflags::bitflags;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Driver-level adapter handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct AdapterHandle(pub u64);

impl fmt::Display for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Packet-availability notification event registered with the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

bitflags! {
    /// Adapter filter mode understood by the tap driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AdapterMode: u32 {
        /// Divert packets sent by the stack to the filter
        const SENT_TUNNEL = 1;
        /// Divert packets received from the wire to the filter
        const RECV_TUNNEL = 2;
        /// Copy sent packets to the filter, original continues
        const SENT_LISTEN = 4;
        /// Copy received packets to the filter, original continues
        const RECV_LISTEN = 8;
        /// Filter packets sent directly to the adapter
        const FILTER_DIRECT = 16;
        /// Filter loopback packets
        const LOOPBACK_FILTER = 32;
        /// Block loopback packets
        const LOOPBACK_BLOCK = 64;
    }
}

/// One adapter as reported by driver enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    /// Driver handle for all per-adapter operations
    pub handle: AdapterHandle,
    /// Raw (internal) adapter name
    pub name: String,
    /// Current hardware address
    pub mac: [u8; 6],
    /// Medium type
    pub medium: u32,
    /// Maximum transmission unit
    pub mtu: u16,
}

impl AdapterInfo {
    /// Hardware address as `aa:bb:cc:dd:ee:ff`
    pub fn mac_string(&self) -> String {
        let digits = hex::encode(self.mac);
        let mut mac = String::with_capacity(digits.len() + self.mac.len() - 1);
        for (i, digit) in digits.chars().enumerate() {
            if i > 0 && i % 2 == 0 {
                mac.push(':');
            }
            mac.push(digit);
        }
        mac
    }
}

/// Capture driver operations consumed by the pipeline
///
/// All methods may be called concurrently from the controller and the four
/// stage workers.
#[cfg_attr(test, mockall::automock)]
pub trait TapDriver: Send + Sync {
    /// List adapters bound to the tap
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>>;

    /// Resolve a raw adapter name to a human-readable one
    ///
    /// `None` means the lookup failed and the caller falls back to the raw name.
    fn resolve_friendly_name(&self, raw_name: &str) -> Option<String>;

    /// Set the filter mode of an adapter
    fn set_adapter_mode(&self, adapter: AdapterHandle, mode: AdapterMode) -> Result<()>;

    /// Current filter mode of an adapter
    fn get_adapter_mode(&self, adapter: AdapterHandle) -> Result<AdapterMode>;

    /// Create a notification event and register it for `adapter`
    fn register_packet_event(&self, adapter: AdapterHandle) -> Result<EventHandle>;

    /// Unregister and destroy a notification event
    fn release_packet_event(&self, adapter: AdapterHandle, event: EventHandle) -> Result<()>;

    /// Wait for the event. Returns `false` when the timeout elapsed first.
    fn wait_event(&self, event: EventHandle, timeout: Option<Duration>) -> Result<bool>;

    /// Reset the event to non-signalled
    fn reset_event(&self, event: EventHandle) -> Result<()>;

    /// Read up to `buffers.len()` queued packets into `buffers`, returning how many were filled
    fn read_batch(&self, adapter: AdapterHandle, buffers: &mut [IntermediateBuffer]) -> Result<usize>;

    /// Indicate the buffers selected by `batch` up to the protocol stack
    ///
    /// Returns the number of packets the driver accepted.
    fn send_batch_to_stack(
        &self,
        adapter: AdapterHandle,
        buffers: &[IntermediateBuffer],
        batch: &[usize],
    ) -> Result<usize>;

    /// Send the buffers selected by `batch` out through the adapter
    ///
    /// Returns the number of packets the driver accepted.
    fn send_batch_to_wire(
        &self,
        adapter: AdapterHandle,
        buffers: &[IntermediateBuffer],
        batch: &[usize],
    ) -> Result<usize>;

    /// Indicate a single packet to the protocol stack
    fn send_single_to_stack(&self, adapter: AdapterHandle, buffer: &IntermediateBuffer) -> Result<()>;

    /// Send a single packet out through the adapter
    fn send_single_to_wire(&self, adapter: AdapterHandle, buffer: &IntermediateBuffer) -> Result<()>;

    /// Discard packets the driver has queued for `adapter`
    fn flush_adapter_queue(&self, _adapter: AdapterHandle) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_string() {
        let info = AdapterInfo {
            handle: AdapterHandle(1),
            name: "\\DEVICE\\{ABC}".into(),
            mac: [0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0xfe],
            medium: 0,
            mtu: 1500,
        };
        assert_eq!(info.mac_string(), "00:1a:2b:3c:4d:fe");
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(AdapterHandle(0xbeef).to_string(), "0xbeef");
    }

    #[test]
    fn test_tunnel_mode_bits() {
        let mode = AdapterMode::SENT_TUNNEL | AdapterMode::RECV_TUNNEL;
        assert_eq!(mode.bits(), 3);
    }
}
