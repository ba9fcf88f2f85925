//! Raw packet storage
//!
//! The pipeline never decodes packets. It only moves [`IntermediateBuffer`]s
//! around and looks at their device flags to tell sent from received traffic.

use crate::error::{Error, Result};
use bitflags::bitflags;
use std::fmt;

/// Largest Ethernet frame an intermediate buffer can hold
pub const MAX_ETHER_FRAME: usize = 1514;

bitflags! {
    /// Direction flags stamped on a buffer by the tap driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirectionFlags: u32 {
        /// Packet was captured on its way to the wire
        const ON_SEND = 1;
        /// Packet was captured on its way to the protocol stack
        const ON_RECEIVE = 2;
    }
}

/// Packet direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Packet is outbound (sent by the host)
    Outbound,
    /// Packet is inbound (received from the wire)
    Inbound,
}

impl Direction {
    /// Device flags a driver stamps for this direction
    pub fn device_flags(self) -> DirectionFlags {
        match self {
            Direction::Outbound => DirectionFlags::ON_SEND,
            Direction::Inbound => DirectionFlags::ON_RECEIVE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("outbound"),
            Direction::Inbound => f.write_str("inbound"),
        }
    }
}

/// Fixed-capacity storage for one captured frame plus driver metadata
///
/// The frame storage is allocated once when the buffer is created and is
/// reused for every packet that passes through it.
#[derive(Clone)]
pub struct IntermediateBuffer {
    device_flags: DirectionFlags,
    length: u32,
    /// Driver-specific packet flags
    pub flags: u32,
    /// 802.1Q tag, if any
    pub vlan_8021q: u32,
    /// Identifier of the static filter that matched, if any
    pub filter_id: u32,
    frame: Box<[u8; MAX_ETHER_FRAME]>,
}

impl IntermediateBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            device_flags: DirectionFlags::empty(),
            length: 0,
            flags: 0,
            vlan_8021q: 0,
            filter_id: 0,
            frame: Box::new([0u8; MAX_ETHER_FRAME]),
        }
    }

    /// Create a buffer holding `frame`, stamped for `direction`
    pub fn from_frame(direction: Direction, frame: &[u8]) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.fill(direction.device_flags(), frame)?;
        Ok(buffer)
    }

    /// Overwrite the buffer contents with a new frame
    pub fn fill(&mut self, device_flags: DirectionFlags, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_ETHER_FRAME {
            return Err(Error::FrameTooLarge {
                len: frame.len(),
                max: MAX_ETHER_FRAME,
            });
        }
        self.frame[..frame.len()].copy_from_slice(frame);
        self.length = frame.len() as u32;
        self.device_flags = device_flags;
        Ok(())
    }

    /// Direction flags set by the driver
    pub fn device_flags(&self) -> DirectionFlags {
        self.device_flags
    }

    /// Set the direction flags
    pub fn set_device_flags(&mut self, flags: DirectionFlags) {
        self.device_flags = flags;
    }

    /// Direction of the packet. Anything not flagged as sent is inbound.
    pub fn direction(&self) -> Direction {
        if self.device_flags == DirectionFlags::ON_SEND {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }

    /// Number of frame bytes in use
    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// Whether the buffer holds no frame
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Set the frame length, e.g. after rewriting the frame in place
    pub fn set_len(&mut self, length: usize) -> Result<()> {
        if length > MAX_ETHER_FRAME {
            return Err(Error::FrameTooLarge {
                len: length,
                max: MAX_ETHER_FRAME,
            });
        }
        self.length = length as u32;
        Ok(())
    }

    /// Frame bytes
    pub fn data(&self) -> &[u8] {
        &self.frame[..self.len()]
    }

    /// Mutable frame bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.frame[..len]
    }

    /// Whole frame storage, regardless of the current length
    pub fn storage_mut(&mut self) -> &mut [u8; MAX_ETHER_FRAME] {
        &mut self.frame
    }

    /// Forget the current frame without touching storage
    pub fn clear(&mut self) {
        self.length = 0;
        self.device_flags = DirectionFlags::empty();
        self.flags = 0;
        self.vlan_8021q = 0;
        self.filter_id = 0;
    }
}

impl Default for IntermediateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IntermediateBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediateBuffer")
            .field("device_flags", &self.device_flags)
            .field("length", &self.length)
            .field("flags", &self.flags)
            .field("vlan_8021q", &self.vlan_8021q)
            .field("filter_id", &self.filter_id)
            .finish_non_exhaustive()
    }
}
