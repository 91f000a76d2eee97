//! Transport modes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MuxError;

/// Identity of a transport backend
///
/// Raw values match the driver-level mode constants, so front ends that
/// still speak integers can go through [`TryFrom<i32>`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Diagnostics leave the device over a USB endpoint
    #[default]
    Usb,
    /// Diagnostics are buffered locally for an on-device reader
    #[serde(alias = "md")]
    MemoryDevice,
}

impl TransportMode {
    /// Every mode, in raw-value order
    pub const ALL: [TransportMode; 2] = [TransportMode::Usb, TransportMode::MemoryDevice];

    /// Raw numeric mode value
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Usb => 1,
            Self::MemoryDevice => 2,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Usb => "USB",
            Self::MemoryDevice => "Memory Device",
        }
    }

    /// Whether secondary consumers should drop their duplicate copy of the
    /// stream while this mode is active
    ///
    /// Only memory-device logging wants the on-device duplicate.
    pub fn suppresses_duplication(self) -> bool {
        match self {
            Self::Usb => true,
            Self::MemoryDevice => false,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Usb => 0,
            Self::MemoryDevice => 1,
        }
    }
}

impl TryFrom<i32> for TransportMode {
    type Error = MuxError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Usb),
            2 => Ok(Self::MemoryDevice),
            other => Err(MuxError::InvalidMode(other)),
        }
    }
}

impl FromStr for TransportMode {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usb" | "1" => Ok(Self::Usb),
            "md" | "memory-device" | "memory_device" | "2" => Ok(Self::MemoryDevice),
            _ => Err(MuxError::InvalidMode(s.trim().parse().unwrap_or(-1))),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => f.write_str("usb"),
            Self::MemoryDevice => f.write_str("memory-device"),
        }
    }
}
