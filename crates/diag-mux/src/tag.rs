//! Buffer tags attached to every write
//!
//! A tag identifies where a buffer came from so the transport can hand it
//! back through `write_done`. The packed layout is
//! `peripheral << 16 | kind << 8 | number`.

use std::fmt;

/// Kind of buffer a producer wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Regular diagnostic data
    Data,
    /// Command responses
    Cmd,
    /// Data relayed from a remote processor
    Remote,
    /// Unrecognized kind byte
    Unknown(u8),
}

impl BufferKind {
    fn as_byte(self) -> u8 {
        match self {
            Self::Data => 1,
            Self::Cmd => 2,
            Self::Remote => 3,
            Self::Unknown(b) => b,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            1 => Self::Data,
            2 => Self::Cmd,
            3 => Self::Remote,
            other => Self::Unknown(other),
        }
    }
}

/// Packed buffer context passed through `write` and returned by `write_done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferTag(pub u32);

impl BufferTag {
    /// Pack a tag
    pub fn new(peripheral: u8, kind: BufferKind, number: u8) -> Self {
        Self((peripheral as u32) << 16 | (kind.as_byte() as u32) << 8 | number as u32)
    }

    /// Get the raw tag value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Peripheral that produced the buffer
    pub fn peripheral(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Buffer kind
    pub fn kind(&self) -> BufferKind {
        BufferKind::from_byte((self.0 >> 8) as u8)
    }

    /// Producer-local buffer number
    pub fn number(&self) -> u8 {
        self.0 as u8
    }
}

impl From<u32> for BufferTag {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for BufferTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p{}/{:?}/#{}",
            self.peripheral(),
            self.kind(),
            self.number()
        )
    }
}
