//! Device and stream identity.

use std::fmt;

/// Opaque index of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceIdx(pub u32);

impl fmt::Display for DeviceIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Unique id of a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Direction of audio flow for a device or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Playback: clients write, devices consume.
    Output,
    /// Capture: devices produce, clients read.
    Input,
}

impl Direction {
    /// Both directions, output first (the order the audio thread services them).
    pub const ALL: [Direction; 2] = [Direction::Output, Direction::Input];

    /// Stable array index for per-direction tables.
    pub fn index(self) -> usize {
        match self {
            Direction::Output => 0,
            Direction::Input => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Output => f.write_str("output"),
            Direction::Input => f.write_str("input"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_displays_as_hex() {
        assert_eq!(StreamId(0x10002).to_string(), "0x10002");
    }

    #[test]
    fn direction_indices_are_distinct() {
        assert_ne!(Direction::Output.index(), Direction::Input.index());
        assert_eq!(Direction::ALL[Direction::Input.index()], Direction::Input);
    }
}
