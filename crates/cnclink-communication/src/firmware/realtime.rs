//! Single-byte real-time commands
//!
//! The firmware acts on these the moment they arrive, outside the line
//! buffer and without an `ok`.

/// Real-time command bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RealtimeCommand {
    /// Soft reset (Ctrl-X)
    Reset = 0x18,
    /// Status report query
    StatusReport = b'?',
    /// Cycle start / resume
    CycleStart = b'~',
    /// Feed hold
    FeedHold = b'!',
    /// Cancel the active jog
    JogCancel = 0x85,
    /// Feed override to 100%
    FeedOverrideReset = 0x90,
    /// Feed override +10%
    FeedOverridePlusTen = 0x91,
    /// Feed override -10%
    FeedOverrideMinusTen = 0x92,
    /// Feed override +1%
    FeedOverridePlusOne = 0x93,
    /// Feed override -1%
    FeedOverrideMinusOne = 0x94,
    /// Rapid override to 100%
    RapidOverrideReset = 0x95,
    /// Rapid override to 50%
    RapidOverrideHalf = 0x96,
    /// Rapid override to 25%
    RapidOverrideQuarter = 0x97,
    /// Spindle override to 100%
    SpindleOverrideReset = 0x99,
    /// Spindle override +10%
    SpindleOverridePlusTen = 0x9A,
    /// Spindle override -10%
    SpindleOverrideMinusTen = 0x9B,
    /// Spindle override +1%
    SpindleOverridePlusOne = 0x9C,
    /// Spindle override -1%
    SpindleOverrideMinusOne = 0x9D,
}

impl RealtimeCommand {
    const ALL: [RealtimeCommand; 18] = [
        Self::Reset,
        Self::StatusReport,
        Self::CycleStart,
        Self::FeedHold,
        Self::JogCancel,
        Self::FeedOverrideReset,
        Self::FeedOverridePlusTen,
        Self::FeedOverrideMinusTen,
        Self::FeedOverridePlusOne,
        Self::FeedOverrideMinusOne,
        Self::RapidOverrideReset,
        Self::RapidOverrideHalf,
        Self::RapidOverrideQuarter,
        Self::SpindleOverrideReset,
        Self::SpindleOverridePlusTen,
        Self::SpindleOverrideMinusTen,
        Self::SpindleOverridePlusOne,
        Self::SpindleOverrideMinusOne,
    ];

    /// Wire byte
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode a wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_byte() == byte)
    }

    /// Whether the byte is acted on outside the line buffer
    ///
    /// Covers the whole extended range (0x80-0xFF) since the firmware never
    /// buffers it, even for codes it ignores.
    pub fn is_realtime_byte(byte: u8) -> bool {
        matches!(byte, 0x18 | b'?' | b'~' | b'!') || byte >= 0x80
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_values() {
        assert_eq!(RealtimeCommand::Reset.as_byte(), 0x18);
        assert_eq!(RealtimeCommand::FeedHold.as_byte(), b'!');
        assert_eq!(RealtimeCommand::JogCancel.as_byte(), 0x85);
        assert_eq!(RealtimeCommand::SpindleOverrideMinusOne.as_byte(), 0x9D);
    }

    #[test]
    fn test_from_byte() {
        assert_eq!(
            RealtimeCommand::from_byte(0x96),
            Some(RealtimeCommand::RapidOverrideHalf)
        );
        assert_eq!(RealtimeCommand::from_byte(0x98), None);
        assert_eq!(RealtimeCommand::from_byte(b'G'), None);
        assert!(RealtimeCommand::is_realtime_byte(0x98));
        assert!(!RealtimeCommand::is_realtime_byte(b'G'));
    }
}
