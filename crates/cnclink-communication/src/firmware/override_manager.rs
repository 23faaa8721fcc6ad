//! Feed, rapid and spindle overrides
//!
//! The firmware only exposes relative override steps, so an absolute target
//! is reached by resetting to 100% and stepping by tens, then ones.

use super::realtime::RealtimeCommand;
use cnclink_core::constants::{MAX_OVERRIDE_PERCENT, MIN_OVERRIDE_PERCENT};
use cnclink_core::ControllerError;

/// Override percentages as last requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideState {
    /// Feed override percentage (10-200%)
    pub feed: u8,
    /// Rapid override level
    pub rapid: RapidOverrideLevel,
    /// Spindle override percentage (10-200%)
    pub spindle: u8,
}

impl Default for OverrideState {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: RapidOverrideLevel::Full,
            spindle: 100,
        }
    }
}

/// Rapid override levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RapidOverrideLevel {
    /// Quarter rapid (25%)
    Quarter,
    /// Half rapid (50%)
    Half,
    /// Full rapid (100%)
    #[default]
    Full,
}

impl RapidOverrideLevel {
    /// Level for a percentage; only 100, 50 and 25 exist
    pub fn from_percent(percent: u8) -> Option<Self> {
        match percent {
            100 => Some(Self::Full),
            50 => Some(Self::Half),
            25 => Some(Self::Quarter),
            _ => None,
        }
    }

    /// Percentage
    pub fn percent(self) -> u8 {
        match self {
            Self::Full => 100,
            Self::Half => 50,
            Self::Quarter => 25,
        }
    }

    /// Real-time command selecting this level
    pub fn command(self) -> RealtimeCommand {
        match self {
            Self::Full => RealtimeCommand::RapidOverrideReset,
            Self::Half => RealtimeCommand::RapidOverrideHalf,
            Self::Quarter => RealtimeCommand::RapidOverrideQuarter,
        }
    }
}

/// Which stepped override a sequence targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideTarget {
    /// Feed override
    Feed,
    /// Spindle override
    Spindle,
}

impl OverrideTarget {
    fn commands(self) -> [RealtimeCommand; 5] {
        use RealtimeCommand::*;
        match self {
            Self::Feed => [
                FeedOverrideReset,
                FeedOverridePlusTen,
                FeedOverrideMinusTen,
                FeedOverridePlusOne,
                FeedOverrideMinusOne,
            ],
            Self::Spindle => [
                SpindleOverrideReset,
                SpindleOverridePlusTen,
                SpindleOverrideMinusTen,
                SpindleOverridePlusOne,
                SpindleOverrideMinusOne,
            ],
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Feed => "feed override",
            Self::Spindle => "spindle override",
        }
    }
}

/// Validate an override percentage
pub fn validate_override(target: OverrideTarget, percent: u8) -> Result<u8, ControllerError> {
    if (MIN_OVERRIDE_PERCENT..=MAX_OVERRIDE_PERCENT).contains(&percent) {
        Ok(percent)
    } else {
        Err(ControllerError::InvalidArgument {
            name: target.name().to_string(),
            reason: format!(
                "{}% outside {}-{}%",
                percent, MIN_OVERRIDE_PERCENT, MAX_OVERRIDE_PERCENT
            ),
        })
    }
}

/// Byte sequence that moves an override from anything to `percent`
///
/// `percent` is clamped to the 10-200% range the firmware accepts.
pub fn override_sequence(target: OverrideTarget, percent: u8) -> Vec<u8> {
    let [reset, plus_ten, minus_ten, plus_one, minus_one] = target.commands();
    let percent = percent.clamp(MIN_OVERRIDE_PERCENT, MAX_OVERRIDE_PERCENT);
    let delta = i16::from(percent) - 100;
    let (ten, one) = if delta >= 0 {
        (plus_ten, plus_one)
    } else {
        (minus_ten, minus_one)
    };
    let magnitude = delta.unsigned_abs() as usize;

    let mut bytes = Vec::with_capacity(1 + magnitude / 10 + magnitude % 10);
    bytes.push(reset.as_byte());
    bytes.extend(std::iter::repeat(ten.as_byte()).take(magnitude / 10));
    bytes.extend(std::iter::repeat(one.as_byte()).take(magnitude % 10));
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_up() {
        assert_eq!(
            override_sequence(OverrideTarget::Feed, 123),
            vec![0x90, 0x91, 0x91, 0x93, 0x93, 0x93]
        );
    }

    #[test]
    fn test_spindle_down() {
        assert_eq!(
            override_sequence(OverrideTarget::Spindle, 85),
            vec![0x99, 0x9B, 0x9D, 0x9D, 0x9D, 0x9D, 0x9D]
        );
    }

    #[test]
    fn test_reset_only() {
        assert_eq!(override_sequence(OverrideTarget::Feed, 100), vec![0x90]);
    }

    #[test]
    fn test_clamped() {
        let low = override_sequence(OverrideTarget::Feed, 0);
        assert_eq!(low.len(), 1 + 9);
        assert!(validate_override(OverrideTarget::Feed, 5).is_err());
        assert!(validate_override(OverrideTarget::Spindle, 200).is_ok());
    }

    #[test]
    fn test_rapid_levels() {
        assert_eq!(RapidOverrideLevel::from_percent(50), Some(RapidOverrideLevel::Half));
        assert_eq!(RapidOverrideLevel::from_percent(75), None);
        assert_eq!(RapidOverrideLevel::Quarter.command().as_byte(), 0x97);
        assert_eq!(RapidOverrideLevel::Full.percent(), 100);
    }
}
