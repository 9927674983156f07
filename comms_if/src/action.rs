//! # Drone action state
//!
//! The drone's mode of operation is a single tagged value shared by every
//! actor. The reachability between modes:
//!
//! ```text
//!                v----------------*
//! SampleGPS <-> Fly <-> Land  -> Idle <-> Charge
//!    |           |       |        ^
//!    |           |       v        |
//!    |           *----> Abort ----*
//!    *-------------------^
//! ```
//!
//! Tags are one-hot so that eligibility checks against a set of actions are
//! cheap mask tests. The operator command channel carries the raw tag as a
//! 4-byte native-endian datagram.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Size in bytes of an encoded action on the command channel. Datagrams of
/// any other size are not commands and must be ignored by the receiver.
pub const ACTION_WIRE_SIZE: usize = std::mem::size_of::<u32>();

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The drone's current mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Action {
    Reserved = 1 << 0,
    /// Same as `Fly`, but additionally gates the GPS sample stream.
    SampleGps = 1 << 1,
    /// Motors work at full speed until stabilisation.
    Fly = 1 << 2,
    /// Motors are being stopped slowly.
    Land = 1 << 3,
    /// Idle state on the floor.
    Idle = 1 << 4,
    /// Same as idle but charging the battery.
    Charge = 1 << 5,
    /// Same as `Land`, but ignores the operator until the drone is at rest.
    Abort = 1 << 6,
}

/// Errors produced when decoding an action from the command channel.
#[derive(Debug, Error)]
pub enum ActionDecodeError {
    #[error("Datagram size {0} does not match the action wire size")]
    WrongSize(usize),

    #[error("Unknown action tag: {0}")]
    UnknownTag(u32),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Action {
    /// The raw one-hot tag of this action.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Recover an action from its raw tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            t if t == Action::Reserved.tag() => Some(Action::Reserved),
            t if t == Action::SampleGps.tag() => Some(Action::SampleGps),
            t if t == Action::Fly.tag() => Some(Action::Fly),
            t if t == Action::Land.tag() => Some(Action::Land),
            t if t == Action::Idle.tag() => Some(Action::Idle),
            t if t == Action::Charge.tag() => Some(Action::Charge),
            t if t == Action::Abort.tag() => Some(Action::Abort),
            _ => None,
        }
    }

    /// True if this action is one of the given set.
    pub fn is_one_of(self, set: &[Action]) -> bool {
        let mask = set.iter().fold(0u32, |m, a| m | a.tag());
        self.tag() & mask != 0
    }

    /// Encode this action for the command channel.
    ///
    /// The wire format is the raw byte pattern of the tag in native byte
    /// order, matching what the flight controller expects to receive.
    pub fn to_wire(self) -> [u8; ACTION_WIRE_SIZE] {
        self.tag().to_ne_bytes()
    }

    /// Decode an action received on the command channel.
    pub fn from_wire(buf: &[u8]) -> Result<Self, ActionDecodeError> {
        let bytes: [u8; ACTION_WIRE_SIZE] = buf
            .try_into()
            .map_err(|_| ActionDecodeError::WrongSize(buf.len()))?;

        let tag = u32::from_ne_bytes(bytes);
        Self::from_tag(tag).ok_or(ActionDecodeError::UnknownTag(tag))
    }

    /// Parse an operator console command word.
    ///
    /// Case-insensitive, surrounding whitespace (including the trailing
    /// newline) is stripped. Returns `None` for anything that is not a
    /// command word.
    pub fn from_operator_str(cmd: &str) -> Option<Self> {
        match cmd.trim().to_ascii_lowercase().as_str() {
            "samplegps" => Some(Action::SampleGps),
            "fly" => Some(Action::Fly),
            "land" => Some(Action::Land),
            "idle" => Some(Action::Idle),
            "charge" => Some(Action::Charge),
            "abort" => Some(Action::Abort),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Action::Reserved => "Reserved",
            Action::SampleGps => "SampleGPS",
            Action::Fly => "Fly",
            Action::Land => "Land",
            Action::Idle => "Idle",
            Action::Charge => "Charge",
            Action::Abort => "Abort",
        };
        write!(f, "{}", name)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tags_are_one_hot() {
        let all = [
            Action::Reserved,
            Action::SampleGps,
            Action::Fly,
            Action::Land,
            Action::Idle,
            Action::Charge,
            Action::Abort,
        ];

        for (i, a) in all.iter().enumerate() {
            assert_eq!(a.tag().count_ones(), 1);
            for b in &all[i + 1..] {
                assert_eq!(a.tag() & b.tag(), 0);
            }
        }
    }

    #[test]
    fn test_wire_round_trip() {
        for a in [
            Action::SampleGps,
            Action::Fly,
            Action::Land,
            Action::Idle,
            Action::Charge,
            Action::Abort,
        ] {
            let decoded = Action::from_wire(&a.to_wire()).unwrap();
            assert_eq!(decoded, a);
        }
    }

    #[test]
    fn test_wire_rejects_bad_input() {
        assert!(matches!(
            Action::from_wire(&[1, 2, 3]),
            Err(ActionDecodeError::WrongSize(3))
        ));
        assert!(matches!(
            Action::from_wire(&0u32.to_ne_bytes()),
            Err(ActionDecodeError::UnknownTag(0))
        ));
        assert!(matches!(
            Action::from_wire(&3u32.to_ne_bytes()),
            Err(ActionDecodeError::UnknownTag(3))
        ));
    }

    #[test]
    fn test_operator_words() {
        assert_eq!(Action::from_operator_str("fly\n"), Some(Action::Fly));
        assert_eq!(
            Action::from_operator_str("SampleGPS"),
            Some(Action::SampleGps)
        );
        assert_eq!(Action::from_operator_str("  ABORT  "), Some(Action::Abort));
        assert_eq!(Action::from_operator_str("reserved"), None);
        assert_eq!(Action::from_operator_str("hover"), None);
    }

    #[test]
    fn test_is_one_of() {
        assert!(Action::Fly.is_one_of(&[Action::Fly, Action::Abort]));
        assert!(!Action::Idle.is_one_of(&[Action::Fly, Action::Abort]));
        assert!(!Action::Idle.is_one_of(&[]));
    }
}
