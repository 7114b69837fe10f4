//! Lock event messages
//!
//! The holder of a generation lock announces how it finished on the key's
//! event channel. Payloads are plain strings on the wire.

use std::fmt;

/// Message published on a lock event channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// The value was written and the lock released
    Unlocked,
    /// Generation or locking failed; waiters should give up
    Error,
    /// Anything else seen on the channel
    Other(String),
}

impl LockEvent {
    pub fn parse(payload: &str) -> Self {
        match payload {
            "unlocked" => LockEvent::Unlocked,
            "error" => LockEvent::Error,
            other => LockEvent::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LockEvent::Unlocked => "unlocked",
            LockEvent::Error => "error",
            LockEvent::Other(payload) => payload,
        }
    }
}

impl fmt::Display for LockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(LockEvent::parse("unlocked"), LockEvent::Unlocked);
        assert_eq!(LockEvent::parse("error"), LockEvent::Error);
        assert_eq!(LockEvent::parse("UNLOCKED"), LockEvent::Other("UNLOCKED".into()));
        assert_eq!(LockEvent::Unlocked.to_string(), "unlocked");
        assert_eq!(LockEvent::Error.as_str(), "error");
    }
}
