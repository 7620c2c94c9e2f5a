use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// I/O conditions a watch can ask for or be woken with.
///
/// Library-neutral: the values match neither epoll nor poll(2) and are only
/// ever compared through the named constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
    pub const READABLE: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const HANGUP: Self = Self(1 << 2);
    pub const ERROR: Self = Self(1 << 3);

    const ALL: u32 = 0b1111;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a mask from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::fmt::Display for EventMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (Self::READABLE, "READABLE"),
            (Self::WRITABLE, "WRITABLE"),
            (Self::HANGUP, "HANGUP"),
            (Self::ERROR, "ERROR"),
        ];
        let set: Vec<&str> =
            names.iter().filter(|(flag, _)| self.contains(*flag)).map(|(_, name)| *name).collect();
        if set.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ops() {
        let mask = EventMask::READABLE | EventMask::HANGUP;
        assert!(mask.contains(EventMask::READABLE));
        assert!(!mask.contains(EventMask::WRITABLE));
        assert!(mask.intersects(EventMask::HANGUP | EventMask::ERROR));
        assert_eq!(mask & EventMask::HANGUP, EventMask::HANGUP);
        assert!(EventMask::empty().is_empty());
        assert_eq!(EventMask::from_bits_truncate(0xff).bits(), 0b1111);
    }

    #[test]
    fn test_display() {
        assert_eq!((EventMask::READABLE | EventMask::ERROR).to_string(), "READABLE|ERROR");
        assert_eq!(EventMask::empty().to_string(), "NONE");
    }
}
