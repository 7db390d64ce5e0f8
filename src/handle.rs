//! Small-integer handles issued by the caches.
//!
//! Both handle kinds are 32-bit, assigned sequentially from 1 in insertion
//! order, and never reused. `0` is the sentinel meaning "no block".

use core::fmt;

/// Handle into a `GenericBlockCache`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Index(u32);

impl Index {
    pub const INVALID: Index = Index(0);

    pub(crate) const fn new(raw: u32) -> Self {
        Index(raw)
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a `KeyedEntryDictionary` entry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UniqueId(u32);

impl UniqueId {
    pub const INVALID: UniqueId = UniqueId(0);

    pub(crate) const fn new(raw: u32) -> Self {
        UniqueId(raw)
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_invalid_and_default() {
        assert!(!Index::INVALID.is_valid());
        assert_eq!(Index::default(), Index::INVALID);
        assert!(Index::new(1).is_valid());
        assert!(!UniqueId::default().is_valid());
        assert_eq!(UniqueId::new(7).as_u32(), 7);
        assert_eq!(Index::new(3).to_string(), "#3");
    }
}
