//! File offsets as stored in executable headers.
//!
//! A stored offset means nothing without knowing what it counts from. Each [`TableOffset`]
//! therefore carries its [`OffsetBase`] next to the raw value, and resolution to an absolute file
//! position happens in exactly one place, [`TableOffset::resolve`].

use std::fmt;


/// Anything shifted further than this cannot be a position in a real file.
const MAX_SHIFT_COUNT: u16 = 32;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OffsetBase {
    /// Counted in bytes from the start of the file.
    Absolute,

    /// Counted in bytes from the start of the secondary header.
    HeaderRelative,

    /// Counted in sectors from the start of the file; a sector is `1 << shift_count` bytes.
    Sectors,
}


/// What offsets are resolved against: where the secondary header starts and the file's sector
/// shift count.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OffsetContext {
    pub header_offset: u64,
    pub shift_count: u16,
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TableOffset {
    pub raw: u32,
    pub base: OffsetBase,
}
impl TableOffset {
    pub const fn absolute(raw: u32) -> Self {
        Self { raw, base: OffsetBase::Absolute }
    }

    pub const fn header_relative(raw: u32) -> Self {
        Self { raw, base: OffsetBase::HeaderRelative }
    }

    pub const fn sectors(raw: u16) -> Self {
        Self { raw: raw as u32, base: OffsetBase::Sectors }
    }

    /// Resolves to an absolute file position.
    ///
    /// An absurd shift count resolves to `u64::MAX`, which no file reaches, so the subsequent
    /// seek reports the offset as out of range.
    pub fn resolve(&self, context: &OffsetContext) -> u64 {
        let raw = u64::from(self.raw);
        match self.base {
            OffsetBase::Absolute => raw,
            OffsetBase::HeaderRelative => context.header_offset.saturating_add(raw),
            OffsetBase::Sectors => {
                if context.shift_count > MAX_SHIFT_COUNT {
                    u64::MAX
                } else {
                    raw << context.shift_count
                }
            },
        }
    }

    /// Resolves and then moves `delta` bytes further, e.g. to a single record within a table.
    pub fn resolve_plus(&self, context: &OffsetContext, delta: u64) -> u64 {
        self.resolve(context).saturating_add(delta)
    }
}
impl fmt::Display for TableOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            OffsetBase::Absolute => write!(f, "{:#010X} (absolute)", self.raw),
            OffsetBase::HeaderRelative => write!(f, "{:#06X} (header-relative)", self.raw),
            OffsetBase::Sectors => write!(f, "{:#06X} (sectors)", self.raw),
        }
    }
}
