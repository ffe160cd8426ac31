//! # Region Descriptors
//!
//! A descriptor records one live allocation of a process: where it starts,
//! how many pages it spans, whether it maps an exact physical range, and the
//! tag the caller gave it. Descriptors of one process never overlap.

use crate::{AllocFlags, ProcessId};
use core::fmt;
use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PageSize, PhysicalAddress, Size4M};

/// Capacity of a [`RegionTag`], terminator included.
pub const REGION_TAG_MAX: usize = 32;

/// Short human-readable label of a region, truncated to fit.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct RegionTag {
    bytes: [u8; REGION_TAG_MAX],
    len: u8,
}

impl RegionTag {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bytes: [0; REGION_TAG_MAX],
            len: 0,
        }
    }

    /// Copy `tag`, cutting it at a character boundary to at most
    /// `REGION_TAG_MAX - 1` bytes.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        let mut len = tag.len().min(REGION_TAG_MAX - 1);
        while !tag.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; REGION_TAG_MAX];
        bytes[..len].copy_from_slice(&tag.as_bytes()[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..usize::from(self.len)]).unwrap_or_default()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl RegionTag {
    fn to_words(self) -> [u32; TAG_WORDS] {
        let mut words = [0; TAG_WORDS];
        for (word, chunk) in words.iter_mut().zip(self.bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    fn from_words(words: &[u32], len: u8) -> Self {
        let mut bytes = [0; REGION_TAG_MAX];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let len = if usize::from(len) < REGION_TAG_MAX { len } else { 0 };
        Self { bytes, len }
    }
}

impl Default for RegionTag {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

bitflags::bitflags! {
    /// What a region is, as opposed to how it was requested.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct RegionAttributes: u32 {
        /// Pages are backed by frames.
        const COMMIT = 0x1;
        /// Maps device memory.
        const IO = 0x2;
        /// Frames are not owned by the physical allocator.
        const FIXED = 0x4;
    }
}

impl RegionAttributes {
    #[must_use]
    pub fn from_flags(flags: AllocFlags) -> Self {
        let mut attributes = Self::empty();
        if flags.contains(AllocFlags::COMMIT) {
            attributes |= Self::COMMIT;
        }
        if flags.contains(AllocFlags::IO) {
            attributes |= Self::IO | Self::FIXED;
        }
        attributes
    }
}

/// Largest page size a region could be mapped with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Granularity {
    Page4K,
    Page4M,
}

impl Granularity {
    /// Every region is mapped with 4 KiB pages; 4 MiB is reported for spans
    /// that are 4 MiB aligned and sized.
    #[must_use]
    pub const fn for_span(base: LinearAddress, page_count: u32) -> Self {
        let pages_per_table = Size4M::SIZE / PAGE_SIZE;
        if base.is_aligned::<Size4M>() && page_count != 0 && page_count.is_multiple_of(pages_per_table) {
            Self::Page4M
        } else {
            Self::Page4K
        }
    }

    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Page4K => PAGE_SIZE,
            Self::Page4M => Size4M::SIZE,
        }
    }
}

/// One tracked allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub owner: ProcessId,
    /// Page-aligned canonical base.
    pub base: LinearAddress,
    /// First frame of an exact mapping; null when frames were picked freely.
    pub physical_base: PhysicalAddress,
    pub size: u32,
    pub page_count: u32,
    pub flags: AllocFlags,
    pub attributes: RegionAttributes,
    pub granularity: Granularity,
    pub tag: RegionTag,
}

impl RegionDescriptor {
    #[must_use]
    pub fn new(
        owner: ProcessId,
        base: LinearAddress,
        physical_base: PhysicalAddress,
        page_count: u32,
        flags: AllocFlags,
        tag: &str,
    ) -> Self {
        Self {
            owner,
            base,
            physical_base,
            size: page_count * PAGE_SIZE,
            page_count,
            flags,
            attributes: RegionAttributes::from_flags(flags),
            granularity: Granularity::for_span(base, page_count),
            tag: RegionTag::new(tag),
        }
    }

    /// First byte past the region.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.base.as_u32() + self.size
    }

    #[must_use]
    pub const fn contains(&self, addr: LinearAddress) -> bool {
        addr.as_u32() >= self.base.as_u32() && addr.as_u32() < self.end()
    }

    #[must_use]
    pub const fn is_exact(&self) -> bool {
        !self.physical_base.is_null()
    }

    /// Set the page count and derived fields.
    pub(crate) const fn set_page_count(&mut self, page_count: u32) {
        self.page_count = page_count;
        self.size = page_count * PAGE_SIZE;
        self.granularity = Granularity::for_span(self.base, page_count);
    }

    /// Move the base up by `pages`, dropping the pages below it.
    pub(crate) const fn advance_base(&mut self, pages: u32) {
        let bytes = pages * PAGE_SIZE;
        self.base = LinearAddress::new(self.base.as_u32() + bytes);
        if self.is_exact() {
            self.physical_base = PhysicalAddress::new(self.physical_base.as_u32() + bytes);
        }
        self.set_page_count(self.page_count - pages);
    }
}

const TAG_WORDS: usize = REGION_TAG_MAX / 4;

/// Word layout of a descriptor stored in a slab slot.
///
/// ```text
///  0 owner          4 page_count     8..16 tag bytes
///  1 base           5 flags
///  2 physical_base  6 attributes
///  3 size           7 granularity | tag length << 8
/// ```
impl RegionDescriptor {
    /// Words one descriptor occupies in a slab page.
    pub const SLOT_WORDS: usize = 8 + TAG_WORDS;

    /// Bytes one descriptor occupies in a slab page.
    pub const SLOT_BYTES: u32 = (Self::SLOT_WORDS * 4) as u32;

    #[must_use]
    pub fn to_words(&self) -> [u32; Self::SLOT_WORDS] {
        let granularity = match self.granularity {
            Granularity::Page4K => 0,
            Granularity::Page4M => 1,
        };
        let mut words = [0; Self::SLOT_WORDS];
        words[0] = self.owner.as_u32();
        words[1] = self.base.as_u32();
        words[2] = self.physical_base.as_u32();
        words[3] = self.size;
        words[4] = self.page_count;
        words[5] = self.flags.bits();
        words[6] = self.attributes.bits();
        words[7] = granularity | (u32::from(self.tag.len) << 8);
        words[8..].copy_from_slice(&self.tag.to_words());
        words
    }

    /// Decode a slot; `None` for a slot that holds no region.
    #[must_use]
    pub fn from_words(words: &[u32; Self::SLOT_WORDS]) -> Option<Self> {
        if words[4] == 0 {
            return None;
        }
        let granularity = if words[7] & 0xFF == 1 {
            Granularity::Page4M
        } else {
            Granularity::Page4K
        };
        Some(Self {
            owner: ProcessId::new(words[0]),
            base: LinearAddress::new(words[1]),
            physical_base: PhysicalAddress::new(words[2]),
            size: words[3],
            page_count: words[4],
            flags: AllocFlags::from_bits_retain(words[5]),
            attributes: RegionAttributes::from_bits_retain(words[6]),
            granularity,
            tag: RegionTag::from_words(&words[8..], words[7].to_le_bytes()[1]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_truncated_on_char_boundaries() {
        let long = "RegionDescriptorSlabWithAVeryLongName";
        let tag = RegionTag::new(long);
        assert_eq!(tag.as_str(), &long[..REGION_TAG_MAX - 1]);

        let tag = RegionTag::new("ääääääääääääääääää");
        assert_eq!(tag.as_str().len(), 30);
        assert!(RegionTag::new("").is_empty());
    }

    #[test]
    fn io_flags_imply_fixed() {
        let attributes = RegionAttributes::from_flags(AllocFlags::COMMIT | AllocFlags::IO);
        assert_eq!(
            attributes,
            RegionAttributes::COMMIT | RegionAttributes::IO | RegionAttributes::FIXED
        );
        assert!(RegionAttributes::from_flags(AllocFlags::READ_WRITE).is_empty());
    }

    #[test]
    fn advancing_the_base_shifts_the_physical_base() {
        let mut d = RegionDescriptor::new(
            ProcessId::KERNEL,
            LinearAddress::new(0xC040_0000),
            PhysicalAddress::new(0x00F0_0000),
            4,
            AllocFlags::COMMIT | AllocFlags::IO,
            "IOMemory",
        );
        d.advance_base(1);
        assert_eq!(d.base.as_u32(), 0xC040_1000);
        assert_eq!(d.physical_base.as_u32(), 0x00F0_1000);
        assert_eq!(d.page_count, 3);
        assert_eq!(d.size, 0x3000);
    }

    #[test]
    fn slot_words_restore_the_descriptor() {
        let d = RegionDescriptor::new(
            ProcessId::new(9),
            LinearAddress::new(0x0080_0000),
            PhysicalAddress::zero(),
            1024,
            AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            "UserHeap",
        );
        let words = d.to_words();
        assert_eq!(words[1], 0x0080_0000);
        assert_eq!(words[7] & 0xFF, 1, "4 MiB aligned span of a full table");
        assert_eq!(RegionDescriptor::from_words(&words), Some(d));
        assert_eq!(RegionDescriptor::from_words(&[0; RegionDescriptor::SLOT_WORDS]), None);
        assert_eq!(PAGE_SIZE / RegionDescriptor::SLOT_BYTES, 64);
    }

    #[test]
    fn granularity_follows_alignment() {
        assert_eq!(Granularity::for_span(LinearAddress::new(0x0040_0000), 1024), Granularity::Page4M);
        assert_eq!(Granularity::for_span(LinearAddress::new(0x0040_1000), 1024), Granularity::Page4K);
        assert_eq!(Granularity::for_span(LinearAddress::new(0x0040_0000), 3), Granularity::Page4K);
    }
}
