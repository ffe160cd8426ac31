//! # Region Descriptor Tracker
//!
//! Descriptors live in slots carved out of slab pages. Every slab is one
//! physical page mapped into kernel space by the memory manager and holds
//! `PAGE_SIZE / RegionDescriptor::SLOT_BYTES` slots, stored in the word layout
//! of [`RegionDescriptor::to_words`]. The tracker itself only keeps the slab
//! list, the free slot ids and a base-ordered index per process; descriptor
//! contents are read and written through the [`Cpu`].
//!
//! ```text
//!   slab 0 @ 0xC040_0000:  [ d0 | d1 | 00 | d3 | 00 | ... ]   64 slots
//!   free:   [ 2, 4, ... ]                                    unused slot ids
//!   index:  kernel    → { 0xC041_0000: 0, 0xC042_0000: 3 }
//!           process 1 → { 0x0040_0000: 1 }
//! ```
//!
//! Free slots are all zero, so a fresh zeroed slab needs no initialization.
//! The tracker never allocates memory for slots on its own: when the pool is
//! empty, registration fails and the memory manager maps another slab. A
//! split on free is the one place a slot is needed mid-update; the manager
//! tops up the pool first and running dry there is fatal.

use crate::descriptor::RegionDescriptor;
use crate::ProcessId;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_memory_addresses::{LinearAddress, PAGE_SIZE, PhysicalAddress};
use kernel_vmem::Cpu;
use log::{debug, warn};

const SLOTS_PER_SLAB: u32 = PAGE_SIZE / RegionDescriptor::SLOT_BYTES;

/// Slot of a descriptor: slab number and position within the slab.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DescriptorId(u32);

impl DescriptorId {
    const fn slab(self) -> usize {
        (self.0 / SLOTS_PER_SLAB) as usize
    }

    const fn offset(self) -> u32 {
        (self.0 % SLOTS_PER_SLAB) * RegionDescriptor::SLOT_BYTES
    }
}

/// A page donated to the descriptor pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSlab {
    pub linear: LinearAddress,
    pub physical: PhysicalAddress,
}

/// Descriptor pool counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub slabs: u32,
    pub total: u32,
    pub free: u32,
}

/// Slab-backed descriptor slots plus a base-ordered index per process.
#[derive(Default)]
pub struct RegionTracker {
    free: Vec<DescriptorId>,
    slabs: Vec<DescriptorSlab>,
    index: BTreeMap<ProcessId, BTreeMap<LinearAddress, DescriptorId>>,
}

impl RegionTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            free: Vec::new(),
            slabs: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    /// Descriptor slots contributed by one slab page.
    #[must_use]
    pub const fn slots_per_slab() -> usize {
        SLOTS_PER_SLAB as usize
    }

    /// Add the slots of a freshly mapped and zeroed slab to the free pool.
    pub fn add_slab(&mut self, linear: LinearAddress, physical: PhysicalAddress) {
        let first = self.total_slots();
        // pop() hands out the lowest id first
        self.free
            .extend((first..first + SLOTS_PER_SLAB).rev().map(DescriptorId));
        self.slabs.push(DescriptorSlab { linear, physical });
        debug!("descriptor slab at {linear} adds {SLOTS_PER_SLAB} slots");
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            slabs: self.slabs.len() as u32,
            total: self.total_slots(),
            free: self.free.len() as u32,
        }
    }

    #[must_use]
    pub fn slabs(&self) -> &[DescriptorSlab] {
        &self.slabs
    }

    /// Linear address of the slot holding the descriptor of `owner` at `base`.
    #[must_use]
    pub fn slot_address(&self, owner: ProcessId, base: LinearAddress) -> Option<LinearAddress> {
        let id = *self.index.get(&owner)?.get(&base)?;
        Some(self.address_of(id))
    }

    fn total_slots(&self) -> u32 {
        self.slabs.len() as u32 * SLOTS_PER_SLAB
    }

    fn address_of(&self, id: DescriptorId) -> LinearAddress {
        self.slabs[id.slab()].linear + id.offset()
    }

    fn write_slot<C: Cpu>(&self, cpu: &mut C, id: DescriptorId, words: &[u32; RegionDescriptor::SLOT_WORDS]) {
        let slot = self.address_of(id);
        for (offset, &word) in (0_u32..).step_by(4).zip(words) {
            cpu.write_u32(slot + offset, word);
        }
    }

    fn load<C: Cpu>(&self, cpu: &mut C, id: DescriptorId) -> RegionDescriptor {
        let slot = self.address_of(id);
        let mut words = [0; RegionDescriptor::SLOT_WORDS];
        for (offset, word) in (0_u32..).step_by(4).zip(words.iter_mut()) {
            *word = cpu.read_u32(slot + offset);
        }
        RegionDescriptor::from_words(&words)
            .unwrap_or_else(|| panic!("descriptor slot {id:?} at {slot} is indexed but empty"))
    }

    /// Apply `change` to the stored descriptor and write it back.
    fn modify<C: Cpu>(
        &self,
        cpu: &mut C,
        id: DescriptorId,
        change: impl FnOnce(&mut RegionDescriptor),
    ) -> RegionDescriptor {
        let mut descriptor = self.load(cpu, id);
        change(&mut descriptor);
        self.write_slot(cpu, id, &descriptor.to_words());
        descriptor
    }

    fn acquire<C: Cpu>(&mut self, cpu: &mut C, descriptor: &RegionDescriptor) -> Option<DescriptorId> {
        let id = self.free.pop()?;
        self.write_slot(cpu, id, &descriptor.to_words());
        Some(id)
    }

    fn release<C: Cpu>(&mut self, cpu: &mut C, id: DescriptorId) {
        self.write_slot(cpu, id, &[0; RegionDescriptor::SLOT_WORDS]);
        self.free.push(id);
    }

    /// Register `descriptor` under its owner.
    ///
    /// Returns `None` if the pool has no free slot.
    ///
    /// # Panics
    /// Panics if a descriptor of the same owner already starts at the same base.
    pub fn register<C: Cpu>(&mut self, cpu: &mut C, descriptor: &RegionDescriptor) -> Option<DescriptorId> {
        let owner = descriptor.owner;
        let base = descriptor.base;
        assert!(
            self.index.get(&owner).is_none_or(|list| !list.contains_key(&base)),
            "{owner} already tracks a region at {base}"
        );
        let id = self.acquire(cpu, descriptor)?;
        self.index.entry(owner).or_default().insert(base, id);
        debug!(
            "tracking {} pages at {base} for {owner} ({})",
            descriptor.page_count, descriptor.tag
        );
        Some(id)
    }

    /// Descriptors of `owner` in base order.
    pub fn iter<'a, C: Cpu>(&'a self, cpu: &'a mut C, owner: ProcessId) -> impl Iterator<Item = RegionDescriptor> {
        self.index
            .get(&owner)
            .into_iter()
            .flat_map(BTreeMap::values)
            .map(move |&id| self.load(&mut *cpu, id))
    }

    #[must_use]
    pub fn count(&self, owner: ProcessId) -> usize {
        self.index.get(&owner).map_or(0, BTreeMap::len)
    }

    /// The descriptor of `owner` starting exactly at `base`.
    pub fn find_for_base<C: Cpu>(
        &self,
        cpu: &mut C,
        owner: ProcessId,
        base: LinearAddress,
    ) -> Option<RegionDescriptor> {
        let id = *self.index.get(&owner)?.get(&base)?;
        Some(self.load(cpu, id))
    }

    fn covering<C: Cpu>(
        &self,
        cpu: &mut C,
        owner: ProcessId,
        addr: LinearAddress,
    ) -> Option<(DescriptorId, RegionDescriptor)> {
        let (_, &id) = self.index.get(&owner)?.range(..=addr).next_back()?;
        let descriptor = self.load(cpu, id);
        descriptor.contains(addr).then_some((id, descriptor))
    }

    /// The descriptor of `owner` whose span contains `addr`.
    pub fn find_covering<C: Cpu>(
        &self,
        cpu: &mut C,
        owner: ProcessId,
        addr: LinearAddress,
    ) -> Option<RegionDescriptor> {
        self.covering(cpu, owner, addr).map(|(_, descriptor)| descriptor)
    }

    /// Grow the descriptor starting at `base` by `pages`.
    pub fn extend<C: Cpu>(&mut self, cpu: &mut C, owner: ProcessId, base: LinearAddress, pages: u32) -> bool {
        let Some(&id) = self.index.get(&owner).and_then(|list| list.get(&base)) else {
            return false;
        };
        self.modify(cpu, id, |d| d.set_page_count(d.page_count + pages));
        true
    }

    /// Grow the descriptor ending exactly at `end` by `pages`.
    pub fn extend_ending_at<C: Cpu>(
        &mut self,
        cpu: &mut C,
        owner: ProcessId,
        end: LinearAddress,
        pages: u32,
    ) -> bool {
        let Some(last_byte) = end.as_u32().checked_sub(1) else {
            return false;
        };
        let Some((id, descriptor)) = self.covering(cpu, owner, LinearAddress::new(last_byte)) else {
            return false;
        };
        if descriptor.end() != end.as_u32() {
            return false;
        }
        self.modify(cpu, id, |d| d.set_page_count(d.page_count + pages));
        debug!("extended region at {} by {pages} pages", descriptor.base);
        true
    }

    /// `true` if freeing `pages` at `start` cuts a descriptor of `owner` in two.
    pub fn needs_split<C: Cpu>(&self, cpu: &mut C, owner: ProcessId, start: LinearAddress, pages: u32) -> bool {
        let end = u64::from(start.as_u32()) + u64::from(pages) * u64::from(PAGE_SIZE);
        self.find_covering(cpu, owner, start)
            .is_some_and(|d| d.base < start && u64::from(d.end()) > end)
    }

    /// Bring the descriptors of `owner` in line with `pages` freed at `start`.
    ///
    /// Every descriptor intersecting the span is removed, trimmed at its head
    /// or tail, or split around the hole.
    ///
    /// # Panics
    /// Panics if a split needs a slot and the pool is empty.
    pub fn update_for_free<C: Cpu>(&mut self, cpu: &mut C, owner: ProcessId, start: LinearAddress, pages: u32) {
        let start_u = u64::from(start.as_u32());
        let end_u = start_u + u64::from(pages) * u64::from(PAGE_SIZE);
        let end = LinearAddress::new(u32::try_from(end_u).unwrap_or(u32::MAX));

        let mut affected: Vec<(DescriptorId, RegionDescriptor)> = Vec::new();
        if let Some(list) = self.index.get(&owner) {
            for &id in list.range(..end).rev().map(|(_, id)| id) {
                let descriptor = self.load(cpu, id);
                if u64::from(descriptor.end()) <= start_u {
                    break;
                }
                affected.push((id, descriptor));
            }
        }

        if affected.is_empty() {
            warn!("no region of {owner} tracks the {pages} pages freed at {start}");
            return;
        }

        for (id, descriptor) in affected.into_iter().rev() {
            let base = descriptor.base;
            let d_start = u64::from(base.as_u32());
            let d_end = u64::from(descriptor.end());
            let head_kept = start_u > d_start;
            let tail_kept = end_u < d_end;

            match (head_kept, tail_kept) {
                (false, false) => {
                    self.unindex(owner, base);
                    self.release(cpu, id);
                    debug!("dropped region at {base} of {owner}");
                }
                (true, false) => {
                    let kept = ((start_u - d_start) / u64::from(PAGE_SIZE)) as u32;
                    self.modify(cpu, id, |d| d.set_page_count(kept));
                    debug!("trimmed region at {base} of {owner} to {kept} pages");
                }
                (false, true) => {
                    let dropped = ((end_u - d_start) / u64::from(PAGE_SIZE)) as u32;
                    self.unindex(owner, base);
                    let new_base = self.modify(cpu, id, |d| d.advance_base(dropped)).base;
                    self.reindex(owner, new_base, id);
                    debug!("region at {base} of {owner} now starts at {new_base}");
                }
                (true, true) => self.split(cpu, owner, id, descriptor, start_u, end_u),
            }
        }
    }

    fn split<C: Cpu>(
        &mut self,
        cpu: &mut C,
        owner: ProcessId,
        id: DescriptorId,
        left: RegionDescriptor,
        hole_start: u64,
        hole_end: u64,
    ) {
        let d_start = u64::from(left.base.as_u32());
        let left_pages = ((hole_start - d_start) / u64::from(PAGE_SIZE)) as u32;
        let skipped = ((hole_end - d_start) / u64::from(PAGE_SIZE)) as u32;

        let mut right = left;
        right.advance_base(skipped);

        let Some(right_id) = self.acquire(cpu, &right) else {
            panic!(
                "descriptor pool exhausted while splitting the region at {} of {owner}",
                left.base
            );
        };
        self.modify(cpu, id, |d| d.set_page_count(left_pages));
        self.reindex(owner, right.base, right_id);
        debug!(
            "split region at {} of {owner}: {left_pages} pages kept, remainder at {}",
            left.base, right.base
        );
    }

    fn unindex(&mut self, owner: ProcessId, base: LinearAddress) {
        if let Some(list) = self.index.get_mut(&owner) {
            list.remove(&base);
            if list.is_empty() {
                self.index.remove(&owner);
            }
        }
    }

    fn reindex(&mut self, owner: ProcessId, base: LinearAddress, id: DescriptorId) {
        self.index.entry(owner).or_default().insert(base, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlatMemory;
    use crate::AllocFlags;

    const OWNER: ProcessId = ProcessId::KERNEL;
    const SLAB: LinearAddress = LinearAddress::new(0xC040_0000);

    fn tracker() -> (RegionTracker, FlatMemory) {
        let mut tracker = RegionTracker::new();
        tracker.add_slab(SLAB, PhysicalAddress::new(0x0040_0000));
        (tracker, FlatMemory::default())
    }

    fn region(base: u32, pages: u32) -> RegionDescriptor {
        RegionDescriptor::new(
            OWNER,
            LinearAddress::new(base),
            PhysicalAddress::zero(),
            pages,
            AllocFlags::COMMIT | AllocFlags::READ_WRITE,
            "test",
        )
    }

    fn bases(tracker: &RegionTracker, mem: &mut FlatMemory) -> Vec<(u32, u32)> {
        tracker
            .iter(mem, OWNER)
            .map(|d| (d.base.as_u32(), d.page_count))
            .collect()
    }

    #[test]
    fn descriptors_are_kept_in_base_order() {
        let (mut t, mut mem) = tracker();
        t.register(&mut mem, &region(0x0050_0000, 1)).unwrap();
        t.register(&mut mem, &region(0x0040_0000, 2)).unwrap();
        t.register(&mut mem, &region(0x0048_0000, 1)).unwrap();
        assert_eq!(
            bases(&t, &mut mem),
            vec![(0x0040_0000, 2), (0x0048_0000, 1), (0x0050_0000, 1)]
        );
        assert_eq!(t.count(OWNER), 3);
    }

    #[test]
    fn descriptors_live_in_their_slab() {
        let (mut t, mut mem) = tracker();
        let d = region(0x0040_0000, 2);
        t.register(&mut mem, &d).unwrap();
        t.register(&mut mem, &region(0x0050_0000, 1)).unwrap();

        let slot = t.slot_address(OWNER, d.base).unwrap();
        assert_eq!(slot, SLAB);
        assert_eq!(mem.read_u32(slot + 4), 0x0040_0000);
        assert_eq!(mem.read_u32(slot + 16), 2);
        let second = t.slot_address(OWNER, LinearAddress::new(0x0050_0000)).unwrap();
        assert_eq!(second, SLAB + RegionDescriptor::SLOT_BYTES);

        t.update_for_free(&mut mem, OWNER, d.base, 2);
        assert_eq!(t.slot_address(OWNER, d.base), None);
        assert_eq!(mem.read_u32(slot + 4), 0, "released slots are zeroed");
        assert!(mem.nonzero_words(SLAB) > 0);
    }

    #[test]
    fn covering_lookup() {
        let (mut t, mut mem) = tracker();
        t.register(&mut mem, &region(0x0040_0000, 2)).unwrap();
        let hit = t.find_covering(&mut mem, OWNER, LinearAddress::new(0x0040_1FFF)).unwrap();
        assert_eq!(hit.base.as_u32(), 0x0040_0000);
        assert!(t.find_covering(&mut mem, OWNER, LinearAddress::new(0x0040_2000)).is_none());
        assert!(t.find_covering(&mut mem, OWNER, LinearAddress::new(0x003F_F000)).is_none());
        assert!(t.find_for_base(&mut mem, OWNER, LinearAddress::new(0x0040_1000)).is_none());
    }

    #[test]
    fn free_of_entire_region_releases_the_slot() {
        let (mut t, mut mem) = tracker();
        let free = t.free_count();
        t.register(&mut mem, &region(0x0040_0000, 3)).unwrap();
        t.update_for_free(&mut mem, OWNER, LinearAddress::new(0x0040_0000), 3);
        assert_eq!(t.count(OWNER), 0);
        assert_eq!(t.free_count(), free);
        assert_eq!(mem.nonzero_words(SLAB), 0);
    }

    #[test]
    fn free_of_the_tail_trims() {
        let (mut t, mut mem) = tracker();
        t.register(&mut mem, &region(0x0040_0000, 4)).unwrap();
        t.update_for_free(&mut mem, OWNER, LinearAddress::new(0x0040_2000), 2);
        assert_eq!(bases(&t, &mut mem), vec![(0x0040_0000, 2)]);
    }

    #[test]
    fn free_of_the_head_moves_the_base() {
        let (mut t, mut mem) = tracker();
        let mut exact = region(0x0040_0000, 4);
        exact.physical_base = PhysicalAddress::new(0x0080_0000);
        t.register(&mut mem, &exact).unwrap();
        t.update_for_free(&mut mem, OWNER, LinearAddress::new(0x0040_0000), 1);
        assert_eq!(bases(&t, &mut mem), vec![(0x0040_1000, 3)]);
        let moved = t
            .find_for_base(&mut mem, OWNER, LinearAddress::new(0x0040_1000))
            .unwrap();
        assert_eq!(moved.physical_base.as_u32(), 0x0080_1000);
    }

    #[test]
    fn free_in_the_middle_splits() {
        let (mut t, mut mem) = tracker();
        let mut exact = region(0x0040_0000, 3);
        exact.physical_base = PhysicalAddress::new(0x0080_0000);
        exact.tag = crate::RegionTag::new("split-me");
        t.register(&mut mem, &exact).unwrap();

        assert!(t.needs_split(&mut mem, OWNER, LinearAddress::new(0x0040_1000), 1));
        t.update_for_free(&mut mem, OWNER, LinearAddress::new(0x0040_1000), 1);

        assert_eq!(bases(&t, &mut mem), vec![(0x0040_0000, 1), (0x0040_2000, 1)]);
        let right = t
            .find_for_base(&mut mem, OWNER, LinearAddress::new(0x0040_2000))
            .unwrap();
        assert_eq!(right.physical_base.as_u32(), 0x0080_2000);
        assert_eq!(right.tag.as_str(), "split-me");
        assert_eq!(right.attributes, exact.attributes);
    }

    #[test]
    fn free_across_several_regions() {
        let (mut t, mut mem) = tracker();
        t.register(&mut mem, &region(0x0040_0000, 2)).unwrap();
        t.register(&mut mem, &region(0x0040_3000, 2)).unwrap();
        t.register(&mut mem, &region(0x0040_6000, 2)).unwrap();
        t.update_for_free(&mut mem, OWNER, LinearAddress::new(0x0040_1000), 6);
        assert_eq!(bases(&t, &mut mem), vec![(0x0040_0000, 1), (0x0040_7000, 1)]);
    }

    #[test]
    fn free_of_untracked_span_is_tolerated() {
        let (mut t, mut mem) = tracker();
        t.register(&mut mem, &region(0x0040_0000, 1)).unwrap();
        t.update_for_free(&mut mem, OWNER, LinearAddress::new(0x0060_0000), 1);
        assert_eq!(t.count(OWNER), 1);
    }

    #[test]
    fn extend_adjacent_descriptor() {
        let (mut t, mut mem) = tracker();
        t.register(&mut mem, &region(0x0040_0000, 2)).unwrap();
        assert!(t.extend_ending_at(&mut mem, OWNER, LinearAddress::new(0x0040_2000), 3));
        assert!(!t.extend_ending_at(&mut mem, OWNER, LinearAddress::new(0x0040_1000), 1));
        assert!(t.extend(&mut mem, OWNER, LinearAddress::new(0x0040_0000), 1));
        assert_eq!(bases(&t, &mut mem), vec![(0x0040_0000, 6)]);
    }

    #[test]
    fn slots_of_a_second_slab_land_in_its_page() {
        let (mut t, mut mem) = tracker();
        let per_slab = RegionTracker::slots_per_slab() as u32;
        for i in 0..per_slab {
            t.register(&mut mem, &region(0x0040_0000 + i * PAGE_SIZE, 1)).unwrap();
        }
        let second = LinearAddress::new(0xC080_0000);
        t.add_slab(second, PhysicalAddress::new(0x0050_0000));
        let last = LinearAddress::new(0x0040_0000 + per_slab * PAGE_SIZE);
        t.register(&mut mem, &region(last.as_u32(), 1)).unwrap();

        assert_eq!(t.slot_address(OWNER, last), Some(second));
        assert_eq!(t.stats().total, 2 * per_slab);
        assert_eq!(t.find_for_base(&mut mem, OWNER, last).unwrap().page_count, 1);
    }

    #[test]
    fn registration_fails_when_the_pool_is_empty() {
        let (mut t, mut mem) = tracker();
        for i in 0..RegionTracker::slots_per_slab() as u32 {
            t.register(&mut mem, &region(0x0040_0000 + i * PAGE_SIZE, 1)).unwrap();
        }
        assert_eq!(t.free_count(), 0);
        assert!(t.register(&mut mem, &region(0x0100_0000, 1)).is_none());
        assert_eq!(t.stats().slabs, 1);
    }

    #[test]
    #[should_panic(expected = "descriptor pool exhausted")]
    fn split_without_a_free_slot_is_fatal() {
        let (mut t, mut mem) = tracker();
        let slots = RegionTracker::slots_per_slab() as u32;
        t.register(&mut mem, &region(0x0040_0000, 3)).unwrap();
        for i in 1..slots {
            t.register(&mut mem, &region(0x0080_0000 + i * PAGE_SIZE, 1)).unwrap();
        }
        t.update_for_free(&mut mem, OWNER, LinearAddress::new(0x0040_1000), 1);
    }
}
