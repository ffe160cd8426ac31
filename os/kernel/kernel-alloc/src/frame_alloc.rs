//! Bitmap physical frame allocator.

use kernel_info::memory::RESERVED_LOW_MEMORY;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, Size4K, pages_for};
use log::{debug, warn};

/// Source of 4 KiB physical frames.
pub trait PhysicalPageAllocator {
    /// Allocate one free frame.
    fn alloc_page(&mut self) -> Option<PhysicalAddress>;

    /// Return a frame obtained from [`alloc_page`](Self::alloc_page).
    fn free_page(&mut self, page: PhysicalAddress);

    /// Mark frame number `frame` used or free, regardless of who owns it.
    fn set_page_mark(&mut self, frame: u32, used: bool);

    /// `true` if frame number `frame` is in use.
    fn is_page_marked(&self, frame: u32) -> bool;

    /// Total physical memory in bytes.
    fn memory_size(&self) -> u32;

    /// Number of frames currently in use.
    fn used_pages(&self) -> u32;
}

/// One bit per frame; frames below [`RESERVED_LOW_MEMORY`] are never handed out.
pub struct BitmapFrameAlloc<'a> {
    bitmap: &'a mut [u8],
    page_count: u32,
    used: u32,
    next: u32,
}

const FIRST_ALLOCATABLE: u32 = RESERVED_LOW_MEMORY / PAGE_SIZE;

impl<'a> BitmapFrameAlloc<'a> {
    /// Create an allocator for `memory_size` bytes of RAM.
    ///
    /// The bitmap needs one bit per frame; frames the bitmap cannot describe
    /// are ignored. The low reserved region starts out used.
    pub fn new(bitmap: &'a mut [u8], memory_size: u32) -> Self {
        bitmap.fill(0);
        let describable = u32::try_from(bitmap.len().saturating_mul(8)).unwrap_or(u32::MAX);
        let page_count = (memory_size / PAGE_SIZE).min(describable);

        let mut this = Self {
            bitmap,
            page_count,
            used: 0,
            next: FIRST_ALLOCATABLE,
        };
        for frame in 0..FIRST_ALLOCATABLE.min(page_count) {
            this.set_page_mark(frame, true);
        }
        debug!(
            "physical allocator: {} frames, {} reserved",
            this.page_count, this.used
        );
        this
    }

    /// Bytes of bitmap needed for `memory_size` bytes of RAM.
    #[must_use]
    pub const fn bitmap_bytes(memory_size: u32) -> usize {
        (memory_size / PAGE_SIZE).div_ceil(8) as usize
    }

    /// Mark the frames overlapping `[start, start + bytes)` used.
    pub fn reserve_range(&mut self, start: PhysicalAddress, bytes: u32) {
        let first = start.frame();
        let count = pages_for(bytes + start.offset::<Size4K>());
        for frame in first..first.saturating_add(count) {
            self.set_page_mark(frame, true);
        }
    }

    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.page_count
    }

    #[must_use]
    pub const fn free_pages(&self) -> u32 {
        self.page_count - self.used
    }

    const fn locate(frame: u32) -> (usize, u8) {
        ((frame / 8) as usize, 1 << (frame % 8))
    }
}

impl PhysicalPageAllocator for BitmapFrameAlloc<'_> {
    fn alloc_page(&mut self) -> Option<PhysicalAddress> {
        let start = self.next.max(FIRST_ALLOCATABLE);
        let frame = (start..self.page_count)
            .chain(FIRST_ALLOCATABLE..start)
            .find(|&frame| !self.is_page_marked(frame))?;

        self.set_page_mark(frame, true);
        self.next = frame + 1;
        Some(PhysicalAddress::from_frame(frame))
    }

    fn free_page(&mut self, page: PhysicalAddress) {
        if !page.is_aligned::<Size4K>() {
            warn!("free_page: {page} is not page aligned");
            return;
        }
        let frame = page.frame();
        if frame < FIRST_ALLOCATABLE {
            debug!("free_page: ignoring reserved frame {page}");
            return;
        }
        if frame >= self.page_count {
            warn!("free_page: {page} is outside physical memory");
            return;
        }
        if !self.is_page_marked(frame) {
            warn!("free_page: {page} is already free");
            return;
        }
        self.set_page_mark(frame, false);
    }

    fn set_page_mark(&mut self, frame: u32, used: bool) {
        if frame >= self.page_count {
            return;
        }
        let (byte, bit) = Self::locate(frame);
        let was_used = self.bitmap[byte] & bit != 0;
        match (was_used, used) {
            (false, true) => {
                self.bitmap[byte] |= bit;
                self.used += 1;
            }
            (true, false) => {
                self.bitmap[byte] &= !bit;
                self.used -= 1;
                self.next = self.next.min(frame);
            }
            _ => {}
        }
    }

    fn is_page_marked(&self, frame: u32) -> bool {
        if frame >= self.page_count {
            return true;
        }
        let (byte, bit) = Self::locate(frame);
        self.bitmap[byte] & bit != 0
    }

    fn memory_size(&self) -> u32 {
        self.page_count * PAGE_SIZE
    }

    fn used_pages(&self) -> u32 {
        self.used
    }
}
