use core::fmt;

/// Identifies the process owning an address space and its regions.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

impl ProcessId {
    /// The kernel process; owns the bootstrap directory and every kernel-space region.
    pub const KERNEL: Self = Self(0);

    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_kernel(self) -> bool {
        self.0 == Self::KERNEL.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_kernel() {
            f.write_str("kernel")
        } else {
            write!(f, "process {}", self.0)
        }
    }
}
