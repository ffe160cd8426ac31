//! Memory manager tunables.

/// Runtime options of the [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Leave page 0 and the legacy BIOS zone (`0xC0000..=0xFFFFF`) unmapped in
    /// the low identity table of every directory.
    pub protect_bios: bool,

    /// A single allocation may not exceed `memory_size / allocation_ceiling_divisor`.
    pub allocation_ceiling_divisor: u32,
}

impl MemoryConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protect_bios: false,
            allocation_ceiling_divisor: 4,
        }
    }

    #[must_use]
    pub const fn with_protect_bios(mut self, protect: bool) -> Self {
        self.protect_bios = protect;
        self
    }

    /// Largest size accepted by a single allocation or resize.
    #[must_use]
    pub const fn allocation_ceiling(&self, memory_size: u32) -> u32 {
        let divisor = if self.allocation_ceiling_divisor == 0 {
            1
        } else {
            self.allocation_ceiling_divisor
        };
        memory_size / divisor
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_a_quarter_of_memory_by_default() {
        assert_eq!(MemoryConfig::default().allocation_ceiling(32 << 20), 8 << 20);
        let all = MemoryConfig {
            allocation_ceiling_divisor: 0,
            ..MemoryConfig::default()
        };
        assert_eq!(all.allocation_ceiling(32 << 20), 32 << 20);
    }
}
