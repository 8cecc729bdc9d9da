//! Guest memory
//!
//! Programs address memory through 64-bit register values. The host maps
//! byte buffers at guest base addresses; every access is translated to one
//! region and must lie entirely inside it.

use crate::ir::Size;
use log::debug;
use thiserror::Error;

/// Largest region [`Memory::map_filled`] will allocate (1 GiB)
pub const MAX_REGION_SIZE: usize = 1 << 30;

/// Region mapping errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("region {base:#x}+{size:#x} overlaps an existing region at {existing:#x}")]
    Overlap { base: u64, size: usize, existing: u64 },

    #[error("region at {base:#x} is empty")]
    Empty { base: u64 },

    #[error("region {base:#x}+{size:#x} wraps the address space")]
    AddressOverflow { base: u64, size: usize },

    #[error("region {base:#x}+{size:#x} is too large to map")]
    TooLarge { base: u64, size: usize },
}

/// Out-of-bounds access, converted into a fault by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessViolation {
    pub addr: u64,
    pub len: usize,
}

/// One contiguous mapping
#[derive(Debug, Clone)]
pub struct Region {
    base: u64,
    data: Vec<u8>,
}

impl Region {
    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the last mapped address
    pub fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn contains(&self, addr: u64, len: usize) -> bool {
        addr >= self.base
            && addr
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.end())
    }
}

/// Set of non-overlapping guest regions, kept sorted by base address
#[derive(Debug, Clone, Default)]
pub struct Memory {
    regions: Vec<Region>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `data` at guest address `base`
    pub fn map(&mut self, base: u64, data: Vec<u8>) -> Result<(), MemoryError> {
        self.check_placement(base, data.len())?;
        self.insert(base, data);
        Ok(())
    }

    /// Map `size` bytes set to `fill` at `base`.
    ///
    /// The placement is checked before anything is allocated. Sizes above
    /// [`MAX_REGION_SIZE`], or that the allocator cannot satisfy, are
    /// reported as [`MemoryError::TooLarge`].
    pub fn map_filled(&mut self, base: u64, size: usize, fill: u8) -> Result<(), MemoryError> {
        if size > MAX_REGION_SIZE {
            return Err(MemoryError::TooLarge { base, size });
        }
        self.check_placement(base, size)?;

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| MemoryError::TooLarge { base, size })?;
        data.resize(size, fill);
        self.insert(base, data);
        Ok(())
    }

    /// Map `size` zeroed bytes at `base`
    pub fn map_zeroed(&mut self, base: u64, size: usize) -> Result<(), MemoryError> {
        self.map_filled(base, size, 0)
    }

    fn check_placement(&self, base: u64, size: usize) -> Result<(), MemoryError> {
        if size == 0 {
            return Err(MemoryError::Empty { base });
        }
        // the region end must itself be representable
        let end = base
            .checked_add(size as u64)
            .ok_or(MemoryError::AddressOverflow { base, size })?;

        match self.regions.iter().find(|r| base < r.end() && r.base < end) {
            Some(existing) => Err(MemoryError::Overlap {
                base,
                size,
                existing: existing.base,
            }),
            None => Ok(()),
        }
    }

    fn insert(&mut self, base: u64, data: Vec<u8>) {
        let end = base + data.len() as u64;
        let at = self.regions.partition_point(|r| r.base < base);
        self.regions.insert(at, Region { base, data });
        debug!("mapped guest region {:#x}..{:#x}", base, end);
    }

    /// Remove and return the region starting at `base`
    pub fn unmap(&mut self, base: u64) -> Option<Vec<u8>> {
        let idx = self.regions.iter().position(|r| r.base == base)?;
        Some(self.regions.remove(idx).data)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn locate(&self, addr: u64, len: usize) -> Result<(usize, usize), AccessViolation> {
        // last region starting at or below addr
        let idx = self.regions.partition_point(|r| r.base <= addr);
        match idx.checked_sub(1).map(|i| (i, &self.regions[i])) {
            Some((i, region)) if region.contains(addr, len) => {
                Ok((i, (addr - region.base) as usize))
            }
            _ => Err(AccessViolation { addr, len }),
        }
    }

    /// Read `size` bytes at `addr`, zero-extended
    pub fn load(&self, addr: u64, size: Size) -> Result<u64, AccessViolation> {
        let len = size.bytes();
        let (idx, start) = self.locate(addr, len)?;
        let src = &self.regions[idx].data[start..start + len];

        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(src);
        Ok(u64::from_le_bytes(buf))
    }

    /// Write the low `size` bytes of `value` at `addr`
    pub fn store(&mut self, addr: u64, value: u64, size: Size) -> Result<(), AccessViolation> {
        let len = size.bytes();
        let (idx, start) = self.locate(addr, len)?;
        let bytes = value.to_le_bytes();
        self.regions[idx].data[start..start + len].copy_from_slice(&bytes[..len]);
        Ok(())
    }
}
