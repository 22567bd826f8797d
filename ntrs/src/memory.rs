//! Virtual memory regions that clean up after themselves

use crate::{Result, StatusExt};
use ntcall::flags::{AllocationType, FreeType, PageProtection};
use ntcall::nt;
use ntcall::Handle;
use std::marker::PhantomData;

/// A region committed with `NtAllocateVirtualMemory`, released on drop.
///
/// Borrows the process it lives in so the handle outlives the region.
#[derive(Debug)]
pub struct Allocation<'p> {
    process: Handle,
    base: u64,
    size: u64,
    _process: PhantomData<&'p ()>,
}

impl<'p> Allocation<'p> {
    /// Reserves and commits `size` bytes anywhere in `process`.
    pub(crate) fn new(process: Handle, size: u64, protect: PageProtection) -> Result<Self> {
        Self::at(process, 0, size, AllocationType::default(), protect)
    }

    /// Allocates at `base` (0 for anywhere) with an explicit allocation type.
    pub(crate) fn at(
        process: Handle,
        base: u64,
        size: u64,
        allocation_type: AllocationType,
        protect: PageProtection,
    ) -> Result<Self> {
        let mut base = base;
        let mut size = size;
        unsafe { nt::nt_allocate_virtual_memory(process, &mut base, 0, &mut size, allocation_type, protect) }
            .into_result("NtAllocateVirtualMemory")?;
        Ok(Allocation {
            process,
            base,
            size,
            _process: PhantomData,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size after rounding to pages
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Keeps the region allocated past the lifetime of this value.
    pub fn leak(self) -> (u64, u64) {
        let region = (self.base, self.size);
        std::mem::forget(self);
        region
    }

    /// Changes the protection of the whole region until the guard drops.
    pub fn protect(&self, protect: PageProtection) -> Result<ProtectionGuard<'_>> {
        ProtectionGuard::new(self.process, self.base, self.size, protect)
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        let mut base = self.base;
        let mut size = 0;
        unsafe {
            nt::nt_free_virtual_memory(self.process, &mut base, &mut size, FreeType::RELEASE);
        }
    }
}

/// Restores the previous protection of a range on drop.
#[derive(Debug)]
pub struct ProtectionGuard<'a> {
    process: Handle,
    base: u64,
    size: u64,
    old: PageProtection,
    _region: PhantomData<&'a ()>,
}

impl<'a> ProtectionGuard<'a> {
    pub(crate) fn new(process: Handle, base: u64, size: u64, protect: PageProtection) -> Result<Self> {
        let (mut at, mut len) = (base, size);
        let mut old = PageProtection::empty();
        unsafe { nt::nt_protect_virtual_memory(process, &mut at, &mut len, protect, &mut old) }
            .into_result("NtProtectVirtualMemory")?;
        Ok(ProtectionGuard {
            process,
            base: at,
            size: len,
            old,
            _region: PhantomData,
        })
    }

    /// Protection in effect before the guard
    pub fn previous(&self) -> PageProtection {
        self.old
    }

    /// Page-aligned start of the affected range
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for ProtectionGuard<'_> {
    fn drop(&mut self) {
        let (mut at, mut len) = (self.base, self.size);
        let mut ignored = PageProtection::empty();
        unsafe {
            nt::nt_protect_virtual_memory(self.process, &mut at, &mut len, self.old, &mut ignored);
        }
    }
}
