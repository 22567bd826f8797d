//! Section objects and mapped views

use crate::handle::OwnedHandle;
use crate::process::Process;
use crate::{Error, Result, StatusExt};
use ntcall::flags::{AllocationType, PageProtection, SectionAccess, SectionAttributes};
use ntcall::rtl::{SectionBasicInformation, SectionInfoClass, SectionInherit};
use ntcall::{Handle, nt};
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::size_of;

/// A pagefile-backed section.
#[derive(Debug)]
pub struct Section {
    handle: OwnedHandle,
}

impl Section {
    /// Creates a committed section of `size` bytes.
    pub fn new(size: u64, protect: PageProtection) -> Result<Self> {
        Self::with_attributes(size, protect, SectionAttributes::COMMIT)
    }

    /// Creates a section with explicit allocation attributes (for example
    /// `RESERVE` to allow [`Section::extend`]).
    pub fn with_attributes(size: u64, protect: PageProtection, attributes: SectionAttributes) -> Result<Self> {
        let mut maximum_size = i64::try_from(size)
            .ok()
            .filter(|&size| size > 0)
            .ok_or_else(|| Error::InvalidParameter(format!("section size {:#x}", size)))?;
        let mut handle = Handle::INVALID;
        unsafe {
            nt::nt_create_section(
                &mut handle,
                SectionAccess::ALL,
                None,
                Some(&mut maximum_size),
                protect,
                attributes,
                Handle::NULL,
            )
        }
        .into_result("NtCreateSection")?;
        let handle = unsafe { OwnedHandle::from_raw(handle) }
            .ok_or_else(|| Error::InvalidParameter(format!("NtCreateSection returned {:?}", handle)))?;
        Ok(Section { handle })
    }

    pub fn handle(&self) -> Handle {
        self.handle.as_handle()
    }

    /// SectionBasicInformation
    pub fn basic_information(&self) -> Result<SectionBasicInformation> {
        let mut info = SectionBasicInformation::default();
        unsafe {
            nt::nt_query_section(
                self.handle(),
                SectionInfoClass::BASIC_INFORMATION,
                &mut info as *mut SectionBasicInformation as *mut c_void,
                size_of::<SectionBasicInformation>() as u64,
                None,
            )
        }
        .into_result("NtQuerySection")?;
        Ok(info)
    }

    /// Current maximum size in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(self.basic_information()?.maximum_size as u64)
    }

    /// Grows the section to at least `size` bytes; returns the new size.
    pub fn extend(&self, size: u64) -> Result<u64> {
        let mut new_size = i64::try_from(size)
            .map_err(|_| Error::InvalidParameter(format!("section size {:#x}", size)))?;
        unsafe { nt::nt_extend_section(self.handle(), &mut new_size) }.into_result("NtExtendSection")?;
        Ok(new_size as u64)
    }

    /// Maps the whole section into `process`.
    pub fn map<'p>(&self, process: &'p Process, protect: PageProtection) -> Result<MappedView<'p>> {
        self.map_range(process, 0, 0, protect)
    }

    /// Maps `size` bytes (0 for everything) starting at `offset`.
    pub fn map_range<'p>(
        &self,
        process: &'p Process,
        offset: i64,
        size: u64,
        protect: PageProtection,
    ) -> Result<MappedView<'p>> {
        let mut base = 0u64;
        let mut view_size = size;
        let mut offset = offset;
        unsafe {
            nt::nt_map_view_of_section(
                self.handle(),
                process.handle(),
                &mut base,
                0,
                0,
                Some(&mut offset),
                &mut view_size,
                SectionInherit::Unmap,
                AllocationType::empty(),
                protect,
            )
        }
        .into_result("NtMapViewOfSection")?;
        Ok(MappedView {
            process: process.handle(),
            base,
            size: view_size,
            _process: PhantomData,
        })
    }
}

/// A view of a section, unmapped on drop.
#[derive(Debug)]
pub struct MappedView<'p> {
    process: Handle,
    base: u64,
    size: u64,
    _process: PhantomData<&'p Process>,
}

impl MappedView<'_> {
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The view as bytes.
    ///
    /// # Safety
    /// The view must be mapped into the current process with a readable
    /// protection, and nothing may write it through another view meanwhile.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base as usize as *const u8, self.size as usize) }
    }

    /// The view as mutable bytes.
    ///
    /// # Safety
    /// As for [`MappedView::as_slice`], with a writable protection.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base as usize as *mut u8, self.size as usize) }
    }
}

impl Drop for MappedView<'_> {
    fn drop(&mut self) {
        unsafe {
            nt::nt_unmap_view_of_section(self.process, self.base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_section() {
        assert!(matches!(Section::new(0, PageProtection::READWRITE), Err(Error::InvalidParameter(_))));
        assert!(matches!(Section::new(u64::MAX, PageProtection::READWRITE), Err(Error::InvalidParameter(_))));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_create_reports_native_failure() {
        let err = Section::new(0x1000, PageProtection::READWRITE).unwrap_err();
        assert_eq!(err.status(), Some(ntcall::NtStatus::INVALID_SYSTEM_SERVICE));
    }

    #[cfg(windows)]
    #[test]
    fn test_two_views_share_pages() {
        let process = Process::current();
        let section = Section::new(0x2000, PageProtection::READWRITE).unwrap();
        assert_eq!(section.size().unwrap(), 0x2000);

        let mut first = section.map(&process, PageProtection::READWRITE).unwrap();
        let second = section.map(&process, PageProtection::READONLY).unwrap();
        assert_ne!(first.base(), 0);
        assert_ne!(first.base(), second.base());
        assert!(first.size() >= 0x2000);

        unsafe {
            first.as_mut_slice()[..4].copy_from_slice(b"view");
            assert_eq!(&second.as_slice()[..4], b"view");
        }
    }
}
