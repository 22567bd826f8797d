//! Export tables and syscall numbers of PE files on disk

use crate::{Error, Result};
use ntcall::hash::fnv1a_lower;
use ntcall::pe::{self, ExportDirectory, MAX_NAME_LEN};
use ntcall::syscall::syscall_id;
use ntcall::{Export, ExportTarget, MappedImage, Memory};
use std::path::Path;

/// Offset of the `Name` RVA inside IMAGE_EXPORT_DIRECTORY
const EXPORT_NAME_OFFSET: u64 = 12;

/// A syscall stub exported by an `ntdll` image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallEntry {
    pub name: String,
    pub id: u32,
    /// Address of the stub within the image view
    pub address: u64,
}

/// A PE file mapped for inspection.
///
/// ```no_run
/// use ntrs::Image;
///
/// let ntdll = Image::open(r"C:\Windows\System32\ntdll.dll")?;
/// for entry in ntdll.syscalls() {
///     println!("{:#06x} {}", entry.id, entry.name);
/// }
/// # Ok::<(), ntrs::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Image {
    mapped: MappedImage,
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Image {
            mapped: MappedImage::open(path)?,
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Image {
            mapped: MappedImage::parse(data)?,
        })
    }

    /// Rebases the view; resolved addresses move with it.
    pub fn with_base(self, base: u64) -> Self {
        Image {
            mapped: self.mapped.with_base(base),
        }
    }

    pub fn base(&self) -> u64 {
        self.mapped.base()
    }

    pub fn is_64(&self) -> bool {
        self.mapped.is_64()
    }

    pub fn mapped(&self) -> &MappedImage {
        &self.mapped
    }

    /// DLL name recorded in the export directory
    pub fn name(&self) -> Option<String> {
        let directory = ExportDirectory::read(&self.mapped, self.base())?;
        let entry = self
            .base()
            .checked_add(directory.rva as u64)?
            .checked_add(EXPORT_NAME_OFFSET)?;
        let name_rva = self.mapped.read_u32(entry)?;
        let name = self
            .mapped
            .read_c_string(self.base().checked_add(name_rva as u64)?, MAX_NAME_LEN)?;
        Some(String::from_utf8_lossy(&name).into_owned())
    }

    /// Every export, in ordinal order
    pub fn exports(&self) -> Vec<Export> {
        pe::exports(&self.mapped, self.base())
    }

    /// Address of the export called `name` (case-sensitive).
    ///
    /// Forwarders back into this same DLL are followed; forwarders to any
    /// other module are reported as unresolved.
    pub fn resolve(&self, name: &str) -> Result<u64> {
        self.find(ExportTarget::from_name(name, false))
            .ok_or_else(|| Error::Unresolved(name.to_string()))
    }

    /// Address of the export with the biased ordinal `ordinal`.
    pub fn resolve_ordinal(&self, ordinal: u16) -> Result<u64> {
        self.find(ExportTarget::Ordinal(ordinal))
            .ok_or_else(|| Error::Unresolved(format!("#{}", ordinal)))
    }

    fn find(&self, target: ExportTarget) -> Option<u64> {
        let own = self.name().map(|name| fnv1a_lower(name.as_bytes()));
        let base = self.base();
        let locator = move |hash: u32| if Some(hash) == own { base } else { 0 };
        let address = pe::find_export(&self.mapped, &locator, base, target, false);
        (address != 0).then_some(address)
    }

    /// Syscall number of the stub exported as `name`.
    pub fn syscall_id(&self, name: &str) -> Result<u32> {
        let address = self.resolve(name)?;
        match syscall_id(&self.mapped, address) {
            0 => Err(Error::Unresolved(format!("{} is not a syscall stub", name))),
            id => Ok(id),
        }
    }

    /// `Nt*` exports that decode to a syscall number, sorted by number.
    pub fn syscalls(&self) -> Vec<SyscallEntry> {
        let mut entries: Vec<SyscallEntry> = self
            .nt_stubs()
            .filter(|entry| entry.id != 0)
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
        entries
    }

    /// Every `Nt*` code export in ordinal order, with id 0 where the stub
    /// does not decode (hooked, reshaped or not a stub at all).
    pub fn syscalls_all(&self) -> Vec<SyscallEntry> {
        self.nt_stubs().collect()
    }

    fn nt_stubs(&self) -> impl Iterator<Item = SyscallEntry> + '_ {
        self.exports().into_iter().filter_map(move |export| {
            let name = export.name?;
            if !is_nt_routine(&name) || export.forwarder.is_some() {
                return None;
            }
            let address = self.base().checked_add(export.rva as u64)?;
            Some(SyscallEntry {
                id: syscall_id(&self.mapped, address),
                name,
                address,
            })
        })
    }
}

/// `NtXxx` but not `Ntdll...` style helpers
fn is_nt_routine(name: &str) -> bool {
    name.strip_prefix("Nt")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}
