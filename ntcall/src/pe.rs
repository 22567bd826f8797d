//! Export-table resolver
//!
//! Walks the export directory of a module that is laid out as a loaded image
//! (section data at its RVAs) inside some [`Memory`] view. Lookups are by
//! FNV-1a name hash or by ordinal, and forwarded exports are chased into the
//! module they forward to. Every failure collapses to address 0.

use crate::hash::{self, fnv1a_continue, fnv1a_lower};
use crate::memory::Memory;
use object::pe::{
    IMAGE_DIRECTORY_ENTRY_EXPORT, IMAGE_DOS_SIGNATURE, IMAGE_NT_OPTIONAL_HDR32_MAGIC,
    IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE, ImageDataDirectory, ImageDosHeader,
    ImageExportDirectory, ImageFileHeader, ImageOptionalHeader32, ImageOptionalHeader64,
};
use std::mem::{offset_of, size_of};

/// Longest export or forwarder name that is read
pub const MAX_NAME_LEN: usize = 512;
/// Forwarder chains longer than this resolve to 0
pub const MAX_FORWARDER_DEPTH: u32 = 8;
/// Ordinals are 16-bit, so no real table has more entries than this
pub const MAX_EXPORTS: u32 = 0x1_0000;

const NT_OPTIONAL_HEADER: u64 = (size_of::<u32>() + size_of::<ImageFileHeader>()) as u64;

/// What to look up in an export table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportTarget {
    /// FNV-1a hash of the export name
    Name(u32),
    /// Biased ordinal, as it appears in `.def` files and in `#n` forwarders
    Ordinal(u16),
}

impl ExportTarget {
    /// Hashes `name` the same way export names will be hashed during lookup
    pub fn from_name(name: &str, lowercase: bool) -> Self {
        ExportTarget::Name(hash::fnv1a_str(name, lowercase))
    }
}

/// Finds loaded modules by the lowercase hash of their base name.
///
/// Forwarded exports name their target module; the resolver asks a locator
/// for its base.
pub trait ModuleLocator {
    fn locate(&self, name_hash: u32) -> u64;
}

impl<F: Fn(u32) -> u64> ModuleLocator for F {
    fn locate(&self, name_hash: u32) -> u64 {
        self(name_hash)
    }
}

/// A locator that knows no modules, for images inspected in isolation
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModules;

impl ModuleLocator for NoModules {
    fn locate(&self, _name_hash: u32) -> u64 {
        0
    }
}

/// Absolute addresses of one module's export directory and its three arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDirectory {
    pub module: u64,
    /// RVA of the directory; forwarder strings live inside `rva..rva + size`
    pub rva: u32,
    pub size: u32,
    pub ordinal_base: u32,
    pub num_functions: u32,
    pub num_names: u32,
    pub functions: u64,
    pub names: u64,
    pub name_ordinals: u64,
}

impl ExportDirectory {
    /// Validates the image headers of `module` and locates its export directory.
    ///
    /// Returns `None` for a bad DOS or NT signature, an unknown optional-header
    /// magic, a missing or empty export directory, more than [`MAX_EXPORTS`]
    /// functions, or table addresses that wrap past `u64::MAX`. `num_names`
    /// is clamped to `num_functions`.
    pub fn read<M: Memory + ?Sized>(memory: &M, module: u64) -> Option<Self> {
        if module == 0 || memory.read_u16(module)? != IMAGE_DOS_SIGNATURE {
            return None;
        }
        let lfanew = memory.read_u32(module.checked_add(offset_of!(ImageDosHeader, e_lfanew) as u64)?)?;
        let nt = module.checked_add(lfanew as u64)?;
        if memory.read_u32(nt)? != IMAGE_NT_SIGNATURE {
            return None;
        }

        let optional = nt.checked_add(NT_OPTIONAL_HEADER)?;
        let (count_offset, directories_offset) = match memory.read_u16(optional)? {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => (
                offset_of!(ImageOptionalHeader32, number_of_rva_and_sizes),
                size_of::<ImageOptionalHeader32>(),
            ),
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => (
                offset_of!(ImageOptionalHeader64, number_of_rva_and_sizes),
                size_of::<ImageOptionalHeader64>(),
            ),
            _ => return None,
        };
        let directory_count = memory.read_u32(optional.checked_add(count_offset as u64)?)?;
        if directory_count as usize <= IMAGE_DIRECTORY_ENTRY_EXPORT {
            return None;
        }

        let entry = optional.checked_add(
            (directories_offset + IMAGE_DIRECTORY_ENTRY_EXPORT * size_of::<ImageDataDirectory>()) as u64,
        )?;
        let rva = memory.read_u32(entry.checked_add(offset_of!(ImageDataDirectory, virtual_address) as u64)?)?;
        let size = memory.read_u32(entry.checked_add(offset_of!(ImageDataDirectory, size) as u64)?)?;
        if rva == 0 || size == 0 {
            return None;
        }

        let dir = module.checked_add(rva as u64)?;
        let field = |offset: usize| memory.read_u32(dir.checked_add(offset as u64)?);
        let absolute = |offset: usize| module.checked_add(field(offset)? as u64);
        let num_functions = field(offset_of!(ImageExportDirectory, number_of_functions))?;
        if num_functions == 0 || num_functions > MAX_EXPORTS {
            return None;
        }

        Some(ExportDirectory {
            module,
            rva,
            size,
            ordinal_base: field(offset_of!(ImageExportDirectory, base))?,
            num_functions,
            num_names: field(offset_of!(ImageExportDirectory, number_of_names))?.min(num_functions),
            functions: absolute(offset_of!(ImageExportDirectory, address_of_functions))?,
            names: absolute(offset_of!(ImageExportDirectory, address_of_names))?,
            name_ordinals: absolute(offset_of!(ImageExportDirectory, address_of_name_ordinals))?,
        })
    }

    /// True if `rva` points back into the directory, i.e. at a forwarder string
    pub fn is_forwarder(&self, rva: u32) -> bool {
        rva >= self.rva && rva - self.rva < self.size
    }

    /// RVA stored in the address table at `index`
    pub fn function_rva<M: Memory + ?Sized>(&self, memory: &M, index: u32) -> Option<u32> {
        if index >= self.num_functions {
            return None;
        }
        memory.read_u32(self.functions.checked_add(index as u64 * 4)?)
    }

    /// Name and address-table index of the `i`th entry of the name table
    pub fn name_entry<M: Memory + ?Sized>(&self, memory: &M, i: u32) -> Option<(Vec<u8>, u32)> {
        if i >= self.num_names {
            return None;
        }
        let name_rva = memory.read_u32(self.names.checked_add(i as u64 * 4)?)?;
        let name = memory.read_c_string(self.module.checked_add(name_rva as u64)?, MAX_NAME_LEN)?;
        let index = memory.read_u16(self.name_ordinals.checked_add(i as u64 * 2)?)?;
        Some((name, index as u32))
    }

    /// Address-table index for `target`
    fn index_of<M: Memory + ?Sized>(&self, memory: &M, target: ExportTarget, lowercase: bool) -> Option<u32> {
        match target {
            ExportTarget::Ordinal(ordinal) => {
                let index = (ordinal as u32).checked_sub(self.ordinal_base)?;
                (index < self.num_functions).then_some(index)
            }
            ExportTarget::Name(wanted) => (0..self.num_names).find_map(|i| {
                let (name, index) = self.name_entry(memory, i)?;
                let hash = if lowercase {
                    hash::fnv1a_lower(&name)
                } else {
                    hash::fnv1a(&name)
                };
                (hash == wanted).then_some(index)
            }),
        }
    }
}

/// Resolves `target` in the module loaded at `module`.
///
/// Returns the absolute address of the export, following forwarders through
/// `locator`, or 0 if anything along the way is missing or malformed.
pub fn find_export<M, L>(memory: &M, locator: &L, module: u64, target: ExportTarget, lowercase: bool) -> u64
where
    M: Memory + ?Sized,
    L: ModuleLocator + ?Sized,
{
    resolve(memory, locator, module, target, lowercase, 0).unwrap_or(0)
}

fn resolve<M, L>(memory: &M, locator: &L, module: u64, target: ExportTarget, lowercase: bool, depth: u32) -> Option<u64>
where
    M: Memory + ?Sized,
    L: ModuleLocator + ?Sized,
{
    let directory = ExportDirectory::read(memory, module)?;
    let index = directory.index_of(memory, target, lowercase)?;
    let rva = directory.function_rva(memory, index)?;
    if rva == 0 {
        return None;
    }

    let address = module.checked_add(rva as u64)?;
    if !directory.is_forwarder(rva) {
        return Some(address);
    }

    if depth >= MAX_FORWARDER_DEPTH {
        debug_log!("[EXPORT] forwarder chain too deep at {:#x}+{:#x}", module, rva);
        return None;
    }

    let forwarder = memory.read_c_string(address, MAX_NAME_LEN)?;
    let (library_hash, forwarded) = parse_forwarder(&forwarder)?;
    let library = locator.locate(library_hash);
    debug_log!(
        "[EXPORT] forwarder {} -> module {:#x}",
        String::from_utf8_lossy(&forwarder),
        library
    );
    if library == 0 {
        return None;
    }
    resolve(memory, locator, library, forwarded, true, depth + 1)
}

/// Splits `Library.Function` (or `Library.#ordinal`) into the lowercase hash
/// of `library.dll` and the forwarded target.
pub fn parse_forwarder(forwarder: &[u8]) -> Option<(u32, ExportTarget)> {
    let dot = forwarder.iter().position(|&b| b == b'.')?;
    let (library, function) = (&forwarder[..dot], &forwarder[dot + 1..]);
    if library.is_empty() || function.is_empty() {
        return None;
    }

    let library_hash = fnv1a_continue(fnv1a_lower(library), b".dll", false);
    let target = match function.strip_prefix(b"#") {
        Some(digits) => ExportTarget::Ordinal(std::str::from_utf8(digits).ok()?.parse().ok()?),
        None => ExportTarget::Name(fnv1a_lower(function)),
    };
    Some((library_hash, target))
}

/// One entry of an export table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub ordinal: u16,
    pub name: Option<String>,
    pub rva: u32,
    /// `Library.Function` if this entry forwards elsewhere
    pub forwarder: Option<String>,
}

/// Lists every non-empty slot of the export address table, in ordinal order.
pub fn exports<M: Memory + ?Sized>(memory: &M, module: u64) -> Vec<Export> {
    let Some(directory) = ExportDirectory::read(memory, module) else {
        return Vec::new();
    };

    let mut names: Vec<Option<String>> = vec![None; directory.num_functions as usize];
    for i in 0..directory.num_names {
        if let Some((name, index)) = directory.name_entry(memory, i)
            && let Some(slot) = names.get_mut(index as usize)
            && slot.is_none()
        {
            *slot = Some(String::from_utf8_lossy(&name).into_owned());
        }
    }

    let mut out = Vec::new();
    for (index, name) in names.into_iter().enumerate() {
        let Some(rva) = directory.function_rva(memory, index as u32) else {
            break;
        };
        if rva == 0 {
            continue;
        }
        let forwarder = directory
            .is_forwarder(rva)
            .then(|| memory.read_c_string(module.checked_add(rva as u64)?, MAX_NAME_LEN))
            .flatten()
            .map(|s| String::from_utf8_lossy(&s).into_owned());
        out.push(Export {
            ordinal: directory.ordinal_base.wrapping_add(index as u32) as u16,
            name,
            rva,
            forwarder,
        });
    }
    out
}
