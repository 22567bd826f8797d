//! On-disk PE files laid out as the loader would map them
//!
//! Headers and sections are copied to their RVAs in a zeroed buffer of
//! `SizeOfImage` bytes. The result is a [`Memory`] view based at the
//! image's preferred base (or anywhere else via [`MappedImage::with_base`]),
//! so export and syscall-number resolution run on files exactly as they do
//! on live modules.

use crate::memory::Memory;
use crate::{Error, Result};
use object::read::pe::{ImageNtHeaders, ImageOptionalHeader, PeFile};
use object::{FileKind, Object, ObjectSection};
use std::path::Path;

/// Images larger than this are refused rather than allocated
pub const MAX_IMAGE_SIZE: usize = 0x4000_0000;

/// A PE image mapped into an owned buffer.
#[derive(Debug, Clone)]
pub struct MappedImage {
    image: Vec<u8>,
    base: u64,
    preferred_base: u64,
    is_64: bool,
}

impl MappedImage {
    /// Maps a PE32 or PE32+ file held in memory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let kind = FileKind::parse(data).map_err(|e| Error::Parse(e.to_string()))?;
        let (image, preferred_base, is_64) = match kind {
            FileKind::Pe32 => {
                let (image, base) = map_sections::<object::pe::ImageNtHeaders32>(data)?;
                (image, base, false)
            }
            FileKind::Pe64 => {
                let (image, base) = map_sections::<object::pe::ImageNtHeaders64>(data)?;
                (image, base, true)
            }
            other => return Err(Error::UnsupportedImage(format!("{:?}", other))),
        };

        debug_log!(
            "[IMAGE] mapped {} bytes, preferred base {:#x}, 64-bit: {}",
            image.len(),
            preferred_base,
            is_64
        );

        Ok(MappedImage {
            image,
            base: preferred_base,
            preferred_base,
            is_64,
        })
    }

    /// Reads and maps the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// The same image viewed at `base` instead
    pub fn with_base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Address the view starts at
    pub fn base(&self) -> u64 {
        self.base
    }

    /// `ImageBase` from the optional header
    pub fn preferred_base(&self) -> u64 {
        self.preferred_base
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    /// `SizeOfImage`
    pub fn size(&self) -> usize {
        self.image.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.image
    }

    /// RVA of an address inside this view
    pub fn rva(&self, address: u64) -> Option<u32> {
        let offset = address.checked_sub(self.base)?;
        if offset < self.image.len() as u64 {
            u32::try_from(offset).ok()
        } else {
            None
        }
    }
}

impl Memory for MappedImage {
    fn read(&self, address: u64, buf: &mut [u8]) -> bool {
        let Some(offset) = address.checked_sub(self.base) else {
            return false;
        };
        let Ok(start) = usize::try_from(offset) else {
            return false;
        };
        match start.checked_add(buf.len()).and_then(|end| self.image.get(start..end)) {
            Some(bytes) => {
                buf.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }
}

fn map_sections<Pe: ImageNtHeaders>(data: &[u8]) -> Result<(Vec<u8>, u64)> {
    let file = PeFile::<Pe>::parse(data).map_err(|e| Error::Parse(e.to_string()))?;
    let optional = file.nt_headers().optional_header();

    let size = optional.size_of_image() as usize;
    if size == 0 || size > MAX_IMAGE_SIZE {
        return Err(Error::UnsupportedImage(format!("SizeOfImage {:#x}", size)));
    }
    let image_base = file.relative_address_base();

    let mut image = vec![0u8; size];

    // Copy headers
    let headers = (optional.size_of_headers() as usize).min(data.len()).min(size);
    image[..headers].copy_from_slice(&data[..headers]);

    // Copy sections
    for section in file.sections() {
        let name = section.name().unwrap_or("?").to_string();
        let bytes = section.data().map_err(|e| Error::Parse(format!("section {}: {}", name, e)))?;
        let rva = section
            .address()
            .checked_sub(image_base)
            .and_then(|rva| usize::try_from(rva).ok())
            .ok_or_else(|| Error::Parse(format!("section {} below image base", name)))?;
        let end = rva
            .checked_add(bytes.len())
            .filter(|&end| end <= size)
            .ok_or_else(|| Error::Parse(format!("section {} outside image", name)))?;
        image[rva..end].copy_from_slice(bytes);
    }

    Ok((image, image_base))
}
