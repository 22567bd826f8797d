//! Byte-exact memory views
//!
//! Loader and PE structures are never overlaid with Rust structs. They are
//! read field by field at fixed offsets through a [`Memory`] view, which
//! decodes little-endian values out of whatever backs the view: the current
//! process, the 64-bit half of a WoW64 process (see `gate`), a mapped image
//! file or a synthetic snapshot.

/// Read access to an address space.
pub trait Memory {
    /// Copies `buf.len()` bytes starting at `address`.
    ///
    /// Returns false if any part of the range is not backed by this view.
    fn read(&self, address: u64, buf: &mut [u8]) -> bool;

    fn read_array<const N: usize>(&self, address: u64) -> Option<[u8; N]> {
        let mut buf = [0u8; N];
        self.read(address, &mut buf).then_some(buf)
    }

    fn read_u8(&self, address: u64) -> Option<u8> {
        self.read_array::<1>(address).map(|b| b[0])
    }

    fn read_u16(&self, address: u64) -> Option<u16> {
        self.read_array(address).map(u16::from_le_bytes)
    }

    fn read_u32(&self, address: u64) -> Option<u32> {
        self.read_array(address).map(u32::from_le_bytes)
    }

    fn read_i32(&self, address: u64) -> Option<i32> {
        self.read_array(address).map(i32::from_le_bytes)
    }

    fn read_u64(&self, address: u64) -> Option<u64> {
        self.read_array(address).map(u64::from_le_bytes)
    }

    /// Reads a NUL-terminated narrow string of at most `max_len` bytes.
    ///
    /// Reads byte by byte so a string ending right before an unmapped page
    /// is still returned.
    fn read_c_string(&self, address: u64, max_len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        for i in 0..max_len as u64 {
            match self.read_u8(address.checked_add(i)?)? {
                0 => return Some(out),
                b => out.push(b),
            }
        }
        None
    }

    /// Reads `count` UTF-16 code units.
    fn read_wide(&self, address: u64, count: usize) -> Option<Vec<u16>> {
        let mut bytes = vec![0u8; count * 2];
        if !self.read(address, &mut bytes) {
            return None;
        }
        Some(
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        )
    }
}

impl<M: Memory + ?Sized> Memory for &M {
    fn read(&self, address: u64, buf: &mut [u8]) -> bool {
        (**self).read(address, buf)
    }
}

/// The current process's own address space, read through raw pointers.
#[derive(Debug, Clone, Copy)]
pub struct LocalMemory {
    _private: (),
}

impl LocalMemory {
    /// # Safety
    ///
    /// Every address later passed to [`Memory::read`] (other than null) must
    /// be readable for the requested length. The view performs no probing.
    pub const unsafe fn new() -> Self {
        LocalMemory { _private: () }
    }
}

impl Memory for LocalMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> bool {
        if address == 0 || usize::try_from(address).is_err() {
            return false;
        }
        // SAFETY: readability is the contract of `LocalMemory::new`
        unsafe {
            std::ptr::copy_nonoverlapping(address as usize as *const u8, buf.as_mut_ptr(), buf.len());
        }
        true
    }
}

/// An address space assembled from owned byte regions.
///
/// Used for mapped image files and for building synthetic loader state.
#[derive(Debug, Default, Clone)]
pub struct SnapshotMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

impl SnapshotMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `bytes` at `base`. Later regions shadow earlier ones where they overlap.
    pub fn insert(&mut self, base: u64, bytes: Vec<u8>) -> &mut Self {
        self.regions.push((base, bytes));
        self
    }

    /// Builder-style [`SnapshotMemory::insert`]
    pub fn with(mut self, base: u64, bytes: Vec<u8>) -> Self {
        self.insert(base, bytes);
        self
    }

    pub fn regions(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.regions.iter().map(|(base, bytes)| (*base, bytes.as_slice()))
    }
}

impl Memory for SnapshotMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> bool {
        let Some(end) = address.checked_add(buf.len() as u64) else {
            return false;
        };
        for (base, bytes) in self.regions.iter().rev() {
            let Some(region_end) = base.checked_add(bytes.len() as u64) else {
                continue;
            };
            if address >= *base && end <= region_end {
                let offset = (address - base) as usize;
                buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_little_endian() {
        let memory = SnapshotMemory::new().with(0x1000, vec![0x4D, 0x5A, 0x90, 0x00, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(memory.read_u16(0x1000), Some(0x5A4D));
        assert_eq!(memory.read_u32(0x1004), Some(0x0403_0201));
        assert_eq!(memory.read_u64(0x1000), Some(0x0403_0201_0090_5A4D));
    }

    #[test]
    fn test_snapshot_rejects_partial_reads() {
        let memory = SnapshotMemory::new().with(0x1000, vec![0; 4]);
        assert_eq!(memory.read_u32(0x1000), Some(0));
        assert_eq!(memory.read_u32(0x1002), None);
        assert_eq!(memory.read_u8(0xFFF), None);
        assert_eq!(memory.read_u64(u64::MAX - 3), None);
    }

    #[test]
    fn test_regions_at_top_of_address_space() {
        let memory = SnapshotMemory::new()
            .with(u64::MAX - 3, vec![0xAA; 3])
            .with(u64::MAX - 1, vec![0xBB; 4]);
        // the second region would end past u64::MAX and is never matched
        assert_eq!(memory.read_u16(u64::MAX - 3), Some(0xAAAA));
        assert_eq!(memory.read_u8(u64::MAX - 1), Some(0xAA));
        assert_eq!(memory.read_u16(u64::MAX), None);
    }

    #[test]
    fn test_later_regions_shadow_earlier() {
        let memory = SnapshotMemory::new()
            .with(0x2000, vec![1; 16])
            .with(0x2004, vec![2; 4]);
        assert_eq!(memory.read_u8(0x2004), Some(2));
        assert_eq!(memory.read_u8(0x2008), Some(1));
    }

    #[test]
    fn test_c_string() {
        let memory = SnapshotMemory::new().with(0x10, b"ntdll.NtClose\0tail".to_vec());
        assert_eq!(memory.read_c_string(0x10, 64), Some(b"ntdll.NtClose".to_vec()));
        assert_eq!(memory.read_c_string(0x10, 4), None);
        assert_eq!(memory.read_c_string(0x1E, 64), None);
    }

    #[test]
    fn test_wide() {
        let bytes: Vec<u8> = "Ab".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let memory = SnapshotMemory::new().with(0x40, bytes);
        assert_eq!(memory.read_wide(0x40, 2), Some(vec![b'A' as u16, b'b' as u16]));
        assert_eq!(memory.read_wide(0x40, 3), None);
    }

    #[test]
    fn test_local_memory() {
        let value: u64 = 0x1122_3344_5566_7788;
        let memory = unsafe { LocalMemory::new() };
        let address = &value as *const u64 as usize as u64;
        assert_eq!(memory.read_u64(address), Some(value));
        assert_eq!(memory.read_u32(0), None);
    }
}
