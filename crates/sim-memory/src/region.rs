//! Address space regions and their backing stores

use crate::perms::AccessFlags;
use sim_core::MemoryError;
use std::fmt;

/// Memory-mapped device backing a region
///
/// Offsets are relative to the region base and always lie within the region.
pub trait Device {
    /// Device name for diagnostics
    fn name(&self) -> &str;

    /// Fill `buf` with the bytes at `offset`
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Store `data` at `offset`
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), MemoryError>;
}

/// Backing store of a region
pub enum Backing {
    /// Owned buffer, exactly as long as the region
    Buffer(Vec<u8>),
    /// Device callbacks
    Device(Box<dyn Device>),
}

impl Backing {
    /// Zero-filled buffer of `len` bytes
    ///
    /// Fails instead of aborting when the allocation cannot be satisfied.
    pub fn zeroed(len: usize) -> Result<Self, MemoryError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| MemoryError::OutOfMemory { len: len as u64 })?;
        buf.resize(len, 0);
        Ok(Self::Buffer(buf))
    }

    /// Wrap a device
    pub fn device<D: Device + 'static>(device: D) -> Self {
        Self::Device(Box::new(device))
    }
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buf) => write!(f, "Buffer({} bytes)", buf.len()),
            Self::Device(dev) => write!(f, "Device({})", dev.name()),
        }
    }
}

/// One contiguous range of the address space
#[derive(Debug)]
pub struct Region {
    name: String,
    base: u64,
    len: u64,
    perms: AccessFlags,
    backing: Backing,
}

impl Region {
    /// Create a region, checking the range and the backing length
    pub fn new(
        name: &str,
        base: u64,
        len: u64,
        perms: AccessFlags,
        backing: Backing,
    ) -> Result<Self, MemoryError> {
        let invalid = MemoryError::InvalidLength { base, len };

        if len == 0 || base.checked_add(len - 1).is_none() {
            return Err(invalid);
        }
        if let Backing::Buffer(buf) = &backing {
            if buf.len() as u64 != len {
                return Err(invalid);
            }
        }

        Ok(Self {
            name: name.to_string(),
            base,
            len,
            perms,
            backing,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Always false; regions are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Last address covered (inclusive)
    pub fn last(&self) -> u64 {
        self.base + (self.len - 1)
    }

    pub fn perms(&self) -> AccessFlags {
        self.perms
    }

    /// Check whether an address lies inside the region
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr <= self.last()
    }

    /// Check whether two regions share at least one byte
    pub fn overlaps(&self, other: &Region) -> bool {
        self.base <= other.last() && other.base <= self.last()
    }

    /// Whether the region is device backed
    pub fn is_device(&self) -> bool {
        matches!(self.backing, Backing::Device(_))
    }

    /// Owned buffer, if the region is buffer backed
    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Buffer(buf) => Some(buf.as_slice()),
            Backing::Device(_) => None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.backing {
            Backing::Buffer(buf) => Some(buf.as_mut_slice()),
            Backing::Device(_) => None,
        }
    }

    /// Read bytes at an absolute address; the range must lie inside the region
    pub(crate) fn read_at(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let offset = addr - self.base;
        match &mut self.backing {
            Backing::Buffer(data) => {
                let start = offset as usize;
                buf.copy_from_slice(&data[start..start + buf.len()]);
                Ok(())
            }
            Backing::Device(dev) => dev.read(offset, buf),
        }
    }

    /// Write bytes at an absolute address; the range must lie inside the region
    pub(crate) fn write_at(&mut self, addr: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        let offset = addr - self.base;
        match &mut self.backing {
            Backing::Buffer(data) => {
                let start = offset as usize;
                data[start..start + bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
            Backing::Device(dev) => dev.write(offset, bytes),
        }
    }
}
