//! Core memory bus
//!
//! Every access resolves to exactly one region. Accesses that run into a gap
//! fail as unmapped; accesses that are fully covered but cross from one region
//! into an adjacent one fail as a misaligned span, since regions are never
//! stitched together.

use crate::hook::AccessHook;
use crate::perms::AccessFlags;
use crate::region::{Backing, Region};
use sim_core::config::MemoryConfig;
use sim_core::{AccessKind, BackingStrategy, ByteOrder, MemoryError};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the single region created by the flat backing strategy
pub const FLAT_REGION_NAME: &str = "flat";

/// Access counters kept by the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub reads: u64,
    pub writes: u64,
    pub fetches: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_fetched: u64,
    /// Checked accesses that failed
    pub faults: u64,
}

/// Simulated address space
pub struct CoreBus {
    regions: BTreeMap<u64, Region>,
    flat: bool,
    byte_order: ByteOrder,
    hook: Option<Box<dyn AccessHook>>,
    stats: BusStats,
}

impl CoreBus {
    /// Create an empty region-mapped bus
    pub fn mapped(byte_order: ByteOrder) -> Self {
        Self {
            regions: BTreeMap::new(),
            flat: false,
            byte_order,
            hook: None,
            stats: BusStats::default(),
        }
    }

    /// Create a bus with the given backing strategy
    pub fn new(strategy: BackingStrategy, byte_order: ByteOrder) -> Result<Self, MemoryError> {
        let mut bus = Self::mapped(byte_order);

        if let BackingStrategy::Flat { size } = strategy {
            let len = usize::try_from(size).map_err(|_| MemoryError::InvalidLength { base: 0, len: size })?;
            let region = Region::new(FLAT_REGION_NAME, 0, size, AccessFlags::RWX, Backing::zeroed(len)?)?;
            bus.regions.insert(0, region);
            bus.flat = true;
            tracing::debug!("Created flat memory of 0x{:x} bytes", size);
        }

        Ok(bus)
    }

    /// Create a bus from the `[memory]` configuration section
    pub fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        Self::new(config.backing, config.byte_order)
    }

    /// Add a region
    pub fn map(
        &mut self,
        name: &str,
        base: u64,
        len: u64,
        perms: AccessFlags,
        backing: Backing,
    ) -> Result<(), MemoryError> {
        if self.flat {
            return Err(MemoryError::FlatLayout);
        }

        let region = Region::new(name, base, len, perms, backing)?;

        // Only the nearest neighbours can intersect, since existing regions never overlap
        let before = self.regions.range(..=base).next_back();
        let after = self.regions.range(base..).next();
        for existing in before.into_iter().chain(after).map(|(_, r)| r) {
            if existing.overlaps(&region) {
                return Err(MemoryError::Overlap {
                    base,
                    len,
                    existing_base: existing.base(),
                    existing_len: existing.len(),
                });
            }
        }

        tracing::debug!("Mapped region '{}' at 0x{:x}+0x{:x} ({})", name, base, len, perms);
        self.regions.insert(base, region);
        Ok(())
    }

    /// Add a zero-filled buffer-backed region
    pub fn map_zeroed(&mut self, name: &str, base: u64, len: u64, perms: AccessFlags) -> Result<(), MemoryError> {
        let size = usize::try_from(len).map_err(|_| MemoryError::InvalidLength { base, len })?;
        self.map(name, base, len, perms, Backing::zeroed(size)?)
    }

    /// Remove the region starting at `base`
    pub fn unmap(&mut self, base: u64) -> Result<Region, MemoryError> {
        if self.flat {
            return Err(MemoryError::FlatLayout);
        }

        let region = self
            .regions
            .remove(&base)
            .ok_or(MemoryError::Unmapped { addr: base, len: 0 })?;
        tracing::debug!("Unmapped region '{}' at 0x{:x}", region.name(), base);
        Ok(region)
    }

    /// Read `len` bytes
    pub fn read(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0; len];
        self.read_into(addr, &mut buf)?;
        Ok(buf)
    }

    /// Read into a caller-supplied buffer
    pub fn read_into(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.checked_read(AccessKind::Read, addr, buf)
    }

    /// Fetch instruction bytes (execute access)
    pub fn fetch(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.checked_read(AccessKind::Execute, addr, buf)
    }

    /// Write bytes
    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        if bytes.is_empty() {
            return Ok(());
        }

        let result = self
            .locate(addr, bytes.len(), Some(AccessKind::Write))
            .and_then(|region| region.write_at(addr, bytes));
        self.finish(AccessKind::Write, addr, bytes.len(), result)
    }

    /// Store bytes ignoring permissions (program loading); untraced
    pub fn load(&mut self, addr: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.locate(addr, bytes.len(), None)?.write_at(addr, bytes)
    }

    /// Read bytes ignoring permissions (debugger access); untraced
    pub fn peek(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0; len];
        if len > 0 {
            self.locate(addr, len, None)?.read_at(addr, &mut buf)?;
        }
        Ok(buf)
    }

    pub fn read_u8(&mut self, addr: u64) -> Result<u8, MemoryError> {
        let bytes = self.read_array::<1>(addr)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self, addr: u64) -> Result<u16, MemoryError> {
        let bytes = self.read_array(addr)?;
        Ok(match self.byte_order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_u32(&mut self, addr: u64) -> Result<u32, MemoryError> {
        let bytes = self.read_array(addr)?;
        Ok(match self.byte_order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_u64(&mut self, addr: u64) -> Result<u64, MemoryError> {
        let bytes = self.read_array(addr)?;
        Ok(match self.byte_order {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        })
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), MemoryError> {
        self.write(addr, &[value])
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), MemoryError> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write(addr, &bytes)
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), MemoryError> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write(addr, &bytes)
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), MemoryError> {
        let bytes = match self.byte_order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write(addr, &bytes)
    }

    /// Install the access-tracing hook, replacing any previous one
    pub fn set_access_hook(&mut self, hook: Box<dyn AccessHook>) {
        self.hook = Some(hook);
    }

    /// Remove the access-tracing hook
    pub fn clear_access_hook(&mut self) -> Option<Box<dyn AccessHook>> {
        self.hook.take()
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = BusStats::default();
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Whether the bus uses the flat backing strategy
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// The flat backing buffer, if the bus was created flat
    pub fn flat_buffer(&self) -> Option<&[u8]> {
        if !self.flat {
            return None;
        }
        self.regions.get(&0).and_then(Region::buffer)
    }

    pub fn flat_buffer_mut(&mut self) -> Option<&mut [u8]> {
        if !self.flat {
            return None;
        }
        self.regions.get_mut(&0).and_then(Region::buffer_mut)
    }

    /// Regions in address order
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Region containing an address
    pub fn region_at(&self, addr: u64) -> Option<&Region> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    fn read_array<const N: usize>(&mut self, addr: u64) -> Result<[u8; N], MemoryError> {
        let mut bytes = [0u8; N];
        self.read_into(addr, &mut bytes)?;
        Ok(bytes)
    }

    fn checked_read(&mut self, kind: AccessKind, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        if buf.is_empty() {
            return Ok(());
        }

        let len = buf.len();
        let result = self
            .locate(addr, len, Some(kind))
            .and_then(|region| region.read_at(addr, buf));
        self.finish(kind, addr, len, result)
    }

    /// Resolve `[addr, addr + len)` to the single region covering it
    fn locate(&mut self, addr: u64, len: usize, kind: Option<AccessKind>) -> Result<&mut Region, MemoryError> {
        let unmapped = MemoryError::Unmapped { addr, len: len as u64 };
        let last = addr.checked_add(len as u64 - 1).ok_or(unmapped.clone())?;

        let (&base, region) = self
            .regions
            .range(..=addr)
            .next_back()
            .filter(|(_, r)| r.contains(addr))
            .ok_or(unmapped.clone())?;

        if last > region.last() {
            // Walk the following regions to tell a gap from a multi-region span
            let mut covered = region.last();
            loop {
                let next = covered
                    .checked_add(1)
                    .and_then(|start| self.regions.get(&start))
                    .ok_or(unmapped.clone())?;
                if next.last() >= last {
                    return Err(MemoryError::MisalignedSpan { addr, len: len as u64 });
                }
                covered = next.last();
            }
        }

        if let Some(kind) = kind {
            if !region.perms().allows(kind) {
                return Err(MemoryError::Permission { addr, kind });
            }
        }

        self.regions.get_mut(&base).ok_or(unmapped)
    }

    /// Update counters and notify the hook after a checked access
    fn finish(
        &mut self,
        kind: AccessKind,
        addr: u64,
        len: usize,
        result: Result<(), MemoryError>,
    ) -> Result<(), MemoryError> {
        if let Err(err) = result {
            self.stats.faults += 1;
            tracing::trace!("Bus fault: {}", err);
            return Err(err);
        }

        let bytes = len as u64;
        match kind {
            AccessKind::Read => {
                self.stats.reads += 1;
                self.stats.bytes_read += bytes;
            }
            AccessKind::Write => {
                self.stats.writes += 1;
                self.stats.bytes_written += bytes;
            }
            AccessKind::Execute => {
                self.stats.fetches += 1;
                self.stats.bytes_fetched += bytes;
            }
        }

        if let Some(hook) = self.hook.as_mut() {
            hook.on_access(kind, addr, len);
        }
        Ok(())
    }
}

impl fmt::Debug for CoreBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreBus")
            .field("regions", &self.regions.values().collect::<Vec<_>>())
            .field("flat", &self.flat)
            .field("byte_order", &self.byte_order)
            .field("hooked", &self.hook.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped() -> CoreBus {
        CoreBus::new(BackingStrategy::Mapped, ByteOrder::Little).unwrap()
    }

    #[test]
    fn test_region_at() {
        let mut bus = mapped();
        bus.map_zeroed("ram", 0x1000, 0x100, AccessFlags::RW).unwrap();

        assert_eq!(bus.region_at(0x1080).map(Region::name), Some("ram"));
        assert!(bus.region_at(0x0FFF).is_none());
        assert!(bus.region_at(0x1100).is_none());
    }

    #[test]
    fn test_zero_length_access() {
        let mut bus = mapped();
        assert_eq!(bus.read(0x5000, 0).unwrap(), Vec::<u8>::new());
        bus.write(0x5000, &[]).unwrap();
        assert_eq!(bus.stats().reads, 0);
    }

    #[test]
    fn test_access_at_top_of_address_space() {
        let mut bus = mapped();
        bus.map_zeroed("top", u64::MAX - 0xF, 0x10, AccessFlags::RW).unwrap();
        bus.write_u32(u64::MAX - 3, 0x1234_5678).unwrap();
        assert_eq!(bus.read_u32(u64::MAX - 3).unwrap(), 0x1234_5678);

        // Wraps past the end
        assert!(matches!(
            bus.read(u64::MAX - 1, 4),
            Err(MemoryError::Unmapped { .. })
        ));
    }

    #[test]
    fn test_stats_and_faults() {
        let mut bus = mapped();
        bus.map_zeroed("ram", 0, 0x100, AccessFlags::RW).unwrap();

        bus.write_u32(0, 1).unwrap();
        bus.read_u32(0).unwrap();
        let mut insn = [0u8; 4];
        assert!(bus.fetch(0, &mut insn).is_err());

        let stats = bus.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.bytes_read, 4);
        assert_eq!(stats.fetches, 0);
        assert_eq!(stats.faults, 1);

        bus.reset_stats();
        assert_eq!(*bus.stats(), BusStats::default());
    }
}
