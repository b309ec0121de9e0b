//! Parsed program images

use sim_core::{ByteOrder, LoaderError, MemoryError};
use sim_memory::{AccessFlags, CoreBus};
use std::ops::Range;
use std::path::Path;
use tracing::debug;

/// One loadable segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    /// Load address
    pub addr: u64,
    /// Initialized contents
    pub data: Vec<u8>,
    /// Size in memory; bytes past `data` are zero-filled
    pub mem_size: u64,
    pub perms: AccessFlags,
}

impl Segment {
    /// End address (exclusive)
    pub fn end(&self) -> u64 {
        self.addr.saturating_add(self.mem_size)
    }

    /// Number of zero-filled bytes after the initialized data
    pub fn bss_len(&self) -> u64 {
        self.mem_size.saturating_sub(self.data.len() as u64)
    }
}

/// Executable ready to be placed in a simulated address space
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramImage {
    /// Reader that produced the image (e.g. "elf64")
    pub format: String,
    pub entry: u64,
    pub segments: Vec<Segment>,
    /// Bounds of the text section, if known
    pub text: Option<Range<u64>>,
    /// Target byte order, if the format records it
    pub byte_order: Option<ByteOrder>,
    /// Target machine code, if the format records it
    pub machine: Option<u16>,
}

impl ProgramImage {
    /// Total bytes occupied in memory
    pub fn mem_size(&self) -> u64 {
        self.segments.iter().map(|s| s.mem_size).sum()
    }

    /// Place every segment on the bus
    ///
    /// Segments starting in unmapped space get a fresh zero-filled region with
    /// the segment's permissions. Segments landing in existing regions (or in
    /// flat memory) are written in place, including their zero fill.
    pub fn load_into(&self, bus: &mut CoreBus) -> Result<(), LoaderError> {
        for segment in &self.segments {
            if segment.mem_size == 0 {
                continue;
            }

            let place = |source| LoaderError::Memory {
                addr: segment.addr,
                source,
            };

            let fresh = !bus.is_flat() && bus.region_at(segment.addr).is_none();
            if fresh {
                bus.map_zeroed(&segment.name, segment.addr, segment.mem_size, segment.perms)
                    .map_err(place)?;
            }

            bus.load(segment.addr, &segment.data).map_err(place)?;

            let bss = segment.bss_len();
            if bss > 0 && !fresh {
                zero_fill(bus, segment.addr + segment.data.len() as u64, bss).map_err(place)?;
            }

            debug!(
                "Loaded segment '{}': addr=0x{:x}, filesz=0x{:x}, memsz=0x{:x} ({})",
                segment.name,
                segment.addr,
                segment.data.len(),
                segment.mem_size,
                segment.perms
            );
        }
        Ok(())
    }
}

const ZERO_CHUNK: usize = 0x1000;

/// Clear `len` bytes starting at `addr`, one page-sized chunk at a time
fn zero_fill(bus: &mut CoreBus, addr: u64, len: u64) -> Result<(), MemoryError> {
    let zeros = [0u8; ZERO_CHUNK];
    let mut done = 0u64;
    while done < len {
        let n = (len - done).min(ZERO_CHUNK as u64) as usize;
        let at = addr.checked_add(done).ok_or(MemoryError::Unmapped { addr, len })?;
        bus.load(at, &zeros[..n])?;
        done += n as u64;
    }
    Ok(())
}

/// Converts executable bytes into a [`ProgramImage`]
pub trait ImageReader {
    /// Reader name for diagnostics
    fn name(&self) -> &str;

    /// Parse an in-memory image
    fn parse(&self, bytes: &[u8]) -> Result<ProgramImage, LoaderError>;

    /// Read and parse a file
    fn read_file(&self, path: &Path) -> Result<ProgramImage, LoaderError> {
        let bytes = std::fs::read(path)?;
        debug!("Read {} bytes from {} ({} reader)", bytes.len(), path.display(), self.name());
        self.parse(&bytes)
    }
}
