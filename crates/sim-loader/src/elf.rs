//! ELF file parser
//!
//! Handles ELF32 and ELF64 images in either byte order. Only `PT_LOAD`
//! segments are loaded; section headers are consulted for the `.text` bounds.

use crate::image::{ImageReader, ProgramImage, Segment};
use sim_core::{ByteOrder, LoaderError};
use sim_memory::AccessFlags;
use tracing::{debug, info, trace};

/// ELF magic bytes
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// `e_ident` class values
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;

/// `e_ident` data encoding values
pub const ELFDATA2LSB: u8 = 1;
pub const ELFDATA2MSB: u8 = 2;

/// Object file types
pub mod et {
    pub const REL: u16 = 1;
    pub const EXEC: u16 = 2;
    pub const DYN: u16 = 3;
}

/// Program header types
pub mod pt {
    pub const NULL: u32 = 0;
    pub const LOAD: u32 = 1;
    pub const DYNAMIC: u32 = 2;
    pub const INTERP: u32 = 3;
    pub const NOTE: u32 = 4;
}

/// Program header flags
pub mod pf {
    pub const X: u32 = 0x1;
    pub const W: u32 = 0x2;
    pub const R: u32 = 0x4;
}

/// Section header types
pub mod sht {
    pub const NULL: u32 = 0;
    pub const PROGBITS: u32 = 1;
    pub const STRTAB: u32 = 3;
    pub const NOBITS: u32 = 8;
}

/// ELF file header, widened to 64-bit fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: u8,
    pub data: u8,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF program header, widened to 64-bit fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElfPhdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl ElfPhdr {
    /// Access flags from `p_flags`
    pub fn perms(&self) -> AccessFlags {
        let mut flags = AccessFlags::empty();
        if self.p_flags & pf::R != 0 {
            flags |= AccessFlags::READ;
        }
        if self.p_flags & pf::W != 0 {
            flags |= AccessFlags::WRITE;
        }
        if self.p_flags & pf::X != 0 {
            flags |= AccessFlags::EXECUTE;
        }
        flags
    }
}

/// ELF section header, widened to 64-bit fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElfShdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// Sequential field reader over the raw image
struct Fields<'a> {
    bytes: &'a [u8],
    pos: usize,
    order: ByteOrder,
    is64: bool,
}

impl<'a> Fields<'a> {
    fn new(bytes: &'a [u8], order: ByteOrder, is64: bool) -> Self {
        Self {
            bytes,
            pos: 0,
            order,
            is64,
        }
    }

    fn at(mut self, offset: u64) -> Result<Self, LoaderError> {
        self.pos = usize::try_from(offset)
            .map_err(|_| LoaderError::InvalidImage(format!("offset 0x{:x} out of range", offset)))?;
        Ok(self)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], LoaderError> {
        let end = self.pos.checked_add(N).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(LoaderError::InvalidImage(format!(
                "truncated image: need {} bytes at offset 0x{:x}, file is {} bytes",
                N,
                self.pos,
                self.bytes.len()
            )));
        };

        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, LoaderError> {
        let b = self.take()?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn u32(&mut self) -> Result<u32, LoaderError> {
        let b = self.take()?;
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    fn u64(&mut self) -> Result<u64, LoaderError> {
        let b = self.take()?;
        Ok(match self.order {
            ByteOrder::Little => u64::from_le_bytes(b),
            ByteOrder::Big => u64::from_be_bytes(b),
        })
    }

    /// Address-sized field (`Elf32_Addr`/`Elf64_Addr`, offsets and sizes)
    fn word(&mut self) -> Result<u64, LoaderError> {
        if self.is64 {
            self.u64()
        } else {
            self.u32().map(u64::from)
        }
    }
}

/// Parsed ELF file
#[derive(Debug, Clone)]
pub struct ElfFile {
    pub header: ElfHeader,
    pub phdrs: Vec<ElfPhdr>,
    pub shdrs: Vec<ElfShdr>,
    /// Section names, parallel to `shdrs`
    pub section_names: Vec<String>,
}

impl ElfFile {
    /// Parse headers of an in-memory ELF file
    pub fn parse(bytes: &[u8]) -> Result<Self, LoaderError> {
        let header = Self::parse_header(bytes)?;
        let phdrs = Self::parse_phdrs(bytes, &header)?;
        let shdrs = Self::parse_shdrs(bytes, &header)?;
        let section_names = Self::section_names(bytes, &header, &shdrs);

        debug!(
            "ELF{}: entry=0x{:x}, phdrs={}, shdrs={}",
            if header.class == ELFCLASS64 { 64 } else { 32 },
            header.e_entry,
            phdrs.len(),
            shdrs.len()
        );

        Ok(Self {
            header,
            phdrs,
            shdrs,
            section_names,
        })
    }

    pub fn is64(&self) -> bool {
        self.header.class == ELFCLASS64
    }

    pub fn byte_order(&self) -> ByteOrder {
        byte_order_of(self.header.data)
    }

    /// Section header by name
    pub fn section(&self, name: &str) -> Option<&ElfShdr> {
        self.section_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.shdrs[i])
    }

    fn parse_header(bytes: &[u8]) -> Result<ElfHeader, LoaderError> {
        if bytes.len() < 16 || bytes[..4] != ELF_MAGIC {
            return Err(LoaderError::InvalidImage("missing ELF magic".to_string()));
        }

        let class = bytes[4];
        let data = bytes[5];
        if class != ELFCLASS32 && class != ELFCLASS64 {
            return Err(LoaderError::UnsupportedImage(format!("ELF class {}", class)));
        }
        if data != ELFDATA2LSB && data != ELFDATA2MSB {
            return Err(LoaderError::UnsupportedImage(format!("ELF data encoding {}", data)));
        }

        let mut f = Fields::new(bytes, byte_order_of(data), class == ELFCLASS64).at(16)?;
        let header = ElfHeader {
            class,
            data,
            e_type: f.u16()?,
            e_machine: f.u16()?,
            e_version: f.u32()?,
            e_entry: f.word()?,
            e_phoff: f.word()?,
            e_shoff: f.word()?,
            e_flags: f.u32()?,
            e_ehsize: f.u16()?,
            e_phentsize: f.u16()?,
            e_phnum: f.u16()?,
            e_shentsize: f.u16()?,
            e_shnum: f.u16()?,
            e_shstrndx: f.u16()?,
        };

        if header.e_type != et::EXEC && header.e_type != et::DYN {
            return Err(LoaderError::UnsupportedImage(format!(
                "ELF type {} is not an executable",
                header.e_type
            )));
        }

        Ok(header)
    }

    fn parse_phdrs(bytes: &[u8], header: &ElfHeader) -> Result<Vec<ElfPhdr>, LoaderError> {
        let is64 = header.class == ELFCLASS64;
        let order = byte_order_of(header.data);
        let mut phdrs = Vec::with_capacity(header.e_phnum as usize);

        for i in 0..header.e_phnum as u64 {
            let offset = header.e_phoff.saturating_add(i * header.e_phentsize as u64);
            let mut f = Fields::new(bytes, order, is64).at(offset)?;

            let phdr = if is64 {
                ElfPhdr {
                    p_type: f.u32()?,
                    p_flags: f.u32()?,
                    p_offset: f.u64()?,
                    p_vaddr: f.u64()?,
                    p_paddr: f.u64()?,
                    p_filesz: f.u64()?,
                    p_memsz: f.u64()?,
                    p_align: f.u64()?,
                }
            } else {
                // ELF32 keeps p_flags after p_memsz
                let p_type = f.u32()?;
                let p_offset = f.word()?;
                let p_vaddr = f.word()?;
                let p_paddr = f.word()?;
                let p_filesz = f.word()?;
                let p_memsz = f.word()?;
                let p_flags = f.u32()?;
                let p_align = f.word()?;
                ElfPhdr {
                    p_type,
                    p_flags,
                    p_offset,
                    p_vaddr,
                    p_paddr,
                    p_filesz,
                    p_memsz,
                    p_align,
                }
            };

            trace!("phdr {}: {:?}", i, phdr);
            phdrs.push(phdr);
        }

        Ok(phdrs)
    }

    fn parse_shdrs(bytes: &[u8], header: &ElfHeader) -> Result<Vec<ElfShdr>, LoaderError> {
        if header.e_shoff == 0 || header.e_shnum == 0 {
            debug!("No section headers present");
            return Ok(Vec::new());
        }

        let is64 = header.class == ELFCLASS64;
        let order = byte_order_of(header.data);
        let mut shdrs = Vec::with_capacity(header.e_shnum as usize);

        for i in 0..header.e_shnum as u64 {
            let offset = header.e_shoff.saturating_add(i * header.e_shentsize as u64);
            let mut f = Fields::new(bytes, order, is64).at(offset)?;

            shdrs.push(ElfShdr {
                sh_name: f.u32()?,
                sh_type: f.u32()?,
                sh_flags: f.word()?,
                sh_addr: f.word()?,
                sh_offset: f.word()?,
                sh_size: f.word()?,
                sh_link: f.u32()?,
                sh_info: f.u32()?,
                sh_addralign: f.word()?,
                sh_entsize: f.word()?,
            });
        }

        Ok(shdrs)
    }

    /// Resolve section names; sections are optional, so problems yield empty names
    fn section_names(bytes: &[u8], header: &ElfHeader, shdrs: &[ElfShdr]) -> Vec<String> {
        let strtab = shdrs
            .get(header.e_shstrndx as usize)
            .filter(|sh| sh.sh_type == sht::STRTAB)
            .and_then(|sh| {
                let start = usize::try_from(sh.sh_offset).ok()?;
                let end = start.checked_add(usize::try_from(sh.sh_size).ok()?)?;
                bytes.get(start..end)
            });

        shdrs
            .iter()
            .map(|sh| {
                strtab
                    .and_then(|table| table.get(sh.sh_name as usize..))
                    .map(|tail| {
                        let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
                        String::from_utf8_lossy(&tail[..len]).into_owned()
                    })
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Build loadable segments from the `PT_LOAD` program headers
    fn segments(&self, bytes: &[u8], bias: u64) -> Result<Vec<Segment>, LoaderError> {
        let mut segments = Vec::new();

        for (index, phdr) in self.phdrs.iter().enumerate() {
            if phdr.p_type != pt::LOAD {
                continue;
            }

            if phdr.p_filesz > phdr.p_memsz {
                return Err(LoaderError::InvalidImage(format!(
                    "segment {} has filesz 0x{:x} larger than memsz 0x{:x}",
                    index, phdr.p_filesz, phdr.p_memsz
                )));
            }

            let data = usize::try_from(phdr.p_offset)
                .ok()
                .zip(usize::try_from(phdr.p_filesz).ok())
                .and_then(|(start, len)| bytes.get(start..start.checked_add(len)?))
                .ok_or_else(|| {
                    LoaderError::InvalidImage(format!(
                        "segment {} extends beyond file: offset 0x{:x}, size 0x{:x}, file is {} bytes",
                        index,
                        phdr.p_offset,
                        phdr.p_filesz,
                        bytes.len()
                    ))
                })?;

            let addr = bias.checked_add(phdr.p_vaddr).ok_or_else(|| {
                LoaderError::InvalidImage(format!("segment {} address overflows", index))
            })?;

            segments.push(Segment {
                name: format!("load{}", index),
                addr,
                data: data.to_vec(),
                mem_size: phdr.p_memsz,
                perms: phdr.perms(),
            });
        }

        Ok(segments)
    }
}

fn byte_order_of(data: u8) -> ByteOrder {
    if data == ELFDATA2MSB {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    }
}

/// ELF image reader
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfReader {
    /// Added to every segment address and the entry point
    pub load_bias: u64,
}

impl ElfReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reader relocating the image by `load_bias`
    pub fn with_bias(load_bias: u64) -> Self {
        Self { load_bias }
    }
}

impl ImageReader for ElfReader {
    fn name(&self) -> &str {
        "elf"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ProgramImage, LoaderError> {
        let elf = ElfFile::parse(bytes)?;
        let segments = elf.segments(bytes, self.load_bias)?;
        if segments.is_empty() {
            return Err(LoaderError::InvalidImage("no loadable segments".to_string()));
        }

        let entry = elf.header.e_entry.wrapping_add(self.load_bias);

        // Prefer the .text section; fall back to the first executable segment
        let text = match elf.section(".text") {
            Some(sh) => {
                let start = sh.sh_addr.wrapping_add(self.load_bias);
                Some(start..start.saturating_add(sh.sh_size))
            }
            None => segments
                .iter()
                .find(|s| s.perms.contains(AccessFlags::EXECUTE))
                .map(|s| s.addr..s.end()),
        };

        info!(
            "ELF image: entry=0x{:x}, {} loadable segments, text={:x?}",
            entry,
            segments.len(),
            text
        );

        Ok(ProgramImage {
            format: if elf.is64() { "elf64" } else { "elf32" }.to_string(),
            entry,
            segments,
            text,
            byte_order: Some(elf.byte_order()),
            machine: Some(elf.header.e_machine),
        })
    }
}
