//! Reading hand-built ELF images and placing them on the bus

use sim_core::{BackingStrategy, ByteOrder, LoaderError};
use sim_loader::{ElfReader, ImageReader, RawReader};
use sim_memory::{AccessFlags, CoreBus};
use std::io::Write;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

struct SegmentSpec<'a> {
    vaddr: u64,
    flags: u32,
    data: &'a [u8],
    memsz: u64,
}

/// Little builder for minimal ELF executables
struct ElfBuilder {
    buf: Vec<u8>,
    big: bool,
    is64: bool,
}

impl ElfBuilder {
    fn u16(&mut self, v: u16) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn u32(&mut self, v: u32) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn u64(&mut self, v: u64) {
        let b = if self.big { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn word(&mut self, v: u64) {
        if self.is64 {
            self.u64(v);
        } else {
            self.u32(v as u32);
        }
    }

    fn build(is64: bool, big: bool, entry: u64, segments: &[SegmentSpec], text: Option<(u64, u64)>) -> Vec<u8> {
        let mut b = ElfBuilder {
            buf: Vec::new(),
            big,
            is64,
        };

        let ehsize: u64 = if is64 { 64 } else { 52 };
        let phentsize: u64 = if is64 { 56 } else { 32 };
        let shentsize: u64 = if is64 { 64 } else { 40 };
        let phoff = ehsize;
        let data_off = phoff + phentsize * segments.len() as u64;
        let data_len: u64 = segments.iter().map(|s| s.data.len() as u64).sum();

        let shstrtab: &[u8] = b"\0.text\0.shstrtab\0";
        let shstrtab_off = data_off + data_len;
        let (shoff, shnum) = match text {
            Some(_) => (shstrtab_off + shstrtab.len() as u64, 3u16),
            None => (0, 0),
        };

        // e_ident
        b.buf.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
        b.buf.push(if is64 { 2 } else { 1 });
        b.buf.push(if big { 2 } else { 1 });
        b.buf.push(1);
        b.buf.extend_from_slice(&[0; 9]);

        b.u16(2); // ET_EXEC
        b.u16(0xF3);
        b.u32(1);
        b.word(entry);
        b.word(phoff);
        b.word(shoff);
        b.u32(0);
        b.u16(ehsize as u16);
        b.u16(phentsize as u16);
        b.u16(segments.len() as u16);
        b.u16(shentsize as u16);
        b.u16(shnum);
        b.u16(if shnum > 0 { 2 } else { 0 });
        assert_eq!(b.buf.len() as u64, ehsize);

        let mut offset = data_off;
        for seg in segments {
            let filesz = seg.data.len() as u64;
            if is64 {
                b.u32(1);
                b.u32(seg.flags);
                b.u64(offset);
                b.u64(seg.vaddr);
                b.u64(seg.vaddr);
                b.u64(filesz);
                b.u64(seg.memsz);
                b.u64(0x1000);
            } else {
                b.u32(1);
                b.u32(offset as u32);
                b.u32(seg.vaddr as u32);
                b.u32(seg.vaddr as u32);
                b.u32(filesz as u32);
                b.u32(seg.memsz as u32);
                b.u32(seg.flags);
                b.u32(0x1000);
            }
            offset += filesz;
        }
        assert_eq!(b.buf.len() as u64, data_off);

        for seg in segments {
            b.buf.extend_from_slice(seg.data);
        }

        if let Some((text_addr, text_size)) = text {
            b.buf.extend_from_slice(shstrtab);

            // Null section
            for _ in 0..shentsize {
                b.buf.push(0);
            }
            // .text
            b.section(1, 1, text_addr, data_off, text_size);
            // .shstrtab
            b.section(7, 3, 0, shstrtab_off, shstrtab.len() as u64);
        }

        b.buf
    }

    fn section(&mut self, name: u32, sh_type: u32, addr: u64, offset: u64, size: u64) {
        self.u32(name);
        self.u32(sh_type);
        self.word(0);
        self.word(addr);
        self.word(offset);
        self.word(size);
        self.u32(0);
        self.u32(0);
        self.word(1);
        self.word(0);
    }
}

const CODE: [u8; 8] = [0x13, 0, 0, 0, 0x6F, 0, 0, 0];

fn sample_elf64() -> Vec<u8> {
    ElfBuilder::build(
        true,
        false,
        0x10000,
        &[
            SegmentSpec {
                vaddr: 0x10000,
                flags: PF_R | PF_X,
                data: &CODE,
                memsz: CODE.len() as u64,
            },
            SegmentSpec {
                vaddr: 0x20000,
                flags: PF_R | PF_W,
                data: &[0xAA, 0xBB, 0xCC, 0xDD],
                memsz: 0x10,
            },
        ],
        Some((0x10000, CODE.len() as u64)),
    )
}

#[test]
fn test_parse_elf64_little_endian() {
    let image = ElfReader::new().parse(&sample_elf64()).unwrap();

    assert_eq!(image.format, "elf64");
    assert_eq!(image.entry, 0x10000);
    assert_eq!(image.byte_order, Some(ByteOrder::Little));
    assert_eq!(image.machine, Some(0xF3));
    assert_eq!(image.text, Some(0x10000..0x10008));

    assert_eq!(image.segments.len(), 2);
    let text = &image.segments[0];
    assert_eq!(text.addr, 0x10000);
    assert_eq!(text.perms, AccessFlags::RX);
    assert_eq!(text.data, CODE.to_vec());

    let data = &image.segments[1];
    assert_eq!(data.perms, AccessFlags::RW);
    assert_eq!(data.mem_size, 0x10);
    assert_eq!(data.bss_len(), 0xC);
}

#[test]
fn test_parse_elf32_big_endian_without_sections() {
    let bytes = ElfBuilder::build(
        false,
        true,
        0x400,
        &[SegmentSpec {
            vaddr: 0x400,
            flags: PF_R | PF_X,
            data: &[0x4E, 0x71, 0x4E, 0x75],
            memsz: 4,
        }],
        None,
    );

    let image = ElfReader::new().parse(&bytes).unwrap();
    assert_eq!(image.format, "elf32");
    assert_eq!(image.entry, 0x400);
    assert_eq!(image.byte_order, Some(ByteOrder::Big));
    // Falls back to the executable segment
    assert_eq!(image.text, Some(0x400..0x404));
    assert_eq!(image.segments[0].data, vec![0x4E, 0x71, 0x4E, 0x75]);
}

#[test]
fn test_load_bias() {
    let image = ElfReader::with_bias(0x1000_0000).parse(&sample_elf64()).unwrap();
    assert_eq!(image.entry, 0x1001_0000);
    assert_eq!(image.segments[1].addr, 0x1002_0000);
    assert_eq!(image.text, Some(0x1001_0000..0x1001_0008));
}

#[test]
fn test_load_elf_onto_bus() {
    let image = ElfReader::new().parse(&sample_elf64()).unwrap();
    let mut bus = CoreBus::new(BackingStrategy::Mapped, ByteOrder::Little).unwrap();
    image.load_into(&mut bus).unwrap();

    let mut insn = [0u8; 4];
    bus.fetch(0x10000, &mut insn).unwrap();
    assert_eq!(insn, [0x13, 0, 0, 0]);

    assert_eq!(bus.read(0x20000, 6).unwrap(), vec![0xAA, 0xBB, 0xCC, 0xDD, 0, 0]);
    assert!(bus.write_u8(0x10000, 0).is_err());
    assert_eq!(bus.region_at(0x2000F).map(|r| r.perms()), Some(AccessFlags::RW));
}

#[test]
fn test_truncated_segment_data() {
    let mut bytes = sample_elf64();
    // Keep the headers, drop most of the segment contents
    bytes.truncate(64 + 2 * 56 + 4);

    assert!(matches!(
        ElfReader::new().parse(&bytes),
        Err(LoaderError::InvalidImage(_))
    ));
}

#[test]
fn test_oversized_segment_is_an_error() {
    let bytes = ElfBuilder::build(
        true,
        false,
        0x10000,
        &[SegmentSpec {
            vaddr: 0x10000,
            flags: PF_R | PF_W,
            data: &[1, 2, 3, 4],
            memsz: 1 << 62,
        }],
        None,
    );
    let image = ElfReader::new().parse(&bytes).unwrap();
    let mut bus = CoreBus::new(BackingStrategy::Mapped, ByteOrder::Little).unwrap();

    let err = image.load_into(&mut bus).unwrap_err();
    assert!(matches!(err, LoaderError::Memory { addr: 0x10000, .. }));
    assert_eq!(bus.region_count(), 0);
}

#[test]
fn test_read_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&sample_elf64()).unwrap();
    file.flush().unwrap();

    let image = ElfReader::new().read_file(file.path()).unwrap();
    assert_eq!(image.entry, 0x10000);

    let raw = RawReader::new(0x8000).read_file(file.path()).unwrap();
    assert_eq!(raw.segments[0].data.len(), sample_elf64().len());
}

#[test]
fn test_read_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ElfReader::new()
        .read_file(&dir.path().join("missing.elf"))
        .unwrap_err();
    assert!(matches!(err, LoaderError::Io(_)));
}
