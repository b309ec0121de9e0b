//! Program image readers for simbase simulators
//!
//! Readers turn the bytes of an executable into a [`ProgramImage`]: loadable
//! segments with their permissions, the entry point and the text range.

pub mod elf;
pub mod image;
pub mod raw;

pub use elf::ElfReader;
pub use image::{ImageReader, ProgramImage, Segment};
pub use raw::RawReader;
