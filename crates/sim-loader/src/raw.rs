//! Flat binary reader

use crate::image::{ImageReader, ProgramImage, Segment};
use sim_core::LoaderError;
use sim_memory::AccessFlags;

/// Reader placing the whole file at a fixed base address
#[derive(Debug, Clone, Copy)]
pub struct RawReader {
    pub base: u64,
    /// Entry point; defaults to `base`
    pub entry: Option<u64>,
    pub perms: AccessFlags,
}

impl RawReader {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            entry: None,
            perms: AccessFlags::RWX,
        }
    }

    pub fn with_entry(mut self, entry: u64) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn with_perms(mut self, perms: AccessFlags) -> Self {
        self.perms = perms;
        self
    }
}

impl ImageReader for RawReader {
    fn name(&self) -> &str {
        "raw"
    }

    fn parse(&self, bytes: &[u8]) -> Result<ProgramImage, LoaderError> {
        if bytes.is_empty() {
            return Err(LoaderError::InvalidImage("empty image".to_string()));
        }

        let len = bytes.len() as u64;
        let end = self
            .base
            .checked_add(len - 1)
            .ok_or_else(|| LoaderError::InvalidImage(format!("image does not fit at 0x{:x}", self.base)))?;

        Ok(ProgramImage {
            format: "raw".to_string(),
            entry: self.entry.unwrap_or(self.base),
            segments: vec![Segment {
                name: "raw".to_string(),
                addr: self.base,
                data: bytes.to_vec(),
                mem_size: len,
                perms: self.perms,
            }],
            text: Some(self.base..end.saturating_add(1)),
            byte_order: None,
            machine: None,
        })
    }
}
