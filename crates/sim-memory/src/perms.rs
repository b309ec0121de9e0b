//! Region access permissions

use bitflags::bitflags;
use sim_core::AccessKind;
use std::fmt;

bitflags! {
    /// Region protection flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u8 {
        /// Region is readable
        const READ    = 0b0000_0001;
        /// Region is writable
        const WRITE   = 0b0000_0010;
        /// Region is executable
        const EXECUTE = 0b0000_0100;

        /// Read and write access
        const RW  = Self::READ.bits() | Self::WRITE.bits();
        /// Read and execute access
        const RX  = Self::READ.bits() | Self::EXECUTE.bits();
        /// Read, write, and execute access
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl AccessFlags {
    /// Flag required for an access kind
    pub fn required_for(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Read => Self::READ,
            AccessKind::Write => Self::WRITE,
            AccessKind::Execute => Self::EXECUTE,
        }
    }

    /// Check whether an access kind is permitted
    #[inline]
    pub fn allows(&self, kind: AccessKind) -> bool {
        self.contains(Self::required_for(kind))
    }
}

impl fmt::Display for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.contains(Self::READ) { 'r' } else { '-' };
        let w = if self.contains(Self::WRITE) { 'w' } else { '-' };
        let x = if self.contains(Self::EXECUTE) { 'x' } else { '-' };
        write!(f, "{}{}{}", r, w, x)
    }
}
