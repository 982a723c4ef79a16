use thiserror::Error;

use crate::memory::{AccessKind, Permissions};

/// Memory-space failures raised by mapping calls and by guest or host accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryError {
    /// Requested range intersects an already mapped region.
    #[error("range {base:#x}+{size:#x} overlaps region at {existing:#x}")]
    Overlap {
        /// Requested base address.
        base: u64,
        /// Requested size in bytes.
        size: u64,
        /// Base address of the region that is already mapped there.
        existing: u64,
    },
    /// Size is zero, not a page multiple, or runs past the top of the address space.
    #[error("invalid region size {size:#x}")]
    InvalidSize {
        /// Rejected size in bytes.
        size: u64,
    },
    /// Base address is not page aligned.
    #[error("region base {base:#x} is not page aligned")]
    UnalignedBase {
        /// Rejected base address.
        base: u64,
    },
    /// Access touched an address outside every mapped region.
    #[error("unmapped memory at {address:#018x}")]
    Unmapped {
        /// First unmapped byte of the access.
        address: u64,
    },
    /// Containing region does not grant the permission the access needs.
    #[error("{kind} access denied at {address:#018x} (region is {granted})")]
    Permission {
        /// First byte of the rejected access.
        address: u64,
        /// Access kind that was attempted.
        kind: AccessKind,
        /// Permissions of the containing region.
        granted: Permissions,
    },
    /// A host-side copy of guest bytes could not be allocated.
    #[error("cannot allocate {length:#x} bytes to copy guest memory")]
    HostAllocation {
        /// Requested copy length in bytes.
        length: u64,
    },
    /// `unmap`/`protect` named a range that is not exactly one mapped region.
    #[error("no region mapped exactly at {base:#x}+{size:#x}")]
    NotMapped {
        /// Requested base address.
        base: u64,
        /// Requested size in bytes.
        size: u64,
    },
}

/// Decoder rejections for byte sequences outside the supported subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DecodeError {
    /// Primary opcode byte is not part of the supported subset.
    #[error("unsupported opcode {opcode:#04x}")]
    UnsupportedOpcode {
        /// Offending opcode byte.
        opcode: u8,
    },
    /// Opcode is known but its ModRM operand form is not supported.
    #[error("unsupported operand form {modrm:#04x} for opcode {opcode:#04x}")]
    UnsupportedOperand {
        /// Opcode byte.
        opcode: u8,
        /// Rejected ModRM byte.
        modrm: u8,
    },
    /// Byte window ended before the instruction did.
    #[error("truncated instruction: need {required} bytes, have {available}")]
    Truncated {
        /// Total encoded length the instruction needs.
        required: usize,
        /// Bytes that were available.
        available: usize,
    },
}

/// Reason carried by a [`Fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultKind {
    /// Instruction fetch or data access failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Fetched bytes are not a supported instruction.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Terminal emulation fault. Always records the instruction address it hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("fault at rip {rip:#018x}: {kind}")]
pub struct Fault {
    /// `RIP` of the instruction that could not be fetched, decoded or executed.
    pub rip: u64,
    /// Underlying cause.
    pub kind: FaultKind,
}

impl Fault {
    /// Builds a fault for `rip` from any memory or decode error.
    #[must_use]
    pub fn new(rip: u64, kind: impl Into<FaultKind>) -> Self {
        Self {
            rip,
            kind: kind.into(),
        }
    }

    /// Returns the memory error, if this fault is a memory fault.
    #[must_use]
    pub const fn memory(&self) -> Option<MemoryError> {
        match self.kind {
            FaultKind::Memory(err) => Some(err),
            FaultKind::Decode(_) => None,
        }
    }

    /// Returns the decode error, if this fault is a decode fault.
    #[must_use]
    pub const fn decode(&self) -> Option<DecodeError> {
        match self.kind {
            FaultKind::Decode(err) => Some(err),
            FaultKind::Memory(_) => None,
        }
    }
}
