//! Region permission bits and access legality checks.

use std::fmt;
use std::ops::BitOr;

use crate::MemoryError;

/// Read/write/execute permission set of a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Permissions(u8);

impl Permissions {
    /// No access.
    pub const NONE: Self = Self(0);
    /// Data reads.
    pub const READ: Self = Self(0b001);
    /// Data writes.
    pub const WRITE: Self = Self(0b010);
    /// Instruction fetch.
    pub const EXEC: Self = Self(0b100);
    /// Read and write.
    pub const READ_WRITE: Self = Self(0b011);
    /// Read and execute.
    pub const READ_EXEC: Self = Self(0b101);
    /// Read, write and execute.
    pub const ALL: Self = Self(0b111);

    /// Builds a permission set from raw bits, ignoring unknown bits.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Returns `true` when every bit of `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when this set grants `kind`.
    #[must_use]
    pub const fn allows(self, kind: AccessKind) -> bool {
        self.contains(kind.required())
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |perm: Self, ch: char| if self.contains(perm) { ch } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READ, 'r'),
            flag(Self::WRITE, 'w'),
            flag(Self::EXEC, 'x')
        )
    }
}

/// Kind of memory access being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Data read.
    Read,
    /// Data write.
    Write,
    /// Instruction fetch.
    Execute,
}

impl AccessKind {
    /// Permission bit an access of this kind requires.
    #[must_use]
    pub const fn required(self) -> Permissions {
        match self {
            Self::Read => Permissions::READ,
            Self::Write => Permissions::WRITE,
            Self::Execute => Permissions::EXEC,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
        })
    }
}

/// Validates that a region with `granted` permissions admits `kind` at `address`.
///
/// # Errors
///
/// Returns [`MemoryError::Permission`] when the permission bit is missing.
pub const fn validate_access(
    granted: Permissions,
    kind: AccessKind,
    address: u64,
) -> Result<(), MemoryError> {
    if granted.allows(kind) {
        Ok(())
    } else {
        Err(MemoryError::Permission {
            address,
            kind,
            granted,
        })
    }
}
