//! Byte-level x86-64 encoding fields for the supported instruction subset.

/// Architectural upper bound on the length of one instruction.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// `MOV r/m32|64, imm32` (`C7 /0`).
pub const OPCODE_MOV_RM_IMM32: u8 = 0xC7;
/// `MOV r32|64, imm32|64` (`B8+r`), first opcode of the register-encoded block.
pub const OPCODE_MOV_REG_IMM: u8 = 0xB8;
/// `ADD r/m32|64, r32|64` (`01 /r`).
pub const OPCODE_ADD_RM_REG: u8 = 0x01;
/// `NOP` (`90`).
pub const OPCODE_NOP: u8 = 0x90;

/// Opcode forms recognised by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OpcodeForm {
    /// `C7 /0 id`: register destination from ModRM.rm, 32-bit immediate.
    MovRmImm32,
    /// `B8+r id|io`: register destination from the low opcode bits.
    MovRegImm,
    /// `01 /r`: destination ModRM.rm, source ModRM.reg.
    AddRmReg,
    /// `90`.
    Nop,
}

/// Single source of truth for supported primary opcodes.
///
/// `B8+r` appears once under its base opcode; [`classify_opcode`] folds the
/// register bits.
pub const OPCODE_TABLE: &[(u8, OpcodeForm)] = &[
    (OPCODE_ADD_RM_REG, OpcodeForm::AddRmReg),
    (OPCODE_NOP, OpcodeForm::Nop),
    (OPCODE_MOV_REG_IMM, OpcodeForm::MovRegImm),
    (OPCODE_MOV_RM_IMM32, OpcodeForm::MovRmImm32),
];

/// Returns the opcode form for a primary opcode byte; `None` means unsupported.
#[must_use]
pub fn classify_opcode(opcode: u8) -> Option<OpcodeForm> {
    let key = if opcode & 0xF8 == OPCODE_MOV_REG_IMM {
        OPCODE_MOV_REG_IMM
    } else {
        opcode
    };
    OPCODE_TABLE
        .iter()
        .find_map(|(entry, form)| (*entry == key).then_some(*form))
}

/// Decoded REX prefix (`0100WRXB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rex {
    /// 64-bit operand size.
    pub w: bool,
    /// Extension of ModRM.reg.
    pub r: bool,
    /// Extension of SIB.index (unused by the supported forms).
    pub x: bool,
    /// Extension of ModRM.rm or the opcode register field.
    pub b: bool,
}

impl Rex {
    /// Parses a REX prefix byte; `None` for anything outside `0x40..=0x4F`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        if byte & 0xF0 != 0x40 {
            return None;
        }
        Some(Self {
            w: byte & 0b1000 != 0,
            r: byte & 0b0100 != 0,
            x: byte & 0b0010 != 0,
            b: byte & 0b0001 != 0,
        })
    }

    /// Extends a 3-bit ModRM.reg field to a 4-bit register number.
    #[must_use]
    pub const fn extend_reg(self, field: u8) -> u8 {
        if self.r {
            field | 0b1000
        } else {
            field
        }
    }

    /// Extends a 3-bit ModRM.rm or opcode register field to a 4-bit register number.
    #[must_use]
    pub const fn extend_rm(self, field: u8) -> u8 {
        if self.b {
            field | 0b1000
        } else {
            field
        }
    }
}

/// ModRM addressing mode meaning register-direct operands.
pub const MODRM_MODE_REGISTER: u8 = 0b11;

/// Decoded ModRM byte (`mod:2 reg:3 rm:3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModRm {
    /// Addressing mode.
    pub mode: u8,
    /// Register or opcode-extension field.
    pub reg: u8,
    /// Register or memory operand field.
    pub rm: u8,
}

impl ModRm {
    /// Splits a ModRM byte into its fields.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            mode: byte >> 6,
            reg: (byte >> 3) & 0b111,
            rm: byte & 0b111,
        }
    }

    /// Returns `true` when both operands are registers.
    #[must_use]
    pub const fn is_register_direct(self) -> bool {
        self.mode == MODRM_MODE_REGISTER
    }
}
