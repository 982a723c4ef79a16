//! Instruction decoder for the supported x86-64 integer subset.
//!
//! Decoding is pure: it reads only the bytes of the instruction it returns
//! and never touches guest state.

use std::fmt;

use crate::encoding::{classify_opcode, ModRm, OpcodeForm, Rex};
use crate::{DecodeError, Register, RegisterWidth};

/// Operation performed by a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Mnemonic {
    /// Copy the source into the destination.
    Mov,
    /// Integer addition into the destination.
    Add,
    /// No operation.
    Nop,
}

impl Mnemonic {
    /// Lowercase assembler mnemonic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mov => "mov",
            Self::Add => "add",
            Self::Nop => "nop",
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand width selected by `REX.W`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OperandSize {
    /// 32-bit operands; register writes zero-extend.
    Dword,
    /// 64-bit operands.
    Qword,
}

impl OperandSize {
    /// Register view width matching this operand size.
    #[must_use]
    pub const fn width(self) -> RegisterWidth {
        match self {
            Self::Dword => RegisterWidth::Dword,
            Self::Qword => RegisterWidth::Qword,
        }
    }

    const fn from_rex(rex: Rex) -> Self {
        if rex.w {
            Self::Qword
        } else {
            Self::Dword
        }
    }
}

/// Instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Operand {
    /// Register view of the instruction's operand width.
    Register(Register),
    /// Immediate already extended to the operand width.
    Immediate(u64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(reg) => write!(f, "{reg}"),
            Self::Immediate(value) => write!(f, "{value:#x}"),
        }
    }
}

/// Fully decoded instruction, immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DecodedInstruction {
    /// Operation.
    pub mnemonic: Mnemonic,
    /// Encoding the instruction was decoded from.
    pub form: OpcodeForm,
    /// Operand width.
    pub size: OperandSize,
    /// Destination operand, absent for `nop`.
    pub destination: Option<Operand>,
    /// Source operand, absent for `nop`.
    pub source: Option<Operand>,
    /// Encoded length in bytes, prefixes included.
    pub length: u8,
}

impl DecodedInstruction {
    /// Operands in Intel order (destination first).
    pub fn operands(&self) -> impl Iterator<Item = Operand> {
        self.destination.into_iter().chain(self.source)
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.length)
    }

    /// Always `false`; every instruction occupies at least one byte.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic.as_str())?;
        for (index, operand) in self.operands().enumerate() {
            let sep = if index == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}

/// Stateless decoder over a byte window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder;

impl Decoder {
    /// Decodes one instruction from the start of `bytes`.
    ///
    /// Trailing bytes past the instruction are ignored.
    ///
    /// # Errors
    ///
    /// * [`DecodeError::UnsupportedOpcode`] for opcodes outside the subset
    ///   (including legacy prefixes and a second REX prefix).
    /// * [`DecodeError::UnsupportedOperand`] for memory ModRM forms or a
    ///   non-zero `/reg` extension on `C7`.
    /// * [`DecodeError::Truncated`] when `bytes` ends inside the instruction.
    pub fn decode(bytes: &[u8]) -> Result<DecodedInstruction, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let first = cursor.byte()?;
        let (rex, opcode) = match Rex::from_byte(first) {
            Some(rex) => (rex, cursor.byte()?),
            None => (Rex::default(), first),
        };
        let form = classify_opcode(opcode).ok_or(DecodeError::UnsupportedOpcode { opcode })?;
        let size = OperandSize::from_rex(rex);

        let (mnemonic, destination, source) = match form {
            OpcodeForm::Nop => {
                // 90 with REX.B is `xchg r8, rax`.
                if rex.b {
                    return Err(DecodeError::UnsupportedOpcode { opcode });
                }
                (Mnemonic::Nop, None, None)
            }
            OpcodeForm::MovRmImm32 => {
                let modrm_byte = cursor.byte()?;
                let modrm = ModRm::from_byte(modrm_byte);
                if !modrm.is_register_direct() || modrm.reg != 0 {
                    return Err(DecodeError::UnsupportedOperand {
                        opcode,
                        modrm: modrm_byte,
                    });
                }
                let imm = cursor.imm32()?;
                let value = match size {
                    OperandSize::Qword => sign_extend_imm32(imm),
                    OperandSize::Dword => u64::from(imm),
                };
                (
                    Mnemonic::Mov,
                    Some(gpr(rex.extend_rm(modrm.rm), size)),
                    Some(Operand::Immediate(value)),
                )
            }
            OpcodeForm::MovRegImm => {
                let value = match size {
                    OperandSize::Qword => cursor.imm64()?,
                    OperandSize::Dword => u64::from(cursor.imm32()?),
                };
                (
                    Mnemonic::Mov,
                    Some(gpr(rex.extend_rm(opcode & 0b111), size)),
                    Some(Operand::Immediate(value)),
                )
            }
            OpcodeForm::AddRmReg => {
                let modrm_byte = cursor.byte()?;
                let modrm = ModRm::from_byte(modrm_byte);
                if !modrm.is_register_direct() {
                    return Err(DecodeError::UnsupportedOperand {
                        opcode,
                        modrm: modrm_byte,
                    });
                }
                (
                    Mnemonic::Add,
                    Some(gpr(rex.extend_rm(modrm.rm), size)),
                    Some(gpr(rex.extend_reg(modrm.reg), size)),
                )
            }
        };

        Ok(DecodedInstruction {
            mnemonic,
            form,
            size,
            destination,
            source,
            length: cursor.consumed(),
        })
    }
}

fn sign_extend_imm32(imm: u32) -> u64 {
    let value = u64::from(imm);
    if imm & 0x8000_0000 == 0 {
        value
    } else {
        value | 0xFFFF_FFFF_0000_0000
    }
}

fn gpr(index: u8, size: OperandSize) -> Operand {
    // Four-bit register numbers always resolve at dword/qword width.
    Operand::Register(Register::from_gpr_index(index, size.width()).unwrap_or(Register::Rax))
}

/// Bounds-checked reader that reports how long the instruction must be.
struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.position + N;
        let chunk = self
            .bytes
            .get(self.position..end)
            .ok_or(DecodeError::Truncated {
                required: end,
                available: self.bytes.len(),
            })?;
        self.position = end;
        let mut out = [0; N];
        out.copy_from_slice(chunk);
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        self.take::<1>().map(|[byte]| byte)
    }

    fn imm32(&mut self) -> Result<u32, DecodeError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn imm64(&mut self) -> Result<u64, DecodeError> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn consumed(&self) -> u8 {
        // Supported encodings are at most 10 bytes long.
        self.position as u8
    }
}
