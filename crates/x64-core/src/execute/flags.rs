//! RFLAGS updates produced by arithmetic instructions.

use crate::{Flag, RegisterFile, RegisterWidth};

/// Status flags computed by an arithmetic instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ArithmeticFlags {
    /// Unsigned carry out of the operand width.
    pub carry: bool,
    /// Low result byte has an even number of set bits.
    pub parity: bool,
    /// Carry out of bit 3.
    pub adjust: bool,
    /// Result is zero.
    pub zero: bool,
    /// Most significant result bit.
    pub sign: bool,
    /// Signed overflow.
    pub overflow: bool,
}

impl ArithmeticFlags {
    /// Adds `lhs + rhs` at `width`, returning the wrapped result and its flags.
    ///
    /// Both operands must already be masked to `width`.
    #[must_use]
    pub const fn add(lhs: u64, rhs: u64, width: RegisterWidth) -> (u64, Self) {
        let mask = width.mask();
        let sign_bit = width.sign_bit();
        let (raw, carry_out) = lhs.overflowing_add(rhs);
        let result = raw & mask;
        let carry = match width {
            RegisterWidth::Qword => carry_out,
            RegisterWidth::Byte | RegisterWidth::Word | RegisterWidth::Dword => raw > mask,
        };
        let flags = Self {
            carry,
            parity: (result & 0xFF).count_ones() & 1 == 0,
            adjust: (lhs ^ rhs ^ result) & 0x10 != 0,
            zero: result == 0,
            sign: result & sign_bit != 0,
            overflow: (lhs ^ result) & (rhs ^ result) & sign_bit != 0,
        };
        (result, flags)
    }

    /// Writes these flags into `RFLAGS`, leaving other bits untouched.
    pub const fn apply(self, registers: &mut RegisterFile) {
        registers.set_flag(Flag::Carry, self.carry);
        registers.set_flag(Flag::Parity, self.parity);
        registers.set_flag(Flag::Adjust, self.adjust);
        registers.set_flag(Flag::Zero, self.zero);
        registers.set_flag(Flag::Sign, self.sign);
        registers.set_flag(Flag::Overflow, self.overflow);
    }
}

/// Describes how RFLAGS should be updated after an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsUpdate {
    /// No change to RFLAGS.
    #[default]
    None,
    /// Replace the arithmetic status flags.
    Arithmetic(ArithmeticFlags),
}

impl FlagsUpdate {
    /// Applies the update to `registers`.
    pub const fn apply(self, registers: &mut RegisterFile) {
        match self {
            Self::None => {}
            Self::Arithmetic(flags) => flags.apply(registers),
        }
    }
}
