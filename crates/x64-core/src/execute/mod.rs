//! Instruction semantics.
//!
//! Execution applies one decoded instruction to the register file. It never
//! touches `RIP`: the emulation loop advances it by the instruction length
//! unless the outcome names an explicit target.

mod flags;
mod helpers;

pub use flags::{ArithmeticFlags, FlagsUpdate};
pub use helpers::{read_operand, write_destination};

use crate::decoder::{DecodedInstruction, Mnemonic};
use crate::RegisterFile;

/// Control-flow result of executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExecuteOutcome {
    /// Continue with the next sequential instruction.
    FallThrough,
    /// Continue at an explicit target address.
    Jump(u64),
}

/// Executes `instruction` against `registers`.
///
/// * `mov` writes the immediate to the destination view; 32-bit
///   destinations zero-extend and no flags change.
/// * `add` wraps at the operand width and replaces CF, PF, AF, ZF, SF
///   and OF.
/// * `nop` changes nothing.
///
/// Instructions whose destination is not a register leave state unchanged.
pub fn execute(instruction: &DecodedInstruction, registers: &mut RegisterFile) -> ExecuteOutcome {
    let (Some(destination), Some(source)) = (instruction.destination, instruction.source) else {
        return ExecuteOutcome::FallThrough;
    };

    let width = instruction.size.width();
    let (result, update) = match instruction.mnemonic {
        Mnemonic::Nop => return ExecuteOutcome::FallThrough,
        Mnemonic::Mov => (read_operand(registers, source) & width.mask(), FlagsUpdate::None),
        Mnemonic::Add => {
            let lhs = read_operand(registers, destination) & width.mask();
            let rhs = read_operand(registers, source) & width.mask();
            let (sum, flags) = ArithmeticFlags::add(lhs, rhs, width);
            (sum, FlagsUpdate::Arithmetic(flags))
        }
    };

    if write_destination(registers, destination, result) {
        update.apply(registers);
    }
    ExecuteOutcome::FallThrough
}
