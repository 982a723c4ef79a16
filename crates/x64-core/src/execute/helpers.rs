//! Operand access helpers for instruction execution.

use crate::decoder::Operand;
use crate::RegisterFile;

/// Reads an operand's value; immediates are returned as decoded.
#[must_use]
pub const fn read_operand(registers: &RegisterFile, operand: Operand) -> u64 {
    match operand {
        Operand::Register(reg) => registers.read(reg),
        Operand::Immediate(value) => value,
    }
}

/// Writes `value` to a register destination.
///
/// Returns `false` when the destination is not writable (an immediate).
pub const fn write_destination(registers: &mut RegisterFile, operand: Operand, value: u64) -> bool {
    match operand {
        Operand::Register(reg) => {
            registers.write(reg, value);
            true
        }
        Operand::Immediate(_) => false,
    }
}
