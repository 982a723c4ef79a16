//! Linear-sweep disassembly of the supported instruction subset.

use std::fmt;

use crate::{DecodeError, Decoder, MemoryError, MemorySpace};

/// A single disassembled instruction row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DisassemblyRow {
    /// Address of the first byte.
    pub address: u64,
    /// Encoded bytes of the instruction (one byte for illegal rows).
    pub bytes: Vec<u8>,
    /// Intel-syntax text, e.g. `mov rax, 0x1`, or `.byte 0x0f` when illegal.
    pub text: String,
    /// Whether the bytes did not decode.
    pub is_illegal: bool,
}

impl fmt::Display for DisassemblyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}  ", self.address)?;
        let hex: Vec<String> = self.bytes.iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "{:<30}  {}", hex.join(" "), self.text)
    }
}

/// Disassembles `bytes` as if loaded at `base_address`.
///
/// Undecodable bytes become one-byte `.byte` rows and the sweep resumes at
/// the next byte. A trailing partial instruction is emitted the same way.
#[must_use]
pub fn disassemble(bytes: &[u8], base_address: u64) -> Vec<DisassemblyRow> {
    let mut rows = Vec::new();
    let mut offset = 0;
    let mut address = base_address;

    while offset < bytes.len() {
        let window = &bytes[offset..];
        let row = match Decoder::decode(window) {
            Ok(instruction) => DisassemblyRow {
                address,
                bytes: window[..instruction.len()].to_vec(),
                text: instruction.to_string(),
                is_illegal: false,
            },
            Err(DecodeError::UnsupportedOpcode { .. }
            | DecodeError::UnsupportedOperand { .. }
            | DecodeError::Truncated { .. }) => DisassemblyRow {
                address,
                bytes: vec![window[0]],
                text: format!(".byte {:#04x}", window[0]),
                is_illegal: true,
            },
        };
        offset += row.bytes.len();
        address = address.wrapping_add(row.bytes.len() as u64);
        rows.push(row);
    }

    rows
}

/// Disassembles executable guest memory in `[start, end)`.
///
/// # Errors
///
/// Returns the [`MemoryError`] of an instruction fetch over the range.
pub fn disassemble_range(
    memory: &MemorySpace,
    start: u64,
    end: u64,
) -> Result<Vec<DisassemblyRow>, MemoryError> {
    let len = usize::try_from(end.saturating_sub(start))
        .map_err(|_| MemoryError::Unmapped { address: start })?;
    let bytes = memory.fetch_bytes(start, len)?;
    Ok(disassemble(&bytes, start))
}
