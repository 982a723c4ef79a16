//! Instruction-level emulator core for a small x86-64 integer subset.
//!
//! A [`Session`] owns a [`RegisterFile`], a sparse [`MemorySpace`] and a
//! [`HookRegistry`]. [`Session::run`] fetches, decodes, traces and executes
//! instructions from a start address until `RIP` reaches a stop address or a
//! fault ends the run.

/// Register file and session lifecycle state.
pub mod state;
pub use state::{
    Flag, ParseRegisterError, Register, RegisterFile, RegisterWidth, SessionStatus, StopReason,
    GPR_COUNT, RFLAGS_RESERVED_ONE,
};

/// Guest memory regions, permissions and access checks.
pub mod memory;
pub use memory::{
    page_align_up, validate_access, validate_layout, AccessKind, MappedRegion, MemorySpace,
    Permissions, FRAME_SIZE, PAGE_SIZE,
};

/// Fault taxonomy for memory, decode and run failures.
pub mod fault;
pub use fault::{DecodeError, Fault, FaultKind, MemoryError};

/// Opcode tables and prefix/ModRM field parsing.
pub mod encoding;
pub use encoding::{classify_opcode, ModRm, OpcodeForm, Rex, MAX_INSTRUCTION_LEN, OPCODE_TABLE};

/// Instruction decoder.
pub mod decoder;
pub use decoder::{DecodedInstruction, Decoder, Mnemonic, Operand, OperandSize};

/// Instruction semantics.
pub mod execute;
pub use execute::{execute, ArithmeticFlags, ExecuteOutcome, FlagsUpdate};

/// Per-instruction trace hooks.
pub mod hooks;
pub use hooks::{
    HookId, HookRegistry, TextTracer, TraceEvent, TraceHook, TraceRecord,
    DEFAULT_TRACE_REGISTERS,
};

/// Emulation session and run loop.
pub mod session;
pub use session::{RunOutcome, Session, StepOutcome};

/// Host-facing configuration and one-shot runs.
pub mod api;
pub use api::{run_program, ConfigError, EmulatorConfig, RunReport, RunRequest, SetupError};

/// Disassembly listings.
pub mod disasm;
pub use disasm::{disassemble, disassemble_range, DisassemblyRow};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tracing_subscriber as _;
