//! Architectural CPU state: the register file and the session lifecycle.

/// Register names, aliasing views and the backing register file.
pub mod registers;
/// Session status state machine.
pub mod run_state;

pub use registers::{
    Flag, ParseRegisterError, Register, RegisterFile, RegisterWidth, GPR_COUNT,
    RFLAGS_RESERVED_ONE,
};
pub use run_state::{SessionStatus, StopReason};
