//! Host-facing configuration and the one-shot run entry point.

use thiserror::Error;

use crate::memory::page_align_up;
use crate::{
    HookRegistry, MemoryError, Permissions, Register, RegisterFile, Session, SessionStatus,
    PAGE_SIZE,
};

/// Top-level configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EmulatorConfig {
    /// Mapping granularity in bytes; a non-zero power of two.
    pub page_size: u64,
    /// Stop a run after this many retired instructions.
    pub max_instructions: Option<u64>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_instructions: None,
        }
    }
}

impl EmulatorConfig {
    /// Checks the configuration without building a session.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPageSize`] for a zero or non-power-of-two page size.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size.is_power_of_two() {
            Ok(())
        } else {
            Err(ConfigError::InvalidPageSize {
                page_size: self.page_size,
            })
        }
    }
}

/// Invalid [`EmulatorConfig`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    /// Page size is zero or not a power of two.
    #[error("page size {page_size:#x} is not a power of two")]
    InvalidPageSize {
        /// Rejected page size.
        page_size: u64,
    },
}

/// Failures while preparing a [`RunRequest`], before any instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SetupError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The code region could not be mapped or loaded.
    #[error("cannot place code: {0}")]
    Memory(#[from] MemoryError),
}

/// Everything needed to run one flat code blob.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunRequest {
    /// Machine code to load.
    pub code: Vec<u8>,
    /// Page-aligned address the code is mapped and loaded at.
    pub load_address: u64,
    /// Register values applied before the run, in order.
    pub initial_registers: Vec<(Register, u64)>,
    /// Stop address; `None` means the end of `code`.
    pub stop_address: Option<u64>,
    /// Permissions of the code region.
    pub permissions: Permissions,
}

impl RunRequest {
    /// Request to run `code` at `load_address` with a fully permissive region.
    #[must_use]
    pub fn new(load_address: u64, code: impl Into<Vec<u8>>) -> Self {
        Self {
            code: code.into(),
            load_address,
            initial_registers: Vec::new(),
            stop_address: None,
            permissions: Permissions::ALL,
        }
    }

    /// Adds an initial register value.
    #[must_use]
    pub fn with_register(mut self, register: Register, value: u64) -> Self {
        self.initial_registers.push((register, value));
        self
    }

    /// Overrides the stop address.
    #[must_use]
    pub const fn with_stop_address(mut self, stop: u64) -> Self {
        self.stop_address = Some(stop);
        self
    }

    /// Overrides the code region permissions.
    #[must_use]
    pub const fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Effective stop address.
    #[must_use]
    pub fn stop(&self) -> u64 {
        self.stop_address.unwrap_or_else(|| {
            let len = u64::try_from(self.code.len()).unwrap_or(u64::MAX);
            self.load_address.saturating_add(len)
        })
    }
}

/// Final state of a [`run_program`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunReport {
    /// Terminal session status (`Halted` or `Faulted`).
    pub status: SessionStatus,
    /// Register file at the end of the run.
    pub registers: RegisterFile,
    /// Instructions retired.
    pub instructions: u64,
}

/// Maps, loads and runs `request` in a fresh session.
///
/// The code region covers `code` rounded up to whole pages (at least one
/// page). Faults raised while running are reported in
/// [`RunReport::status`], not as an `Err`.
///
/// # Errors
///
/// Returns [`SetupError`] when the configuration is invalid or the code
/// cannot be mapped and loaded.
pub fn run_program(
    request: &RunRequest,
    config: EmulatorConfig,
    hooks: HookRegistry,
) -> Result<RunReport, SetupError> {
    let page_size = config.page_size;
    let mut session = Session::with_hooks(config, hooks)?;

    let len = u64::try_from(request.code.len()).unwrap_or(u64::MAX);
    let size = page_align_up(len, page_size)
        .ok_or(MemoryError::InvalidSize { size: len })?
        .max(page_size);
    session
        .memory_mut()
        .map(request.load_address, size, request.permissions)?;
    session
        .memory_mut()
        .load_code(request.load_address, &request.code)?;
    for (register, value) in &request.initial_registers {
        session.registers_mut().write(*register, *value);
    }

    // A fault is already latched in the session status.
    let _ = session.run(request.load_address, request.stop());

    Ok(RunReport {
        status: session.status(),
        registers: session.registers().clone(),
        instructions: session.instructions_retired(),
    })
}
