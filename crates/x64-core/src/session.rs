//! Emulation session and the fetch/decode/trace/execute loop.

use crate::encoding::MAX_INSTRUCTION_LEN;
use crate::execute::{execute, ExecuteOutcome};
use crate::{
    ConfigError, DecodeError, DecodedInstruction, Decoder, EmulatorConfig, Fault, FaultKind,
    HookRegistry, MemorySpace, RegisterFile, SessionStatus, StopReason,
};

/// Result of [`Session::run`]: the stop reason, or the fault that ended the run.
pub type RunOutcome = Result<StopReason, Fault>;

/// One retired instruction, as reported by [`Session::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Address the instruction was fetched from.
    pub address: u64,
    /// The retired instruction.
    pub instruction: DecodedInstruction,
    /// `RIP` after retirement.
    pub next_rip: u64,
}

/// Owns all guest state for one emulation.
///
/// Sessions share no state with each other.
#[derive(Debug)]
pub struct Session {
    registers: RegisterFile,
    memory: MemorySpace,
    hooks: HookRegistry,
    config: EmulatorConfig,
    status: SessionStatus,
    retired: u64,
}

impl Session {
    /// Creates a session with empty memory and zeroed registers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` is invalid.
    pub fn new(config: EmulatorConfig) -> Result<Self, ConfigError> {
        Self::with_hooks(config, HookRegistry::new())
    }

    /// Creates a session that starts with the given hooks.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` is invalid.
    pub fn with_hooks(config: EmulatorConfig, hooks: HookRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let memory = MemorySpace::with_page_size(config.page_size)?;
        Ok(Self {
            registers: RegisterFile::default(),
            memory,
            hooks,
            config,
            status: SessionStatus::Ready,
            retired: 0,
        })
    }

    /// Register state.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Mutable register state, for host-side setup.
    pub const fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    /// Guest memory.
    #[must_use]
    pub const fn memory(&self) -> &MemorySpace {
        &self.memory
    }

    /// Mutable guest memory, for mapping and loading.
    pub const fn memory_mut(&mut self) -> &mut MemorySpace {
        &mut self.memory
    }

    /// Registered trace hooks.
    #[must_use]
    pub const fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Mutable hook registry.
    pub const fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Configuration the session was built with.
    #[must_use]
    pub const fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// Instructions retired since creation or the last reset.
    #[must_use]
    pub const fn instructions_retired(&self) -> u64 {
        self.retired
    }

    /// Runs from `start` while `RIP < stop`.
    ///
    /// Each iteration fetches and decodes at `RIP`, invokes the hooks,
    /// executes and advances `RIP`. The run halts once `RIP >= stop` or the
    /// configured instruction limit is reached. A halted session may be run
    /// again; a faulted one returns its fault until [`Session::reset`].
    ///
    /// # Errors
    ///
    /// Returns the [`Fault`] raised by a fetch or decode. Registers and memory
    /// are left as of the last retired instruction.
    pub fn run(&mut self, start: u64, stop: u64) -> RunOutcome {
        if let SessionStatus::Faulted(fault) = self.status {
            return Err(fault);
        }
        self.registers.set_rip(start);
        self.status = SessionStatus::Running;
        tracing::debug!("run started at {start:#x}, stop at {stop:#x}");

        let mut executed = 0_u64;
        let reason = loop {
            if self.registers.rip() >= stop {
                break StopReason::ReachedStop;
            }
            if self
                .config
                .max_instructions
                .is_some_and(|limit| executed >= limit)
            {
                break StopReason::InstructionLimit;
            }
            if let Err(fault) = self.retire_one() {
                return Err(self.latch(fault));
            }
            executed += 1;
        };

        self.status = SessionStatus::Halted(reason);
        tracing::info!(
            "halted ({reason:?}) at {:#x} after {executed} instructions",
            self.registers.rip()
        );
        Ok(reason)
    }

    /// Retires exactly one instruction at the current `RIP`, ignoring any stop address.
    ///
    /// # Errors
    ///
    /// Returns the [`Fault`] raised by the fetch or decode, or the fault a
    /// previous call latched.
    pub fn step(&mut self) -> Result<StepOutcome, Fault> {
        if let SessionStatus::Faulted(fault) = self.status {
            return Err(fault);
        }
        self.status = SessionStatus::Running;
        let address = self.registers.rip();
        match self.retire_one() {
            Ok(instruction) => Ok(StepOutcome {
                address,
                instruction,
                next_rip: self.registers.rip(),
            }),
            Err(fault) => Err(self.latch(fault)),
        }
    }

    /// Zeroes the registers and returns to `Ready`. Memory and hooks are kept.
    pub fn reset(&mut self) {
        self.registers = RegisterFile::default();
        self.status = SessionStatus::Ready;
        self.retired = 0;
    }

    fn retire_one(&mut self) -> Result<DecodedInstruction, Fault> {
        let rip = self.registers.rip();
        let instruction = self
            .fetch_decode(rip)
            .map_err(|kind| Fault { rip, kind })?;

        self.hooks.invoke_all(rip, &instruction, &self.registers);

        let next = match execute(&instruction, &mut self.registers) {
            ExecuteOutcome::FallThrough => rip.wrapping_add(u64::from(instruction.length)),
            ExecuteOutcome::Jump(target) => target,
        };
        self.registers.set_rip(next);
        self.retired += 1;
        tracing::trace!("{rip:#018x}: {instruction}");
        Ok(instruction)
    }

    fn fetch_decode(&self, rip: u64) -> Result<DecodedInstruction, FaultKind> {
        let window = self.memory.fetch_window(rip, MAX_INSTRUCTION_LEN)?;
        match Decoder::decode(&window) {
            Err(truncated @ DecodeError::Truncated { required, .. }) => {
                // The window stopped at the region end; surface the real fetch fault.
                self.memory.fetch_bytes(rip, required)?;
                Err(truncated.into())
            }
            decoded => decoded.map_err(FaultKind::from),
        }
    }

    fn latch(&mut self, fault: Fault) -> Fault {
        self.status = SessionStatus::Faulted(fault);
        tracing::warn!("{fault}");
        fault
    }
}
