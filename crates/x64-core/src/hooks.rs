//! Per-instruction trace hooks.
//!
//! Hooks observe the machine immediately before each instruction executes.
//! They receive shared references only and cannot change session state.

use std::fmt;
use std::io::Write;
use std::ops::RangeInclusive;

use crate::{DecodedInstruction, Register, RegisterFile};

/// Read-only view handed to hooks before an instruction executes.
#[derive(Debug, Clone, Copy)]
pub struct TraceEvent<'a> {
    /// Address of the instruction about to execute.
    pub address: u64,
    /// The decoded instruction at `address`.
    pub instruction: &'a DecodedInstruction,
    /// Register state before the instruction executes.
    pub registers: &'a RegisterFile,
}

impl TraceEvent<'_> {
    /// Reads one register from the pre-execution state.
    #[must_use]
    pub const fn read(&self, register: Register) -> u64 {
        self.registers.read(register)
    }

    /// Captures the address and the selected registers as an owned record.
    #[must_use]
    pub fn record(&self, registers: &[Register]) -> TraceRecord {
        TraceRecord {
            address: self.address,
            registers: registers
                .iter()
                .map(|reg| (*reg, self.read(*reg)))
                .collect(),
        }
    }
}

/// Owned snapshot of one trace event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TraceRecord {
    /// Instruction address.
    pub address: u64,
    /// Captured registers, in the order requested.
    pub registers: Vec<(Register, u64)>,
}

impl TraceRecord {
    /// Value captured for `register`, if it was requested.
    #[must_use]
    pub fn get(&self, register: Register) -> Option<u64> {
        self.registers
            .iter()
            .find_map(|(reg, value)| (*reg == register).then_some(*value))
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[!] Executing instruction at {:#018x}", self.address)?;
        for (reg, value) in &self.registers {
            write!(f, " | {reg} = {value}")?;
        }
        Ok(())
    }
}

/// Observer invoked before every instruction.
pub trait TraceHook {
    /// Called with the pre-execution state of one instruction.
    fn on_instruction(&mut self, event: &TraceEvent<'_>);
}

impl<F> TraceHook for F
where
    F: FnMut(&TraceEvent<'_>),
{
    fn on_instruction(&mut self, event: &TraceEvent<'_>) {
        self(event);
    }
}

/// Handle returned by [`HookRegistry::register`], used to remove a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

struct HookEntry {
    id: HookId,
    range: Option<RangeInclusive<u64>>,
    hook: Box<dyn TraceHook>,
}

/// Ordered set of trace hooks.
///
/// Hooks fire in registration order. A hook registered with an address
/// range only fires for instructions whose address lies inside it.
#[derive(Default)]
pub struct HookRegistry {
    entries: Vec<HookEntry>,
    next_id: u64,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| (entry.id, entry.range.clone())))
            .finish()
    }
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook that fires for every instruction.
    pub fn register(&mut self, hook: impl TraceHook + 'static) -> HookId {
        self.push(None, Box::new(hook))
    }

    /// Appends a hook that fires only for addresses in `range` (inclusive).
    pub fn register_range(
        &mut self,
        range: RangeInclusive<u64>,
        hook: impl TraceHook + 'static,
    ) -> HookId {
        self.push(Some(range), Box::new(hook))
    }

    /// Removes a hook. Returns `false` when `id` is not registered.
    pub fn unregister(&mut self, id: HookId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Calls every applicable hook, in registration order.
    pub fn invoke_all(
        &mut self,
        address: u64,
        instruction: &DecodedInstruction,
        registers: &RegisterFile,
    ) {
        let event = TraceEvent {
            address,
            instruction,
            registers,
        };
        for entry in &mut self.entries {
            if entry
                .range
                .as_ref()
                .is_none_or(|range| range.contains(&address))
            {
                entry.hook.on_instruction(&event);
            }
        }
    }

    fn push(&mut self, range: Option<RangeInclusive<u64>>, hook: Box<dyn TraceHook>) -> HookId {
        let id = HookId(self.next_id);
        self.next_id += 1;
        self.entries.push(HookEntry { id, range, hook });
        id
    }
}

/// Registers printed by [`TextTracer::new`].
pub const DEFAULT_TRACE_REGISTERS: [Register; 3] = [Register::Rax, Register::Rbx, Register::Rcx];

/// Hook that writes one line per instruction:
/// `[!] Executing instruction at 0x0000000008000000 | rax = 0 | rbx = 0 | rcx = 3`.
///
/// Write failures are logged and otherwise ignored so tracing never aborts a run.
#[derive(Debug)]
pub struct TextTracer<W> {
    writer: W,
    registers: Vec<Register>,
}

impl<W: Write> TextTracer<W> {
    /// Traces `rax`, `rbx` and `rcx`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self::with_registers(writer, &DEFAULT_TRACE_REGISTERS)
    }

    /// Traces the given registers, in order.
    #[must_use]
    pub fn with_registers(writer: W, registers: &[Register]) -> Self {
        Self {
            writer,
            registers: registers.to_vec(),
        }
    }
}

impl<W: Write> TraceHook for TextTracer<W> {
    fn on_instruction(&mut self, event: &TraceEvent<'_>) {
        let record = event.record(&self.registers);
        if let Err(err) = writeln!(self.writer, "{record}") {
            tracing::warn!("trace write failed at {:#x}: {err}", event.address);
        }
    }
}
