use crate::Fault;

/// Reason a run stopped without faulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StopReason {
    /// `RIP` reached or passed the requested stop address.
    ReachedStop,
    /// The configured instruction limit was retired.
    InstructionLimit,
}

/// Lifecycle of an emulation session.
///
/// `Ready -> Running -> {Halted | Faulted}`; only [`crate::Session::reset`]
/// leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SessionStatus {
    /// Configured and not yet started.
    #[default]
    Ready,
    /// Inside `run` or between `step` calls.
    Running,
    /// Stopped cleanly.
    Halted(StopReason),
    /// Stopped on a fault; state is as of the last retired instruction.
    Faulted(Fault),
}

impl SessionStatus {
    /// Returns the fault, if this status is `Faulted`.
    #[must_use]
    pub const fn fault(self) -> Option<Fault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            Self::Ready | Self::Running | Self::Halted(_) => None,
        }
    }

    /// Returns `true` for `Halted` and `Faulted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Halted(_) | Self::Faulted(_))
    }
}
