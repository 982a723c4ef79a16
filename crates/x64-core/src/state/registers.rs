use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of architecturally visible general-purpose registers (`RAX..R15`).
pub const GPR_COUNT: usize = 16;
/// Backing storage slots: 16 GPRs, `RIP` and `RFLAGS`.
const SLOT_COUNT: usize = GPR_COUNT + 2;
const SLOT_RIP: u8 = 16;
const SLOT_RFLAGS: u8 = 17;

/// `RFLAGS` bit 1 is reserved and always reads as one.
pub const RFLAGS_RESERVED_ONE: u64 = 1 << 1;

/// Bit width of a register view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegisterWidth {
    /// 8-bit view.
    Byte,
    /// 16-bit view.
    Word,
    /// 32-bit view.
    Dword,
    /// Full 64-bit register.
    Qword,
}

impl RegisterWidth {
    /// Returns the width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::Word => 16,
            Self::Dword => 32,
            Self::Qword => 64,
        }
    }

    /// Returns a mask covering the low `bits()` bits.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Dword => 0xFFFF_FFFF,
            Self::Qword => u64::MAX,
        }
    }

    /// Returns the most significant bit of a value of this width.
    #[must_use]
    pub const fn sign_bit(self) -> u64 {
        1 << (self.bits() - 1)
    }
}

/// Width-tagged view over one backing 64-bit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegisterView {
    slot: u8,
    width: RegisterWidth,
    high_byte: bool,
}

macro_rules! register_table {
    ($($variant:ident => $name:literal, $slot:expr, $width:ident, $high:literal;)*) => {
        /// Architectural register name, including every sub-register alias.
        ///
        /// General-purpose registers are listed in hardware encoding order
        /// (`RAX, RCX, RDX, RBX, RSP, RBP, RSI, RDI, R8..R15`).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
        pub enum Register {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )*
        }

        impl Register {
            /// Every register name, 64-bit registers first.
            pub const ALL: &'static [Self] = &[$(Self::$variant),*];

            /// Lowercase assembler name of the register.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            const fn view(self) -> RegisterView {
                match self {
                    $(Self::$variant => RegisterView {
                        slot: $slot,
                        width: RegisterWidth::$width,
                        high_byte: $high,
                    },)*
                }
            }
        }
    };
}

register_table! {
    Rax => "rax", 0, Qword, false;
    Rcx => "rcx", 1, Qword, false;
    Rdx => "rdx", 2, Qword, false;
    Rbx => "rbx", 3, Qword, false;
    Rsp => "rsp", 4, Qword, false;
    Rbp => "rbp", 5, Qword, false;
    Rsi => "rsi", 6, Qword, false;
    Rdi => "rdi", 7, Qword, false;
    R8 => "r8", 8, Qword, false;
    R9 => "r9", 9, Qword, false;
    R10 => "r10", 10, Qword, false;
    R11 => "r11", 11, Qword, false;
    R12 => "r12", 12, Qword, false;
    R13 => "r13", 13, Qword, false;
    R14 => "r14", 14, Qword, false;
    R15 => "r15", 15, Qword, false;
    Rip => "rip", SLOT_RIP, Qword, false;
    Rflags => "rflags", SLOT_RFLAGS, Qword, false;

    Eax => "eax", 0, Dword, false;
    Ecx => "ecx", 1, Dword, false;
    Edx => "edx", 2, Dword, false;
    Ebx => "ebx", 3, Dword, false;
    Esp => "esp", 4, Dword, false;
    Ebp => "ebp", 5, Dword, false;
    Esi => "esi", 6, Dword, false;
    Edi => "edi", 7, Dword, false;
    R8d => "r8d", 8, Dword, false;
    R9d => "r9d", 9, Dword, false;
    R10d => "r10d", 10, Dword, false;
    R11d => "r11d", 11, Dword, false;
    R12d => "r12d", 12, Dword, false;
    R13d => "r13d", 13, Dword, false;
    R14d => "r14d", 14, Dword, false;
    R15d => "r15d", 15, Dword, false;
    Eip => "eip", SLOT_RIP, Dword, false;
    Eflags => "eflags", SLOT_RFLAGS, Dword, false;

    Ax => "ax", 0, Word, false;
    Cx => "cx", 1, Word, false;
    Dx => "dx", 2, Word, false;
    Bx => "bx", 3, Word, false;
    Sp => "sp", 4, Word, false;
    Bp => "bp", 5, Word, false;
    Si => "si", 6, Word, false;
    Di => "di", 7, Word, false;
    R8w => "r8w", 8, Word, false;
    R9w => "r9w", 9, Word, false;
    R10w => "r10w", 10, Word, false;
    R11w => "r11w", 11, Word, false;
    R12w => "r12w", 12, Word, false;
    R13w => "r13w", 13, Word, false;
    R14w => "r14w", 14, Word, false;
    R15w => "r15w", 15, Word, false;
    Ip => "ip", SLOT_RIP, Word, false;
    Flags => "flags", SLOT_RFLAGS, Word, false;

    Al => "al", 0, Byte, false;
    Cl => "cl", 1, Byte, false;
    Dl => "dl", 2, Byte, false;
    Bl => "bl", 3, Byte, false;
    Spl => "spl", 4, Byte, false;
    Bpl => "bpl", 5, Byte, false;
    Sil => "sil", 6, Byte, false;
    Dil => "dil", 7, Byte, false;
    R8b => "r8b", 8, Byte, false;
    R9b => "r9b", 9, Byte, false;
    R10b => "r10b", 10, Byte, false;
    R11b => "r11b", 11, Byte, false;
    R12b => "r12b", 12, Byte, false;
    R13b => "r13b", 13, Byte, false;
    R14b => "r14b", 14, Byte, false;
    R15b => "r15b", 15, Byte, false;
    Ah => "ah", 0, Byte, true;
    Ch => "ch", 1, Byte, true;
    Dh => "dh", 2, Byte, true;
    Bh => "bh", 3, Byte, true;
}

const GPR64: [Register; GPR_COUNT] = [
    Register::Rax,
    Register::Rcx,
    Register::Rdx,
    Register::Rbx,
    Register::Rsp,
    Register::Rbp,
    Register::Rsi,
    Register::Rdi,
    Register::R8,
    Register::R9,
    Register::R10,
    Register::R11,
    Register::R12,
    Register::R13,
    Register::R14,
    Register::R15,
];

/// 32-bit general-purpose views indexed by hardware encoding.
const GPR32: [Register; GPR_COUNT] = [
    Register::Eax,
    Register::Ecx,
    Register::Edx,
    Register::Ebx,
    Register::Esp,
    Register::Ebp,
    Register::Esi,
    Register::Edi,
    Register::R8d,
    Register::R9d,
    Register::R10d,
    Register::R11d,
    Register::R12d,
    Register::R13d,
    Register::R14d,
    Register::R15d,
];

impl Register {
    /// 64-bit general-purpose registers indexed by hardware encoding.
    pub const GPR64: [Self; GPR_COUNT] = GPR64;

    /// Resolves a 4-bit hardware register number (REX extension included)
    /// to the general-purpose register view of `width`.
    ///
    /// Only 32- and 64-bit views are addressable this way; byte and word
    /// forms need prefix-dependent rules the supported subset does not use.
    #[must_use]
    pub const fn from_gpr_index(index: u8, width: RegisterWidth) -> Option<Self> {
        if index as usize >= GPR_COUNT {
            return None;
        }
        match width {
            RegisterWidth::Qword => Some(GPR64[index as usize]),
            RegisterWidth::Dword => Some(GPR32[index as usize]),
            RegisterWidth::Word | RegisterWidth::Byte => None,
        }
    }

    /// Returns the bit width of this view.
    #[must_use]
    pub const fn width(self) -> RegisterWidth {
        self.view().width
    }

    /// Returns the full 64-bit register this view aliases.
    #[must_use]
    pub const fn parent(self) -> Self {
        match self.view().slot {
            SLOT_RIP => Self::Rip,
            SLOT_RFLAGS => Self::Rflags,
            slot => GPR64[slot as usize],
        }
    }

    /// Returns `true` for one of the legacy `AH/CH/DH/BH` views.
    #[must_use]
    pub const fn is_high_byte(self) -> bool {
        self.view().high_byte
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a register name does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown register name `{0}`")]
pub struct ParseRegisterError(pub String);

impl FromStr for Register {
    type Err = ParseRegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|reg| reg.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseRegisterError(s.to_owned()))
    }
}

/// Status flags in `RFLAGS` that the executor maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Flag {
    /// Carry flag (bit 0).
    Carry,
    /// Parity flag (bit 2).
    Parity,
    /// Auxiliary carry flag (bit 4).
    Adjust,
    /// Zero flag (bit 6).
    Zero,
    /// Sign flag (bit 7).
    Sign,
    /// Direction flag (bit 10).
    Direction,
    /// Overflow flag (bit 11).
    Overflow,
}

impl Flag {
    /// Returns the `RFLAGS` bit mask for this flag.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::Carry => 1 << 0,
            Self::Parity => 1 << 2,
            Self::Adjust => 1 << 4,
            Self::Zero => 1 << 6,
            Self::Sign => 1 << 7,
            Self::Direction => 1 << 10,
            Self::Overflow => 1 << 11,
        }
    }
}

/// Register file: one 64-bit backing value per architectural register.
///
/// Sub-register aliases are views over the low bits of their parent (or
/// bits 8..15 for the legacy high-byte views). Writing a 32-bit view
/// zero-extends into the parent; 16- and 8-bit writes leave every other
/// bit of the parent untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    slots: [u64; SLOT_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        let mut slots = [0; SLOT_COUNT];
        slots[SLOT_RFLAGS as usize] = RFLAGS_RESERVED_ONE;
        Self { slots }
    }
}

impl RegisterFile {
    /// Reads a register view.
    #[must_use]
    pub const fn read(&self, reg: Register) -> u64 {
        let view = reg.view();
        let full = self.slots[view.slot as usize];
        if view.high_byte {
            (full >> 8) & 0xFF
        } else {
            full & view.width.mask()
        }
    }

    /// Writes a register view with x86-64 aliasing semantics.
    pub const fn write(&mut self, reg: Register, value: u64) {
        let view = reg.view();
        let current = self.slots[view.slot as usize];
        let mut next = match (view.width, view.high_byte) {
            (RegisterWidth::Byte, true) => (current & !0xFF00) | ((value & 0xFF) << 8),
            (RegisterWidth::Qword, _) => value,
            (RegisterWidth::Dword, _) => value & 0xFFFF_FFFF,
            (width, _) => (current & !width.mask()) | (value & width.mask()),
        };
        if view.slot == SLOT_RFLAGS {
            next |= RFLAGS_RESERVED_ONE;
        }
        self.slots[view.slot as usize] = next;
    }

    /// Reads `RIP`.
    #[must_use]
    pub const fn rip(&self) -> u64 {
        self.slots[SLOT_RIP as usize]
    }

    /// Writes `RIP`.
    pub const fn set_rip(&mut self, value: u64) {
        self.slots[SLOT_RIP as usize] = value;
    }

    /// Reads `RFLAGS`.
    #[must_use]
    pub const fn rflags(&self) -> u64 {
        self.slots[SLOT_RFLAGS as usize]
    }

    /// Writes `RFLAGS`; the reserved bit stays set.
    pub const fn set_rflags(&mut self, value: u64) {
        self.slots[SLOT_RFLAGS as usize] = value | RFLAGS_RESERVED_ONE;
    }

    /// Returns `true` when `flag` is set in `RFLAGS`.
    #[must_use]
    pub const fn flag(&self, flag: Flag) -> bool {
        self.rflags() & flag.mask() != 0
    }

    /// Sets or clears one `RFLAGS` bit.
    pub const fn set_flag(&mut self, flag: Flag, enabled: bool) {
        let slot = &mut self.slots[SLOT_RFLAGS as usize];
        if enabled {
            *slot |= flag.mask();
        } else {
            *slot &= !flag.mask();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Flag, Register, RegisterFile, RegisterWidth, GPR_COUNT, RFLAGS_RESERVED_ONE};

    #[test]
    fn dword_write_zero_extends_into_parent() {
        let mut regs = RegisterFile::default();
        regs.write(Register::Rax, u64::MAX);
        regs.write(Register::Eax, 0x1234_5678);

        assert_eq!(regs.read(Register::Rax), 0x1234_5678);
    }

    #[test]
    fn word_and_byte_writes_preserve_upper_bits() {
        let mut regs = RegisterFile::default();
        regs.write(Register::Rbx, 0x1122_3344_5566_7788);

        regs.write(Register::Bx, 0xAAAA);
        assert_eq!(regs.read(Register::Rbx), 0x1122_3344_5566_AAAA);

        regs.write(Register::Bl, 0x01);
        assert_eq!(regs.read(Register::Rbx), 0x1122_3344_5566_AA01);

        regs.write(Register::Bh, 0xFE);
        assert_eq!(regs.read(Register::Rbx), 0x1122_3344_5566_FE01);
        assert_eq!(regs.read(Register::Bh), 0xFE);
        assert_eq!(regs.read(Register::Bl), 0x01);
    }

    #[test]
    fn narrow_reads_only_return_their_bits() {
        let mut regs = RegisterFile::default();
        regs.write(Register::R9, 0xDEAD_BEEF_CAFE_F00D);

        assert_eq!(regs.read(Register::R9d), 0xCAFE_F00D);
        assert_eq!(regs.read(Register::R9w), 0xF00D);
        assert_eq!(regs.read(Register::R9b), 0x0D);
    }

    #[test]
    fn every_view_resolves_to_a_qword_parent() {
        for reg in Register::ALL {
            let parent = reg.parent();
            assert_eq!(parent.width(), RegisterWidth::Qword, "{reg}");
            assert_eq!(parent.parent(), parent);
        }
    }

    #[test]
    fn gpr_index_lookup_follows_hardware_encoding() {
        assert_eq!(
            Register::from_gpr_index(0, RegisterWidth::Qword),
            Some(Register::Rax)
        );
        assert_eq!(
            Register::from_gpr_index(3, RegisterWidth::Qword),
            Some(Register::Rbx)
        );
        assert_eq!(
            Register::from_gpr_index(1, RegisterWidth::Dword),
            Some(Register::Ecx)
        );
        assert_eq!(
            Register::from_gpr_index(15, RegisterWidth::Dword),
            Some(Register::R15d)
        );
        assert_eq!(Register::from_gpr_index(16, RegisterWidth::Qword), None);
        assert_eq!(Register::from_gpr_index(0, RegisterWidth::Byte), None);

        for index in 0..GPR_COUNT {
            let index = u8::try_from(index).expect("gpr index fits in u8");
            let qword = Register::from_gpr_index(index, RegisterWidth::Qword).expect("qword");
            let dword = Register::from_gpr_index(index, RegisterWidth::Dword).expect("dword");
            assert_eq!(dword.parent(), qword);
        }
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for reg in Register::ALL {
            assert_eq!(reg.name().parse::<Register>(), Ok(*reg));
        }
        assert_eq!("RAX".parse::<Register>(), Ok(Register::Rax));
        assert!("rzz".parse::<Register>().is_err());
    }

    #[test]
    fn rflags_reserved_bit_is_sticky() {
        let mut regs = RegisterFile::default();
        assert_eq!(regs.rflags(), RFLAGS_RESERVED_ONE);

        regs.write(Register::Rflags, 0);
        assert_eq!(regs.rflags(), RFLAGS_RESERVED_ONE);

        regs.set_flag(Flag::Zero, true);
        assert!(regs.flag(Flag::Zero));
        regs.set_flag(Flag::Zero, false);
        assert!(!regs.flag(Flag::Zero));
    }

    #[test]
    fn rip_views_alias_instruction_pointer() {
        let mut regs = RegisterFile::default();
        regs.set_rip(0x0000_0001_0800_0000);

        assert_eq!(regs.read(Register::Rip), 0x0000_0001_0800_0000);
        assert_eq!(regs.read(Register::Eip), 0x0800_0000);

        regs.write(Register::Eip, 0x10);
        assert_eq!(regs.rip(), 0x10);
    }
}
