//! The metadata flags bitset and its structural derivation.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::{
    op::{Opcode, OperandKind},
    unit::CodeUnit,
};

/// Structural metadata flags of a code object.
///
/// Derived from declared metadata and from which opcodes appear in the
/// instruction sequence, independent of instruction order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// Local variables resolve by slot, not by namespace lookup.
    pub const OPTIMIZED: Self = Self(0x0001);
    /// Invocation creates a fresh local namespace.
    pub const NEWLOCALS: Self = Self(0x0002);
    /// A `*args` collector is declared.
    pub const VARARGS: Self = Self(0x0004);
    /// A `**kwargs` collector is declared.
    pub const VARKEYWORDS: Self = Self(0x0008);
    /// The code object is a generator.
    pub const GENERATOR: Self = Self(0x0020);
    /// No cell or free variables are referenced.
    pub const NOFREE: Self = Self(0x0040);

    /// An empty flag set.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds a flag set from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw bit representation.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Derives the flag set for a code unit.
    ///
    /// The optimized-namespace flag is cleared only by the name-indexed
    /// local access opcodes; global and attribute access leave it set.
    #[must_use]
    pub fn compute(unit: &CodeUnit) -> Self {
        let mut flags = Self::empty();

        let mut name_access = false;
        let mut has_yield = false;
        let mut has_free = false;
        for instr in &unit.ops {
            name_access |= matches!(instr.op, Opcode::LoadName | Opcode::StoreName | Opcode::DeleteName);
            has_yield |= instr.op.is_yield();
            has_free |= matches!(instr.op.kind(), OperandKind::Free);
        }

        if !name_access {
            flags |= Self::OPTIMIZED;
        }
        if has_yield {
            flags |= Self::GENERATOR;
        }
        if !has_free {
            flags |= Self::NOFREE;
        }
        if unit.vararg.is_some() {
            flags |= Self::VARARGS;
        }
        if unit.varkwarg.is_some() {
            flags |= Self::VARKEYWORDS;
        }
        if unit.newlocals {
            flags |= Self::NEWLOCALS;
        }
        flags
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CodeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        unit::{Arg, Instr},
        value::Const,
    };

    fn unit_with(ops: Vec<Instr>) -> CodeUnit {
        CodeUnit {
            ops,
            ..CodeUnit::new("test.py", "f")
        }
    }

    #[test]
    fn plain_unit_is_optimized_and_nofree() {
        let unit = unit_with(vec![
            Instr::with_arg(Opcode::LoadConst, Arg::Const(Const::None)),
            Instr::new(Opcode::ReturnValue),
        ]);
        let flags = CodeFlags::compute(&unit);
        assert!(flags.contains(CodeFlags::OPTIMIZED));
        assert!(flags.contains(CodeFlags::NOFREE));
        assert!(!flags.contains(CodeFlags::GENERATOR));
    }

    #[test]
    fn name_access_clears_optimized() {
        let unit = unit_with(vec![Instr::with_arg(Opcode::LoadName, Arg::Name("x".to_owned()))]);
        assert!(!CodeFlags::compute(&unit).contains(CodeFlags::OPTIMIZED));

        // Global access does not clear it.
        let unit = unit_with(vec![Instr::with_arg(Opcode::LoadGlobal, Arg::Name("x".to_owned()))]);
        assert!(CodeFlags::compute(&unit).contains(CodeFlags::OPTIMIZED));
    }

    #[test]
    fn yield_marks_generator() {
        let unit = unit_with(vec![
            Instr::with_arg(Opcode::LoadConst, Arg::Const(Const::None)),
            Instr::new(Opcode::YieldValue),
        ]);
        assert!(CodeFlags::compute(&unit).contains(CodeFlags::GENERATOR));
    }

    #[test]
    fn free_access_clears_nofree() {
        let unit = unit_with(vec![Instr::with_arg(Opcode::LoadDeref, Arg::Free("x".to_owned()))]);
        assert!(!CodeFlags::compute(&unit).contains(CodeFlags::NOFREE));
    }

    #[test]
    fn declared_collectors_and_newlocals() {
        let mut unit = unit_with(vec![]);
        unit.vararg = Some("args".to_owned());
        unit.varkwarg = Some("kwargs".to_owned());
        unit.newlocals = true;
        let flags = CodeFlags::compute(&unit);
        assert!(flags.contains(CodeFlags::VARARGS));
        assert!(flags.contains(CodeFlags::VARKEYWORDS));
        assert!(flags.contains(CodeFlags::NEWLOCALS));
    }

    #[test]
    fn bit_values_are_stable() {
        assert_eq!(CodeFlags::OPTIMIZED.bits(), 0x0001);
        assert_eq!(CodeFlags::NOFREE.bits(), 0x0040);
        assert_eq!((CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS).bits(), 0x0003);
    }
}
