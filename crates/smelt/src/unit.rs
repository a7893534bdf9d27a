//! The mutable, instruction-level representation of a code object.
//!
//! A [`CodeUnit`] holds an owned sequence of [`Instr`] values plus the
//! declared metadata of the code object (parameter names, variable roles,
//! naming, source position). Callers build and rewrite units freely, then
//! hand them to [`CodeUnit::encode`](crate::encode) to produce the immutable
//! binary form; [`BinaryCode::decode`](crate::BinaryCode::decode)
//! reconstructs a unit from binary.
//!
//! Jump operands address the target instruction by index into the owning
//! unit's `ops` vector via [`InstrId`]. Indices stay valid across in-place
//! mutation of individual instructions; callers that insert or remove
//! instructions are responsible for rewriting the affected ids.

use crate::{op::Opcode, value::Const};

/// Index of an instruction within its owning [`CodeUnit`]'s `ops` vector.
///
/// Uses `u32` to keep `Arg` small. A jump referencing an index at or past
/// the end of the sequence fails encoding with a dangling-jump error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct InstrId(u32);

impl InstrId {
    /// Creates an id from a raw index.
    #[inline]
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The resolved operand of an instruction.
///
/// The variant must match the opcode's operand kind; the assembler rejects
/// mismatches. Cell and free variables use distinct variants even though
/// their opcodes share one operand kind: the role decides which pool the
/// name lands in and how its operand index is biased.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Arg {
    /// No operand.
    None,
    /// A fast local variable name.
    Local(String),
    /// A namespace-indexed name (global, attribute, import).
    Name(String),
    /// A pooled constant value.
    Const(Const),
    /// A cell variable name (captured by an inner scope).
    Cell(String),
    /// A free variable name (captured from an outer scope).
    Free(String),
    /// A jump target within the owning unit.
    Jump(InstrId),
    /// An uninterpreted numeric operand.
    Raw(u32),
}

/// One unit of execution: an opcode, its operand, and an optional source line.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Instr {
    pub op: Opcode,
    pub arg: Arg,
    /// Source line annotation feeding the compressed line table.
    pub line: Option<u32>,
}

impl Instr {
    /// Creates an operand-less instruction.
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            arg: Arg::None,
            line: None,
        }
    }

    /// Creates an instruction with an operand.
    #[must_use]
    pub fn with_arg(op: Opcode, arg: Arg) -> Self {
        Self { op, arg, line: None }
    }

    /// Attaches a source line annotation.
    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// A structured, mutable code object.
///
/// The declared parameter lists determine the fixed leading layout of the
/// local variable pool: positional arguments, then keyword-only arguments,
/// then the vararg collector, then the varkwarg collector, then the
/// remaining plain locals. Names referenced only by instructions are
/// appended to the appropriate pool on first occurrence during encoding.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CodeUnit {
    /// The instruction sequence in emission order.
    pub ops: Vec<Instr>,
    /// Positional parameter names, in declaration order.
    pub args: Vec<String>,
    /// Keyword-only parameter names, in declaration order.
    pub kwonlyargs: Vec<String>,
    /// Name of the `*args` collector, if declared.
    pub vararg: Option<String>,
    /// Name of the `**kwargs` collector, if declared.
    pub varkwarg: Option<String>,
    /// Plain local variable names beyond the parameters.
    pub varnames: Vec<String>,
    /// Names captured by inner scopes.
    pub cellvars: Vec<String>,
    /// Names captured from outer scopes.
    pub freevars: Vec<String>,
    /// Whether invocation creates a fresh local namespace.
    pub newlocals: bool,
    /// Source filename.
    pub filename: String,
    /// Qualified name of the code object.
    pub qualname: String,
    /// First source line of the code object.
    pub first_line: u32,
    /// Leading documentation string, if any.
    pub docstring: Option<String>,
}

impl CodeUnit {
    /// Creates an empty unit with the given naming.
    #[must_use]
    pub fn new(filename: impl Into<String>, qualname: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            qualname: qualname.into(),
            ..Self::default()
        }
    }

    /// Appends an instruction and returns its id.
    pub fn push(&mut self, instr: Instr) -> InstrId {
        let id = InstrId::new(u32::try_from(self.ops.len()).expect("instruction count exceeds u32"));
        self.ops.push(instr);
        id
    }
}
