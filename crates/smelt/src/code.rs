//! The immutable binary form of a code object.

use crate::{flags::CodeFlags, value::Const};

/// An assembled code object: the linear opcode byte stream plus the pools
/// and header metadata the runtime needs to execute it.
///
/// A `BinaryCode` is immutable once produced and is the unit of persistence
/// and transport. Field declaration order is the serialization contract; it
/// must not be reordered.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BinaryCode {
    arg_count: u16,
    kwonly_count: u16,
    local_count: u16,
    max_stack_depth: u16,
    flags: CodeFlags,
    bytecode: Vec<u8>,
    consts: Vec<Const>,
    names: Vec<String>,
    locals: Vec<String>,
    filename: String,
    qualname: String,
    first_line: u32,
    line_table: Vec<u8>,
    freevars: Vec<String>,
    cellvars: Vec<String>,
}

impl BinaryCode {
    #[expect(clippy::too_many_arguments, reason = "assembly hands over every header field at once")]
    pub(crate) fn new(
        arg_count: u16,
        kwonly_count: u16,
        local_count: u16,
        max_stack_depth: u16,
        flags: CodeFlags,
        bytecode: Vec<u8>,
        consts: Vec<Const>,
        names: Vec<String>,
        locals: Vec<String>,
        filename: String,
        qualname: String,
        first_line: u32,
        line_table: Vec<u8>,
        freevars: Vec<String>,
        cellvars: Vec<String>,
    ) -> Self {
        Self {
            arg_count,
            kwonly_count,
            local_count,
            max_stack_depth,
            flags,
            bytecode,
            consts,
            names,
            locals,
            filename,
            qualname,
            first_line,
            line_table,
            freevars,
            cellvars,
        }
    }

    /// Number of positional parameters.
    #[must_use]
    pub fn arg_count(&self) -> u16 {
        self.arg_count
    }

    /// Number of keyword-only parameters.
    #[must_use]
    pub fn kwonly_count(&self) -> u16 {
        self.kwonly_count
    }

    /// Total number of local variable slots.
    #[must_use]
    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    /// Maximum operand stack depth any execution path can reach.
    #[must_use]
    pub fn max_stack_depth(&self) -> u16 {
        self.max_stack_depth
    }

    /// Structural metadata flags.
    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    /// The opcode byte stream.
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// The constant pool. Slot 0 is reserved for the docstring value.
    #[must_use]
    pub fn consts(&self) -> &[Const] {
        &self.consts
    }

    /// The name pool.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The local variable pool, parameters first.
    #[must_use]
    pub fn locals(&self) -> &[String] {
        &self.locals
    }

    /// Source filename.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Qualified name of the code object.
    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    /// First source line.
    #[must_use]
    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    /// The compressed line-delta table.
    #[must_use]
    pub fn line_table(&self) -> &[u8] {
        &self.line_table
    }

    /// Free variable names. Operand indices for freevars are offset by the
    /// cellvar count, so the two pools form one contiguous address space.
    #[must_use]
    pub fn freevars(&self) -> &[String] {
        &self.freevars
    }

    /// Cell variable names.
    #[must_use]
    pub fn cellvars(&self) -> &[String] {
        &self.cellvars
    }

    /// Serializes the code object to a compact binary format.
    ///
    /// The serialized data can be stored and later restored with `load()`.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a code object produced by `dump()`.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
