//! The disassembler: [`BinaryCode`] back to [`CodeUnit`].
//!
//! Decoding walks the byte stream once, building an instruction per opcode
//! byte and a table of instruction start addresses, then rewrites the raw
//! jump operands into instruction ids in a second pass. An extended-argument
//! prefix contributes its payload to the next real instruction's operand and
//! is not materialized as an instruction; the following instruction is
//! registered at the prefix's address so jump targets and line entries
//! resolve onto it.
//!
//! Malformed input aborts immediately; no partial unit is returned.

use std::fmt;

use ahash::AHashMap;

use crate::{
    code::BinaryCode,
    flags::CodeFlags,
    lines::line_starts,
    op::{Opcode, OperandKind},
    pool::SymbolPool,
    unit::{Arg, CodeUnit, Instr, InstrId},
    value::Const,
};

/// Error type for disassembly, separating failures by cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisassembleError {
    /// A byte in opcode position does not name an instruction.
    UnknownOpcode {
        /// Offset of the bad byte.
        offset: usize,
        /// The byte value.
        byte: u8,
    },
    /// The stream ends inside an instruction's operand field.
    TruncatedOperand {
        /// Offset of the instruction whose operand is cut short.
        offset: usize,
    },
    /// The stream ends with a held extended-argument prefix and no
    /// instruction to apply it to.
    TrailingExtendedArg {
        /// Offset of the prefix.
        offset: usize,
    },
    /// An operand indexes past the end of its symbol pool.
    BadSymbolIndex {
        /// Offset of the instruction.
        offset: usize,
        /// The out-of-range operand value.
        index: u32,
    },
    /// A jump operand's resolved address is not an instruction start.
    BadJumpTarget {
        /// Offset of the jump instruction.
        offset: usize,
        /// The resolved target address.
        target: u32,
    },
    /// The local pool is shorter than the declared parameter counts.
    BadLocalLayout {
        /// Slots the header claims for parameters.
        declared: usize,
        /// Slots actually present in the local pool.
        available: usize,
    },
}

impl fmt::Display for DisassembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode byte {byte:#04x} at offset {offset}")
            }
            Self::TruncatedOperand { offset } => {
                write!(f, "truncated operand for instruction at offset {offset}")
            }
            Self::TrailingExtendedArg { offset } => {
                write!(f, "extended-argument prefix at offset {offset} has no following instruction")
            }
            Self::BadSymbolIndex { offset, index } => {
                write!(f, "operand {index} at offset {offset} indexes past its symbol pool")
            }
            Self::BadJumpTarget { offset, target } => {
                write!(f, "jump at offset {offset} targets {target}, which is not an instruction start")
            }
            Self::BadLocalLayout { declared, available } => {
                write!(
                    f,
                    "local pool holds {available} slots but the header declares {declared} parameter slots"
                )
            }
        }
    }
}

impl std::error::Error for DisassembleError {}

impl BinaryCode {
    /// Reconstructs the structured, mutable form of this code object,
    /// including the jump cross-references and source-line annotations lost
    /// in linearization.
    pub fn decode(&self) -> Result<CodeUnit, DisassembleError> {
        // Unwind the local pool into parameter roles before touching the
        // byte stream, so a bad header fails fast.
        let locals = self.locals();
        let arg_count = usize::from(self.arg_count());
        let kwonly_count = usize::from(self.kwonly_count());
        let flags = self.flags();
        let declared = arg_count
            + kwonly_count
            + usize::from(flags.contains(CodeFlags::VARARGS))
            + usize::from(flags.contains(CodeFlags::VARKEYWORDS));
        if locals.len() < declared {
            return Err(DisassembleError::BadLocalLayout {
                declared,
                available: locals.len(),
            });
        }
        let mut argstop = arg_count + kwonly_count;
        let args = locals[..arg_count].to_vec();
        let kwonlyargs = locals[arg_count..argstop].to_vec();
        let vararg = flags.contains(CodeFlags::VARARGS).then(|| {
            let name = locals[argstop].clone();
            argstop += 1;
            name
        });
        let varkwarg = flags.contains(CodeFlags::VARKEYWORDS).then(|| {
            let name = locals[argstop].clone();
            argstop += 1;
            name
        });
        let varnames = locals[argstop..].to_vec();

        let lines: AHashMap<u32, u32> = line_starts(self.line_table(), self.first_line())
            .into_iter()
            .collect();
        let cell_len = u32::try_from(self.cellvars().len()).expect("cellvar pool exceeds u32");

        let bytes = self.bytecode();
        let mut ops: Vec<Instr> = Vec::new();
        let mut table: AHashMap<u32, usize> = AHashMap::new();
        let mut jumps: Vec<(usize, usize, u32)> = Vec::new();
        let mut extended: u32 = 0;
        let mut pending_ext: Option<usize> = None;
        let mut i = 0usize;

        while i < bytes.len() {
            let offset = i;
            let byte = bytes[i];
            let op = Opcode::from_byte(byte).ok_or(DisassembleError::UnknownOpcode { offset, byte })?;
            i += 1;

            let mut operand: u32 = 0;
            if op.has_operand() {
                if i + 2 > bytes.len() {
                    return Err(DisassembleError::TruncatedOperand { offset });
                }
                operand = u32::from(u16::from_le_bytes([bytes[i], bytes[i + 1]])) + extended;
                i += 2;
                if op.is_extended_arg() {
                    // Hold the payload for the next real instruction, which
                    // is registered at the first prefix's address.
                    extended = operand << 16;
                    pending_ext.get_or_insert(offset);
                    continue;
                }
            }
            extended = 0;

            let addr = u32::try_from(pending_ext.take().unwrap_or(offset)).expect("offset exceeds u32");
            let index = ops.len();
            table.insert(addr, index);

            let arg = match op.kind() {
                OperandKind::None => Arg::None,
                OperandKind::Local => Arg::Local(pool_entry(locals, operand, offset)?),
                OperandKind::Name => Arg::Name(pool_entry(self.names(), operand, offset)?),
                OperandKind::Const => {
                    let value = self
                        .consts()
                        .get(operand as usize)
                        .ok_or(DisassembleError::BadSymbolIndex { offset, index: operand })?;
                    Arg::Const(value.clone())
                }
                OperandKind::Free => {
                    if operand < cell_len {
                        Arg::Cell(self.cellvars()[operand as usize].clone())
                    } else {
                        Arg::Free(pool_entry(self.freevars(), operand - cell_len, offset)?)
                    }
                }
                OperandKind::JumpRel => {
                    let base = u32::try_from(i).expect("offset exceeds u32");
                    jumps.push((index, offset, base + operand));
                    Arg::Jump(InstrId::new(0))
                }
                OperandKind::JumpAbs => {
                    jumps.push((index, offset, operand));
                    Arg::Jump(InstrId::new(0))
                }
                OperandKind::Raw => Arg::Raw(operand),
            };

            ops.push(Instr {
                op,
                arg,
                line: lines.get(&addr).copied(),
            });
        }
        if let Some(offset) = pending_ext {
            return Err(DisassembleError::TrailingExtendedArg { offset });
        }

        // Rewrite raw jump addresses into instruction ids.
        for (index, offset, target_addr) in jumps {
            let target = *table
                .get(&target_addr)
                .ok_or(DisassembleError::BadJumpTarget {
                    offset,
                    target: target_addr,
                })?;
            ops[index].arg = Arg::Jump(InstrId::new(u32::try_from(target).expect("instruction count exceeds u32")));
        }

        // The declared cell/free sets mirror what the instructions use.
        let mut cellvars = SymbolPool::new();
        let mut freevars = SymbolPool::new();
        for instr in &ops {
            match &instr.arg {
                Arg::Cell(name) => {
                    cellvars.add(name.clone());
                }
                Arg::Free(name) => {
                    freevars.add(name.clone());
                }
                _ => {}
            }
        }

        let docstring = self.consts().first().and_then(Const::as_str).map(ToOwned::to_owned);

        Ok(CodeUnit {
            ops,
            args,
            kwonlyargs,
            vararg,
            varkwarg,
            varnames,
            cellvars: cellvars.into_vec(),
            freevars: freevars.into_vec(),
            newlocals: flags.contains(CodeFlags::NEWLOCALS),
            filename: self.filename().to_owned(),
            qualname: self.qualname().to_owned(),
            first_line: self.first_line(),
            docstring,
        })
    }
}

fn pool_entry(pool: &[String], index: u32, offset: usize) -> Result<String, DisassembleError> {
    pool.get(index as usize)
        .cloned()
        .ok_or(DisassembleError::BadSymbolIndex { offset, index })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_code(bytecode: Vec<u8>, consts: Vec<Const>, names: Vec<String>, locals: Vec<String>) -> BinaryCode {
        BinaryCode::new(
            0,
            0,
            u16::try_from(locals.len()).unwrap(),
            0,
            CodeFlags::empty(),
            bytecode,
            consts,
            names,
            locals,
            "test.py".to_owned(),
            "f".to_owned(),
            1,
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn decodes_simple_stream() {
        let code = raw_code(
            vec![Opcode::LoadConst as u8, 0, 0, Opcode::ReturnValue as u8],
            vec![Const::None],
            vec![],
            vec![],
        );
        let unit = code.decode().unwrap();
        assert_eq!(unit.ops.len(), 2);
        assert_eq!(unit.ops[0].op, Opcode::LoadConst);
        assert_eq!(unit.ops[0].arg, Arg::Const(Const::None));
        assert_eq!(unit.ops[1].op, Opcode::ReturnValue);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let code = raw_code(vec![250], vec![], vec![], vec![]);
        assert_eq!(
            code.decode().unwrap_err(),
            DisassembleError::UnknownOpcode { offset: 0, byte: 250 }
        );
    }

    #[test]
    fn truncated_operand_is_rejected() {
        let code = raw_code(vec![Opcode::LoadConst as u8, 0], vec![Const::None], vec![], vec![]);
        assert_eq!(
            code.decode().unwrap_err(),
            DisassembleError::TruncatedOperand { offset: 0 }
        );
    }

    #[test]
    fn extended_prefix_accumulates_into_operand() {
        let code = raw_code(
            vec![
                Opcode::ExtendedArg as u8,
                0x01,
                0x00,
                Opcode::LoadSmallInt as u8,
                0x45,
                0x23,
            ],
            vec![],
            vec![],
            vec![],
        );
        let unit = code.decode().unwrap();
        assert_eq!(unit.ops.len(), 1);
        assert_eq!(unit.ops[0].arg, Arg::Raw(0x0001_2345));
    }

    #[test]
    fn trailing_extended_prefix_is_rejected() {
        let code = raw_code(vec![Opcode::ExtendedArg as u8, 0x01, 0x00], vec![], vec![], vec![]);
        assert_eq!(
            code.decode().unwrap_err(),
            DisassembleError::TrailingExtendedArg { offset: 0 }
        );
    }

    #[test]
    fn jump_lands_on_extended_prefix_address() {
        // JumpForward with offset 0 targets address 3, the ExtendedArg
        // prefix; the prefixed instruction is registered at that address.
        let code = raw_code(
            vec![
                Opcode::JumpForward as u8,
                0,
                0,
                Opcode::ExtendedArg as u8,
                0x01,
                0x00,
                Opcode::LoadSmallInt as u8,
                0x45,
                0x23,
            ],
            vec![],
            vec![],
            vec![],
        );
        let unit = code.decode().unwrap();
        assert_eq!(unit.ops[0].arg, Arg::Jump(InstrId::new(1)));
        assert_eq!(unit.ops[1].arg, Arg::Raw(0x0001_2345));
    }

    #[test]
    fn bad_jump_target_is_rejected() {
        // Jump into the middle of the LoadConst operand.
        let code = raw_code(
            vec![
                Opcode::JumpAbsolute as u8,
                4,
                0,
                Opcode::LoadConst as u8,
                0,
                0,
            ],
            vec![Const::None],
            vec![],
            vec![],
        );
        assert_eq!(
            code.decode().unwrap_err(),
            DisassembleError::BadJumpTarget { offset: 0, target: 4 }
        );
    }

    #[test]
    fn bad_symbol_index_is_rejected() {
        let code = raw_code(vec![Opcode::LoadName as u8, 7, 0], vec![], vec![], vec![]);
        assert_eq!(
            code.decode().unwrap_err(),
            DisassembleError::BadSymbolIndex { offset: 0, index: 7 }
        );
    }

    #[test]
    fn short_local_pool_is_rejected() {
        let code = BinaryCode::new(
            2,
            0,
            1,
            0,
            CodeFlags::empty(),
            vec![],
            vec![Const::None],
            vec![],
            vec!["a".to_owned()],
            "test.py".to_owned(),
            "f".to_owned(),
            1,
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(
            code.decode().unwrap_err(),
            DisassembleError::BadLocalLayout {
                declared: 2,
                available: 1
            }
        );
    }
}
