//! The assembler: [`CodeUnit`] to [`BinaryCode`].
//!
//! Assembly runs in three passes over the instruction sequence:
//!
//! 1. Symbol harvesting fills the pools. The local pool starts with the
//!    declared parameter layout (positional, keyword-only, vararg, varkwarg,
//!    plain locals, in that order); the constant, name, cellvar, and freevar
//!    pools are filled by a first-occurrence scan of the instructions, with
//!    the constant pool seeded by the docstring slot.
//! 2. Byte emission walks the instructions in order, recording each one's
//!    address, appending line table entries, and writing zero placeholders
//!    for jump operands.
//! 3. Relocation patches every queued jump once all addresses are known.
//!
//! The input unit is never mutated; any failure returns before a
//! [`BinaryCode`] exists.

use std::fmt;

use smallvec::SmallVec;

use crate::{
    code::BinaryCode,
    depth::{ImbalancedStackError, max_stack_depth},
    flags::CodeFlags,
    lines::LineTableBuilder,
    op::{Opcode, OperandKind},
    pool::SymbolPool,
    unit::{Arg, CodeUnit, InstrId},
    value::Const,
};

/// Error type for assembly, separating failures by cause.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembleError {
    /// A jump operand's target index lies outside the owning sequence.
    DanglingJump {
        /// Index of the jump instruction.
        index: usize,
        /// The out-of-range target index.
        target: usize,
    },
    /// A relocated jump does not fit the 16-bit operand field. There is no
    /// wider jump encoding; the unit must be restructured.
    OffsetRange {
        /// Index of the jump instruction.
        index: usize,
        /// The resolved address or offset that did not fit.
        value: i64,
    },
    /// The stack depth analysis observed a negative depth.
    ImbalancedStack(ImbalancedStackError),
    /// An instruction's operand variant does not match its opcode's kind.
    OperandMismatch {
        /// Index of the offending instruction.
        index: usize,
        /// Its opcode.
        opcode: Opcode,
    },
    /// A parameter name appears in more than one parameter role, which would
    /// corrupt the count-based local slot layout.
    DuplicateParameter {
        /// The repeated name.
        name: String,
    },
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingJump { index, target } => {
                write!(f, "jump at instruction {index} targets {target}, outside the sequence")
            }
            Self::OffsetRange { index, value } => {
                write!(f, "jump at instruction {index} resolves to {value}, outside the 16-bit range")
            }
            Self::ImbalancedStack(error) => write!(f, "{error}"),
            Self::OperandMismatch { index, opcode } => {
                write!(f, "operand of instruction {index} does not match {}", opcode.name())
            }
            Self::DuplicateParameter { name } => {
                write!(f, "parameter name {name:?} declared in more than one role")
            }
        }
    }
}

impl std::error::Error for AssembleError {}

impl From<ImbalancedStackError> for AssembleError {
    fn from(error: ImbalancedStackError) -> Self {
        Self::ImbalancedStack(error)
    }
}

/// The symbol pools harvested from a unit before emission.
struct Pools {
    consts: SymbolPool<Const>,
    names: SymbolPool<String>,
    locals: SymbolPool<String>,
    cellvars: SymbolPool<String>,
    freevars: SymbolPool<String>,
}

fn harvest(unit: &CodeUnit) -> Result<Pools, AssembleError> {
    // Parameters first, in their fixed declarative order. Every parameter
    // must claim a fresh slot; a merged slot means two roles share a name.
    let mut expected = 0usize;
    let mut locals = SymbolPool::new();
    let parameters = unit
        .args
        .iter()
        .chain(&unit.kwonlyargs)
        .chain(&unit.vararg)
        .chain(&unit.varkwarg);
    for name in parameters {
        locals.add(name.clone());
        expected += 1;
        if locals.len() != expected {
            return Err(AssembleError::DuplicateParameter { name: name.clone() });
        }
    }
    // Plain locals may repeat a parameter name; the pool just keeps the
    // existing slot.
    locals.extend(unit.varnames.iter().cloned());

    // Slot 0 of the constant pool is the docstring value, present or not.
    let mut consts = SymbolPool::new();
    consts.add(unit.docstring.clone().map_or(Const::None, Const::Str));

    let mut names = SymbolPool::new();
    let mut cellvars = SymbolPool::new();
    let mut freevars = SymbolPool::new();
    for instr in &unit.ops {
        match &instr.arg {
            Arg::Local(name) => {
                locals.add(name.clone());
            }
            Arg::Name(name) => {
                names.add(name.clone());
            }
            Arg::Cell(name) => {
                cellvars.add(name.clone());
            }
            Arg::Free(name) => {
                freevars.add(name.clone());
            }
            Arg::Const(value) => {
                consts.add(value.clone());
            }
            Arg::None | Arg::Jump(_) | Arg::Raw(_) => {}
        }
    }

    Ok(Pools {
        consts,
        names,
        locals,
        cellvars,
        freevars,
    })
}

fn pool_index(pool: &SymbolPool<String>, name: &str) -> u32 {
    let index = pool.index_of(name).expect("symbol pooled during harvest");
    u32::try_from(index).expect("pool index exceeds u32")
}

impl CodeUnit {
    /// Assembles this unit into its immutable binary form.
    ///
    /// The unit itself is read-only for the duration of the call and is
    /// left untouched on failure.
    ///
    /// # Panics
    ///
    /// Panics if the emitted byte stream or a symbol pool outgrows `u32`
    /// indexing, which would take billions of instructions.
    pub fn encode(&self) -> Result<BinaryCode, AssembleError> {
        let pools = harvest(self)?;
        let cell_len = u32::try_from(pools.cellvars.len()).expect("pool index exceeds u32");

        // Emission. Jump operands get zero placeholders and are queued with
        // their patch site; every instruction's start address (including an
        // extended-argument prefix) is recorded for relocation.
        let mut code: Vec<u8> = Vec::new();
        let mut addrs: Vec<u32> = Vec::with_capacity(self.ops.len());
        let mut jumps: Vec<(usize, u32, InstrId)> = Vec::new();
        let mut line_table = LineTableBuilder::new(self.first_line);

        for (index, instr) in self.ops.iter().enumerate() {
            let addr = u32::try_from(code.len()).expect("bytecode length exceeds u32");
            addrs.push(addr);
            if let Some(line) = instr.line {
                line_table.record(addr, line);
            }

            let operand: Option<u32> = match (instr.op.kind(), &instr.arg) {
                (OperandKind::None, Arg::None) => None,
                (OperandKind::Local, Arg::Local(name)) => Some(pool_index(&pools.locals, name)),
                (OperandKind::Name, Arg::Name(name)) => Some(pool_index(&pools.names, name)),
                (OperandKind::Const, Arg::Const(value)) => {
                    let slot = pools.consts.index_of(value).expect("constant pooled during harvest");
                    Some(u32::try_from(slot).expect("pool index exceeds u32"))
                }
                (OperandKind::Free, Arg::Cell(name)) => Some(pool_index(&pools.cellvars, name)),
                (OperandKind::Free, Arg::Free(name)) => Some(pool_index(&pools.freevars, name) + cell_len),
                (OperandKind::JumpRel | OperandKind::JumpAbs, Arg::Jump(target)) => {
                    if target.index() >= self.ops.len() {
                        return Err(AssembleError::DanglingJump {
                            index,
                            target: target.index(),
                        });
                    }
                    jumps.push((index, addr, *target));
                    Some(0)
                }
                (OperandKind::Raw, Arg::Raw(value)) => Some(*value),
                _ => {
                    return Err(AssembleError::OperandMismatch {
                        index,
                        opcode: instr.op,
                    });
                }
            };

            match operand {
                None => code.push(instr.op.as_byte()),
                Some(value) => {
                    let mut bytes: SmallVec<[u8; 6]> = SmallVec::new();
                    if value > 0xFFFF {
                        // One prefix level carries bits 16..32; the operand
                        // field itself keeps the low 16 bits.
                        bytes.push(Opcode::ExtendedArg.as_byte());
                        bytes.extend_from_slice(&u16::try_from(value >> 16).expect("shifted high bits fit u16").to_le_bytes());
                    }
                    bytes.push(instr.op.as_byte());
                    bytes.extend_from_slice(&u16::try_from(value & 0xFFFF).expect("masked to 16 bits").to_le_bytes());
                    code.extend_from_slice(&bytes);
                }
            }
        }

        // Relocation. Jump instructions never carry a prefix, so the operand
        // bytes sit directly after the opcode at the recorded site.
        for (index, site, target) in jumps {
            let target_addr = i64::from(addrs[target.index()]);
            let value = if self.ops[index].op.is_jump_rel() {
                target_addr - (i64::from(site) + 3)
            } else {
                target_addr
            };
            let Ok(patched) = u16::try_from(value) else {
                return Err(AssembleError::OffsetRange { index, value });
            };
            let bytes = patched.to_le_bytes();
            code[site as usize + 1] = bytes[0];
            code[site as usize + 2] = bytes[1];
        }

        let max_depth = max_stack_depth(&self.ops)?;
        let flags = CodeFlags::compute(self);

        Ok(BinaryCode::new(
            u16::try_from(self.args.len()).expect("parameter count exceeds u16"),
            u16::try_from(self.kwonlyargs.len()).expect("parameter count exceeds u16"),
            u16::try_from(pools.locals.len()).expect("local count exceeds u16"),
            max_depth,
            flags,
            code,
            pools.consts.into_vec(),
            pools.names.into_vec(),
            pools.locals.into_vec(),
            self.filename.clone(),
            self.qualname.clone(),
            self.first_line,
            line_table.finish(),
            pools.freevars.into_vec(),
            pools.cellvars.into_vec(),
        ))
    }
}
