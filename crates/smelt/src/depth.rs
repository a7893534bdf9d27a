//! Static maximum stack depth analysis over the instruction graph.
//!
//! The instruction sequence forms a control-flow graph: every instruction
//! falls through to its successor unless it is an unconditional jump, and a
//! jump instruction adds an edge to its target. The analysis walks this
//! graph depth first from instruction 0 at depth 0, applying each opcode's
//! static stack effect and tracking the global maximum.
//!
//! The walk is an explicit work stack of enter/leave frames addressed by
//! instruction index, so deeply linear code cannot overflow the call stack
//! and cycles through backward or self jumps need no reference identity.
//! An instruction is skipped when it is already on the active path or was
//! previously entered at a depth at least as large as the current one.

use std::fmt;

use crate::unit::{Arg, Instr};

/// The stack depth simulation went negative: the sequence pops more values
/// than are available on some path, which means the code unit is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImbalancedStackError {
    /// Index of the instruction whose effect drove the depth negative.
    pub index: usize,
    /// The negative depth reached after applying that instruction's effect.
    pub depth: i32,
}

impl fmt::Display for ImbalancedStackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stack depth went negative ({}) after instruction {}",
            self.depth, self.index
        )
    }
}

impl std::error::Error for ImbalancedStackError {}

enum Frame {
    Enter(usize, i32),
    Leave(usize),
}

/// Computes the maximum operand stack depth the sequence can reach.
///
/// Exception-handler setup instructions propagate depth + 3 along their jump
/// edge (the runtime pushes three values of exception state on handler
/// entry) without affecting the fall-through depth; the iterate-or-exhaust
/// instruction propagates depth - 2 along its jump edge (exhaustion pops the
/// iterator and the value slot). Unreachable instructions contribute
/// nothing. The result saturates at `u16::MAX`.
pub fn max_stack_depth(ops: &[Instr]) -> Result<u16, ImbalancedStackError> {
    let mut start_depths: Vec<Option<i32>> = vec![None; ops.len()];
    let mut on_path = vec![false; ops.len()];
    let mut max_depth: i32 = 0;
    let mut work = vec![Frame::Enter(0, 0)];

    while let Some(frame) = work.pop() {
        let (index, depth) = match frame {
            Frame::Leave(index) => {
                on_path[index] = false;
                continue;
            }
            Frame::Enter(index, depth) => (index, depth),
        };
        if index >= ops.len() {
            continue;
        }
        if on_path[index] {
            continue;
        }
        if start_depths[index].is_some_and(|seen| seen >= depth) {
            continue;
        }
        on_path[index] = true;
        start_depths[index] = Some(depth);
        work.push(Frame::Leave(index));

        let op = ops[index].op;
        let depth = depth + i32::from(op.stack_effect());
        if depth < 0 {
            return Err(ImbalancedStackError { index, depth });
        }
        max_depth = max_depth.max(depth);

        if !op.is_unconditional_jump() {
            work.push(Frame::Enter(index + 1, depth));
        }
        if op.is_jump() {
            if let Arg::Jump(target) = ops[index].arg {
                let mut target_depth = depth;
                if op.is_exception_setup() {
                    target_depth += 3;
                    max_depth = max_depth.max(target_depth);
                } else if op.is_iterate() {
                    target_depth -= 2;
                }
                work.push(Frame::Enter(target.index(), target_depth));
            }
        }
    }

    Ok(u16::try_from(max_depth).unwrap_or(u16::MAX))
}
