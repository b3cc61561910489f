//! The p-code operation codes this workspace understands.
//!
//! This is not the full p-code instruction set (that belongs to the
//! out-of-scope lifter) — only the opcodes that Heritage, jump-table
//! recovery or Merge inspect or synthesize.

use std::fmt;

/// A p-code opcode.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[allow(non_camel_case_types)]
pub enum Opcode {
    Copy,
    Load,
    Store,
    Branch,
    CBranch,
    BranchInd,
    Call,
    CallInd,
    CallOther,
    Return,
    IntAdd,
    IntSub,
    IntMult,
    IntAnd,
    IntOr,
    IntXor,
    IntLeft,
    IntRight,
    IntSRight,
    IntEqual,
    IntNotEqual,
    IntLess,
    IntSLess,
    IntLessEqual,
    IntSLessEqual,
    IntZext,
    IntSext,
    IntNegate,
    IntNot,
    BoolNegate,
    BoolAnd,
    BoolOr,
    Piece,
    SubPiece,
    Float2Float,
    SegmentOp,
    /// Phi node: one input per predecessor edge of the parent block.
    MultiEqual,
    /// Marker op encoding a side effect (call/store) reaching a range.
    Indirect,
    /// Synthetic "no-op" left behind when an op is cleared but not yet
    /// physically removed from its block's layout.
    Nop,
}

impl Opcode {
    /// Is this one of the two marker opcodes §3 requires to obey special
    /// block-position invariants (`MULTIEQUAL` first, `INDIRECT` paired)?
    pub fn is_marker(self) -> bool {
        matches!(self, Opcode::MultiEqual | Opcode::Indirect)
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Branch | Opcode::CBranch | Opcode::BranchInd | Opcode::Call | Opcode::CallInd | Opcode::Return
        )
    }

    pub fn is_call(self) -> bool {
        matches!(self, Opcode::Call | Opcode::CallInd | Opcode::CallOther)
    }

    /// Opcodes whose output bit-pattern commutes with constant-only other
    /// operands, used by §4.3.1 step 8's `findUnnormalized` walk.
    pub fn is_normalization_step(self) -> bool {
        matches!(self, Opcode::IntAdd | Opcode::IntSub | Opcode::IntZext | Opcode::IntSext)
    }

    /// Evaluate a two-input op given concrete operand values, used by
    /// `CircleRange::push_forward` (`pcode-jumptable`) and by
    /// `PcodeOpData::eval_binary`.
    pub fn eval_binary(self, a: u64, b: u64, mask: u64) -> Option<u64> {
        let r = match self {
            Opcode::IntAdd => a.wrapping_add(b),
            Opcode::IntSub => a.wrapping_sub(b),
            Opcode::IntMult => a.wrapping_mul(b),
            Opcode::IntAnd => a & b,
            Opcode::IntOr => a | b,
            Opcode::IntXor => a ^ b,
            Opcode::IntLeft => a.wrapping_shl(b as u32),
            Opcode::IntRight => a.wrapping_shr(b as u32),
            _ => return None,
        };
        Some(r & mask)
    }

    /// Evaluate a one-input op given a concrete operand value.
    pub fn eval_unary(self, a: u64, in_mask: u64, out_mask: u64) -> Option<u64> {
        let r = match self {
            Opcode::IntZext => a & in_mask,
            Opcode::IntSext => {
                let sign_bit = (in_mask >> 1).wrapping_add(1);
                if a & sign_bit != 0 {
                    a | !in_mask
                } else {
                    a & in_mask
                }
            }
            Opcode::IntNegate => (!a).wrapping_add(1),
            Opcode::IntNot => !a,
            Opcode::Copy => a,
            _ => return None,
        };
        Some(r & out_mask)
    }

    /// Reverse of `eval_binary` for the "other" constant operand: given the
    /// known constant operand and its position, and the desired output
    /// value, recover the input that would produce it (§4.3.1 step 9's
    /// `PcodeOp.recoverInputBinary`).
    pub fn recover_input_binary(self, const_is_second: bool, constant: u64, output: u64, mask: u64) -> Option<u64> {
        let r = match self {
            Opcode::IntAdd => output.wrapping_sub(constant),
            Opcode::IntSub => {
                if const_is_second {
                    output.wrapping_add(constant)
                } else {
                    constant.wrapping_sub(output)
                }
            }
            Opcode::IntXor => output ^ constant,
            _ => return None,
        };
        Some(r & mask)
    }

    /// Reverse of `eval_unary`, for `PcodeOp.recoverInputUnary`.
    pub fn recover_input_unary(self, output: u64, in_mask: u64) -> Option<u64> {
        let r = match self {
            Opcode::IntZext | Opcode::IntSext | Opcode::Copy => output,
            Opcode::IntNegate => (!output).wrapping_add(1),
            Opcode::IntNot => !output,
            _ => return None,
        };
        Some(r & in_mask)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Opcode::Copy => "COPY",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Branch => "BRANCH",
            Opcode::CBranch => "CBRANCH",
            Opcode::BranchInd => "BRANCHIND",
            Opcode::Call => "CALL",
            Opcode::CallInd => "CALLIND",
            Opcode::CallOther => "CALLOTHER",
            Opcode::Return => "RETURN",
            Opcode::IntAdd => "INT_ADD",
            Opcode::IntSub => "INT_SUB",
            Opcode::IntMult => "INT_MULT",
            Opcode::IntAnd => "INT_AND",
            Opcode::IntOr => "INT_OR",
            Opcode::IntXor => "INT_XOR",
            Opcode::IntLeft => "INT_LEFT",
            Opcode::IntRight => "INT_RIGHT",
            Opcode::IntSRight => "INT_SRIGHT",
            Opcode::IntEqual => "INT_EQUAL",
            Opcode::IntNotEqual => "INT_NOTEQUAL",
            Opcode::IntLess => "INT_LESS",
            Opcode::IntSLess => "INT_SLESS",
            Opcode::IntLessEqual => "INT_LESSEQUAL",
            Opcode::IntSLessEqual => "INT_SLESSEQUAL",
            Opcode::IntZext => "INT_ZEXT",
            Opcode::IntSext => "INT_SEXT",
            Opcode::IntNegate => "INT_NEGATE",
            Opcode::IntNot => "INT_NOT",
            Opcode::BoolNegate => "BOOL_NEGATE",
            Opcode::BoolAnd => "BOOL_AND",
            Opcode::BoolOr => "BOOL_OR",
            Opcode::Piece => "PIECE",
            Opcode::SubPiece => "SUBPIECE",
            Opcode::Float2Float => "FLOAT2FLOAT",
            Opcode::SegmentOp => "SEGMENTOP",
            Opcode::MultiEqual => "MULTIEQUAL",
            Opcode::Indirect => "INDIRECT",
            Opcode::Nop => "NOP",
        };
        f.write_str(s)
    }
}
