use crate::types::Type;
use crate::values::{BlockId, FuncId, SourceLocation, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    Alloca {
        elem: Type,
        count: Value,
    },
    Load {
        addr: Value,
        ty: Type,
    },
    Store {
        value: Value,
        addr: Value,
    },
    Binary {
        op: BinaryOp,
        left: Value,
        right: Value,
    },
    Compare {
        pred: ComparePredicate,
        left: Value,
        right: Value,
    },
    /// Address arithmetic: `base + offset` bytes.
    Offset {
        base: Value,
        offset: Value,
    },
    Cast {
        value: Value,
        to: Type,
    },
    Phi {
        incoming: Vec<(BlockId, Value)>,
    },
    Call {
        callee: Value,
        args: Vec<Value>,
    },
    MemCopy {
        dst: Value,
        src: Value,
        len: Value,
    },
    MemFill {
        dst: Value,
        byte: Value,
        len: Value,
    },
    Branch {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Jump {
        target: BlockId,
    },
    Return {
        value: Option<Value>,
    },
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparePredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstKind,
    pub block: BlockId,
    pub location: Option<SourceLocation>,
}

impl Instruction {
    pub fn new(kind: InstKind, block: BlockId) -> Self {
        Self {
            kind,
            block,
            location: None,
        }
    }

    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    pub fn operands(&self) -> Vec<&Value> {
        match &self.kind {
            InstKind::Alloca { count, .. } => vec![count],
            InstKind::Load { addr, .. } => vec![addr],
            InstKind::Store { value, addr } => vec![value, addr],
            InstKind::Binary { left, right, .. } | InstKind::Compare { left, right, .. } => {
                vec![left, right]
            }
            InstKind::Offset { base, offset } => vec![base, offset],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Phi { incoming } => incoming.iter().map(|(_, v)| v).collect(),
            InstKind::Call { callee, args } => {
                let mut ops = vec![callee];
                ops.extend(args.iter());
                ops
            }
            InstKind::MemCopy { dst, src, len } => vec![dst, src, len],
            InstKind::MemFill { dst, byte, len } => vec![dst, byte, len],
            InstKind::Branch { cond, .. } => vec![cond],
            InstKind::Return { value } => value.iter().collect(),
            InstKind::Jump { .. } | InstKind::Unreachable => Vec::new(),
        }
    }

    /// The pointer a load or store dereferences.
    pub fn accessed_address(&self) -> Option<&Value> {
        match &self.kind {
            InstKind::Load { addr, .. } | InstKind::Store { addr, .. } => Some(addr),
            _ => None,
        }
    }

    /// Pointer operands whose memory is touched: the address of a load/store,
    /// destination and source of a copy, destination of a fill.
    pub fn touched_pointers(&self) -> Vec<&Value> {
        match &self.kind {
            InstKind::Load { addr, .. } | InstKind::Store { addr, .. } => vec![addr],
            InstKind::MemCopy { dst, src, .. } => vec![dst, src],
            InstKind::MemFill { dst, .. } => vec![dst],
            _ => Vec::new(),
        }
    }

    pub fn is_load_or_store(&self) -> bool {
        matches!(self.kind, InstKind::Load { .. } | InstKind::Store { .. })
    }

    pub fn is_bulk_memory(&self) -> bool {
        matches!(self.kind, InstKind::MemCopy { .. } | InstKind::MemFill { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }

    pub fn is_conditional_branch(&self) -> bool {
        matches!(self.kind, InstKind::Branch { .. })
    }

    /// Conditional or unconditional branch.
    pub fn is_branch(&self) -> bool {
        matches!(self.kind, InstKind::Branch { .. } | InstKind::Jump { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, InstKind::Return { .. })
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Branch { .. }
                | InstKind::Jump { .. }
                | InstKind::Return { .. }
                | InstKind::Unreachable
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, InstKind::Call { .. })
    }

    /// Statically known callee of a direct call.
    pub fn called_function(&self) -> Option<FuncId> {
        match &self.kind {
            InstKind::Call { callee, .. } => callee.as_function(),
            _ => None,
        }
    }

    pub fn call_args(&self) -> &[Value] {
        match &self.kind {
            InstKind::Call { args, .. } => args,
            _ => &[],
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match &self.kind {
            InstKind::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            InstKind::Jump { target } => vec![*target],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::InstId;

    #[test]
    fn test_touched_pointers() {
        let block = BlockId(0);
        let copy = Instruction::new(
            InstKind::MemCopy {
                dst: Value::Inst(InstId(1)),
                src: Value::Inst(InstId(2)),
                len: Value::i64(16),
            },
            block,
        );
        assert_eq!(
            copy.touched_pointers(),
            vec![&Value::Inst(InstId(1)), &Value::Inst(InstId(2))]
        );
        assert!(copy.accessed_address().is_none());
        assert!(copy.is_bulk_memory());

        let store = Instruction::new(
            InstKind::Store {
                value: Value::i32(7),
                addr: Value::Inst(InstId(3)),
            },
            block,
        );
        assert_eq!(store.accessed_address(), Some(&Value::Inst(InstId(3))));
    }

    #[test]
    fn test_branch_successors() {
        let br = Instruction::new(
            InstKind::Branch {
                cond: Value::Inst(InstId(0)),
                then_block: BlockId(1),
                else_block: BlockId(2),
            },
            BlockId(0),
        );
        assert!(br.is_conditional_branch());
        assert!(br.is_terminator());
        assert_eq!(br.successors(), vec![BlockId(1), BlockId(2)]);
    }
}
