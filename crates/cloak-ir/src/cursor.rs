use crate::instructions::{InstKind, Instruction};
use crate::module::Module;
use crate::types::Signature;
use crate::values::{BlockId, FuncId, InstId, SourceLocation, Value};
use crate::{IrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorPosition {
    #[default]
    Nowhere,
    Before(InstId),
    After(InstId),
    Bottom(BlockId),
}

/// Inserts instructions into a module at a movable position.
///
/// Consecutive insertions keep program order: inserting twice `Before(x)` yields
/// `new1, new2, x`; inserting twice `After(x)` yields `x, new1, new2`.
pub struct ModuleCursor<'a> {
    position: CursorPosition,
    module: &'a mut Module,
}

impl<'a> ModuleCursor<'a> {
    pub fn new(module: &'a mut Module) -> Self {
        Self {
            position: CursorPosition::Nowhere,
            module,
        }
    }

    pub fn at(module: &'a mut Module, position: CursorPosition) -> Self {
        Self { position, module }
    }

    pub fn position(&self) -> CursorPosition {
        self.position
    }

    pub fn goto_before(&mut self, inst: InstId) {
        self.position = CursorPosition::Before(inst);
    }

    pub fn goto_after(&mut self, inst: InstId) {
        self.position = CursorPosition::After(inst);
    }

    pub fn goto_bottom(&mut self, block: BlockId) {
        self.position = CursorPosition::Bottom(block);
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    pub fn insert(&mut self, kind: InstKind) -> Result<InstId> {
        let (block, index, anchor) = match self.position {
            CursorPosition::Nowhere => return Err(IrError::InvalidInsertPoint),
            CursorPosition::Before(inst) => {
                let (block, index) = self.module.locate(inst)?;
                (block, index, Some(inst))
            }
            CursorPosition::After(inst) => {
                let (block, index) = self.module.locate(inst)?;
                (block, index + 1, Some(inst))
            }
            CursorPosition::Bottom(block) => (block, self.module.block(block)?.insts.len(), None),
        };

        let location = match anchor {
            Some(anchor) => self.module.debug_location_near(anchor),
            None => None,
        };

        let id = self.module.fresh_inst_id();
        self.module
            .insts
            .insert(id, Instruction::new(kind, block).with_location(location));
        self.module
            .blocks
            .get_mut(&block)
            .ok_or(IrError::UnknownBlock(block))?
            .insts
            .insert(index, id);

        if let CursorPosition::After(_) = self.position {
            self.position = CursorPosition::After(id);
        }
        Ok(id)
    }

    pub fn call(&mut self, callee: FuncId, args: Vec<Value>) -> Result<InstId> {
        self.insert(InstKind::Call {
            callee: Value::Function(callee),
            args,
        })
    }
}

impl Module {
    /// Block and index of `inst` inside that block.
    pub fn locate(&self, inst: InstId) -> Result<(BlockId, usize)> {
        let block = self.inst(inst)?.block;
        let index = self
            .block(block)?
            .insts
            .iter()
            .position(|&i| i == inst)
            .ok_or(IrError::UnknownInstruction(inst))?;
        Ok((block, index))
    }

    /// Location of `inst`, or of the instruction right before it.
    pub fn debug_location_near(&self, inst: InstId) -> Option<SourceLocation> {
        if let Some(location) = self.insts.get(&inst).and_then(|i| i.location) {
            return Some(location);
        }
        let (block, index) = self.locate(inst).ok()?;
        let prev = *self.blocks.get(&block)?.insts.get(index.checked_sub(1)?)?;
        self.insts.get(&prev).and_then(|i| i.location)
    }

    /// First instruction at or after `inst` in its block that is not a phi.
    pub fn first_non_phi_from(&self, inst: InstId) -> Result<InstId> {
        let (block, index) = self.locate(inst)?;
        let insts = &self.block(block)?.insts;
        insts[index..]
            .iter()
            .copied()
            .find(|id| self.insts.get(id).map_or(false, |i| !i.is_phi()))
            .ok_or(IrError::NoInsertPoint(block))
    }

    pub fn first_non_phi(&self, block: BlockId) -> Result<InstId> {
        let first = *self
            .block(block)?
            .insts
            .first()
            .ok_or(IrError::NoInsertPoint(block))?;
        self.first_non_phi_from(first)
    }

    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.blocks.get(&block)?.insts.last()?;
        self.insts
            .get(&last)
            .filter(|i| i.is_terminator())
            .map(|_| last)
    }

    /// First return instruction of a defined function.
    pub fn return_instruction(&self, func: FuncId) -> Option<InstId> {
        let function = self.functions.get(&func)?;
        function
            .blocks
            .iter()
            .filter_map(|b| self.blocks.get(b))
            .flat_map(|b| b.insts.iter().copied())
            .find(|id| self.insts.get(id).map_or(false, |i| i.is_return()))
    }

    /// Declare an external function, or return the existing one with that name.
    pub fn declare_function(&mut self, name: &str, signature: Signature) -> FuncId {
        if let Some(existing) = self.function_by_name(name) {
            return existing.id;
        }
        self.add_function(name, signature)
    }

    pub fn string_constant(&mut self, text: &str) -> Value {
        Value::Str(self.intern_string(text))
    }

    pub fn int_constant(&self, value: i64, bits: u8) -> Value {
        Value::int(value, bits)
    }

    pub fn remove_inst(&mut self, inst: InstId) -> Result<Instruction> {
        let (block, index) = self.locate(inst)?;
        if let Some(block) = self.blocks.get_mut(&block) {
            block.insts.remove(index);
        }
        self.insts
            .shift_remove(&inst)
            .ok_or(IrError::UnknownInstruction(inst))
    }

    /// Detach a block and drop every instruction it still holds.
    pub fn remove_block(&mut self, block: BlockId) -> Result<()> {
        let removed = self
            .blocks
            .shift_remove(&block)
            .ok_or(IrError::UnknownBlock(block))?;
        for inst in removed.insts {
            self.insts.shift_remove(&inst);
        }
        if let Some(function) = self.functions.get_mut(&removed.func) {
            function.blocks.retain(|&b| b != block);
        }
        Ok(())
    }
}
