use crate::instructions::Instruction;
use crate::types::Signature;
use crate::values::{BlockId, FuncId, GlobalId, InstId, StrId, Value};
use crate::{IrError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    pub signature: Signature,
    /// Layout order; the first block is the entry.
    pub blocks: Vec<BlockId>,
}

impl Function {
    pub fn new(id: FuncId, name: impl Into<String>, signature: Signature) -> Self {
        Self {
            id,
            name: name.into(),
            signature,
            blocks: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub func: FuncId,
    pub insts: Vec<InstId>,
}

impl BasicBlock {
    pub fn new(id: BlockId, func: FuncId) -> Self {
        Self {
            id,
            func,
            insts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub id: GlobalId,
    pub name: String,
    pub size: u32,
    pub annotations: Vec<String>,
}

impl Global {
    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: IndexMap<FuncId, Function>,
    pub blocks: IndexMap<BlockId, BasicBlock>,
    pub insts: IndexMap<InstId, Instruction>,
    pub globals: IndexMap<GlobalId, Global>,
    pub strings: Vec<String>,
    next_inst: u32,
    next_block: u32,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_function(&mut self, name: impl Into<String>, signature: Signature) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.insert(id, Function::new(id, name, signature));
        id
    }

    pub fn add_global(&mut self, name: impl Into<String>, size: u32) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.insert(
            id,
            Global {
                id,
                name: name.into(),
                size,
                annotations: Vec::new(),
            },
        );
        id
    }

    pub fn annotate_global(&mut self, global: GlobalId, annotation: impl Into<String>) -> Result<()> {
        let global = self
            .globals
            .get_mut(&global)
            .ok_or(IrError::UnknownGlobal(global))?;
        global.annotations.push(annotation.into());
        Ok(())
    }

    pub fn add_block(&mut self, func: FuncId) -> Result<BlockId> {
        let id = BlockId(self.next_block);
        let function = self
            .functions
            .get_mut(&func)
            .ok_or(IrError::UnknownFunction(func))?;
        function.blocks.push(id);
        self.next_block += 1;
        self.blocks.insert(id, BasicBlock::new(id, func));
        Ok(id)
    }

    /// Append an instruction at the end of `block`.
    pub fn append(&mut self, inst: Instruction) -> Result<InstId> {
        let id = self.fresh_inst_id();
        let block = self
            .blocks
            .get_mut(&inst.block)
            .ok_or(IrError::UnknownBlock(inst.block))?;
        block.insts.push(id);
        self.insts.insert(id, inst);
        Ok(id)
    }

    pub(crate) fn fresh_inst_id(&mut self) -> InstId {
        let id = InstId(self.next_inst);
        self.next_inst += 1;
        id
    }

    pub fn inst(&self, id: InstId) -> Result<&Instruction> {
        self.insts.get(&id).ok_or(IrError::UnknownInstruction(id))
    }

    pub fn block(&self, id: BlockId) -> Result<&BasicBlock> {
        self.blocks.get(&id).ok_or(IrError::UnknownBlock(id))
    }

    pub fn function(&self, id: FuncId) -> Result<&Function> {
        self.functions.get(&id).ok_or(IrError::UnknownFunction(id))
    }

    pub fn global(&self, id: GlobalId) -> Result<&Global> {
        self.globals.get(&id).ok_or(IrError::UnknownGlobal(id))
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.values().find(|f| f.name == name)
    }

    pub fn global_by_name(&self, name: &str) -> Option<&Global> {
        self.globals.values().find(|g| g.name == name)
    }

    pub fn function_of(&self, inst: InstId) -> Result<FuncId> {
        let block = self.inst(inst)?.block;
        Ok(self.block(block)?.func)
    }

    pub fn string(&self, id: StrId) -> Option<&str> {
        self.strings.get(id.0 as usize).map(|s| s.as_str())
    }

    /// Name of the function a direct call targets.
    pub fn callee_name(&self, inst: InstId) -> Option<&str> {
        let callee = self.insts.get(&inst)?.called_function()?;
        self.functions.get(&callee).map(|f| f.name.as_str())
    }

    /// Calls whose direct callee is named `name`.
    pub fn calls_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = InstId> + 'a {
        self.insts
            .iter()
            .filter(move |&(&id, _)| self.callee_name(id) == Some(name))
            .map(|(&id, _)| id)
    }

    pub fn string_value(&self, value: &Value) -> Option<&str> {
        match value {
            Value::Str(id) => self.string(*id),
            _ => None,
        }
    }

    pub fn intern_string(&mut self, text: &str) -> StrId {
        if let Some(pos) = self.strings.iter().position(|s| s == text) {
            return StrId(pos as u32);
        }
        self.strings.push(text.to_string());
        StrId((self.strings.len() - 1) as u32)
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::InstKind;
    use crate::types::Type;

    #[test]
    fn test_append_and_lookup() {
        let mut module = Module::new("m");
        let f = module.add_function("main", Signature::default());
        let entry = module.add_block(f).unwrap();
        let ret = module
            .append(Instruction::new(InstKind::Return { value: None }, entry))
            .unwrap();

        assert_eq!(module.function(f).unwrap().entry_block(), Some(entry));
        assert_eq!(module.function_of(ret).unwrap(), f);
        assert!(module.inst(ret).unwrap().is_return());
    }

    #[test]
    fn test_calls_to() {
        let mut module = Module::new("m");
        let free = module.add_function("free", Signature::void(vec![Type::Ptr]));
        let f = module.add_function("main", Signature::default());
        let entry = module.add_block(f).unwrap();
        let call = module
            .append(Instruction::new(
                InstKind::Call {
                    callee: Value::Function(free),
                    args: vec![Value::Undef],
                },
                entry,
            ))
            .unwrap();

        assert_eq!(module.calls_to("free").collect::<Vec<_>>(), vec![call]);
        assert_eq!(module.callee_name(call), Some("free"));
        assert!(module.function(free).unwrap().is_declaration());
    }

    #[test]
    fn test_intern_string_dedups() {
        let mut module = Module::new("m");
        let a = module.intern_string("aes_encrypt");
        let b = module.intern_string("aes_encrypt");
        assert_eq!(a, b);
        assert_eq!(module.string(a), Some("aes_encrypt"));
    }
}
