//! IR function and block definitions.

use std::collections::BTreeSet;
use std::fmt;

use norn_ast::Span;

use crate::{
    BlockId, Builder, Constant, Instr, IrType, Value, ValueId, ValueKind, ValueTag,
};

/// A basic block: a straight-line instruction sequence ending in a
/// terminator.
///
/// Blocks may have an optional label. The terminator, if present, is the
/// last instruction; terminators are not allowed anywhere else. The referrer
/// set holds every terminator instruction (from any block) that targets this
/// block; it is maintained by the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: Option<String>,
    pub instrs: Vec<ValueId>,
    pub referrers: BTreeSet<ValueId>,
}

impl Block {
    fn new(label: Option<String>) -> Self {
        Block {
            label,
            instrs: Vec::new(),
            referrers: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn last_instr(&self) -> Option<ValueId> {
        self.instrs.last().copied()
    }
}

/// An IR function: a value arena plus an ordered list of basic blocks.
///
/// A function always has at least one block, the entry block created at
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub is_global: bool,
    /// Source span of the originating function literal
    pub span: Option<Span>,
    values: Vec<Value>,
    blocks: Vec<Block>,
}

impl Function {
    pub fn new(name: impl Into<String>, is_global: bool) -> Self {
        Function {
            name: name.into(),
            is_global,
            span: None,
            values: Vec::new(),
            blocks: vec![Block::new(None)],
        }
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Creates a new unlabeled basic block.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(None));
        id
    }

    /// Creates a new labeled basic block.
    pub fn new_block_labeled(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(Some(label.into())));
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Marks a value as live for the whole function lifetime.
    pub fn make_persistent(&mut self, id: ValueId) {
        self.values[id.0 as usize].persistent = true;
    }

    pub(crate) fn push_value(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(value);
        id
    }

    /// True if the block's last instruction is a terminator.
    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.block(block)
            .last_instr()
            .map(|id| self.value(id).as_instr().is_some_and(Instr::is_terminator))
            .unwrap_or(false)
    }

    /// Removes the block's terminator, unregistering it from the referrer
    /// sets of its targets. Returns the removed instruction id.
    pub fn remove_terminator(&mut self, block: BlockId) -> Option<ValueId> {
        if !self.is_terminated(block) {
            return None;
        }
        let id = self.block_mut(block).instrs.pop().expect("terminated block");
        let targets = self
            .value(id)
            .as_instr()
            .map(Instr::branch_targets)
            .unwrap_or_default();
        for target in targets {
            self.block_mut(target).referrers.remove(&id);
        }
        Some(id)
    }

    /// Obtains a builder appending to the given block.
    pub fn builder(&mut self, block: BlockId) -> Builder<'_> {
        Builder::new(self, block)
    }

    // Constant constructors. Constants are arena values like instructions,
    // but do not appear in any block.

    pub fn push_const(&mut self, constant: Constant) -> ValueId {
        let ty = self.const_type(&constant);
        self.push_value(Value::new_const(constant, ty))
    }

    fn const_type(&self, constant: &Constant) -> IrType {
        match constant {
            Constant::ArrayElement { array, .. } => self
                .value(*array)
                .ty
                .element()
                .expect("array element base must be an array or pointer")
                .clone(),
            Constant::Callee => IrType::Value,
            Constant::Return => IrType::Value,
            Constant::Null(ty) => ty.clone(),
            Constant::Boolean(_) => IrType::Boolean,
            Constant::Double(_) => IrType::Double,
            Constant::StringifiedDouble(_) => IrType::Double,
            Constant::Str(_) => IrType::Str,
            Constant::Value(_) => IrType::Value,
        }
    }

    pub fn const_boolean(&mut self, value: bool) -> ValueId {
        self.push_const(Constant::Boolean(value))
    }

    pub fn const_double(&mut self, value: f64) -> ValueId {
        self.push_const(Constant::Double(value))
    }

    pub fn const_stringified_double(&mut self, text: impl Into<String>) -> ValueId {
        self.push_const(Constant::StringifiedDouble(text.into()))
    }

    pub fn const_string(&mut self, text: impl Into<String>) -> ValueId {
        self.push_const(Constant::Str(text.into()))
    }

    pub fn const_null(&mut self, ty: IrType) -> ValueId {
        self.push_const(Constant::Null(ty))
    }

    pub fn const_value(&mut self, tag: ValueTag) -> ValueId {
        self.push_const(Constant::Value(tag))
    }

    pub fn const_array_element(&mut self, array: ValueId, index: usize) -> ValueId {
        self.push_const(Constant::ArrayElement { array, index })
    }

    pub fn const_callee(&mut self) -> ValueId {
        self.push_const(Constant::Callee)
    }

    pub fn const_return(&mut self) -> ValueId {
        self.push_const(Constant::Return)
    }
}

// ---------------------------------------------------------------------------
// Textual dump
// ---------------------------------------------------------------------------

fn fmt_key(key: crate::NameKey) -> String {
    if key & crate::STRING_KEY_FLAG != 0 {
        format!("s{}", key & !crate::STRING_KEY_FLAG)
    } else {
        format!("i{}", key)
    }
}

fn fmt_operand(fun: &Function, id: ValueId) -> String {
    match &fun.value(id).kind {
        ValueKind::Instr(_) => format!("%{}", id.0),
        ValueKind::Const(constant) => match constant {
            Constant::ArrayElement { array, index } => {
                format!("{}[{}]", fmt_operand(fun, *array), index)
            }
            Constant::Callee => "callee".to_string(),
            Constant::Return => "retval".to_string(),
            Constant::Null(ty) => format!("null {}", ty),
            Constant::Boolean(b) => b.to_string(),
            Constant::Double(v) => v.to_string(),
            Constant::StringifiedDouble(text) => text.clone(),
            Constant::Str(text) => format!("{:?}", text),
            Constant::Value(tag) => match tag {
                ValueTag::Nothing => "nothing".to_string(),
                ValueTag::Undefined => "undefined".to_string(),
                ValueTag::Null => "null".to_string(),
                ValueTag::True => "true".to_string(),
                ValueTag::False => "false".to_string(),
            },
        },
    }
}

fn write_instr(f: &mut fmt::Formatter<'_>, fun: &Function, id: ValueId) -> fmt::Result {
    let value = fun.value(id);
    let instr = value.as_instr().expect("block instruction");

    write!(f, "  ")?;
    if !value.ty.is_void() {
        write!(f, "%{} = ", id.0)?;
    }
    write!(f, "{}", instr.mnemonic())?;

    let mut args: Vec<String> = Vec::new();
    match instr {
        Instr::ArgsObjInit { argc } => args.push(argc.to_string()),
        Instr::ArgsObjLink { index, .. } => args.push(index.to_string()),
        Instr::ArrGet { index, .. } | Instr::ArrPut { index, .. } => {
            args.push(index.to_string());
        }
        Instr::BndExtraInit { count } => args.push(count.to_string()),
        Instr::BndExtraPtr { hops } => args.push(hops.to_string()),
        Instr::CallKeyed { key, .. } | Instr::CallNamed { key, .. } => {
            args.push(fmt_key(*key));
        }
        Instr::MemAlloc { ty } => args.push(ty.to_string()),
        Instr::MemElmPtr { index, .. } => args.push(index.to_string()),
        Instr::CtxSetStrict { strict } => args.push(strict.to_string()),
        Instr::CtxEnterCatch { key }
        | Instr::CtxGet { key, .. }
        | Instr::CtxPut { key, .. }
        | Instr::CtxDel { key, .. } => args.push(fmt_key(*key)),
        Instr::DeclVar { key, .. }
        | Instr::DeclFun { key, .. }
        | Instr::DeclPrm { key, .. }
        | Instr::LinkVar { key, .. }
        | Instr::LinkFun { key, .. }
        | Instr::LinkPrm { key, .. } => args.push(fmt_key(*key)),
        Instr::PrpDefAccessor { key, is_setter, .. } => {
            args.push(fmt_key(*key));
            args.push(if *is_setter { "set" } else { "get" }.to_string());
        }
        Instr::PrpGet { key, .. } | Instr::PrpPut { key, .. } | Instr::PrpDel { key, .. } => {
            args.push(fmt_key(*key));
        }
        Instr::EsNewArr { length, .. } => args.push(length.to_string()),
        Instr::EsNewFun { fun: id, .. } | Instr::EsNewFunExpr { fun: id, .. } => {
            args.push(id.to_string());
        }
        Instr::EsNewRex { pattern, flags } => {
            args.push(format!("/{}/{}", pattern, flags));
        }
        Instr::Br {
            then_block,
            else_block,
            ..
        } => {
            args.push(then_block.to_string());
            args.push(else_block.to_string());
        }
        Instr::Jmp { target } => args.push(target.to_string()),
        _ => {}
    }
    for operand in instr.operands() {
        args.push(fmt_operand(fun, operand));
    }
    if let Instr::CtxGet { cache_id, .. } | Instr::CtxPut { cache_id, .. } = instr {
        args.push(format!("cid:{}", cache_id));
    }

    if !args.is_empty() {
        write!(f, " {}", args.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "define {} @{} {{",
            if self.is_global { "global" } else { "value" },
            self.name
        )?;
        for (i, block) in self.blocks.iter().enumerate() {
            match &block.label {
                Some(label) => writeln!(f, "bb{} ({}):", i, label)?,
                None => writeln!(f, "bb{}:", i)?,
            }
            for &instr in &block.instrs {
                write_instr(f, self, instr)?;
                writeln!(f)?;
            }
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_has_entry_block() {
        let fun = Function::new("test", false);
        assert_eq!(fun.blocks().len(), 1);
        assert_eq!(fun.entry(), BlockId(0));
        assert!(fun.block(fun.entry()).is_empty());
    }

    #[test]
    fn test_block_creation() {
        let mut fun = Function::new("test", false);
        let b1 = fun.new_block();
        let b2 = fun.new_block_labeled("exit");
        assert_eq!(b1, BlockId(1));
        assert_eq!(b2, BlockId(2));
        assert_eq!(fun.block(b2).label.as_deref(), Some("exit"));
    }

    #[test]
    fn test_constant_types() {
        let mut fun = Function::new("test", false);
        let b = fun.const_boolean(true);
        assert_eq!(fun.value(b).ty, IrType::Boolean);

        let d = fun.const_stringified_double("1.5");
        assert_eq!(fun.value(d).ty, IrType::Double);

        let u = fun.const_value(ValueTag::Undefined);
        assert_eq!(fun.value(u).ty, IrType::Value);

        let n = fun.const_null(IrType::property_iterator());
        assert_eq!(fun.value(n).ty, IrType::property_iterator());
    }

    #[test]
    fn test_array_element_type() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let arr = fun.builder(entry).mem_alloc(IrType::array(IrType::Value, 3));
        let elm = fun.const_array_element(arr, 1);
        assert_eq!(fun.value(elm).ty, IrType::Value);
    }

    #[test]
    fn test_remove_terminator_unregisters_referrer() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let target = fun.new_block();
        let jmp = fun.builder(entry).jmp(target);
        assert!(fun.block(target).referrers.contains(&jmp));

        let removed = fun.remove_terminator(entry);
        assert_eq!(removed, Some(jmp));
        assert!(!fun.block(target).referrers.contains(&jmp));
        assert!(!fun.is_terminated(entry));
    }

    #[test]
    fn test_persistence() {
        let mut fun = Function::new("test", false);
        let v = fun.const_double(1.0);
        assert!(!fun.value(v).persistent);
        fun.make_persistent(v);
        assert!(fun.value(v).persistent);
    }
}
