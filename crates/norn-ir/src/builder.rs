//! Per-block instruction builder.
//!
//! One factory per instruction variant. Each factory allocates the
//! instruction in the function's value arena, appends it to the block,
//! checks operand types against the instruction's declared input types, and
//! for terminators registers the instruction in the target blocks' referrer
//! sets. Appending to an already-terminated block is a programmer error.

use crate::{
    BinOp, BlockId, CacheId, EsBinOp, EsUnaryOp, FuncId, Function, Instr, IrType, NameKey, Value,
    ValueId,
};

pub struct Builder<'f> {
    fun: &'f mut Function,
    block: BlockId,
}

impl<'f> Builder<'f> {
    pub(crate) fn new(fun: &'f mut Function, block: BlockId) -> Self {
        Builder { fun, block }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    fn ty(&self, value: ValueId) -> &IrType {
        &self.fun.value(value).ty
    }

    fn assert_ty(&self, value: ValueId, expected: &IrType, what: &str) {
        assert!(
            self.ty(value) == expected,
            "{} operand must be {}, got {}",
            what,
            expected,
            self.ty(value)
        );
    }

    fn assert_value(&self, value: ValueId, what: &str) {
        self.assert_ty(value, &IrType::Value, what);
    }

    fn assert_value_slice(&self, value: ValueId, what: &str) {
        assert!(
            self.ty(value).element() == Some(&IrType::Value),
            "{} operand must be a value array or pointer, got {}",
            what,
            self.ty(value)
        );
    }

    fn append(&mut self, instr: Instr, ty: IrType) -> ValueId {
        assert!(
            !instr.is_terminator(),
            "terminators must go through append_terminator"
        );
        assert!(
            !self.fun.is_terminated(self.block),
            "cannot append to a terminated block"
        );
        let id = self.fun.push_value(Value::new_instr(instr, ty));
        self.fun.block_mut(self.block).instrs.push(id);
        id
    }

    fn append_terminator(&mut self, instr: Instr) -> ValueId {
        assert!(
            !self.fun.is_terminated(self.block),
            "block already has a terminator"
        );
        let targets = instr.branch_targets();
        let id = self.fun.push_value(Value::new_instr(instr, IrType::Void));
        self.fun.block_mut(self.block).instrs.push(id);
        for target in targets {
            self.fun.block_mut(target).referrers.insert(id);
        }
        id
    }

    // -- Arguments object ---------------------------------------------------

    pub fn args_obj_init(&mut self, argc: usize) -> ValueId {
        self.append(Instr::ArgsObjInit { argc }, IrType::Value)
    }

    pub fn args_obj_link(&mut self, args: ValueId, index: usize, value: ValueId) -> ValueId {
        self.assert_value(args, "args_obj_link args");
        self.assert_ty(value, &IrType::pointer(IrType::Value), "args_obj_link value");
        self.append(Instr::ArgsObjLink { args, index, value }, IrType::Void)
    }

    // -- Stack arrays -------------------------------------------------------

    pub fn arr_get(&mut self, index: usize, array: ValueId) -> ValueId {
        let elem = self.check_array_index(index, array, "arr_get");
        self.append(Instr::ArrGet { index, array }, elem)
    }

    pub fn arr_put(&mut self, index: usize, array: ValueId, value: ValueId) -> ValueId {
        let elem = self.check_array_index(index, array, "arr_put");
        self.assert_ty(value, &elem, "arr_put value");
        self.append(Instr::ArrPut { index, array, value }, IrType::Void)
    }

    fn check_array_index(&self, index: usize, array: ValueId, what: &str) -> IrType {
        let ty = self.ty(array);
        if let IrType::Array(_, len) = ty {
            assert!(index < *len, "{} index {} out of range {}", what, index, len);
        }
        ty.element()
            .unwrap_or_else(|| panic!("{} operand must be an array or pointer, got {}", what, ty))
            .clone()
    }

    // -- Typed binary -------------------------------------------------------

    pub fn bin_add(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.bin(BinOp::Add, left, right)
    }

    pub fn bin_sub(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.bin(BinOp::Sub, left, right)
    }

    pub fn bin_or(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.bin(BinOp::Or, left, right)
    }

    pub fn bin_eq(&mut self, left: ValueId, right: ValueId) -> ValueId {
        self.bin(BinOp::Eq, left, right)
    }

    fn bin(&mut self, op: BinOp, left: ValueId, right: ValueId) -> ValueId {
        assert!(
            self.ty(left) == self.ty(right),
            "bin operands must agree, got {} and {}",
            self.ty(left),
            self.ty(right)
        );
        let ty = match op {
            BinOp::Eq => IrType::Boolean,
            _ => self.ty(left).clone(),
        };
        self.append(Instr::Bin { op, left, right }, ty)
    }

    // -- Extra bindings -----------------------------------------------------

    pub fn bnd_extra_init(&mut self, count: usize) -> ValueId {
        self.append(
            Instr::BndExtraInit { count },
            IrType::pointer(IrType::Value),
        )
    }

    pub fn bnd_extra_ptr(&mut self, hops: usize) -> ValueId {
        self.append(Instr::BndExtraPtr { hops }, IrType::pointer(IrType::Value))
    }

    // -- Calls --------------------------------------------------------------

    pub fn call(&mut self, fun: ValueId, argc: usize, argv: ValueId, result: ValueId) -> ValueId {
        self.assert_value(fun, "call fun");
        self.check_call(argc, argv, result, "call");
        self.append(
            Instr::Call {
                fun,
                argc,
                argv,
                result,
            },
            IrType::Boolean,
        )
    }

    pub fn call_keyed(
        &mut self,
        object: ValueId,
        key: NameKey,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    ) -> ValueId {
        self.assert_value(object, "call_keyed object");
        self.check_call(argc, argv, result, "call_keyed");
        self.append(
            Instr::CallKeyed {
                object,
                key,
                argc,
                argv,
                result,
            },
            IrType::Boolean,
        )
    }

    pub fn call_keyed_slow(
        &mut self,
        object: ValueId,
        key: ValueId,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    ) -> ValueId {
        self.assert_value(object, "call_keyed_slow object");
        self.assert_value(key, "call_keyed_slow key");
        self.check_call(argc, argv, result, "call_keyed_slow");
        self.append(
            Instr::CallKeyedSlow {
                object,
                key,
                argc,
                argv,
                result,
            },
            IrType::Boolean,
        )
    }

    pub fn call_named(
        &mut self,
        key: NameKey,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    ) -> ValueId {
        self.check_call(argc, argv, result, "call_named");
        self.append(
            Instr::CallNamed {
                key,
                argc,
                argv,
                result,
            },
            IrType::Boolean,
        )
    }

    pub fn call_new(
        &mut self,
        fun: ValueId,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    ) -> ValueId {
        self.assert_value(fun, "call_new fun");
        self.check_call(argc, argv, result, "call_new");
        self.append(
            Instr::CallNew {
                fun,
                argc,
                argv,
                result,
            },
            IrType::Boolean,
        )
    }

    fn check_call(&self, argc: usize, argv: ValueId, result: ValueId, what: &str) {
        self.assert_value_slice(argv, what);
        if let IrType::Array(_, len) = self.ty(argv) {
            assert!(argc <= *len, "{} argc {} exceeds argv length {}", what, argc, len);
        }
        self.assert_value(result, what);
    }

    // -- Memory -------------------------------------------------------------

    pub fn mem_alloc(&mut self, ty: IrType) -> ValueId {
        self.append(Instr::MemAlloc { ty: ty.clone() }, ty)
    }

    pub fn mem_store(&mut self, dst: ValueId, src: ValueId) -> ValueId {
        assert!(
            self.ty(dst) == self.ty(src),
            "mem_store types must agree, got {} and {}",
            self.ty(dst),
            self.ty(src)
        );
        self.append(Instr::MemStore { dst, src }, IrType::Void)
    }

    /// Takes the address of one element; the base value escapes and becomes
    /// persistent.
    pub fn mem_elm_ptr(&mut self, base: ValueId, index: usize) -> ValueId {
        let elem = self.check_array_index(index, base, "mem_elm_ptr");
        self.fun.make_persistent(base);
        self.append(Instr::MemElmPtr { base, index }, IrType::pointer(elem))
    }

    // -- Value coercion -----------------------------------------------------

    pub fn val_to_bool(&mut self, value: ValueId) -> ValueId {
        self.assert_value(value, "val_to_bool");
        self.append(Instr::ValToBool { value }, IrType::Boolean)
    }

    pub fn val_to_double(&mut self, value: ValueId, result: ValueId) -> ValueId {
        self.assert_value(value, "val_to_double");
        self.assert_ty(result, &IrType::Double, "val_to_double result");
        self.append(Instr::ValToDouble { value, result }, IrType::Boolean)
    }

    pub fn val_to_str(&mut self, value: ValueId, result: ValueId) -> ValueId {
        self.assert_value(value, "val_to_str");
        self.assert_ty(result, &IrType::Str, "val_to_str result");
        self.append(Instr::ValToStr { value, result }, IrType::Boolean)
    }

    pub fn val_from_bool(&mut self, value: ValueId) -> ValueId {
        self.assert_ty(value, &IrType::Boolean, "val_from_bool");
        self.append(Instr::ValFromBool { value }, IrType::Value)
    }

    pub fn val_from_double(&mut self, value: ValueId) -> ValueId {
        self.assert_ty(value, &IrType::Double, "val_from_double");
        self.append(Instr::ValFromDouble { value }, IrType::Value)
    }

    pub fn val_from_str(&mut self, value: ValueId) -> ValueId {
        self.assert_ty(value, &IrType::Str, "val_from_str");
        self.append(Instr::ValFromStr { value }, IrType::Value)
    }

    pub fn val_is_null(&mut self, value: ValueId) -> ValueId {
        self.assert_value(value, "val_is_null");
        self.append(Instr::ValIsNull { value }, IrType::Boolean)
    }

    pub fn val_is_undefined(&mut self, value: ValueId) -> ValueId {
        self.assert_value(value, "val_is_undefined");
        self.append(Instr::ValIsUndefined { value }, IrType::Boolean)
    }

    pub fn val_tst_coerc(&mut self, value: ValueId) -> ValueId {
        self.assert_value(value, "val_tst_coerc");
        self.append(Instr::ValTstCoerc { value }, IrType::Boolean)
    }

    // -- Context ------------------------------------------------------------

    pub fn ctx_set_strict(&mut self, strict: bool) -> ValueId {
        self.append(Instr::CtxSetStrict { strict }, IrType::Void)
    }

    pub fn ctx_enter_catch(&mut self, key: NameKey) -> ValueId {
        self.append(Instr::CtxEnterCatch { key }, IrType::Boolean)
    }

    pub fn ctx_enter_with(&mut self, value: ValueId) -> ValueId {
        self.assert_value(value, "ctx_enter_with");
        self.append(Instr::CtxEnterWith { value }, IrType::Boolean)
    }

    pub fn ctx_leave(&mut self) -> ValueId {
        self.append(Instr::CtxLeave, IrType::Void)
    }

    pub fn ctx_this(&mut self) -> ValueId {
        self.append(Instr::CtxThis, IrType::Value)
    }

    pub fn ctx_get(&mut self, key: NameKey, result: ValueId, cache_id: CacheId) -> ValueId {
        self.assert_value(result, "ctx_get result");
        self.append(
            Instr::CtxGet {
                key,
                result,
                cache_id,
            },
            IrType::Boolean,
        )
    }

    pub fn ctx_put(&mut self, key: NameKey, value: ValueId, cache_id: CacheId) -> ValueId {
        self.assert_value(value, "ctx_put value");
        self.append(
            Instr::CtxPut {
                key,
                value,
                cache_id,
            },
            IrType::Boolean,
        )
    }

    pub fn ctx_del(&mut self, key: NameKey, result: ValueId) -> ValueId {
        self.assert_value(result, "ctx_del result");
        self.append(Instr::CtxDel { key, result }, IrType::Boolean)
    }

    // -- Exception state ----------------------------------------------------

    pub fn ex_save_state(&mut self) -> ValueId {
        self.append(Instr::ExSaveState, IrType::exception_state())
    }

    pub fn ex_load_state(&mut self, state: ValueId) -> ValueId {
        self.assert_ty(state, &IrType::exception_state(), "ex_load_state");
        self.append(Instr::ExLoadState { state }, IrType::Void)
    }

    pub fn ex_set(&mut self, value: ValueId) -> ValueId {
        self.assert_value(value, "ex_set");
        self.append(Instr::ExSet { value }, IrType::Void)
    }

    pub fn ex_clear(&mut self) -> ValueId {
        self.append(Instr::ExClear, IrType::Void)
    }

    // -- Declarations and links ---------------------------------------------

    pub fn init_args(&mut self, dst: ValueId, prmc: usize) -> ValueId {
        self.assert_value_slice(dst, "init_args dst");
        self.append(Instr::InitArgs { dst, prmc }, IrType::Void)
    }

    pub fn decl_var(&mut self, key: NameKey, is_strict: bool) -> ValueId {
        self.append(Instr::DeclVar { key, is_strict }, IrType::Boolean)
    }

    pub fn decl_fun(&mut self, key: NameKey, is_strict: bool, fun: ValueId) -> ValueId {
        self.assert_value(fun, "decl_fun fun");
        self.append(Instr::DeclFun { key, is_strict, fun }, IrType::Boolean)
    }

    pub fn decl_prm(
        &mut self,
        key: NameKey,
        is_strict: bool,
        index: usize,
        array: ValueId,
    ) -> ValueId {
        self.assert_value_slice(array, "decl_prm array");
        self.append(
            Instr::DeclPrm {
                key,
                is_strict,
                index,
                array,
            },
            IrType::Boolean,
        )
    }

    pub fn link_var(&mut self, key: NameKey, is_strict: bool, value: ValueId) -> ValueId {
        self.assert_ty(value, &IrType::pointer(IrType::Value), "link_var value");
        self.append(
            Instr::LinkVar {
                key,
                is_strict,
                value,
            },
            IrType::Void,
        )
    }

    pub fn link_fun(&mut self, key: NameKey, is_strict: bool, value: ValueId) -> ValueId {
        self.assert_ty(value, &IrType::pointer(IrType::Value), "link_fun value");
        self.append(
            Instr::LinkFun {
                key,
                is_strict,
                value,
            },
            IrType::Void,
        )
    }

    pub fn link_prm(&mut self, key: NameKey, is_strict: bool, value: ValueId) -> ValueId {
        self.assert_ty(value, &IrType::pointer(IrType::Value), "link_prm value");
        self.append(
            Instr::LinkPrm {
                key,
                is_strict,
                value,
            },
            IrType::Void,
        )
    }

    // -- Properties ---------------------------------------------------------

    pub fn prp_def_data(&mut self, object: ValueId, key: ValueId, value: ValueId) -> ValueId {
        self.assert_value(object, "prp_def_data object");
        self.assert_value(key, "prp_def_data key");
        self.assert_value(value, "prp_def_data value");
        self.append(Instr::PrpDefData { object, key, value }, IrType::Boolean)
    }

    pub fn prp_def_accessor(
        &mut self,
        object: ValueId,
        key: NameKey,
        fun: ValueId,
        is_setter: bool,
    ) -> ValueId {
        self.assert_value(object, "prp_def_accessor object");
        self.assert_value(fun, "prp_def_accessor fun");
        self.append(
            Instr::PrpDefAccessor {
                object,
                key,
                fun,
                is_setter,
            },
            IrType::Boolean,
        )
    }

    pub fn prp_it_new(&mut self, object: ValueId) -> ValueId {
        self.assert_value(object, "prp_it_new object");
        self.append(Instr::PrpItNew { object }, IrType::property_iterator())
    }

    pub fn prp_it_next(&mut self, iterator: ValueId, result: ValueId) -> ValueId {
        self.assert_ty(iterator, &IrType::property_iterator(), "prp_it_next iterator");
        self.assert_value(result, "prp_it_next result");
        self.append(Instr::PrpItNext { iterator, result }, IrType::Boolean)
    }

    pub fn prp_get(&mut self, object: ValueId, key: NameKey, result: ValueId) -> ValueId {
        self.assert_value(object, "prp_get object");
        self.assert_value(result, "prp_get result");
        self.append(Instr::PrpGet { object, key, result }, IrType::Boolean)
    }

    pub fn prp_get_slow(&mut self, object: ValueId, key: ValueId, result: ValueId) -> ValueId {
        self.assert_value(object, "prp_get_slow object");
        self.assert_value(key, "prp_get_slow key");
        self.assert_value(result, "prp_get_slow result");
        self.append(
            Instr::PrpGetSlow {
                object,
                key,
                result,
            },
            IrType::Boolean,
        )
    }

    pub fn prp_put(&mut self, object: ValueId, key: NameKey, value: ValueId) -> ValueId {
        self.assert_value(object, "prp_put object");
        self.assert_value(value, "prp_put value");
        self.append(Instr::PrpPut { object, key, value }, IrType::Boolean)
    }

    pub fn prp_put_slow(&mut self, object: ValueId, key: ValueId, value: ValueId) -> ValueId {
        self.assert_value(object, "prp_put_slow object");
        self.assert_value(key, "prp_put_slow key");
        self.assert_value(value, "prp_put_slow value");
        self.append(Instr::PrpPutSlow { object, key, value }, IrType::Boolean)
    }

    pub fn prp_del(&mut self, object: ValueId, key: NameKey, result: ValueId) -> ValueId {
        self.assert_value(object, "prp_del object");
        self.assert_value(result, "prp_del result");
        self.append(Instr::PrpDel { object, key, result }, IrType::Boolean)
    }

    pub fn prp_del_slow(&mut self, object: ValueId, key: ValueId, result: ValueId) -> ValueId {
        self.assert_value(object, "prp_del_slow object");
        self.assert_value(key, "prp_del_slow key");
        self.assert_value(result, "prp_del_slow result");
        self.append(
            Instr::PrpDelSlow {
                object,
                key,
                result,
            },
            IrType::Boolean,
        )
    }

    // -- Script-level constructors ------------------------------------------

    pub fn es_new_arr(&mut self, length: usize, values: ValueId) -> ValueId {
        self.assert_value_slice(values, "es_new_arr values");
        self.append(Instr::EsNewArr { length, values }, IrType::Value)
    }

    pub fn es_new_fun(&mut self, fun: FuncId, param_count: usize, is_strict: bool) -> ValueId {
        self.append(
            Instr::EsNewFun {
                fun,
                param_count,
                is_strict,
            },
            IrType::Value,
        )
    }

    pub fn es_new_fun_expr(&mut self, fun: FuncId, param_count: usize, is_strict: bool) -> ValueId {
        self.append(
            Instr::EsNewFunExpr {
                fun,
                param_count,
                is_strict,
            },
            IrType::Value,
        )
    }

    pub fn es_new_obj(&mut self) -> ValueId {
        self.append(Instr::EsNewObj, IrType::Value)
    }

    pub fn es_new_rex(&mut self, pattern: impl Into<String>, flags: impl Into<String>) -> ValueId {
        self.append(
            Instr::EsNewRex {
                pattern: pattern.into(),
                flags: flags.into(),
            },
            IrType::Value,
        )
    }

    // -- Script arithmetic --------------------------------------------------

    pub fn es_bin(
        &mut self,
        op: EsBinOp,
        left: ValueId,
        right: ValueId,
        result: ValueId,
    ) -> ValueId {
        self.assert_value(left, "es_bin left");
        self.assert_value(right, "es_bin right");
        self.assert_value(result, "es_bin result");
        self.append(
            Instr::EsBin {
                op,
                left,
                right,
                result,
            },
            IrType::Boolean,
        )
    }

    pub fn es_unary(&mut self, op: EsUnaryOp, operand: ValueId, result: ValueId) -> ValueId {
        self.assert_value(operand, "es_unary operand");
        self.assert_value(result, "es_unary result");
        self.append(
            Instr::EsUnary {
                op,
                operand,
                result,
            },
            IrType::Boolean,
        )
    }

    // -- Terminators --------------------------------------------------------

    pub fn br(&mut self, condition: ValueId, then_block: BlockId, else_block: BlockId) -> ValueId {
        self.assert_ty(condition, &IrType::Boolean, "br condition");
        self.append_terminator(Instr::Br {
            condition,
            then_block,
            else_block,
        })
    }

    pub fn jmp(&mut self, target: BlockId) -> ValueId {
        self.append_terminator(Instr::Jmp { target })
    }

    pub fn ret(&mut self, value: ValueId) -> ValueId {
        self.assert_ty(value, &IrType::Boolean, "ret value");
        self.append_terminator(Instr::Ret { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referrer_registration() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let then_block = fun.new_block();
        let else_block = fun.new_block();

        let cond = fun.const_boolean(true);
        let br = fun.builder(entry).br(cond, then_block, else_block);

        assert!(fun.block(then_block).referrers.contains(&br));
        assert!(fun.block(else_block).referrers.contains(&br));
        assert!(fun.is_terminated(entry));
    }

    #[test]
    #[should_panic(expected = "terminated")]
    fn test_append_after_terminator_panics() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let target = fun.new_block();
        fun.builder(entry).jmp(target);
        fun.builder(entry).es_new_obj();
    }

    #[test]
    #[should_panic(expected = "terminator")]
    fn test_double_terminator_panics() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let target = fun.new_block();
        fun.builder(entry).jmp(target);
        fun.builder(entry).jmp(target);
    }

    #[test]
    #[should_panic(expected = "must be")]
    fn test_operand_type_mismatch_panics() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let d = fun.const_double(1.0);
        // val_to_bool requires a value operand, not a double.
        fun.builder(entry).val_to_bool(d);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_array_index_out_of_range_panics() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let arr = fun
            .builder(entry)
            .mem_alloc(IrType::array(IrType::Value, 2));
        fun.builder(entry).arr_get(2, arr);
    }

    #[test]
    fn test_mem_elm_ptr_marks_base_persistent() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let arr = fun
            .builder(entry)
            .mem_alloc(IrType::array(IrType::Value, 2));
        assert!(!fun.value(arr).persistent);
        let ptr = fun.builder(entry).mem_elm_ptr(arr, 0);
        assert!(fun.value(arr).persistent);
        assert_eq!(fun.value(ptr).ty, IrType::pointer(IrType::Value));
    }

    #[test]
    fn test_result_types() {
        let mut fun = Function::new("test", false);
        let entry = fun.entry();
        let mut b = fun.builder(entry);
        let obj = b.es_new_obj();
        let it = b.prp_it_new(obj);
        let slot = b.mem_alloc(IrType::Value);
        let next = b.prp_it_next(it, slot);
        let state = b.ex_save_state();

        assert_eq!(fun.value(obj).ty, IrType::Value);
        assert_eq!(fun.value(it).ty, IrType::property_iterator());
        assert_eq!(fun.value(next).ty, IrType::Boolean);
        assert_eq!(fun.value(state).ty, IrType::exception_state());
    }
}
