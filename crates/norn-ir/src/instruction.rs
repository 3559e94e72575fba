//! IR instructions.
//!
//! Instructions are typed values living in a function's value arena; a block
//! holds them by id in execution order. Runtime-calling instructions produce
//! a `boolean` that is false when the call left a pending exception on the
//! context; the lowering branches on it to reach the active landing pad.

use crate::{BlockId, FuncId, IrType, ValueId};

/// 64-bit interned name/property key. The high bit distinguishes string keys
/// from canonical array-index keys.
pub type NameKey = u64;

/// Set on [`NameKey`]s that identify an interned string rather than an index.
pub const STRING_KEY_FLAG: NameKey = 0x8000_0000_0000_0000;

/// 16-bit per-site inline-cache id for context lookups.
pub type CacheId = u16;

/// Operations of the typed (non-script) binary instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Or,
    Eq,
}

/// Script binary operators with full ECMAScript semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsBinOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Ls,
    Rss,
    Rus,
    Lt,
    Gt,
    Lte,
    Gte,
    In,
    InstanceOf,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    BitAnd,
    BitXor,
    BitOr,
}

/// Script unary operators with full ECMAScript semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsUnaryOp {
    Typeof,
    Neg,
    BitNot,
    LogNot,
}

/// A single IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // Arguments object
    ArgsObjInit {
        argc: usize,
    },
    ArgsObjLink {
        args: ValueId,
        index: usize,
        value: ValueId,
    },

    // Stack arrays
    ArrGet {
        index: usize,
        array: ValueId,
    },
    ArrPut {
        index: usize,
        array: ValueId,
        value: ValueId,
    },

    // Typed binary over non-script primitives
    Bin {
        op: BinOp,
        left: ValueId,
        right: ValueId,
    },

    // Extra-bindings record backing closure captures
    BndExtraInit {
        count: usize,
    },
    BndExtraPtr {
        hops: usize,
    },

    // Calls; `result` is a value slot written by the runtime
    Call {
        fun: ValueId,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    },
    CallKeyed {
        object: ValueId,
        key: NameKey,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    },
    CallKeyedSlow {
        object: ValueId,
        key: ValueId,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    },
    CallNamed {
        key: NameKey,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    },
    CallNew {
        fun: ValueId,
        argc: usize,
        argv: ValueId,
        result: ValueId,
    },

    // Memory
    MemAlloc {
        ty: IrType,
    },
    MemStore {
        dst: ValueId,
        src: ValueId,
    },
    MemElmPtr {
        base: ValueId,
        index: usize,
    },

    // Value coercion and tests
    ValToBool {
        value: ValueId,
    },
    ValToDouble {
        value: ValueId,
        result: ValueId,
    },
    ValToStr {
        value: ValueId,
        result: ValueId,
    },
    ValFromBool {
        value: ValueId,
    },
    ValFromDouble {
        value: ValueId,
    },
    ValFromStr {
        value: ValueId,
    },
    ValIsNull {
        value: ValueId,
    },
    ValIsUndefined {
        value: ValueId,
    },
    /// Fails with a Type error when the value is null or undefined and
    /// therefore unusable as a property access base
    ValTstCoerc {
        value: ValueId,
    },

    // Execution context
    CtxSetStrict {
        strict: bool,
    },
    CtxEnterCatch {
        key: NameKey,
    },
    CtxEnterWith {
        value: ValueId,
    },
    CtxLeave,
    CtxThis,
    CtxGet {
        key: NameKey,
        result: ValueId,
        cache_id: CacheId,
    },
    CtxPut {
        key: NameKey,
        value: ValueId,
        cache_id: CacheId,
    },
    CtxDel {
        key: NameKey,
        result: ValueId,
    },

    // Pending-exception state
    ExSaveState,
    ExLoadState {
        state: ValueId,
    },
    ExSet {
        value: ValueId,
    },
    ExClear,

    // Prologue: copy actual arguments into a slot array
    InitArgs {
        dst: ValueId,
        prmc: usize,
    },

    // Declarations introduce bindings in the current environment; links bind
    // an already-allocated slot address
    DeclVar {
        key: NameKey,
        is_strict: bool,
    },
    DeclFun {
        key: NameKey,
        is_strict: bool,
        fun: ValueId,
    },
    DeclPrm {
        key: NameKey,
        is_strict: bool,
        index: usize,
        array: ValueId,
    },
    LinkVar {
        key: NameKey,
        is_strict: bool,
        value: ValueId,
    },
    LinkFun {
        key: NameKey,
        is_strict: bool,
        value: ValueId,
    },
    LinkPrm {
        key: NameKey,
        is_strict: bool,
        value: ValueId,
    },

    // Properties
    PrpDefData {
        object: ValueId,
        key: ValueId,
        value: ValueId,
    },
    PrpDefAccessor {
        object: ValueId,
        key: NameKey,
        fun: ValueId,
        is_setter: bool,
    },
    PrpItNew {
        object: ValueId,
    },
    PrpItNext {
        iterator: ValueId,
        result: ValueId,
    },
    PrpGet {
        object: ValueId,
        key: NameKey,
        result: ValueId,
    },
    PrpGetSlow {
        object: ValueId,
        key: ValueId,
        result: ValueId,
    },
    PrpPut {
        object: ValueId,
        key: NameKey,
        value: ValueId,
    },
    PrpPutSlow {
        object: ValueId,
        key: ValueId,
        value: ValueId,
    },
    PrpDel {
        object: ValueId,
        key: NameKey,
        result: ValueId,
    },
    PrpDelSlow {
        object: ValueId,
        key: ValueId,
        result: ValueId,
    },

    // Script-level constructors
    EsNewArr {
        length: usize,
        values: ValueId,
    },
    EsNewFun {
        fun: FuncId,
        param_count: usize,
        is_strict: bool,
    },
    EsNewFunExpr {
        fun: FuncId,
        param_count: usize,
        is_strict: bool,
    },
    EsNewObj,
    EsNewRex {
        pattern: String,
        flags: String,
    },

    // Script arithmetic; each may set a pending exception via ToPrimitive
    EsBin {
        op: EsBinOp,
        left: ValueId,
        right: ValueId,
        result: ValueId,
    },
    EsUnary {
        op: EsUnaryOp,
        operand: ValueId,
        result: ValueId,
    },

    // Terminators
    Br {
        condition: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Jmp {
        target: BlockId,
    },
    Ret {
        value: ValueId,
    },
}

impl Instr {
    /// True for instructions that end a block.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Br { .. } | Instr::Jmp { .. } | Instr::Ret { .. })
    }

    /// Successor blocks of a terminator; empty for anything else.
    pub fn branch_targets(&self) -> Vec<BlockId> {
        match self {
            Instr::Br {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Instr::Jmp { target } => vec![*target],
            _ => Vec::new(),
        }
    }

    /// Value operands, in order.
    pub fn operands(&self) -> Vec<ValueId> {
        use Instr::*;
        match self {
            ArgsObjInit { .. }
            | BndExtraInit { .. }
            | BndExtraPtr { .. }
            | MemAlloc { .. }
            | CtxSetStrict { .. }
            | CtxEnterCatch { .. }
            | CtxLeave
            | CtxThis
            | ExSaveState
            | ExClear
            | DeclVar { .. }
            | EsNewFun { .. }
            | EsNewFunExpr { .. }
            | EsNewObj
            | EsNewRex { .. } => Vec::new(),

            ArgsObjLink { args, value, .. } => vec![*args, *value],
            ArrGet { array, .. } => vec![*array],
            ArrPut { array, value, .. } => vec![*array, *value],
            Bin { left, right, .. } => vec![*left, *right],
            Call { fun, argv, result, .. } => vec![*fun, *argv, *result],
            CallKeyed {
                object,
                argv,
                result,
                ..
            } => vec![*object, *argv, *result],
            CallKeyedSlow {
                object,
                key,
                argv,
                result,
                ..
            } => vec![*object, *key, *argv, *result],
            CallNamed { argv, result, .. } => vec![*argv, *result],
            CallNew {
                fun, argv, result, ..
            } => vec![*fun, *argv, *result],
            MemStore { dst, src } => vec![*dst, *src],
            MemElmPtr { base, .. } => vec![*base],
            ValToBool { value }
            | ValFromBool { value }
            | ValFromDouble { value }
            | ValFromStr { value }
            | ValIsNull { value }
            | ValIsUndefined { value }
            | ValTstCoerc { value }
            | CtxEnterWith { value }
            | ExSet { value } => vec![*value],
            ValToDouble { value, result } | ValToStr { value, result } => {
                vec![*value, *result]
            }
            CtxGet { result, .. } | CtxDel { result, .. } => vec![*result],
            CtxPut { value, .. } => vec![*value],
            ExLoadState { state } => vec![*state],
            InitArgs { dst, .. } => vec![*dst],
            DeclFun { fun, .. } => vec![*fun],
            DeclPrm { array, .. } => vec![*array],
            LinkVar { value, .. } | LinkFun { value, .. } | LinkPrm { value, .. } => {
                vec![*value]
            }
            PrpDefData {
                object, key, value, ..
            } => vec![*object, *key, *value],
            PrpDefAccessor { object, fun, .. } => vec![*object, *fun],
            PrpItNew { object } => vec![*object],
            PrpItNext { iterator, result } => vec![*iterator, *result],
            PrpGet { object, result, .. } | PrpDel { object, result, .. } => {
                vec![*object, *result]
            }
            PrpGetSlow {
                object,
                key,
                result,
            }
            | PrpDelSlow {
                object,
                key,
                result,
            } => vec![*object, *key, *result],
            PrpPut { object, value, .. } => vec![*object, *value],
            PrpPutSlow { object, key, value } => vec![*object, *key, *value],
            EsNewArr { values, .. } => vec![*values],
            EsBin {
                left,
                right,
                result,
                ..
            } => vec![*left, *right, *result],
            EsUnary {
                operand, result, ..
            } => vec![*operand, *result],
            Br { condition, .. } => vec![*condition],
            Jmp { .. } => Vec::new(),
            Ret { value } => vec![*value],
        }
    }

    /// Short operation name used by textual dumps.
    pub fn mnemonic(&self) -> &'static str {
        use Instr::*;
        match self {
            ArgsObjInit { .. } => "args_obj_init",
            ArgsObjLink { .. } => "args_obj_link",
            ArrGet { .. } => "arr_get",
            ArrPut { .. } => "arr_put",
            Bin { op, .. } => match op {
                BinOp::Add => "bin_add",
                BinOp::Sub => "bin_sub",
                BinOp::Or => "bin_or",
                BinOp::Eq => "bin_eq",
            },
            BndExtraInit { .. } => "bnd_extra_init",
            BndExtraPtr { .. } => "bnd_extra_ptr",
            Call { .. } => "call",
            CallKeyed { .. } => "call_keyed",
            CallKeyedSlow { .. } => "call_keyed_slow",
            CallNamed { .. } => "call_named",
            CallNew { .. } => "call_new",
            MemAlloc { .. } => "mem_alloc",
            MemStore { .. } => "mem_store",
            MemElmPtr { .. } => "mem_elm_ptr",
            ValToBool { .. } => "val_to_bool",
            ValToDouble { .. } => "val_to_double",
            ValToStr { .. } => "val_to_str",
            ValFromBool { .. } => "val_from_bool",
            ValFromDouble { .. } => "val_from_double",
            ValFromStr { .. } => "val_from_str",
            ValIsNull { .. } => "val_is_null",
            ValIsUndefined { .. } => "val_is_undefined",
            ValTstCoerc { .. } => "val_tst_coerc",
            CtxSetStrict { .. } => "ctx_set_strict",
            CtxEnterCatch { .. } => "ctx_enter_catch",
            CtxEnterWith { .. } => "ctx_enter_with",
            CtxLeave => "ctx_leave",
            CtxThis => "ctx_this",
            CtxGet { .. } => "ctx_get",
            CtxPut { .. } => "ctx_put",
            CtxDel { .. } => "ctx_del",
            ExSaveState => "ex_save_state",
            ExLoadState { .. } => "ex_load_state",
            ExSet { .. } => "ex_set",
            ExClear => "ex_clear",
            InitArgs { .. } => "init_args",
            DeclVar { .. } => "decl_var",
            DeclFun { .. } => "decl_fun",
            DeclPrm { .. } => "decl_prm",
            LinkVar { .. } => "link_var",
            LinkFun { .. } => "link_fun",
            LinkPrm { .. } => "link_prm",
            PrpDefData { .. } => "prp_def_data",
            PrpDefAccessor { .. } => "prp_def_accessor",
            PrpItNew { .. } => "prp_it_new",
            PrpItNext { .. } => "prp_it_next",
            PrpGet { .. } => "prp_get",
            PrpGetSlow { .. } => "prp_get_slow",
            PrpPut { .. } => "prp_put",
            PrpPutSlow { .. } => "prp_put_slow",
            PrpDel { .. } => "prp_del",
            PrpDelSlow { .. } => "prp_del_slow",
            EsNewArr { .. } => "es_new_arr",
            EsNewFun { .. } => "es_new_fun",
            EsNewFunExpr { .. } => "es_new_fun_expr",
            EsNewObj => "es_new_obj",
            EsNewRex { .. } => "es_new_rex",
            EsBin { op, .. } => match op {
                EsBinOp::Mul => "es_bin_mul",
                EsBinOp::Div => "es_bin_div",
                EsBinOp::Mod => "es_bin_mod",
                EsBinOp::Add => "es_bin_add",
                EsBinOp::Sub => "es_bin_sub",
                EsBinOp::Ls => "es_bin_ls",
                EsBinOp::Rss => "es_bin_rss",
                EsBinOp::Rus => "es_bin_rus",
                EsBinOp::Lt => "es_bin_lt",
                EsBinOp::Gt => "es_bin_gt",
                EsBinOp::Lte => "es_bin_lte",
                EsBinOp::Gte => "es_bin_gte",
                EsBinOp::In => "es_bin_in",
                EsBinOp::InstanceOf => "es_bin_instanceof",
                EsBinOp::Eq => "es_bin_eq",
                EsBinOp::Neq => "es_bin_neq",
                EsBinOp::StrictEq => "es_bin_strict_eq",
                EsBinOp::StrictNeq => "es_bin_strict_neq",
                EsBinOp::BitAnd => "es_bin_bit_and",
                EsBinOp::BitXor => "es_bin_bit_xor",
                EsBinOp::BitOr => "es_bin_bit_or",
            },
            EsUnary { op, .. } => match op {
                EsUnaryOp::Typeof => "es_unary_typeof",
                EsUnaryOp::Neg => "es_unary_neg",
                EsUnaryOp::BitNot => "es_unary_bit_not",
                EsUnaryOp::LogNot => "es_unary_log_not",
            },
            Br { .. } => "br",
            Jmp { .. } => "jmp",
            Ret { .. } => "ret",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(Instr::Jmp {
            target: BlockId(0)
        }
        .is_terminator());
        assert!(Instr::Ret {
            value: ValueId(0)
        }
        .is_terminator());
        assert!(!Instr::EsNewObj.is_terminator());
        assert!(!Instr::CtxLeave.is_terminator());
    }

    #[test]
    fn test_branch_targets() {
        let br = Instr::Br {
            condition: ValueId(0),
            then_block: BlockId(1),
            else_block: BlockId(2),
        };
        assert_eq!(br.branch_targets(), vec![BlockId(1), BlockId(2)]);

        let jmp = Instr::Jmp { target: BlockId(3) };
        assert_eq!(jmp.branch_targets(), vec![BlockId(3)]);

        let ret = Instr::Ret { value: ValueId(0) };
        assert!(ret.branch_targets().is_empty());
    }

    #[test]
    fn test_operands() {
        let call = Instr::Call {
            fun: ValueId(1),
            argc: 2,
            argv: ValueId(2),
            result: ValueId(3),
        };
        assert_eq!(call.operands(), vec![ValueId(1), ValueId(2), ValueId(3)]);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(
            Instr::EsBin {
                op: EsBinOp::Add,
                left: ValueId(0),
                right: ValueId(1),
                result: ValueId(2),
            }
            .mnemonic(),
            "es_bin_add"
        );
        assert_eq!(Instr::CtxLeave.mnemonic(), "ctx_leave");
    }
}
