//! Runtime ABI contract.
//!
//! The emitter lowers runtime-calling instructions 1:1 to entry points with
//! the stable `nrt_`-prefixed symbol names declared here. Every faulting
//! entry point uses the pending-exception convention: it returns normally
//! with `false` after storing the thrown value in the per-context pending
//! slot; no exception ever crosses the ABI boundary through the host
//! language. The 16-bit cache id carried by `ctx_get`/`ctx_put` is the
//! address of a per-site inline-cache slot in read-write data.

use crate::{Instr, IrType};

/// Signature of a runtime entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeFn {
    pub name: &'static str,
    pub params: Vec<IrType>,
    pub ret: IrType,
}

/// The prototype-based error hierarchy the runtime provides. Each variant is
/// constructible from a message value through its constructor entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeError {
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
}

impl NativeError {
    pub const ALL: [NativeError; 7] = [
        NativeError::Error,
        NativeError::EvalError,
        NativeError::RangeError,
        NativeError::ReferenceError,
        NativeError::SyntaxError,
        NativeError::TypeError,
        NativeError::UriError,
    ];

    /// Runtime constructor symbol for this error kind.
    pub fn constructor_symbol(&self) -> &'static str {
        match self {
            NativeError::Error => "nrt_new_error",
            NativeError::EvalError => "nrt_new_eval_error",
            NativeError::RangeError => "nrt_new_range_error",
            NativeError::ReferenceError => "nrt_new_reference_error",
            NativeError::SyntaxError => "nrt_new_syntax_error",
            NativeError::TypeError => "nrt_new_type_error",
            NativeError::UriError => "nrt_new_uri_error",
        }
    }
}

/// Maps a runtime-calling instruction to its entry point symbol. Returns
/// `None` for instructions the emitter expands inline (memory operations,
/// typed arithmetic, constants, terminators).
pub fn symbol(instr: &Instr) -> Option<&'static str> {
    use Instr::*;
    Some(match instr {
        ArgsObjInit { .. } => "nrt_args_obj_init",
        ArgsObjLink { .. } => "nrt_args_obj_link",
        BndExtraInit { .. } => "nrt_bnd_extra_init",
        BndExtraPtr { .. } => "nrt_bnd_extra_ptr",
        Call { .. } => "nrt_call",
        CallKeyed { .. } => "nrt_call_keyed",
        CallKeyedSlow { .. } => "nrt_call_keyed_slow",
        CallNamed { .. } => "nrt_call_named",
        CallNew { .. } => "nrt_call_new",
        ValToBool { .. } => "nrt_val_to_bool",
        ValToDouble { .. } => "nrt_val_to_double",
        ValToStr { .. } => "nrt_val_to_str",
        ValFromBool { .. } => "nrt_val_from_bool",
        ValFromDouble { .. } => "nrt_val_from_double",
        ValFromStr { .. } => "nrt_val_from_str",
        ValIsNull { .. } => "nrt_val_is_null",
        ValIsUndefined { .. } => "nrt_val_is_undefined",
        ValTstCoerc { .. } => "nrt_val_tst_coerc",
        CtxSetStrict { .. } => "nrt_ctx_set_strict",
        CtxEnterCatch { .. } => "nrt_ctx_enter_catch",
        CtxEnterWith { .. } => "nrt_ctx_enter_with",
        CtxLeave => "nrt_ctx_leave",
        CtxThis => "nrt_ctx_this",
        CtxGet { .. } => "nrt_ctx_get",
        CtxPut { .. } => "nrt_ctx_put",
        CtxDel { .. } => "nrt_ctx_del",
        ExSaveState => "nrt_ex_save_state",
        ExLoadState { .. } => "nrt_ex_load_state",
        ExSet { .. } => "nrt_ex_set",
        ExClear => "nrt_ex_clear",
        InitArgs { .. } => "nrt_init_args",
        DeclVar { .. } => "nrt_decl_var",
        DeclFun { .. } => "nrt_decl_fun",
        DeclPrm { .. } => "nrt_decl_prm",
        LinkVar { .. } => "nrt_link_var",
        LinkFun { .. } => "nrt_link_fun",
        LinkPrm { .. } => "nrt_link_prm",
        PrpDefData { .. } => "nrt_prp_def_data",
        PrpDefAccessor { .. } => "nrt_prp_def_accessor",
        PrpItNew { .. } => "nrt_prp_it_new",
        PrpItNext { .. } => "nrt_prp_it_next",
        PrpGet { .. } => "nrt_prp_get",
        PrpGetSlow { .. } => "nrt_prp_get_slow",
        PrpPut { .. } => "nrt_prp_put",
        PrpPutSlow { .. } => "nrt_prp_put_slow",
        PrpDel { .. } => "nrt_prp_del",
        PrpDelSlow { .. } => "nrt_prp_del_slow",
        EsNewArr { .. } => "nrt_new_arr",
        EsNewFun { .. } => "nrt_new_fun",
        EsNewFunExpr { .. } => "nrt_new_fun_expr",
        EsNewObj => "nrt_new_obj",
        EsNewRex { .. } => "nrt_new_rex",
        EsBin { op, .. } => {
            use crate::EsBinOp::*;
            match op {
                Mul => "nrt_bin_mul",
                Div => "nrt_bin_div",
                Mod => "nrt_bin_mod",
                Add => "nrt_bin_add",
                Sub => "nrt_bin_sub",
                Ls => "nrt_bin_ls",
                Rss => "nrt_bin_rss",
                Rus => "nrt_bin_rus",
                Lt => "nrt_bin_lt",
                Gt => "nrt_bin_gt",
                Lte => "nrt_bin_lte",
                Gte => "nrt_bin_gte",
                In => "nrt_bin_in",
                InstanceOf => "nrt_bin_instanceof",
                Eq => "nrt_bin_eq",
                Neq => "nrt_bin_neq",
                StrictEq => "nrt_bin_strict_eq",
                StrictNeq => "nrt_bin_strict_neq",
                BitAnd => "nrt_bin_bit_and",
                BitXor => "nrt_bin_bit_xor",
                BitOr => "nrt_bin_bit_or",
            }
        }
        EsUnary { op, .. } => {
            use crate::EsUnaryOp::*;
            match op {
                Typeof => "nrt_unary_typeof",
                Neg => "nrt_unary_neg",
                BitNot => "nrt_unary_bit_not",
                LogNot => "nrt_unary_log_not",
            }
        }
        ArrGet { .. } | ArrPut { .. } | Bin { .. } | MemAlloc { .. } | MemStore { .. }
        | MemElmPtr { .. } | Br { .. } | Jmp { .. } | Ret { .. } => return None,
    })
}

/// Entry points that do not correspond 1:1 to a single instruction: the
/// error constructors and the property iterator contract.
pub fn support_functions() -> Vec<RuntimeFn> {
    let mut fns: Vec<RuntimeFn> = NativeError::ALL
        .iter()
        .map(|err| RuntimeFn {
            name: err.constructor_symbol(),
            params: vec![IrType::Value],
            ret: IrType::Value,
        })
        .collect();
    fns.push(RuntimeFn {
        name: "nrt_prp_it_free",
        params: vec![IrType::property_iterator()],
        ret: IrType::Void,
    });
    fns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockId, EsBinOp, ValueId};

    #[test]
    fn test_symbols() {
        assert_eq!(symbol(&Instr::EsNewObj), Some("nrt_new_obj"));
        assert_eq!(symbol(&Instr::CtxLeave), Some("nrt_ctx_leave"));
        assert_eq!(
            symbol(&Instr::EsBin {
                op: EsBinOp::Add,
                left: ValueId(0),
                right: ValueId(1),
                result: ValueId(2),
            }),
            Some("nrt_bin_add")
        );
        // Inline-expanded instructions have no runtime symbol.
        assert_eq!(symbol(&Instr::Jmp { target: BlockId(0) }), None);
        assert_eq!(
            symbol(&Instr::MemStore {
                dst: ValueId(0),
                src: ValueId(1),
            }),
            None
        );
    }

    #[test]
    fn test_error_hierarchy() {
        assert_eq!(NativeError::ALL.len(), 7);
        assert_eq!(
            NativeError::TypeError.constructor_symbol(),
            "nrt_new_type_error"
        );
        let fns = support_functions();
        assert!(fns.iter().any(|f| f.name == "nrt_new_reference_error"));
    }
}
