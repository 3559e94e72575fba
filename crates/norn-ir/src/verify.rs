//! Module verifier.
//!
//! Structural checks over an emitted module: block termination, referrer-set
//! closure, operand typing, and module-wide cache-id uniqueness. The lowering
//! upholds these by construction; the verifier exists for tests and for the
//! driver's debug mode.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::{BlockId, Function, Instr, IrType, Module, ValueId};

/// A single verification failure.
#[derive(Debug, Clone)]
pub struct Violation {
    pub function: String,
    pub block: Option<BlockId>,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block {
            Some(block) => write!(f, "{}/{}: {}", self.function, block, self.message),
            None => write!(f, "{}: {}", self.function, self.message),
        }
    }
}

/// Verifies a whole module. Returns all violations found; empty means the
/// module is well-formed.
pub fn verify_module(module: &Module) -> Vec<Violation> {
    let mut violations = Vec::new();
    for function in &module.functions {
        verify_function(function, &mut violations);
    }
    verify_cache_ids(module, &mut violations);
    violations
}

fn reachable_blocks(fun: &Function) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut work = vec![fun.entry()];
    while let Some(block) = work.pop() {
        if !seen.insert(block) {
            continue;
        }
        if let Some(last) = fun.block(block).last_instr() {
            if let Some(instr) = fun.value(last).as_instr() {
                work.extend(instr.branch_targets());
            }
        }
    }
    seen
}

fn verify_function(fun: &Function, violations: &mut Vec<Violation>) {
    macro_rules! push {
        ($block:expr, $message:expr) => {
            violations.push(Violation {
                function: fun.name.clone(),
                block: $block,
                message: $message,
            })
        };
    }

    let reachable = reachable_blocks(fun);

    for block_id in fun.block_ids() {
        let block = fun.block(block_id);

        for (i, &instr_id) in block.instrs.iter().enumerate() {
            let Some(instr) = fun.value(instr_id).as_instr() else {
                push!(
                    Some(block_id),
                    format!("{} in instruction list is a constant", instr_id)
                );
                continue;
            };

            let is_last = i + 1 == block.instrs.len();
            if instr.is_terminator() && !is_last {
                push!(
                    Some(block_id),
                    format!("terminator {} is not the last instruction", instr_id)
                );
            }

            // Referrer closure, forward direction.
            for target in instr.branch_targets() {
                if !fun.block(target).referrers.contains(&instr_id) {
                    push!(
                        Some(block_id),
                        format!("{} targets {} but is not in its referrer set", instr_id, target)
                    );
                }
            }

            check_instr_types(fun, instr_id, instr, block_id, violations);
        }

        if reachable.contains(&block_id) && !block.is_empty() && !fun.is_terminated(block_id) {
            push!(
                Some(block_id),
                "reachable non-empty block lacks a terminator".to_string()
            );
        }

        // Referrer closure, backward direction.
        for &referrer in &block.referrers {
            let targets = fun
                .value(referrer)
                .as_instr()
                .map(Instr::branch_targets)
                .unwrap_or_default();
            if !targets.contains(&block_id) {
                push!(
                    Some(block_id),
                    format!("referrer {} does not target this block", referrer)
                );
            }
        }
    }
}

fn check_instr_types(
    fun: &Function,
    instr_id: ValueId,
    instr: &Instr,
    block_id: BlockId,
    violations: &mut Vec<Violation>,
) {
    let mut msgs: Vec<String> = Vec::new();
    check_instr_types_inner(fun, instr_id, instr, &mut msgs);
    for message in msgs {
        violations.push(Violation {
            function: fun.name.clone(),
            block: Some(block_id),
            message,
        });
    }
}

fn check_instr_types_inner(fun: &Function, instr_id: ValueId, instr: &Instr, msgs: &mut Vec<String>) {
    let ty = |v: ValueId| &fun.value(v).ty;
    fn expect_in(
        fun: &Function,
        instr_id: ValueId,
        v: ValueId,
        expected: &IrType,
        what: &str,
        msgs: &mut Vec<String>,
    ) {
        let got = &fun.value(v).ty;
        if got != expected {
            msgs.push(format!(
                "{} {}: expected {}, got {}",
                instr_id, what, expected, got
            ));
        }
    }
    macro_rules! expect {
        ($v:expr, $expected:expr, $what:expr) => {
            expect_in(fun, instr_id, $v, $expected, $what, msgs)
        };
    }
    let value = IrType::Value;
    let boolean = IrType::Boolean;
    let value_ptr = IrType::pointer(IrType::Value);

    use Instr::*;
    match instr {
        ArgsObjLink { args, value: v, .. } => {
            expect!(*args, &value, "args");
            expect!(*v, &value_ptr, "value");
        }
        ArrGet { array, .. } | ArrPut { array, .. } | InitArgs { dst: array, .. } => {
            if ty(*array).element() != Some(&IrType::Value) {
                msgs.push(format!("{}: base is not a value array", instr_id));
            }
            if let ArrPut { value: v, .. } = instr {
                expect!(*v, &value, "value");
            }
        }
        Bin { left, right, .. } => {
            if ty(*left) != ty(*right) {
                msgs.push(format!("{}: bin operand types disagree", instr_id));
            }
        }
        Call { fun: f, result, .. } => {
            expect!(*f, &value, "fun");
            expect!(*result, &value, "result");
        }
        CallKeyed { object, result, .. } => {
            expect!(*object, &value, "object");
            expect!(*result, &value, "result");
        }
        CallKeyedSlow {
            object,
            key,
            result,
            ..
        } => {
            expect!(*object, &value, "object");
            expect!(*key, &value, "key");
            expect!(*result, &value, "result");
        }
        CallNamed { result, .. } => expect!(*result, &value, "result"),
        CallNew { fun: f, result, .. } => {
            expect!(*f, &value, "fun");
            expect!(*result, &value, "result");
        }
        MemStore { dst, src } => {
            if ty(*dst) != ty(*src) {
                msgs.push(format!("{}: mem_store types disagree", instr_id));
            }
        }
        ValToBool { value: v }
        | ValIsNull { value: v }
        | ValIsUndefined { value: v }
        | ValTstCoerc { value: v }
        | CtxEnterWith { value: v }
        | ExSet { value: v } => expect!(*v, &value, "operand"),
        ValToDouble { value: v, result } => {
            expect!(*v, &value, "operand");
            expect!(*result, &IrType::Double, "result");
        }
        ValToStr { value: v, result } => {
            expect!(*v, &value, "operand");
            expect!(*result, &IrType::Str, "result");
        }
        ValFromBool { value: v } => expect!(*v, &boolean, "operand"),
        ValFromDouble { value: v } => expect!(*v, &IrType::Double, "operand"),
        ValFromStr { value: v } => expect!(*v, &IrType::Str, "operand"),
        CtxGet { result, .. } | CtxDel { result, .. } => expect!(*result, &value, "result"),
        CtxPut { value: v, .. } => expect!(*v, &value, "value"),
        ExLoadState { state } => expect!(*state, &IrType::exception_state(), "state"),
        DeclFun { fun: f, .. } => expect!(*f, &value, "fun"),
        LinkVar { value: v, .. } | LinkFun { value: v, .. } | LinkPrm { value: v, .. } => {
            expect!(*v, &value_ptr, "value")
        }
        PrpDefData {
            object,
            key,
            value: v,
        } => {
            expect!(*object, &value, "object");
            expect!(*key, &value, "key");
            expect!(*v, &value, "value");
        }
        PrpDefAccessor { object, fun: f, .. } => {
            expect!(*object, &value, "object");
            expect!(*f, &value, "fun");
        }
        PrpItNew { object } => expect!(*object, &value, "object"),
        PrpItNext { iterator, result } => {
            expect!(*iterator, &IrType::property_iterator(), "iterator");
            expect!(*result, &value, "result");
        }
        PrpGet { object, result, .. } | PrpDel { object, result, .. } => {
            expect!(*object, &value, "object");
            expect!(*result, &value, "result");
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
        } => {
            expect!(*object, &value, "object");
            expect!(*key, &value, "key");
            expect!(*result, &value, "result");
        }
        PrpPut { object, value: v, .. } => {
            expect!(*object, &value, "object");
            expect!(*v, &value, "value");
        }
        PrpPutSlow {
            object,
            key,
            value: v,
        } => {
            expect!(*object, &value, "object");
            expect!(*key, &value, "key");
            expect!(*v, &value, "value");
        }
        EsBin {
            left,
            right,
            result,
            ..
        } => {
            expect!(*left, &value, "left");
            expect!(*right, &value, "right");
            expect!(*result, &value, "result");
        }
        EsUnary {
            operand, result, ..
        } => {
            expect!(*operand, &value, "operand");
            expect!(*result, &value, "result");
        }
        Br { condition, .. } => expect!(*condition, &boolean, "condition"),
        Ret { value: v } => expect!(*v, &boolean, "value"),
        _ => {}
    }
}

fn verify_cache_ids(module: &Module, violations: &mut Vec<Violation>) {
    let mut seen: HashMap<u16, String> = HashMap::new();
    for function in &module.functions {
        for value in function.values() {
            let cache_id = match value.as_instr() {
                Some(Instr::CtxGet { cache_id, .. }) => Some(*cache_id),
                Some(Instr::CtxPut { cache_id, .. }) => Some(*cache_id),
                _ => None,
            };
            if let Some(cid) = cache_id {
                if let Some(other) = seen.insert(cid, function.name.clone()) {
                    violations.push(Violation {
                        function: function.name.clone(),
                        block: None,
                        message: format!(
                            "cache id {} reused (first seen in {})",
                            cid, other
                        ),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_function() {
        let mut module = Module::new();
        let mut fun = Function::new("f", false);
        let entry = fun.entry();
        let t = fun.const_boolean(true);
        fun.builder(entry).ret(t);
        module.push_function(fun);

        assert!(verify_module(&module).is_empty());
    }

    #[test]
    fn test_unterminated_reachable_block() {
        let mut module = Module::new();
        let mut fun = Function::new("f", false);
        let entry = fun.entry();
        fun.builder(entry).es_new_obj();
        module.push_function(fun);

        let violations = verify_module(&module);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("lacks a terminator"));
    }

    #[test]
    fn test_unreachable_block_is_exempt() {
        let mut module = Module::new();
        let mut fun = Function::new("f", false);
        let entry = fun.entry();
        let dead = fun.new_block();
        let t = fun.const_boolean(true);
        fun.builder(entry).ret(t);
        // Dead block with a non-terminated instruction sequence.
        fun.builder(dead).es_new_obj();
        module.push_function(fun);

        assert!(verify_module(&module).is_empty());
    }

    #[test]
    fn test_duplicate_cache_ids() {
        let mut module = Module::new();
        let mut fun = Function::new("f", false);
        let entry = fun.entry();
        let r1 = fun.builder(entry).mem_alloc(IrType::Value);
        let r2 = fun.builder(entry).mem_alloc(IrType::Value);
        fun.builder(entry).ctx_get(1, r1, 0);
        fun.builder(entry).ctx_get(2, r2, 0);
        let t = fun.const_boolean(true);
        fun.builder(entry).ret(t);
        module.push_function(fun);

        let violations = verify_module(&module);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("cache id 0 reused"));
    }

    #[test]
    fn test_stale_referrer_detected() {
        let mut module = Module::new();
        let mut fun = Function::new("f", false);
        let entry = fun.entry();
        let other = fun.new_block();
        let jmp = fun.builder(entry).jmp(other);
        // Manually corrupt: register the jump as a referrer of a block it
        // does not target.
        let extra = fun.new_block();
        fun.block_mut(extra).referrers.insert(jmp);
        let t = fun.const_boolean(true);
        fun.builder(other).ret(t);
        module.push_function(fun);

        let violations = verify_module(&module);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("does not target"));
    }
}
