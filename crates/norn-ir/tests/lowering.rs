//! End-to-end lowering tests: small ASTs in, module shapes out.

use norn_ast::*;
use norn_ir::analyzer;
use norn_ir::error::LowerErrorKind;
use norn_ir::lower::{Lowerer, GLOBAL_FUNCTION_NAME};
use norn_ir::verify::verify_module;
use norn_ir::{Constant, EsBinOp, Function, Instr, Module, ValueKind};

/// Hands out distinct spans; the analysis keys function literals by span.
struct Ast {
    next: usize,
}

impl Ast {
    fn new() -> Self {
        Ast { next: 0 }
    }

    fn sp(&mut self) -> Span {
        self.next += 10;
        Span::new(self.next, self.next + 5, 0)
    }

    fn node<T>(&mut self, value: T) -> Node<T> {
        let span = self.sp();
        Node::new(value, span)
    }

    fn num(&mut self, value: f64, text: &str) -> Node<Expr> {
        self.node(Expr::Number {
            value,
            text: text.to_string(),
        })
    }

    fn ident(&mut self, name: &str) -> Node<Expr> {
        self.node(Expr::Ident(Ident::new(name)))
    }

    fn expr_stmt(&mut self, expr: Node<Expr>) -> Node<Stmt> {
        self.node(Stmt::Expr(expr))
    }

    fn fun(
        &mut self,
        name: Option<&str>,
        params: &[&str],
        body: Vec<Node<Stmt>>,
        is_strict: bool,
    ) -> FunctionLiteral {
        let span = self.sp();
        FunctionLiteral {
            kind: FunctionKind::Declaration,
            name: name.map(|n| {
                let s = self.sp();
                Node::new(Ident::new(n), s)
            }),
            params: params
                .iter()
                .map(|p| {
                    let s = self.sp();
                    Node::new(Ident::new(*p), s)
                })
                .collect(),
            body,
            is_strict,
            span,
        }
    }

    fn program(&mut self, body: Vec<Node<Stmt>>) -> FunctionLiteral {
        self.fun(None, &[], body, false)
    }
}

fn lower(root: &FunctionLiteral) -> Module {
    let module = Lowerer::new().lower_program(root).expect("lowering failed");
    let violations = verify_module(&module);
    assert!(violations.is_empty(), "ill-formed module: {:?}", violations);
    module
}

fn instrs(fun: &Function) -> Vec<&Instr> {
    fun.blocks()
        .iter()
        .flat_map(|b| b.instrs.iter())
        .map(|&id| fun.value(id).as_instr().expect("instruction"))
        .collect()
}

fn has_instr(fun: &Function, pred: impl Fn(&Instr) -> bool) -> bool {
    instrs(fun).into_iter().any(pred)
}

#[test]
fn lower_return_of_constant_addition() {
    // function f() { return 1 + 2; }
    let mut ast = Ast::new();
    let one = ast.num(1.0, "1");
    let two = ast.num(2.0, "2");
    let sum = ast.node(Expr::Binary {
        op: BinaryOp::Add,
        left: Box::new(one),
        right: Box::new(two),
    });
    let ret = ast.node(Stmt::Return(Some(sum)));
    let f = ast.fun(Some("f"), &[], vec![ret], false);
    let f_stmt = ast.node(Stmt::Function(Box::new(f)));
    let root = ast.program(vec![f_stmt]);

    let module = lower(&root);
    assert_eq!(module.functions.len(), 2);
    assert_eq!(module.functions[0].name, GLOBAL_FUNCTION_NAME);
    assert!(module.functions[0].is_global);

    let f = &module.functions[1];
    assert!(f.name.starts_with("f_"));

    // Entry starts by establishing the strict-mode flag.
    let entry = f.block(f.entry());
    let first = f.value(entry.instrs[0]).as_instr().unwrap();
    assert_eq!(first, &Instr::CtxSetStrict { strict: false });

    assert!(has_instr(f, |i| matches!(
        i,
        Instr::EsBin {
            op: EsBinOp::Add,
            ..
        }
    )));
    assert!(has_instr(f, |i| matches!(i, Instr::ValFromDouble { .. })));
    // The result lands in the caller's return slot.
    assert!(has_instr(f, |i| {
        if let Instr::MemStore { dst, .. } = i {
            matches!(f.value(*dst).kind, ValueKind::Const(Constant::Return))
        } else {
            false
        }
    }));
    assert!(has_instr(f, |i| matches!(i, Instr::Ret { .. })));
}

#[test]
fn lower_property_read_through_parameter() {
    // function f(o) { return o.x; }
    let mut ast = Ast::new();
    let o = ast.ident("o");
    let x = ast.node(Expr::Str("x".to_string()));
    let prop = ast.node(Expr::Property {
        object: Box::new(o),
        key: Box::new(x),
    });
    let ret = ast.node(Stmt::Return(Some(prop)));
    let f = ast.fun(Some("f"), &["o"], vec![ret], false);
    let f_stmt = ast.node(Stmt::Function(Box::new(f)));
    let root = ast.program(vec![f_stmt]);

    let module = lower(&root);
    let f = module.find_function("f_1").expect("f was lowered");

    assert!(has_instr(f, |i| matches!(i, Instr::InitArgs { prmc: 1, .. })));
    // A property base is tested for coercibility before the lookup.
    assert!(has_instr(f, |i| matches!(i, Instr::ValTstCoerc { .. })));
    assert!(has_instr(f, |i| matches!(i, Instr::PrpGet { .. })));
}

#[test]
fn lower_try_catch() {
    // try { throw 1; } catch (e) { x = e; }
    let mut ast = Ast::new();
    let one = ast.num(1.0, "1");
    let throw = ast.node(Stmt::Throw(one));
    let try_block = ast.node(Stmt::Block {
        labels: vec![],
        body: vec![throw],
    });

    let e = ast.ident("e");
    let x = ast.ident("x");
    let assign = ast.node(Expr::Assign {
        op: AssignOp::Assign,
        target: Box::new(x),
        value: Box::new(e),
    });
    let assign_stmt = ast.expr_stmt(assign);
    let catch_body = ast.node(Stmt::Block {
        labels: vec![],
        body: vec![assign_stmt],
    });
    let binding_span = ast.sp();

    let try_stmt = ast.node(Stmt::Try {
        labels: vec![],
        block: Box::new(try_block),
        catch: Some(CatchClause {
            binding: Node::new(Ident::new("e"), binding_span),
            body: Box::new(catch_body),
        }),
        finally: None,
    });
    let root = ast.program(vec![try_stmt]);

    let module = lower(&root);
    let global = &module.functions[0];

    assert!(has_instr(global, |i| matches!(i, Instr::ExSet { .. })));
    assert!(has_instr(global, |i| matches!(i, Instr::ExSaveState)));
    assert!(has_instr(global, |i| matches!(i, Instr::CtxEnterCatch { .. })));
    assert!(has_instr(global, |i| matches!(i, Instr::ExClear)));
    assert!(has_instr(global, |i| matches!(i, Instr::CtxLeave)));
    // The thrown exception value is read back through the catch binding.
    assert!(has_instr(global, |i| matches!(i, Instr::CtxGet { .. })));
}

#[test]
fn lower_for_in_over_object() {
    // for (var k in obj) { k; }
    let mut ast = Ast::new();
    let obj = ast.ident("obj");
    let k_use = ast.ident("k");
    let body_stmt = ast.expr_stmt(k_use);
    let body = ast.node(Stmt::Block {
        labels: vec![],
        body: vec![body_stmt],
    });
    let k_span = ast.sp();
    let for_in = ast.node(Stmt::ForIn {
        labels: vec![],
        target: ForInTarget::Var(Node::new(Ident::new("k"), k_span)),
        enumerable: obj,
        body: Box::new(body),
    });
    let root = ast.program(vec![for_in]);

    let module = lower(&root);
    let global = &module.functions[0];

    assert!(has_instr(global, |i| matches!(i, Instr::PrpItNew { .. })));
    assert!(has_instr(global, |i| matches!(i, Instr::PrpItNext { .. })));
    // k is a global binding, so each iteration writes it through the
    // context.
    assert!(has_instr(global, |i| matches!(i, Instr::CtxPut { .. })));
    assert!(has_instr(global, |i| matches!(i, Instr::DeclVar { .. })));
}

#[test]
fn shared_keys_across_functions() {
    // function f() { foo; } function g() { foo; }
    let mut ast = Ast::new();
    let use1 = ast.ident("foo");
    let s1 = ast.expr_stmt(use1);
    let f = ast.fun(Some("f"), &[], vec![s1], false);
    let use2 = ast.ident("foo");
    let s2 = ast.expr_stmt(use2);
    let g = ast.fun(Some("g"), &[], vec![s2], false);
    let f_stmt = ast.node(Stmt::Function(Box::new(f)));
    let g_stmt = ast.node(Stmt::Function(Box::new(g)));
    let root = ast.program(vec![f_stmt, g_stmt]);

    let module = lower(&root);
    let keys: Vec<u64> = module
        .functions
        .iter()
        .flat_map(|fun| {
            instrs(fun)
                .into_iter()
                .filter_map(|i| match i {
                    Instr::CtxGet { key, .. } => Some(*key),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    assert_eq!(keys.len(), 2, "one ctx_get per function body");
    assert_eq!(keys[0], keys[1], "equal identifiers share one key");
}

#[test]
fn closure_capture_uses_extra_bindings() {
    // function outer() { var x; function inner() { return x; } return inner; }
    let mut ast = Ast::new();
    let x_use = ast.ident("x");
    let inner_ret = ast.node(Stmt::Return(Some(x_use)));
    let inner = ast.fun(Some("inner"), &[], vec![inner_ret], false);
    let inner_stmt = ast.node(Stmt::Function(Box::new(inner)));

    let x_span = ast.sp();
    let var_x = ast.node(Stmt::Var(vec![VarDeclarator {
        name: Node::new(Ident::new("x"), x_span),
        init: None,
    }]));
    let inner_use = ast.ident("inner");
    let outer_ret = ast.node(Stmt::Return(Some(inner_use)));

    let outer = ast.fun(Some("outer"), &[], vec![var_x, inner_stmt, outer_ret], false);
    let outer_stmt = ast.node(Stmt::Function(Box::new(outer)));
    let root = ast.program(vec![outer_stmt]);

    let module = lower(&root);
    let outer = module
        .functions
        .iter()
        .find(|f| f.name.starts_with("outer"))
        .expect("outer was lowered");
    let inner = module
        .functions
        .iter()
        .find(|f| f.name.starts_with("inner"))
        .expect("inner was lowered");

    assert!(has_instr(outer, |i| matches!(
        i,
        Instr::BndExtraInit { count } if *count >= 1
    )));
    assert!(has_instr(inner, |i| matches!(
        i,
        Instr::BndExtraPtr { hops: 1 }
    )));
}

#[test]
fn lowering_is_deterministic() {
    let build = || {
        let mut ast = Ast::new();
        let a = ast.ident("a");
        let b = ast.ident("b");
        let sum = ast.node(Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(a),
            right: Box::new(b),
        });
        let ret = ast.node(Stmt::Return(Some(sum)));
        let f = ast.fun(Some("f"), &["a", "b"], vec![ret], false);
        let f_stmt = ast.node(Stmt::Function(Box::new(f)));
        ast.program(vec![f_stmt])
    };

    let first = lower(&build());
    let second = lower(&build());
    assert_eq!(first.functions, second.functions);
    assert_eq!(first.resources, second.resources);
}

#[test]
fn cache_ids_are_unique_per_module() {
    // Several context accesses in one module.
    let mut ast = Ast::new();
    let mut stmts = Vec::new();
    for name in ["x", "y", "z"] {
        let e = ast.ident(name);
        stmts.push(ast.expr_stmt(e));
    }
    let root = ast.program(stmts);

    let module = lower(&root);
    let mut seen = std::collections::HashSet::new();
    for fun in &module.functions {
        for instr in instrs(fun) {
            if let Instr::CtxGet { cache_id, .. } | Instr::CtxPut { cache_id, .. } = instr {
                assert!(seen.insert(*cache_id), "cache id {} reused", cache_id);
            }
        }
    }
    assert_eq!(seen.len(), 3);
}

#[test]
fn strict_with_is_rejected() {
    let mut ast = Ast::new();
    let o = ast.ident("o");
    let body = ast.node(Stmt::Block {
        labels: vec![],
        body: vec![],
    });
    let with = ast.node(Stmt::With {
        object: o,
        body: Box::new(body),
    });
    let f = ast.fun(Some("f"), &[], vec![with], true);
    let f_stmt = ast.node(Stmt::Function(Box::new(f)));
    let root = ast.program(vec![f_stmt]);

    let err = Lowerer::new().lower_program(&root).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::StrictWith);
}

#[test]
fn strict_delete_of_identifier_is_rejected() {
    let mut ast = Ast::new();
    let x = ast.ident("x");
    let del = ast.node(Expr::Unary {
        op: UnaryOp::Delete,
        expr: Box::new(x),
    });
    let del_stmt = ast.expr_stmt(del);
    let f = ast.fun(Some("f"), &[], vec![del_stmt], true);
    let f_stmt = ast.node(Stmt::Function(Box::new(f)));
    let root = ast.program(vec![f_stmt]);

    let err = Lowerer::new().lower_program(&root).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::StrictDelete);
}

#[test]
fn strict_duplicate_params_are_rejected() {
    let mut ast = Ast::new();
    let f = ast.fun(Some("f"), &["a", "a"], vec![], true);
    let f_stmt = ast.node(Stmt::Function(Box::new(f)));
    let root = ast.program(vec![f_stmt]);

    let err = Lowerer::new().lower_program(&root).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::StrictDuplicateParam);
}

#[test]
fn break_outside_loop_is_rejected() {
    let mut ast = Ast::new();
    let brk = ast.node(Stmt::Break { label: None });
    let root = ast.program(vec![brk]);

    let err = Lowerer::new().lower_program(&root).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::UnresolvedBreak);
}

#[test]
fn return_in_global_code_is_rejected() {
    let mut ast = Ast::new();
    let ret = ast.node(Stmt::Return(None));
    let root = ast.program(vec![ret]);

    let err = Lowerer::new().lower_program(&root).unwrap_err();
    assert_eq!(err.kind, LowerErrorKind::ReturnOutsideFunction);
}

#[test]
fn string_literals_become_resources() {
    // "hello".length style key interning plus a plain literal.
    let mut ast = Ast::new();
    let s = ast.node(Expr::Str("hello".to_string()));
    let stmt = ast.expr_stmt(s);
    let root = ast.program(vec![stmt]);

    let module = lower(&root);
    assert!(module
        .resources
        .iter()
        .any(|r| r.text == "hello"));
    // Dense ids in order of first appearance.
    for (i, resource) in module.resources.iter().enumerate() {
        assert_eq!(resource.id, i as u32);
    }
}

#[test]
fn hoisting_collects_nested_declarations() {
    // if (c) { var a; } else { var b; function g() {} }
    let mut ast = Ast::new();
    let a_span = ast.sp();
    let var_a = ast.node(Stmt::Var(vec![VarDeclarator {
        name: Node::new(Ident::new("a"), a_span),
        init: None,
    }]));
    let then_block = ast.node(Stmt::Block {
        labels: vec![],
        body: vec![var_a],
    });
    let b_span = ast.sp();
    let var_b = ast.node(Stmt::Var(vec![VarDeclarator {
        name: Node::new(Ident::new("b"), b_span),
        init: None,
    }]));
    let g = ast.fun(Some("g"), &[], vec![], false);
    let g_stmt = ast.node(Stmt::Function(Box::new(g)));
    let else_block = ast.node(Stmt::Block {
        labels: vec![],
        body: vec![var_b, g_stmt],
    });
    let c = ast.ident("c");
    let if_stmt = ast.node(Stmt::If {
        condition: c,
        then_stmt: Box::new(then_block),
        else_stmt: Some(Box::new(else_block)),
    });

    let hoisted = analyzer::hoisted_decls(std::slice::from_ref(&if_stmt));
    let names: Vec<&str> = hoisted
        .vars
        .iter()
        .map(|n| n.value.name.as_str())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(hoisted.funs.len(), 1);
}
