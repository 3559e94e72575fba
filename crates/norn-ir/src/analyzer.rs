//! Binding and capture analysis.
//!
//! A pre-lowering pass over the AST that decides, per function, where each
//! declared name lives:
//!
//! - `Local`: a slot in the function's stack array;
//! - `LocalExtra`: a slot in the heap-allocated extra-bindings record,
//!   used for names captured by inner functions and for parameters of
//!   functions that materialize an arguments object;
//! - `Context`: registered with the runtime environment, used for global
//!   bindings, for names whose resolution is blocked by a `with` scope, and
//!   for everything in eval-tainted functions.
//!
//! The pass also records, per function, the set of outer-frame hop distances
//! it references (driving `bnd_extra_ptr` emission in the prologue), whether
//! it needs an arguments object, and eval taint.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::trace;
use norn_ast::{
    CaseClause, Expr, ForInTarget, FunctionKind, FunctionLiteral, Node, ObjectProperty, Span, Stmt,
    VarDeclarator,
};

/// Where a variable is stored at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Local,
    LocalExtra,
    Context,
}

/// What introduced a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Param { index: usize },
    Var,
    Fun,
    /// Self-binding of a named function expression
    Callee,
}

/// A variable declared by a function.
#[derive(Debug, Clone)]
pub struct AnalyzedVar {
    pub kind: VarKind,
    pub storage: Option<Storage>,
}

impl AnalyzedVar {
    fn new(kind: VarKind) -> Self {
        AnalyzedVar {
            kind,
            storage: None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.storage.is_some()
    }
}

/// Per-function analysis results. Variables iterate in name order, which the
/// lowering relies on for deterministic slot assignment.
#[derive(Debug, Clone, Default)]
pub struct AnalyzedFunction {
    pub vars: BTreeMap<String, AnalyzedVar>,
    pub tainted_by_eval: bool,
    pub needs_args_obj: bool,
    pub referenced_scopes: BTreeSet<usize>,
}

impl AnalyzedFunction {
    pub fn num_locals(&self) -> usize {
        self.vars
            .values()
            .filter(|v| v.storage == Some(Storage::Local))
            .count()
    }

    pub fn num_extra(&self) -> usize {
        self.vars
            .values()
            .filter(|v| v.storage == Some(Storage::LocalExtra))
            .count()
    }
}

/// Analysis results for a whole program, keyed by function literal span.
#[derive(Debug, Default)]
pub struct Analysis {
    funs: HashMap<Span, AnalyzedFunction>,
}

impl Analysis {
    pub fn function(&self, span: Span) -> &AnalyzedFunction {
        self.funs
            .get(&span)
            .expect("function literal was not analyzed")
    }
}

/// Declarations hoisted to a function prologue: `var` names in first-seen
/// order and function declarations in source order. Nested function bodies
/// are not entered.
pub struct HoistedDecls<'ast> {
    pub vars: Vec<&'ast Node<norn_ast::Ident>>,
    pub funs: Vec<&'ast FunctionLiteral>,
}

pub fn hoisted_decls(body: &[Node<Stmt>]) -> HoistedDecls<'_> {
    let mut out = HoistedDecls {
        vars: Vec::new(),
        funs: Vec::new(),
    };
    let mut seen = BTreeSet::new();
    for stmt in body {
        hoist_stmt(&stmt.value, &mut out, &mut seen);
    }
    out
}

fn hoist_stmt<'ast>(
    stmt: &'ast Stmt,
    out: &mut HoistedDecls<'ast>,
    seen: &mut BTreeSet<String>,
) {
    match stmt {
        Stmt::Var(decls) => {
            for decl in decls {
                if seen.insert(decl.name.value.name.clone()) {
                    out.vars.push(&decl.name);
                }
            }
        }
        Stmt::Function(lit) => out.funs.push(lit),
        Stmt::Block { body, .. } => {
            for stmt in body {
                hoist_stmt(&stmt.value, out, seen);
            }
        }
        Stmt::If {
            then_stmt,
            else_stmt,
            ..
        } => {
            hoist_stmt(&then_stmt.value, out, seen);
            if let Some(else_stmt) = else_stmt {
                hoist_stmt(&else_stmt.value, out, seen);
            }
        }
        Stmt::DoWhile { body, .. } | Stmt::While { body, .. } | Stmt::With { body, .. } => {
            hoist_stmt(&body.value, out, seen);
        }
        Stmt::ForIn { target, body, .. } => {
            if let ForInTarget::Var(name) = target {
                if seen.insert(name.value.name.clone()) {
                    out.vars.push(name);
                }
            }
            hoist_stmt(&body.value, out, seen);
        }
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                hoist_stmt(&init.value, out, seen);
            }
            hoist_stmt(&body.value, out, seen);
        }
        Stmt::Switch { cases, .. } => {
            for CaseClause { body, .. } in cases {
                for stmt in body {
                    hoist_stmt(&stmt.value, out, seen);
                }
            }
        }
        Stmt::Try {
            block,
            catch,
            finally,
            ..
        } => {
            hoist_stmt(&block.value, out, seen);
            if let Some(catch) = catch {
                hoist_stmt(&catch.body.value, out, seen);
            }
            if let Some(finally) = finally {
                hoist_stmt(&finally.value, out, seen);
            }
        }
        Stmt::Empty
        | Stmt::Expr(_)
        | Stmt::Continue { .. }
        | Stmt::Break { .. }
        | Stmt::Return(_)
        | Stmt::Throw(_)
        | Stmt::Debugger => {}
    }
}

/// Analyzes a program rooted at the global function literal.
pub fn analyze(root: &FunctionLiteral) -> Analysis {
    let mut analyzer = Analyzer {
        funs: HashMap::new(),
        envs: Vec::new(),
        root_span: root.span,
    };
    analyzer.visit_fun(root);

    // Unreferenced globals may still be enumerated dynamically, and in an
    // eval-tainted function every binding must be reachable by name.
    for (span, fun) in analyzer.funs.iter_mut() {
        let force_context = *span == root.span || fun.tainted_by_eval;
        if fun.needs_args_obj {
            for var in fun.vars.values_mut() {
                if matches!(var.kind, VarKind::Param { .. })
                    && var.storage != Some(Storage::Context)
                {
                    var.storage = Some(Storage::LocalExtra);
                }
            }
        }
        if force_context {
            for var in fun.vars.values_mut() {
                if var.storage.is_none() {
                    var.storage = Some(Storage::Context);
                }
            }
        }
    }

    Analysis {
        funs: analyzer.funs,
    }
}

enum Env<'ast> {
    Function { span: Span },
    With,
    Catch { name: &'ast str },
}

struct Analyzer<'ast> {
    funs: HashMap<Span, AnalyzedFunction>,
    envs: Vec<Env<'ast>>,
    root_span: Span,
}

impl<'ast> Analyzer<'ast> {
    fn visit_fun(&mut self, lit: &'ast FunctionLiteral) {
        let mut fun = AnalyzedFunction::default();

        for (index, param) in lit.params.iter().enumerate() {
            // The last parameter wins when formals share a name.
            fun.vars.insert(
                param.value.name.clone(),
                AnalyzedVar::new(VarKind::Param { index }),
            );
        }

        if lit.kind == FunctionKind::Expression {
            if let Some(name) = &lit.name {
                fun.vars
                    .entry(name.value.name.clone())
                    .or_insert_with(|| AnalyzedVar::new(VarKind::Callee));
            }
        }

        let hoisted = hoisted_decls(&lit.body);
        for name in &hoisted.vars {
            fun.vars
                .entry(name.value.name.clone())
                .or_insert_with(|| AnalyzedVar::new(VarKind::Var));
        }
        for inner in &hoisted.funs {
            if let Some(name) = &inner.name {
                fun.vars
                    .entry(name.value.name.clone())
                    .and_modify(|v| v.kind = VarKind::Fun)
                    .or_insert_with(|| AnalyzedVar::new(VarKind::Fun));
            }
        }

        self.funs.insert(lit.span, fun);
        self.envs.push(Env::Function { span: lit.span });
        for stmt in &lit.body {
            self.visit_stmt(&stmt.value);
        }
        self.envs.pop();
    }

    fn current_fun_span(&self) -> Span {
        for env in self.envs.iter().rev() {
            if let Env::Function { span } = env {
                return *span;
            }
        }
        unreachable!("no enclosing function environment");
    }

    fn visit_ident(&mut self, name: &str) {
        if name == "eval" {
            for env in &self.envs {
                if let Env::Function { span } = env {
                    self.funs.get_mut(span).expect("analyzed").tainted_by_eval = true;
                }
            }
        }

        if name == "arguments" {
            let cur = self.current_fun_span();
            let declares = self
                .funs
                .get(&cur)
                .expect("analyzed")
                .vars
                .contains_key("arguments");
            if !declares && cur != self.root_span {
                self.funs.get_mut(&cur).expect("analyzed").needs_args_obj = true;
                return;
            }
        }

        let cur = self.current_fun_span();
        let mut hops = 0usize;
        let mut found_obj_env = false;

        for i in (0..self.envs.len()).rev() {
            match &self.envs[i] {
                Env::Catch { name: caught } => {
                    if *caught == name {
                        // Resolves to the runtime catch binding.
                        return;
                    }
                }
                Env::With => found_obj_env = true,
                Env::Function { span } => {
                    let span = *span;
                    let is_root = span == self.root_span;
                    let declares = self
                        .funs
                        .get(&span)
                        .expect("analyzed")
                        .vars
                        .contains_key(name);
                    if declares {
                        let var = self
                            .funs
                            .get_mut(&span)
                            .expect("analyzed")
                            .vars
                            .get_mut(name)
                            .expect("declared");
                        let mut captured = false;
                        if is_root || found_obj_env {
                            // Global bindings live on the global object;
                            // with-blocked names must resolve at runtime.
                            var.storage = Some(Storage::Context);
                        } else if hops == 0 {
                            if !var.is_allocated() {
                                var.storage = Some(Storage::Local);
                            }
                        } else if var.storage != Some(Storage::Context) {
                            var.storage = Some(Storage::LocalExtra);
                            captured = true;
                        }
                        if captured {
                            trace!("captured binding `{}` ({} hops)", name, hops);
                            self.funs
                                .get_mut(&cur)
                                .expect("analyzed")
                                .referenced_scopes
                                .insert(hops);
                        }
                        return;
                    }
                    hops += 1;
                }
            }
        }
    }

    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        match stmt {
            Stmt::Empty | Stmt::Debugger => {}
            Stmt::Expr(expr) => self.visit_expr(&expr.value),
            Stmt::Block { body, .. } => {
                for stmt in body {
                    self.visit_stmt(&stmt.value);
                }
            }
            Stmt::Var(decls) => {
                for VarDeclarator { name, init } in decls {
                    if let Some(init) = init {
                        self.visit_ident(&name.value.name);
                        self.visit_expr(&init.value);
                    }
                }
            }
            Stmt::Function(lit) => self.visit_fun(lit),
            Stmt::If {
                condition,
                then_stmt,
                else_stmt,
            } => {
                self.visit_expr(&condition.value);
                self.visit_stmt(&then_stmt.value);
                if let Some(else_stmt) = else_stmt {
                    self.visit_stmt(&else_stmt.value);
                }
            }
            Stmt::DoWhile {
                body, condition, ..
            } => {
                self.visit_stmt(&body.value);
                self.visit_expr(&condition.value);
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.visit_expr(&condition.value);
                self.visit_stmt(&body.value);
            }
            Stmt::ForIn {
                target,
                enumerable,
                body,
                ..
            } => {
                self.visit_expr(&enumerable.value);
                match target {
                    ForInTarget::Var(name) => self.visit_ident(&name.value.name),
                    ForInTarget::Expr(expr) => self.visit_expr(&expr.value),
                }
                self.visit_stmt(&body.value);
            }
            Stmt::For {
                init,
                condition,
                next,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.visit_stmt(&init.value);
                }
                if let Some(condition) = condition {
                    self.visit_expr(&condition.value);
                }
                if let Some(next) = next {
                    self.visit_expr(&next.value);
                }
                self.visit_stmt(&body.value);
            }
            Stmt::Continue { .. } | Stmt::Break { .. } => {}
            Stmt::Return(expr) => {
                if let Some(expr) = expr {
                    self.visit_expr(&expr.value);
                }
            }
            Stmt::With { object, body } => {
                self.visit_expr(&object.value);
                self.envs.push(Env::With);
                self.visit_stmt(&body.value);
                self.envs.pop();
            }
            Stmt::Switch {
                discriminant,
                cases,
                ..
            } => {
                self.visit_expr(&discriminant.value);
                for CaseClause { test, body } in cases {
                    if let Some(test) = test {
                        self.visit_expr(&test.value);
                    }
                    for stmt in body {
                        self.visit_stmt(&stmt.value);
                    }
                }
            }
            Stmt::Throw(expr) => self.visit_expr(&expr.value),
            Stmt::Try {
                block,
                catch,
                finally,
                ..
            } => {
                self.visit_stmt(&block.value);
                if let Some(catch) = catch {
                    self.envs.push(Env::Catch {
                        name: &catch.binding.value.name,
                    });
                    self.visit_stmt(&catch.body.value);
                    self.envs.pop();
                }
                if let Some(finally) = finally {
                    self.visit_stmt(&finally.value);
                }
            }
        }
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        match expr {
            Expr::Binary { left, right, .. } => {
                self.visit_expr(&left.value);
                self.visit_expr(&right.value);
            }
            Expr::Unary { expr, .. } => self.visit_expr(&expr.value),
            Expr::Assign { target, value, .. } => {
                self.visit_expr(&target.value);
                self.visit_expr(&value.value);
            }
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                self.visit_expr(&condition.value);
                self.visit_expr(&then_expr.value);
                self.visit_expr(&else_expr.value);
            }
            Expr::Property { object, key } => {
                self.visit_expr(&key.value);
                self.visit_expr(&object.value);
            }
            Expr::Call { callee, args } | Expr::CallNew { callee, args } => {
                for arg in args {
                    self.visit_expr(&arg.value);
                }
                self.visit_expr(&callee.value);
            }
            Expr::Function(lit) => self.visit_fun(lit),
            Expr::Ident(ident) => self.visit_ident(&ident.name),
            Expr::Array(values) => {
                for value in values {
                    self.visit_expr(&value.value);
                }
            }
            Expr::Object(props) => {
                for prop in props {
                    match prop {
                        ObjectProperty::Data { key, value } => {
                            self.visit_expr(&key.value);
                            self.visit_expr(&value.value);
                        }
                        ObjectProperty::Getter { function, .. }
                        | ObjectProperty::Setter { function, .. } => {
                            self.visit_expr(&function.value);
                        }
                    }
                }
            }
            Expr::This
            | Expr::Null
            | Expr::Bool(_)
            | Expr::Number { .. }
            | Expr::Str(_)
            | Expr::Regex { .. }
            | Expr::Nothing => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norn_ast::Ident;

    fn span(n: usize) -> Span {
        Span::new(n, n + 1, 0)
    }

    fn ident_expr(name: &str, n: usize) -> Node<Expr> {
        Node::new(Expr::Ident(Ident::new(name)), span(n))
    }

    fn fun_lit(
        kind: FunctionKind,
        name: Option<&str>,
        params: &[&str],
        body: Vec<Node<Stmt>>,
        n: usize,
    ) -> FunctionLiteral {
        FunctionLiteral {
            kind,
            name: name.map(|s| Node::new(Ident::new(s), span(n))),
            params: params
                .iter()
                .map(|p| Node::new(Ident::new(*p), span(n)))
                .collect(),
            body,
            is_strict: false,
            span: span(n),
        }
    }

    #[test]
    fn test_global_vars_are_context() {
        // var x; x;
        let body = vec![
            Node::new(
                Stmt::Var(vec![VarDeclarator {
                    name: Node::new(Ident::new("x"), span(1)),
                    init: None,
                }]),
                span(1),
            ),
            Node::new(Stmt::Expr(ident_expr("x", 2)), span(2)),
        ];
        let root = fun_lit(FunctionKind::Declaration, None, &[], body, 100);
        let analysis = analyze(&root);
        let fun = analysis.function(root.span);
        assert_eq!(fun.vars["x"].storage, Some(Storage::Context));
    }

    #[test]
    fn test_local_storage_in_function() {
        // function f() { var x; x; }
        let inner_body = vec![
            Node::new(
                Stmt::Var(vec![VarDeclarator {
                    name: Node::new(Ident::new("x"), span(11)),
                    init: None,
                }]),
                span(11),
            ),
            Node::new(Stmt::Expr(ident_expr("x", 12)), span(12)),
        ];
        let inner = fun_lit(FunctionKind::Declaration, Some("f"), &[], inner_body, 10);
        let root = fun_lit(
            FunctionKind::Declaration,
            None,
            &[],
            vec![Node::new(Stmt::Function(Box::new(inner.clone())), span(10))],
            100,
        );
        let analysis = analyze(&root);
        let fun = analysis.function(inner.span);
        assert_eq!(fun.vars["x"].storage, Some(Storage::Local));
        assert!(!fun.needs_args_obj);
    }

    #[test]
    fn test_captured_binding_goes_to_extra() {
        // function outer() { var x; function inner() { x; } inner(); }
        let inner_body = vec![Node::new(Stmt::Expr(ident_expr("x", 21)), span(21))];
        let inner = fun_lit(FunctionKind::Declaration, Some("inner"), &[], inner_body, 20);
        let outer_body = vec![
            Node::new(
                Stmt::Var(vec![VarDeclarator {
                    name: Node::new(Ident::new("x"), span(11)),
                    init: None,
                }]),
                span(11),
            ),
            Node::new(Stmt::Function(Box::new(inner.clone())), span(20)),
            Node::new(
                Stmt::Expr(Node::new(
                    Expr::Call {
                        callee: Box::new(ident_expr("inner", 22)),
                        args: vec![],
                    },
                    span(22),
                )),
                span(22),
            ),
        ];
        let outer = fun_lit(FunctionKind::Declaration, Some("outer"), &[], outer_body, 10);
        let root = fun_lit(
            FunctionKind::Declaration,
            None,
            &[],
            vec![Node::new(Stmt::Function(Box::new(outer.clone())), span(10))],
            100,
        );

        let analysis = analyze(&root);
        let outer_fun = analysis.function(outer.span);
        assert_eq!(outer_fun.vars["x"].storage, Some(Storage::LocalExtra));
        assert_eq!(outer_fun.num_extra(), 1);

        let inner_fun = analysis.function(inner.span);
        assert!(inner_fun.referenced_scopes.contains(&1));
    }

    #[test]
    fn test_with_blocks_compile_time_resolution() {
        // function f(o) { var x; with (o) { x; } }
        let body = vec![
            Node::new(
                Stmt::Var(vec![VarDeclarator {
                    name: Node::new(Ident::new("x"), span(11)),
                    init: None,
                }]),
                span(11),
            ),
            Node::new(
                Stmt::With {
                    object: ident_expr("o", 12),
                    body: Box::new(Node::new(Stmt::Expr(ident_expr("x", 13)), span(13))),
                },
                span(12),
            ),
        ];
        let f = fun_lit(FunctionKind::Declaration, Some("f"), &["o"], body, 10);
        let root = fun_lit(
            FunctionKind::Declaration,
            None,
            &[],
            vec![Node::new(Stmt::Function(Box::new(f.clone())), span(10))],
            100,
        );
        let analysis = analyze(&root);
        let fun = analysis.function(f.span);
        assert_eq!(fun.vars["x"].storage, Some(Storage::Context));
    }

    #[test]
    fn test_arguments_reference_sets_flag() {
        let body = vec![Node::new(Stmt::Expr(ident_expr("arguments", 11)), span(11))];
        let f = fun_lit(FunctionKind::Declaration, Some("f"), &["a"], body, 10);
        let root = fun_lit(
            FunctionKind::Declaration,
            None,
            &[],
            vec![Node::new(Stmt::Function(Box::new(f.clone())), span(10))],
            100,
        );
        let analysis = analyze(&root);
        let fun = analysis.function(f.span);
        assert!(fun.needs_args_obj);
        // Parameters move to the extra record so the arguments object can
        // alias them.
        assert_eq!(fun.vars["a"].storage, Some(Storage::LocalExtra));
    }

    #[test]
    fn test_eval_taints_enclosing_chain() {
        // function f() { eval("x"); var y; }
        let body = vec![
            Node::new(
                Stmt::Expr(Node::new(
                    Expr::Call {
                        callee: Box::new(ident_expr("eval", 11)),
                        args: vec![Node::new(Expr::Str("x".to_string()), span(12))],
                    },
                    span(11),
                )),
                span(11),
            ),
            Node::new(
                Stmt::Var(vec![VarDeclarator {
                    name: Node::new(Ident::new("y"), span(13)),
                    init: None,
                }]),
                span(13),
            ),
        ];
        let f = fun_lit(FunctionKind::Declaration, Some("f"), &[], body, 10);
        let root = fun_lit(
            FunctionKind::Declaration,
            None,
            &[],
            vec![Node::new(Stmt::Function(Box::new(f.clone())), span(10))],
            100,
        );
        let analysis = analyze(&root);
        let fun = analysis.function(f.span);
        assert!(fun.tainted_by_eval);
        // The unreferenced y must be reachable by name from eval code.
        assert_eq!(fun.vars["y"].storage, Some(Storage::Context));
    }

    #[test]
    fn test_catch_binding_shadows() {
        // function f() { var e; try {} catch (e) { e; } }
        let catch_body = Node::new(
            Stmt::Block {
                labels: vec![],
                body: vec![Node::new(Stmt::Expr(ident_expr("e", 13)), span(13))],
            },
            span(13),
        );
        let body = vec![
            Node::new(
                Stmt::Var(vec![VarDeclarator {
                    name: Node::new(Ident::new("e"), span(11)),
                    init: None,
                }]),
                span(11),
            ),
            Node::new(
                Stmt::Try {
                    labels: vec![],
                    block: Box::new(Node::new(
                        Stmt::Block {
                            labels: vec![],
                            body: vec![],
                        },
                        span(12),
                    )),
                    catch: Some(norn_ast::CatchClause {
                        binding: Node::new(Ident::new("e"), span(13)),
                        body: Box::new(catch_body),
                    }),
                    finally: None,
                },
                span(12),
            ),
        ];
        let f = fun_lit(FunctionKind::Declaration, Some("f"), &[], body, 10);
        let root = fun_lit(
            FunctionKind::Declaration,
            None,
            &[],
            vec![Node::new(Stmt::Function(Box::new(f.clone())), span(10))],
            100,
        );
        let analysis = analyze(&root);
        let fun = analysis.function(f.span);
        // The reference inside catch resolves to the catch binding; the var
        // is never referenced and stays unallocated.
        assert!(!fun.vars["e"].is_allocated());
    }
}
