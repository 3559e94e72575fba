//! AST → IR lowering.
//!
//! A bottom-up value-returning walk over the AST. Expression visitors return
//! the [`Ref`] holding the expression's result; statement visitors leave the
//! block cursor on a block where control continues.
//!
//! Runtime-calling instructions are followed by a branch on their success
//! flag: the false edge leads to a landing pad inflated from the innermost
//! frame of the unwind-action stack. `with` and `catch` frames contribute a
//! `ctx_leave` on the way out; `try` frames route into the catch dispatch;
//! the function root returns failure to the caller. `break`, `continue` and
//! `return` unroll the scope stack, re-emitting context leaves and
//! re-lowering `finally` bodies for every frame they cross.

mod expr;
mod stmt;

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use log::debug;
use norn_ast::{FunctionLiteral, Node, Span, Stmt};

use crate::analyzer::{self, Analysis, Storage, VarKind};
use crate::error::{LowerError, LowerErrorKind, LowerResult};
use crate::{
    BlockId, Builder, CacheId, FuncId, Function, IrType, Module, NameKey, StringResource,
    ValueId, ValueTag, STRING_KEY_FLAG,
};

/// Default exported name of the global script body.
pub const GLOBAL_FUNCTION_NAME: &str = "_norn_global";

/// An expression result: either a concrete value or an unresolved reference
/// that GetValue/PutValue expansion turns into context or property
/// operations.
#[derive(Debug, Clone)]
pub(crate) enum Ref {
    Value(ValueId),
    Ctx { key: NameKey },
    Prp { object: ValueId, key: PrpKey },
}

#[derive(Debug, Clone)]
pub(crate) enum PrpKey {
    Imm(NameKey),
    Value(ValueId),
}

/// One frame of the unwind-action stack; inflating an action always ends in
/// a terminator.
#[derive(Debug)]
pub(crate) enum Action {
    /// Return `false` to the caller, leaving the pending exception set
    ReturnFailure,
    /// Jump into a try statement's catch dispatch
    Jump(BlockId),
    /// Leave the innermost context, then run the inner action
    LeaveContext(Rc<Action>),
}

/// Scope epilogue run when `break`/`continue`/`return` leave the scope.
#[derive(Clone)]
pub(crate) enum Epilogue<'ast> {
    LeaveContext,
    Finally {
        stmt: &'ast Node<Stmt>,
        on_fault: Rc<Action>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Default,
    Iteration,
    Switch,
    Function,
    With,
    Catch,
}

/// A compile-time slot: the lvalue constant plus its index within the
/// backing array, used to rebase captured slots onto another frame's
/// extra-bindings pointer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalSlot {
    pub value: ValueId,
    pub index: usize,
}

pub(crate) struct Scope<'ast> {
    kind: ScopeKind,
    labels: HashSet<String>,
    catch_name: Option<String>,
    cnt_target: Option<BlockId>,
    brk_target: Option<BlockId>,
    epilogue: Option<Epilogue<'ast>>,
    locals: HashMap<String, LocalSlot>,
    scope_stacks: HashMap<usize, ValueId>,
}

impl<'ast> Scope<'ast> {
    fn new(kind: ScopeKind) -> Self {
        Scope {
            kind,
            labels: HashSet::new(),
            catch_name: None,
            cnt_target: None,
            brk_target: None,
            epilogue: None,
            locals: HashMap::new(),
            scope_stacks: HashMap::new(),
        }
    }

    fn breakable(kind: ScopeKind, brk_target: BlockId) -> Self {
        let mut scope = Scope::new(kind);
        scope.brk_target = Some(brk_target);
        scope
    }

    fn iteration(cnt_target: BlockId, brk_target: BlockId) -> Self {
        let mut scope = Scope::new(ScopeKind::Iteration);
        scope.cnt_target = Some(cnt_target);
        scope.brk_target = Some(brk_target);
        scope
    }

    fn catch(name: impl Into<String>) -> Self {
        let mut scope = Scope::new(ScopeKind::Catch);
        scope.catch_name = Some(name.into());
        scope
    }

    fn push_labels(&mut self, labels: &[String]) {
        for label in labels {
            self.labels.insert(label.clone());
        }
    }
}

/// Compiles a syntax tree into the intermediate representation.
pub struct Lowerer<'ast> {
    module: Module,
    analysis: Analysis,
    global_name: String,
    scopes: Vec<Scope<'ast>>,
    actions: Vec<Rc<Action>>,
    in_epilogue: bool,
    strings: HashMap<String, u32>,
    string_order: Vec<String>,
    next_cache_id: u32,
    cur_fun: FuncId,
    cur_block: BlockId,
    cur_span: Span,
    strict: bool,
}

impl<'ast> Default for Lowerer<'ast> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'ast> Lowerer<'ast> {
    pub fn new() -> Self {
        Lowerer {
            module: Module::new(),
            analysis: Analysis::default(),
            global_name: GLOBAL_FUNCTION_NAME.to_string(),
            scopes: Vec::new(),
            actions: Vec::new(),
            in_epilogue: false,
            strings: HashMap::new(),
            string_order: Vec::new(),
            next_cache_id: 0,
            cur_fun: FuncId(0),
            cur_block: BlockId(0),
            cur_span: Span::new(0, 0, 0),
            strict: false,
        }
    }

    pub(crate) fn strict_mode(&self) -> bool {
        self.strict
    }

    /// Overrides the exported name of the global script body.
    pub fn with_global_name(mut self, name: impl Into<String>) -> Self {
        self.global_name = name.into();
        self
    }

    /// Lowers a whole program rooted at the global function literal.
    pub fn lower_program(mut self, root: &'ast FunctionLiteral) -> LowerResult<Module> {
        self.analysis = analyzer::analyze(root);
        self.parse_fun(root, true)?;

        #[cfg(debug_assertions)]
        {
            let violations = crate::verify::verify_module(&self.module);
            debug_assert!(
                violations.is_empty(),
                "lowering produced ill-formed IR: {:?}",
                violations
            );
        }

        for (id, text) in self.string_order.iter().enumerate() {
            self.module.push_resource(StringResource {
                text: text.clone(),
                id: id as u32,
            });
        }
        Ok(self.module)
    }

    // -- Cursor and builder plumbing ----------------------------------------

    pub(crate) fn f(&mut self) -> &mut Function {
        self.module.function_mut(self.cur_fun)
    }

    pub(crate) fn fr(&self) -> &Function {
        self.module.function(self.cur_fun)
    }

    pub(crate) fn bb(&mut self) -> Builder<'_> {
        let block = self.cur_block;
        self.module.function_mut(self.cur_fun).builder(block)
    }

    pub(crate) fn new_block(&mut self) -> BlockId {
        self.f().new_block()
    }

    pub(crate) fn set_cursor(&mut self, block: BlockId) {
        self.cur_block = block;
    }

    pub(crate) fn cursor_terminated(&self) -> bool {
        self.fr().is_terminated(self.cur_block)
    }

    pub(crate) fn jmp_if_open(&mut self, target: BlockId) {
        if !self.cursor_terminated() {
            self.bb().jmp(target);
        }
    }

    // -- Interning ----------------------------------------------------------

    /// Returns the dense id shared by all strings equal to `text`.
    pub(crate) fn str_id(&mut self, text: &str) -> u32 {
        if let Some(&id) = self.strings.get(text) {
            return id;
        }
        let id = self.string_order.len() as u32;
        self.strings.insert(text.to_string(), id);
        self.string_order.push(text.to_string());
        id
    }

    /// Returns the 64-bit key identifying a named or indexed property. Two
    /// identifiers with equal text share a key anywhere in the module.
    pub(crate) fn prp_key(&mut self, name: &str) -> NameKey {
        debug_assert!(!name.is_empty());
        if let Some(index) = str_to_index(name) {
            return index as NameKey;
        }
        self.str_id(name) as NameKey | STRING_KEY_FLAG
    }

    /// Allocates a fresh per-site inline-cache id, unique within the module.
    pub(crate) fn alloc_cache_id(&mut self) -> LowerResult<CacheId> {
        if self.next_cache_id > u16::MAX as u32 {
            return Err(LowerError::new(
                LowerErrorKind::CacheIdExhausted,
                "too many context access sites in one module",
                self.cur_span,
            ));
        }
        let cid = self.next_cache_id as CacheId;
        self.next_cache_id += 1;
        Ok(cid)
    }

    // -- Scopes -------------------------------------------------------------

    pub(crate) fn push_scope(&mut self, scope: Scope<'ast>) {
        self.scopes.push(scope);
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn scope_mut(&mut self) -> &mut Scope<'ast> {
        self.scopes.last_mut().expect("scope stack is empty")
    }

    fn add_local(&mut self, name: &str, value: ValueId, index: usize) {
        self.scope_mut()
            .locals
            .insert(name.to_string(), LocalSlot { value, index });
    }

    /// Resolves a name to a compile-time slot. Returns `None` when the
    /// lookup must go through the runtime scope chain: the name is not a
    /// local, a `with` scope intervenes, the name is shadowed by a `catch`
    /// binding, or it is `arguments` owned by an outer frame.
    pub(crate) fn get_local(&mut self, name: &str) -> Option<ValueId> {
        let cur_fun_idx = self
            .scopes
            .iter()
            .rposition(|s| s.kind == ScopeKind::Function)?;

        let mut hops = 0usize;
        for i in (0..self.scopes.len()).rev() {
            let scope = &self.scopes[i];
            match scope.kind {
                ScopeKind::With => return None,
                ScopeKind::Catch if scope.catch_name.as_deref() == Some(name) => return None,
                _ => {}
            }
            if let Some(slot) = scope.locals.get(name) {
                if hops == 0 {
                    return Some(slot.value);
                }
                // The arguments object of an outer frame is only reachable
                // through the runtime environment.
                if name == "arguments" {
                    return None;
                }
                let index = slot.index;
                let base = *self.scopes[cur_fun_idx]
                    .scope_stacks
                    .get(&hops)
                    .expect("referenced scope stack was not linked in the prologue");
                return Some(self.f().const_array_element(base, index));
            }
            if scope.kind == ScopeKind::Function {
                hops += 1;
            }
        }
        None
    }

    pub(crate) fn ident_ref(&mut self, name: &str) -> Ref {
        match self.get_local(name) {
            Some(slot) => Ref::Value(slot),
            None => Ref::Ctx {
                key: self.prp_key(name),
            },
        }
    }

    // -- Unwind actions -----------------------------------------------------

    pub(crate) fn push_action(&mut self, action: Action) {
        self.actions.push(Rc::new(action));
    }

    pub(crate) fn pop_action(&mut self) {
        self.actions.pop();
    }

    pub(crate) fn current_action(&self) -> Rc<Action> {
        self.actions.last().expect("action stack is empty").clone()
    }

    /// Emits the unwind sequence of an action at the cursor; always ends the
    /// block with a terminator.
    pub(crate) fn inflate_action(&mut self, action: &Action) {
        match action {
            Action::ReturnFailure => {
                let failed = self.f().const_boolean(false);
                self.bb().ret(failed);
            }
            Action::Jump(target) => {
                self.bb().jmp(*target);
            }
            Action::LeaveContext(inner) => {
                self.bb().ctx_leave();
                self.inflate_action(inner);
            }
        }
    }

    pub(crate) fn inflate_current_action(&mut self) {
        let action = self.current_action();
        self.inflate_action(&action);
    }

    fn inflate_epilogue(&mut self, epilogue: &Epilogue<'ast>) -> LowerResult<()> {
        match epilogue {
            Epilogue::LeaveContext => {
                self.bb().ctx_leave();
                Ok(())
            }
            Epilogue::Finally { stmt, on_fault } => {
                self.actions.push(on_fault.clone());
                let result = self.parse_stmt(stmt);
                self.actions.pop();
                result
            }
        }
    }

    // -- Scope unrolling ----------------------------------------------------

    fn scope_snapshot(
        &self,
    ) -> Vec<(
        ScopeKind,
        HashSet<String>,
        Option<BlockId>,
        Option<BlockId>,
        Option<Epilogue<'ast>>,
    )> {
        self.scopes
            .iter()
            .rev()
            .map(|s| {
                (
                    s.kind,
                    s.labels.clone(),
                    s.cnt_target,
                    s.brk_target,
                    s.epilogue.clone(),
                )
            })
            .collect()
    }

    fn run_unroll_epilogue(
        &mut self,
        epilogue: Epilogue<'ast>,
        unrolled: &mut bool,
    ) -> LowerResult<()> {
        if !*unrolled {
            let unrl = self.new_block();
            self.bb().jmp(unrl);
            self.set_cursor(unrl);
            *unrolled = true;
        }
        self.in_epilogue = true;
        let result = self.inflate_epilogue(&epilogue);
        self.in_epilogue = false;
        result
    }

    /// Unwinds scope epilogues for a `continue` and returns its target.
    pub(crate) fn unroll_for_continue(
        &mut self,
        label: Option<&str>,
    ) -> LowerResult<Option<BlockId>> {
        let mut unrolled = false;
        for (kind, labels, cnt, _brk, epilogue) in self.scope_snapshot() {
            let matches_target = match label {
                None => kind == ScopeKind::Iteration,
                Some(label) => kind == ScopeKind::Iteration && labels.contains(label),
            };
            if matches_target {
                return Ok(cnt);
            }
            if !self.in_epilogue {
                if let Some(epilogue) = epilogue {
                    self.run_unroll_epilogue(epilogue, &mut unrolled)?;
                }
            }
        }
        Ok(None)
    }

    /// Unwinds scope epilogues for a `break` and returns its target.
    pub(crate) fn unroll_for_break(&mut self, label: Option<&str>) -> LowerResult<Option<BlockId>> {
        let mut unrolled = false;
        for (kind, labels, _cnt, brk, epilogue) in self.scope_snapshot() {
            let matches_target = match label {
                None => matches!(kind, ScopeKind::Iteration | ScopeKind::Switch),
                Some(label) => labels.contains(label),
            };
            if matches_target {
                return Ok(brk);
            }
            if !self.in_epilogue {
                if let Some(epilogue) = epilogue {
                    self.run_unroll_epilogue(epilogue, &mut unrolled)?;
                }
            }
        }
        Ok(None)
    }

    /// Unwinds scope epilogues out to the function root for a `return`.
    pub(crate) fn unroll_for_return(&mut self) -> LowerResult<()> {
        let mut unrolled = false;
        for (kind, _labels, _cnt, _brk, epilogue) in self.scope_snapshot() {
            if !self.in_epilogue {
                if let Some(epilogue) = epilogue {
                    self.run_unroll_epilogue(epilogue, &mut unrolled)?;
                }
            }
            if kind == ScopeKind::Function {
                break;
            }
        }
        Ok(())
    }

    // -- Reference expansion (GetValue / PutValue) --------------------------

    /// Extracts the value of a reference in place. Values pass through;
    /// references allocate a result slot, emit the load and the branch on
    /// exception, and leave the cursor on the success block.
    pub(crate) fn ref_get(&mut self, r: &Ref, expt_block: BlockId) -> LowerResult<ValueId> {
        match r {
            Ref::Value(value) => Ok(*value),
            Ref::Ctx { key } => {
                let result = self.bb().mem_alloc(IrType::Value);
                let cid = self.alloc_cache_id()?;
                let t = self.bb().ctx_get(*key, result, cid);
                let done = self.new_block();
                self.bb().br(t, done, expt_block);
                self.set_cursor(done);
                Ok(result)
            }
            Ref::Prp { object, key } => {
                let result = self.bb().mem_alloc(IrType::Value);
                let done = self.new_block();
                self.emit_prp_get(*object, key, result, done, expt_block);
                self.set_cursor(done);
                Ok(result)
            }
        }
    }

    /// Extracts the value of a reference into `dst`, then jumps to `done`
    /// on success or `expt_block` on failure.
    pub(crate) fn ref_get_to(
        &mut self,
        r: &Ref,
        dst: ValueId,
        done_block: BlockId,
        expt_block: BlockId,
    ) -> LowerResult<()> {
        match r {
            Ref::Value(value) => {
                self.bb().mem_store(dst, *value);
                self.bb().jmp(done_block);
            }
            Ref::Ctx { key } => {
                let cid = self.alloc_cache_id()?;
                let t = self.bb().ctx_get(*key, dst, cid);
                self.bb().br(t, done_block, expt_block);
            }
            Ref::Prp { object, key } => {
                self.emit_prp_get(*object, key, dst, done_block, expt_block);
            }
        }
        Ok(())
    }

    fn emit_prp_get(
        &mut self,
        object: ValueId,
        key: &PrpKey,
        dst: ValueId,
        done_block: BlockId,
        expt_block: BlockId,
    ) {
        // A null or undefined base is a Type error before the lookup runs.
        let coercible = self.bb().val_tst_coerc(object);
        let lookup = self.new_block();
        self.bb().br(coercible, lookup, expt_block);
        self.set_cursor(lookup);
        let t = match key {
            PrpKey::Imm(key) => self.bb().prp_get(object, *key, dst),
            PrpKey::Value(key) => self.bb().prp_get_slow(object, *key, dst),
        };
        self.bb().br(t, done_block, expt_block);
    }

    /// Writes a value through a reference, then jumps to `done` on success
    /// or `expt_block` on failure.
    pub(crate) fn ref_put(
        &mut self,
        r: &Ref,
        value: ValueId,
        done_block: BlockId,
        expt_block: BlockId,
    ) -> LowerResult<()> {
        match r {
            Ref::Value(slot) => {
                self.bb().mem_store(*slot, value);
                self.bb().jmp(done_block);
            }
            Ref::Ctx { key } => {
                let cid = self.alloc_cache_id()?;
                let t = self.bb().ctx_put(*key, value, cid);
                self.bb().br(t, done_block, expt_block);
            }
            Ref::Prp { object, key } => {
                let coercible = self.bb().val_tst_coerc(*object);
                let lookup = self.new_block();
                self.bb().br(coercible, lookup, expt_block);
                self.set_cursor(lookup);
                let t = match key {
                    PrpKey::Imm(k) => self.bb().prp_put(*object, *k, value),
                    PrpKey::Value(k) => self.bb().prp_put_slow(*object, *k, value),
                };
                self.bb().br(t, done_block, expt_block);
            }
        }
        Ok(())
    }

    // -- Function lowering --------------------------------------------------

    pub(crate) fn parse_fun(
        &mut self,
        lit: &'ast FunctionLiteral,
        is_global: bool,
    ) -> LowerResult<FuncId> {
        if lit.is_strict {
            let mut seen = HashSet::new();
            for param in &lit.params {
                if !seen.insert(param.value.name.as_str()) {
                    return Err(LowerError::new(
                        LowerErrorKind::StrictDuplicateParam,
                        format!(
                            "duplicate parameter name `{}` in strict mode",
                            param.value.name
                        ),
                        param.span,
                    ));
                }
            }
        }

        let name = if is_global {
            self.global_name.clone()
        } else {
            let ordinal = self.module.functions.len();
            let base = lit.name_str();
            if base.is_empty() {
                format!("anon_{}", ordinal)
            } else {
                format!("{}_{}", base, ordinal)
            }
        };
        debug!(
            "lowering function `{}` ({} params, strict={})",
            name,
            lit.params.len(),
            lit.is_strict
        );

        let mut function = Function::new(name, is_global);
        function.span = Some(lit.span);
        let fid = self.module.push_function(function);
        let saved_fun = self.cur_fun;
        let saved_block = self.cur_block;
        let saved_strict = self.strict;
        self.cur_fun = fid;
        self.cur_block = self.module.function(fid).entry();
        self.strict = lit.is_strict;

        self.bb().ctx_set_strict(lit.is_strict);

        self.push_scope(Scope::new(ScopeKind::Function));
        self.push_action(Action::ReturnFailure);

        self.parse_fun_inner(lit)?;

        self.pop_action();
        self.pop_scope();
        self.cur_fun = saved_fun;
        self.cur_block = saved_block;
        self.strict = saved_strict;
        Ok(fid)
    }

    fn parse_fun_inner(&mut self, lit: &'ast FunctionLiteral) -> LowerResult<()> {
        let analyzed = self.analysis.function(lit.span).clone();
        let strict = lit.is_strict;
        let tainted = analyzed.tainted_by_eval;

        let body_block = self.new_block();
        let expt_block = self.new_block();

        let num_params = lit.params.len();
        let num_locals = analyzed.num_locals();
        let num_extra = analyzed.num_extra();

        // Locals array, extra-bindings record.
        let mut locals_arr: Option<ValueId> = None;
        let mut extra_arr: Option<ValueId> = None;
        let start_locals;
        let mut start_extras = 0usize;

        if !analyzed.needs_args_obj {
            if num_locals + num_params > 0 {
                let arr = self
                    .bb()
                    .mem_alloc(IrType::array(IrType::Value, num_params + num_locals));
                self.f().make_persistent(arr);
                locals_arr = Some(arr);
            }
            if num_params > 0 {
                let arr = locals_arr.expect("locals array covers parameters");
                self.bb().init_args(arr, num_params);
            }
            start_locals = num_params;

            if num_extra > 0 {
                let arr = self.bb().bnd_extra_init(num_extra);
                self.f().make_persistent(arr);
                extra_arr = Some(arr);
            }
            self.link_scope_stacks(&analyzed.referenced_scopes);

            // Parameters.
            for (pname, var) in &analyzed.vars {
                let VarKind::Param { index } = var.kind else {
                    continue;
                };
                let Some(storage) = var.storage else { continue };
                match storage {
                    Storage::Local => {
                        let base = locals_arr.expect("locals array");
                        let slot = self.f().const_array_element(base, index);
                        self.add_local(pname, slot, index);
                        if tainted || pname == "arguments" {
                            let key = self.prp_key(pname);
                            let ptr = self.bb().mem_elm_ptr(base, index);
                            self.bb().link_var(key, strict, ptr);
                        }
                    }
                    Storage::LocalExtra => {
                        let base = extra_arr.expect("extra record");
                        let slot = self.f().const_array_element(base, start_extras);
                        self.add_local(pname, slot, start_extras);
                        start_extras += 1;
                        let locals = locals_arr.expect("locals array");
                        let src = self.f().const_array_element(locals, index);
                        self.bb().mem_store(slot, src);
                    }
                    Storage::Context => {
                        let key = self.prp_key(pname);
                        let base = locals_arr.expect("locals array");
                        let next = self.new_block();
                        let t = self.bb().decl_prm(key, strict, index, base);
                        self.bb().br(t, next, expt_block);
                        self.set_cursor(next);
                    }
                }
            }
        } else {
            // The arguments object aliases the actual parameters, so they
            // must live on the heap in the extra record. The record covers
            // one slot per parameter regardless of the parameter's storage,
            // then the captured non-parameter bindings.
            let extra_non_param = analyzed
                .vars
                .values()
                .filter(|v| {
                    v.storage == Some(Storage::LocalExtra)
                        && !matches!(v.kind, VarKind::Param { .. })
                })
                .count();
            let extra_size = num_params + extra_non_param;

            if num_locals > 0 {
                let arr = self
                    .bb()
                    .mem_alloc(IrType::array(IrType::Value, num_locals));
                self.f().make_persistent(arr);
                locals_arr = Some(arr);
            }
            if extra_size > 0 {
                let arr = self.bb().bnd_extra_init(extra_size);
                self.f().make_persistent(arr);
                extra_arr = Some(arr);
            }
            if num_params > 0 {
                let arr = extra_arr.expect("extra record covers parameters");
                self.bb().init_args(arr, num_params);
            }
            start_locals = 0;
            start_extras = num_params;
            self.link_scope_stacks(&analyzed.referenced_scopes);

            let args_obj = self.bb().args_obj_init(0);

            for (pname, var) in &analyzed.vars {
                let VarKind::Param { index } = var.kind else {
                    continue;
                };
                let Some(storage) = var.storage else { continue };
                let base = extra_arr.expect("extra record");
                let ptr = self.bb().mem_elm_ptr(base, index);
                self.bb().args_obj_link(args_obj, index, ptr);

                let slot = self.f().const_array_element(base, index);
                self.add_local(pname, slot, index);

                let link = match storage {
                    Storage::Local | Storage::LocalExtra => tainted || pname == "arguments",
                    Storage::Context => true,
                };
                if link {
                    let key = self.prp_key(pname);
                    let ptr = self.bb().mem_elm_ptr(base, index);
                    self.bb().link_prm(key, strict, ptr);
                }
            }
        }

        let mut locals_index = start_locals;
        let mut extras_index = start_extras;

        // Callee self-binding of named function expressions.
        for (cname, var) in &analyzed.vars {
            if var.kind != VarKind::Callee || !var.is_allocated() {
                continue;
            }
            let slot = match var.storage {
                Some(Storage::Local) => {
                    let base = locals_arr.expect("locals array");
                    let slot = self.f().const_array_element(base, locals_index);
                    self.add_local(cname, slot, locals_index);
                    locals_index += 1;
                    Some(slot)
                }
                Some(Storage::LocalExtra) => {
                    let base = extra_arr.expect("extra record");
                    let slot = self.f().const_array_element(base, extras_index);
                    self.add_local(cname, slot, extras_index);
                    extras_index += 1;
                    Some(slot)
                }
                // The runtime binds the name when constructing the closure.
                _ => None,
            };
            if let Some(slot) = slot {
                let callee = self.f().const_callee();
                self.bb().mem_store(slot, callee);
            }
        }

        // Slot assignment for hoisted declarations, in name order.
        let mut decl_slots: HashMap<String, (ValueId, ValueId, usize)> = HashMap::new();
        for (dname, var) in &analyzed.vars {
            if !matches!(var.kind, VarKind::Fun | VarKind::Var) || !var.is_allocated() {
                continue;
            }
            match var.storage {
                Some(Storage::Local) => {
                    let base = locals_arr.expect("locals array");
                    let slot = self.f().const_array_element(base, locals_index);
                    self.add_local(dname, slot, locals_index);
                    decl_slots.insert(dname.clone(), (base, slot, locals_index));
                    locals_index += 1;
                }
                Some(Storage::LocalExtra) => {
                    let base = extra_arr.expect("extra record");
                    let slot = self.f().const_array_element(base, extras_index);
                    self.add_local(dname, slot, extras_index);
                    decl_slots.insert(dname.clone(), (base, slot, extras_index));
                    extras_index += 1;
                }
                _ => {}
            }
        }

        // Instantiate function declarations in source order.
        let hoisted = analyzer::hoisted_decls(&lit.body);
        for inner in &hoisted.funs {
            let Some(fname) = inner.name.as_ref().map(|n| n.value.name.clone()) else {
                continue;
            };
            let var = &analyzed.vars[&fname];
            if !var.is_allocated() {
                continue;
            }
            let inner_fid = self.parse_fun(inner, false)?;
            let fun_value = self
                .bb()
                .es_new_fun(inner_fid, inner.params.len(), inner.is_strict);
            match var.storage {
                Some(Storage::Local) | Some(Storage::LocalExtra) => {
                    let (base, _slot, index) = decl_slots[&fname];
                    self.bb().arr_put(index, base, fun_value);
                    if tainted || fname == "arguments" {
                        let key = self.prp_key(&fname);
                        let ptr = self.bb().mem_elm_ptr(base, index);
                        self.bb().link_fun(key, strict, ptr);
                    }
                }
                Some(Storage::Context) => {
                    let key = self.prp_key(&fname);
                    let next = self.new_block();
                    let t = self.bb().decl_fun(key, strict, fun_value);
                    self.bb().br(t, next, expt_block);
                    self.set_cursor(next);
                }
                None => unreachable!("allocated variable"),
            }
        }

        // Bind var declarations to undefined.
        for (dname, var) in &analyzed.vars {
            if var.kind != VarKind::Var || !var.is_allocated() {
                continue;
            }
            match var.storage {
                Some(Storage::Local) | Some(Storage::LocalExtra) => {
                    let (base, _slot, index) = decl_slots[dname];
                    let undefined = self.f().const_value(ValueTag::Undefined);
                    self.bb().arr_put(index, base, undefined);
                    if tainted || dname == "arguments" {
                        let key = self.prp_key(dname);
                        let ptr = self.bb().mem_elm_ptr(base, index);
                        self.bb().link_var(key, strict, ptr);
                    }
                }
                Some(Storage::Context) => {
                    let key = self.prp_key(dname);
                    let next = self.new_block();
                    let t = self.bb().decl_var(key, strict);
                    self.bb().br(t, next, expt_block);
                    self.set_cursor(next);
                }
                None => unreachable!("allocated variable"),
            }
        }

        self.bb().jmp(body_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(body_block);
        for stmt in &lit.body {
            self.parse_stmt(stmt)?;
        }

        // Make sure the function returns something.
        if !self.cursor_terminated() {
            let ret_slot = self.f().const_return();
            let undefined = self.f().const_value(ValueTag::Undefined);
            self.bb().mem_store(ret_slot, undefined);
            let ok = self.f().const_boolean(true);
            self.bb().ret(ok);
        }
        Ok(())
    }

    fn link_scope_stacks(&mut self, referenced: &std::collections::BTreeSet<usize>) {
        for &hops in referenced {
            let ptr = self.bb().bnd_extra_ptr(hops);
            self.f().make_persistent(ptr);
            self.scope_mut().scope_stacks.insert(hops, ptr);
        }
    }

    pub(crate) fn set_span(&mut self, span: Span) {
        self.cur_span = span;
    }
}

/// True canonical array indices per the property key encoding: a string of
/// decimal digits without a superfluous leading zero whose value fits below
/// 2^32 - 1.
pub(crate) fn str_to_index(text: &str) -> Option<u32> {
    if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
        return None;
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match text.parse::<u32>() {
        Ok(index) if index != u32::MAX => Some(index),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_to_index() {
        assert_eq!(str_to_index("0"), Some(0));
        assert_eq!(str_to_index("42"), Some(42));
        assert_eq!(str_to_index("007"), None);
        assert_eq!(str_to_index("x1"), None);
        assert_eq!(str_to_index(""), None);
        assert_eq!(str_to_index("4294967295"), None);
        assert_eq!(str_to_index("4294967294"), Some(4294967294));
    }

    #[test]
    fn test_key_interning() {
        let mut lowerer = Lowerer::new();
        let a = lowerer.prp_key("foo");
        let b = lowerer.prp_key("bar");
        let c = lowerer.prp_key("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert!(a & STRING_KEY_FLAG != 0);
        // Canonical indices map to themselves without the string flag.
        assert_eq!(lowerer.prp_key("3"), 3);
    }

    #[test]
    fn test_cache_ids_are_monotonic() {
        let mut lowerer = Lowerer::new();
        assert_eq!(lowerer.alloc_cache_id().unwrap(), 0);
        assert_eq!(lowerer.alloc_cache_id().unwrap(), 1);
        assert_eq!(lowerer.alloc_cache_id().unwrap(), 2);
    }
}
