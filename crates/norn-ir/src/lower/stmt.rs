//! Statement lowering.

use std::rc::Rc;

use norn_ast::{CaseClause, CatchClause, Expr, ForInTarget, Node, Stmt, VarDeclarator};

use super::{Action, Epilogue, Lowerer, Scope, ScopeKind};
use crate::error::{LowerError, LowerErrorKind, LowerResult};
use crate::{EsBinOp, IrType, ValueTag};

impl<'ast> Lowerer<'ast> {
    pub(crate) fn parse_stmt(&mut self, stmt: &'ast Node<Stmt>) -> LowerResult<()> {
        self.set_span(stmt.span);
        match &stmt.value {
            // Function declarations are instantiated by the prologue.
            Stmt::Empty | Stmt::Debugger | Stmt::Function(_) => Ok(()),
            Stmt::Expr(expr) => self.parse_expr_stmt(expr),
            Stmt::Block { labels, body } => self.parse_block_stmt(labels, body),
            Stmt::Var(decls) => self.parse_var_stmt(decls),
            Stmt::If {
                condition,
                then_stmt,
                else_stmt,
            } => self.parse_if_stmt(condition, then_stmt, else_stmt.as_deref()),
            Stmt::DoWhile {
                labels,
                body,
                condition,
            } => self.parse_do_while_stmt(labels, body, condition),
            Stmt::While {
                labels,
                condition,
                body,
            } => self.parse_while_stmt(labels, condition, body),
            Stmt::ForIn {
                labels,
                target,
                enumerable,
                body,
            } => self.parse_for_in_stmt(labels, target, enumerable, body),
            Stmt::For {
                labels,
                init,
                condition,
                next,
                body,
            } => self.parse_for_stmt(
                labels,
                init.as_deref(),
                condition.as_ref(),
                next.as_ref(),
                body,
            ),
            Stmt::Continue { label } => self.parse_cont_stmt(label.as_deref(), stmt.span),
            Stmt::Break { label } => self.parse_break_stmt(label.as_deref(), stmt.span),
            Stmt::Return(expr) => self.parse_ret_stmt(expr.as_ref(), stmt.span),
            Stmt::With { object, body } => self.parse_with_stmt(object, body, stmt.span),
            Stmt::Switch {
                labels,
                discriminant,
                cases,
            } => self.parse_switch_stmt(labels, discriminant, cases),
            Stmt::Throw(expr) => self.parse_throw_stmt(expr),
            Stmt::Try {
                labels,
                block,
                catch,
                finally,
            } => self.parse_try_stmt(labels, block, catch.as_ref(), finally.as_deref()),
        }
    }

    fn parse_expr_stmt(&mut self, expr: &'ast Node<Expr>) -> LowerResult<()> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let eref = self.parse_expr(expr)?;
        let scratch = self.bb().mem_alloc(IrType::Value);
        self.ref_get_to(&eref, scratch, done_block, expt_block)?;

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_block_stmt(&mut self, labels: &[String], body: &'ast [Node<Stmt>]) -> LowerResult<()> {
        let done_block = self.new_block();

        let mut scope = Scope::breakable(ScopeKind::Default, done_block);
        scope.push_labels(labels);
        self.push_scope(scope);

        for stmt in body {
            self.parse_stmt(stmt)?;
        }
        self.jmp_if_open(done_block);

        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }

    /// The bindings were hoisted by the prologue; only the initializers run
    /// here, as ordinary assignments.
    fn parse_var_stmt(&mut self, decls: &'ast [VarDeclarator]) -> LowerResult<()> {
        for VarDeclarator { name, init } in decls {
            let Some(init) = init else { continue };

            let target = self.ident_ref(&name.value.name);
            let vref = self.parse_expr(init)?;

            let done_block = self.new_block();
            let expt_block = self.new_block();

            let value = self.ref_get(&vref, expt_block)?;
            self.ref_put(&target, value, done_block, expt_block)?;

            self.set_cursor(expt_block);
            self.inflate_current_action();

            self.set_cursor(done_block);
        }
        Ok(())
    }

    fn parse_if_stmt(
        &mut self,
        condition: &'ast Node<Expr>,
        then_stmt: &'ast Node<Stmt>,
        else_stmt: Option<&'ast Node<Stmt>>,
    ) -> LowerResult<()> {
        let true_block = self.new_block();
        let false_block = self.new_block();
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let cref = self.parse_expr(condition)?;
        let cond_value = self.ref_get(&cref, expt_block)?;
        let cond = self.bb().val_to_bool(cond_value);
        let else_target = if else_stmt.is_some() {
            false_block
        } else {
            done_block
        };
        self.bb().br(cond, true_block, else_target);

        self.set_cursor(true_block);
        self.parse_stmt(then_stmt)?;
        self.jmp_if_open(done_block);

        if let Some(else_stmt) = else_stmt {
            self.set_cursor(false_block);
            self.parse_stmt(else_stmt)?;
            self.jmp_if_open(done_block);
        }

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_do_while_stmt(
        &mut self,
        labels: &[String],
        body: &'ast Node<Stmt>,
        condition: &'ast Node<Expr>,
    ) -> LowerResult<()> {
        let next_block = self.new_block();
        let cond_block = self.new_block();
        let done_block = self.new_block();
        let expt_block = self.new_block();

        self.bb().jmp(next_block);

        let mut scope = Scope::iteration(cond_block, done_block);
        scope.push_labels(labels);
        self.push_scope(scope);

        self.set_cursor(next_block);
        self.parse_stmt(body)?;
        self.jmp_if_open(cond_block);

        self.set_cursor(cond_block);
        let cref = self.parse_expr(condition)?;
        let cond_value = self.ref_get(&cref, expt_block)?;
        let cond = self.bb().val_to_bool(cond_value);
        self.bb().br(cond, next_block, done_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_while_stmt(
        &mut self,
        labels: &[String],
        condition: &'ast Node<Expr>,
        body: &'ast Node<Stmt>,
    ) -> LowerResult<()> {
        let cond_block = self.new_block();
        let next_block = self.new_block();
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let mut scope = Scope::iteration(cond_block, done_block);
        scope.push_labels(labels);
        self.push_scope(scope);

        self.bb().jmp(cond_block);

        self.set_cursor(cond_block);
        let cref = self.parse_expr(condition)?;
        let cond_value = self.ref_get(&cref, expt_block)?;
        let cond = self.bb().val_to_bool(cond_value);
        self.bb().br(cond, next_block, done_block);

        self.set_cursor(next_block);
        self.parse_stmt(body)?;
        self.jmp_if_open(cond_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_for_in_stmt(
        &mut self,
        labels: &[String],
        target: &'ast ForInTarget,
        enumerable: &'ast Node<Expr>,
        body: &'ast Node<Stmt>,
    ) -> LowerResult<()> {
        let init_block = self.new_block();
        let cond_block = self.new_block();
        let body_block = self.new_block();
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let mut scope = Scope::iteration(cond_block, done_block);
        scope.push_labels(labels);
        self.push_scope(scope);

        // 12.6.4: a null or undefined enumerable skips the loop entirely.
        let eref = self.parse_expr(enumerable)?;
        let enumerable_value = self.ref_get(&eref, expt_block)?;
        let is_null = self.bb().val_is_null(enumerable_value);
        let is_undefined = self.bb().val_is_undefined(enumerable_value);
        let skip = self.bb().bin_or(is_null, is_undefined);
        self.bb().br(skip, done_block, init_block);

        self.set_cursor(init_block);
        let iterator;
        {
            let inner_expt = self.new_block();

            iterator = self.bb().prp_it_new(enumerable_value);
            let none = self.f().const_null(IrType::property_iterator());
            let failed = self.bb().bin_eq(iterator, none);
            self.bb().br(failed, inner_expt, cond_block);

            self.set_cursor(inner_expt);
            self.inflate_current_action();
        }

        self.set_cursor(cond_block);
        let slot = self.bb().mem_alloc(IrType::Value);
        let more = self.bb().prp_it_next(iterator, slot);
        self.bb().br(more, body_block, done_block);

        self.set_cursor(body_block);
        {
            let cont_block = self.new_block();

            let tref = match target {
                ForInTarget::Var(name) => self.ident_ref(&name.value.name),
                ForInTarget::Expr(expr) => self.parse_expr(expr)?,
            };
            self.ref_put(&tref, slot, cont_block, expt_block)?;

            self.set_cursor(cont_block);
            self.parse_stmt(body)?;
            self.jmp_if_open(cond_block);
        }

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_for_stmt(
        &mut self,
        labels: &[String],
        init: Option<&'ast Node<Stmt>>,
        condition: Option<&'ast Node<Expr>>,
        next: Option<&'ast Node<Expr>>,
        body: &'ast Node<Stmt>,
    ) -> LowerResult<()> {
        let cond_block = self.new_block();
        let next_block = self.new_block();
        let done_block = self.new_block();
        let body_block = self.new_block();
        let expt_block = self.new_block();

        let mut scope = Scope::iteration(next_block, done_block);
        scope.push_labels(labels);
        self.push_scope(scope);

        if let Some(init) = init {
            self.parse_stmt(init)?;
        }
        self.bb().jmp(cond_block);

        self.set_cursor(cond_block);
        match condition {
            Some(condition) => {
                let cref = self.parse_expr(condition)?;
                let cond_value = self.ref_get(&cref, expt_block)?;
                let cond = self.bb().val_to_bool(cond_value);
                self.bb().br(cond, body_block, done_block);
            }
            None => {
                self.bb().jmp(body_block);
            }
        }

        self.set_cursor(body_block);
        self.parse_stmt(body)?;
        self.jmp_if_open(next_block);

        self.set_cursor(next_block);
        if let Some(next) = next {
            self.parse_expr(next)?;
        }
        self.bb().jmp(cond_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_cont_stmt(
        &mut self,
        label: Option<&str>,
        span: norn_ast::Span,
    ) -> LowerResult<()> {
        match self.unroll_for_continue(label)? {
            Some(target) => {
                self.bb().jmp(target);
            }
            None => {
                return Err(LowerError::new(
                    LowerErrorKind::UnresolvedContinue,
                    match label {
                        Some(label) => format!("continue references unknown label `{}`", label),
                        None => "continue statement outside of a loop".to_string(),
                    },
                    span,
                ));
            }
        }
        // Anything following is unreachable; give it a block of its own.
        let dead = self.new_block();
        self.set_cursor(dead);
        Ok(())
    }

    fn parse_break_stmt(&mut self, label: Option<&str>, span: norn_ast::Span) -> LowerResult<()> {
        match self.unroll_for_break(label)? {
            Some(target) => {
                self.bb().jmp(target);
            }
            None => {
                return Err(LowerError::new(
                    LowerErrorKind::UnresolvedBreak,
                    match label {
                        Some(label) => format!("break references unknown label `{}`", label),
                        None => "break statement outside of a loop or switch".to_string(),
                    },
                    span,
                ));
            }
        }
        let dead = self.new_block();
        self.set_cursor(dead);
        Ok(())
    }

    fn parse_ret_stmt(
        &mut self,
        expr: Option<&'ast Node<Expr>>,
        span: norn_ast::Span,
    ) -> LowerResult<()> {
        if self.fr().is_global {
            return Err(LowerError::new(
                LowerErrorKind::ReturnOutsideFunction,
                "return statement in global code",
                span,
            ));
        }

        let ret_slot = self.f().const_return();

        if let Some(expr) = expr {
            let ret_block = self.new_block();
            let expt_block = self.new_block();

            let eref = self.parse_expr(expr)?;
            self.ref_get_to(&eref, ret_slot, ret_block, expt_block)?;

            self.set_cursor(ret_block);
            self.unroll_for_return()?;
            let ok = self.f().const_boolean(true);
            self.bb().ret(ok);

            self.set_cursor(expt_block);
            self.inflate_current_action();
        } else {
            let undefined = self.f().const_value(ValueTag::Undefined);
            self.bb().mem_store(ret_slot, undefined);

            self.unroll_for_return()?;
            let ok = self.f().const_boolean(true);
            self.bb().ret(ok);
        }

        let dead = self.new_block();
        self.set_cursor(dead);
        Ok(())
    }

    fn parse_with_stmt(
        &mut self,
        object: &'ast Node<Expr>,
        body: &'ast Node<Stmt>,
        span: norn_ast::Span,
    ) -> LowerResult<()> {
        // 12.10.1.
        if self.strict_mode() {
            return Err(LowerError::new(
                LowerErrorKind::StrictWith,
                "strict mode code may not include a with statement",
                span,
            ));
        }

        let body_entry = self.new_block();
        let done_block = self.new_block();
        let expt_block = self.new_block();

        // 12.10. The object expression still resolves in the outer scope.
        let oref = self.parse_expr(object)?;
        let object_value = self.ref_get(&oref, expt_block)?;

        let mut scope = Scope::new(ScopeKind::With);
        scope.epilogue = Some(Epilogue::LeaveContext);
        self.push_scope(scope);

        let entered = self.bb().ctx_enter_with(object_value);
        self.bb().br(entered, body_entry, expt_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(body_entry);
        let with_action = Action::LeaveContext(self.current_action());
        self.push_action(with_action);

        self.parse_stmt(body)?;
        self.bb().ctx_leave();
        self.bb().jmp(done_block);

        self.pop_action();
        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_switch_stmt(
        &mut self,
        labels: &[String],
        discriminant: &'ast Node<Expr>,
        cases: &'ast [CaseClause],
    ) -> LowerResult<()> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let mut scope = Scope::breakable(ScopeKind::Switch, done_block);
        scope.push_labels(labels);
        self.push_scope(scope);

        let dref = self.parse_expr(discriminant)?;
        let disc = self.ref_get(&dref, expt_block)?;

        // Set once a case label matched; the case bodies then form a
        // fall-through chain.
        let matched = self.bb().mem_alloc(IrType::Boolean);
        self.f().make_persistent(matched);
        let no = self.f().const_boolean(false);
        self.bb().mem_store(matched, no);

        for case in cases {
            if let Some(test) = &case.test {
                let test_block = self.new_block();
                let set_block = self.new_block();
                let skip_block = self.new_block();

                self.bb().br(matched, skip_block, test_block);

                self.set_cursor(test_block);
                let tref = self.parse_expr(test)?;
                let label_value = self.ref_get(&tref, expt_block)?;
                let cmp = self.bb().mem_alloc(IrType::Value);
                let t = self
                    .bb()
                    .es_bin(EsBinOp::StrictEq, label_value, disc, cmp);
                self.bb().br(t, set_block, expt_block);

                self.set_cursor(set_block);
                let hit = self.bb().val_to_bool(cmp);
                self.bb().mem_store(matched, hit);
                self.bb().jmp(skip_block);

                self.set_cursor(skip_block);
            }

            let body_block = self.new_block();
            let skip_block = self.new_block();

            self.bb().br(matched, body_block, skip_block);

            self.set_cursor(body_block);
            for stmt in &case.body {
                self.parse_stmt(stmt)?;
            }
            self.jmp_if_open(skip_block);

            self.set_cursor(skip_block);
        }

        // No case matched; run the default clause if there is one.
        let default_block = self.new_block();
        self.bb().br(matched, done_block, default_block);

        self.set_cursor(default_block);
        for case in cases {
            if case.is_default() {
                for stmt in &case.body {
                    self.parse_stmt(stmt)?;
                }
            }
        }
        self.jmp_if_open(done_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_throw_stmt(&mut self, expr: &'ast Node<Expr>) -> LowerResult<()> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let eref = self.parse_expr(expr)?;
        let value = self.ref_get(&eref, expt_block)?;
        self.bb().ex_set(value);
        self.bb().jmp(expt_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(())
    }

    fn parse_try_stmt(
        &mut self,
        labels: &[String],
        block: &'ast Node<Stmt>,
        catch: Option<&'ast CatchClause>,
        finally: Option<&'ast Node<Stmt>>,
    ) -> LowerResult<()> {
        let done_block = self.new_block();
        let fail_block = self.new_block();
        let skip_block = self.new_block();
        let expt_block = self.new_block();

        let prev_action = self.current_action();

        let mut scope = Scope::breakable(ScopeKind::Default, done_block);
        scope.push_labels(labels);
        if let Some(finally) = finally {
            scope.epilogue = Some(Epilogue::Finally {
                stmt: finally,
                on_fault: prev_action.clone(),
            });
        }
        self.push_scope(scope);

        // Tracks whether the protected region completed abruptly.
        let failed = self.bb().mem_alloc(IrType::Boolean);
        self.f().make_persistent(failed);
        let yes = self.f().const_boolean(true);
        self.bb().mem_store(failed, yes);

        self.push_action(Action::Jump(fail_block));
        self.parse_stmt(block)?;
        let no = self.f().const_boolean(false);
        self.bb().mem_store(failed, no);
        // Without a catch block control can fall directly through to the
        // finally code.
        if catch.is_some() {
            self.bb().jmp(skip_block);
        } else {
            self.bb().jmp(fail_block);
        }
        self.pop_action();

        self.set_cursor(fail_block);
        if let Some(catch) = catch {
            let state = self.bb().ex_save_state();
            self.f().make_persistent(state);
            let key = self.prp_key(&catch.binding.value.name);
            self.bb().ctx_enter_catch(key);
            self.bb().ex_clear();

            let mut catch_scope = Scope::catch(catch.binding.value.name.clone());
            catch_scope.epilogue = Some(Epilogue::LeaveContext);
            self.push_scope(catch_scope);
            self.push_action(Action::LeaveContext(Rc::new(Action::Jump(skip_block))));

            self.parse_stmt(&catch.body)?;
            self.bb().ctx_leave();
            let no = self.f().const_boolean(false);
            self.bb().mem_store(failed, no);
            self.bb().jmp(skip_block);

            self.pop_action();
            self.pop_scope();
        } else {
            self.bb().jmp(skip_block);
        }

        self.set_cursor(skip_block);
        if let Some(finally) = finally {
            let state = self.bb().ex_save_state();
            self.f().make_persistent(state);
            self.parse_stmt(finally)?;
            self.bb().ex_load_state(state);
        }
        // On abrupt completion resume the outer unwind.
        self.bb().br(failed, expt_block, done_block);

        self.set_cursor(expt_block);
        self.inflate_action(&prev_action);

        self.pop_scope();
        self.set_cursor(done_block);
        Ok(())
    }
}
