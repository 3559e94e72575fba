//! Expression lowering.

use norn_ast::{AssignOp, BinaryOp, Expr, FunctionKind, Node, ObjectProperty, UnaryOp};

use super::{str_to_index, Lowerer, PrpKey, Ref};
use crate::error::{LowerError, LowerErrorKind, LowerResult};
use crate::{EsBinOp, EsUnaryOp, IrType, NameKey, ValueTag};

fn es_bin_op(op: BinaryOp) -> EsBinOp {
    match op {
        BinaryOp::Mul => EsBinOp::Mul,
        BinaryOp::Div => EsBinOp::Div,
        BinaryOp::Mod => EsBinOp::Mod,
        BinaryOp::Add => EsBinOp::Add,
        BinaryOp::Sub => EsBinOp::Sub,
        BinaryOp::Ls => EsBinOp::Ls,
        BinaryOp::Rss => EsBinOp::Rss,
        BinaryOp::Rus => EsBinOp::Rus,
        BinaryOp::Lt => EsBinOp::Lt,
        BinaryOp::Gt => EsBinOp::Gt,
        BinaryOp::Lte => EsBinOp::Lte,
        BinaryOp::Gte => EsBinOp::Gte,
        BinaryOp::In => EsBinOp::In,
        BinaryOp::InstanceOf => EsBinOp::InstanceOf,
        BinaryOp::Eq => EsBinOp::Eq,
        BinaryOp::Neq => EsBinOp::Neq,
        BinaryOp::StrictEq => EsBinOp::StrictEq,
        BinaryOp::StrictNeq => EsBinOp::StrictNeq,
        BinaryOp::BitAnd => EsBinOp::BitAnd,
        BinaryOp::BitXor => EsBinOp::BitXor,
        BinaryOp::BitOr => EsBinOp::BitOr,
        BinaryOp::Comma | BinaryOp::LogAnd | BinaryOp::LogOr => {
            unreachable!("handled before dispatch")
        }
    }
}

fn es_assign_op(op: AssignOp) -> EsBinOp {
    match op {
        AssignOp::AddAssign => EsBinOp::Add,
        AssignOp::SubAssign => EsBinOp::Sub,
        AssignOp::MulAssign => EsBinOp::Mul,
        AssignOp::DivAssign => EsBinOp::Div,
        AssignOp::ModAssign => EsBinOp::Mod,
        AssignOp::LsAssign => EsBinOp::Ls,
        AssignOp::RssAssign => EsBinOp::Rss,
        AssignOp::RusAssign => EsBinOp::Rus,
        AssignOp::BitAndAssign => EsBinOp::BitAnd,
        AssignOp::BitOrAssign => EsBinOp::BitOr,
        AssignOp::BitXorAssign => EsBinOp::BitXor,
        AssignOp::Assign => unreachable!("plain assignment has no operator"),
    }
}

impl<'ast> Lowerer<'ast> {
    pub(crate) fn parse_expr(&mut self, expr: &'ast Node<Expr>) -> LowerResult<Ref> {
        self.set_span(expr.span);
        match &expr.value {
            Expr::Binary { op, left, right } => self.parse_binary_expr(*op, left, right),
            Expr::Unary { op, expr } => self.parse_unary_expr(*op, expr),
            Expr::Assign { op, target, value } => self.parse_assign_expr(*op, target, value),
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
            } => self.parse_cond_expr(condition, then_expr, else_expr),
            Expr::Property { object, key } => self.parse_prop_expr(object, key),
            Expr::Call { callee, args } => self.parse_call_expr(callee, args),
            Expr::CallNew { callee, args } => self.parse_call_new_expr(callee, args),
            Expr::Regex { pattern, flags } => {
                let r = self.bb().es_new_rex(pattern.clone(), flags.clone());
                Ok(Ref::Value(r))
            }
            Expr::Function(lit) => {
                let fid = self.parse_fun(lit, false)?;
                let r = if lit.kind == FunctionKind::Declaration {
                    self.bb().es_new_fun(fid, lit.params.len(), lit.is_strict)
                } else {
                    self.bb()
                        .es_new_fun_expr(fid, lit.params.len(), lit.is_strict)
                };
                Ok(Ref::Value(r))
            }
            Expr::This => {
                let r = self.bb().ctx_this();
                Ok(Ref::Value(r))
            }
            Expr::Ident(ident) => Ok(self.ident_ref(&ident.name)),
            Expr::Null => {
                let r = self.f().const_value(ValueTag::Null);
                Ok(Ref::Value(r))
            }
            Expr::Bool(value) => {
                let b = self.f().const_boolean(*value);
                let r = self.bb().val_from_bool(b);
                Ok(Ref::Value(r))
            }
            Expr::Number { text, .. } => {
                let d = self.f().const_stringified_double(text.clone());
                let r = self.bb().val_from_double(d);
                Ok(Ref::Value(r))
            }
            Expr::Str(text) => {
                // Literal strings land in the module's resource table.
                self.str_id(text);
                let s = self.f().const_string(text.clone());
                let r = self.bb().val_from_str(s);
                Ok(Ref::Value(r))
            }
            Expr::Array(values) => self.parse_array_lit(values),
            Expr::Object(props) => self.parse_obj_lit(props),
            Expr::Nothing => {
                let r = self.f().const_value(ValueTag::Nothing);
                Ok(Ref::Value(r))
            }
        }
    }

    fn parse_binary_expr(
        &mut self,
        op: BinaryOp,
        left: &'ast Node<Expr>,
        right: &'ast Node<Expr>,
    ) -> LowerResult<Ref> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let lref = self.parse_expr(left)?;
        let lhs = self.ref_get(&lref, expt_block)?;
        let result = self.bb().mem_alloc(IrType::Value);

        match op {
            BinaryOp::LogAnd => {
                // Short-circuit evaluation; the join slot outlives its block.
                self.f().make_persistent(result);
                let true_block = self.new_block();
                let false_block = self.new_block();

                let cond = self.bb().val_to_bool(lhs);
                self.bb().br(cond, true_block, false_block);

                self.set_cursor(true_block);
                let rref = self.parse_expr(right)?;
                self.ref_get_to(&rref, result, done_block, expt_block)?;

                self.set_cursor(false_block);
                self.bb().mem_store(result, lhs);
                self.bb().jmp(done_block);
            }
            BinaryOp::LogOr => {
                self.f().make_persistent(result);
                let true_block = self.new_block();
                let false_block = self.new_block();

                let cond = self.bb().val_to_bool(lhs);
                self.bb().br(cond, true_block, false_block);

                self.set_cursor(true_block);
                self.bb().mem_store(result, lhs);
                self.bb().jmp(done_block);

                self.set_cursor(false_block);
                let rref = self.parse_expr(right)?;
                self.ref_get_to(&rref, result, done_block, expt_block)?;
            }
            BinaryOp::Comma => {
                // Only GetValue on both sides is required.
                let rref = self.parse_expr(right)?;
                let rhs = self.ref_get(&rref, expt_block)?;
                self.bb().mem_store(result, rhs);
                self.bb().jmp(done_block);
            }
            _ => {
                let rref = self.parse_expr(right)?;
                let rhs = self.ref_get(&rref, expt_block)?;
                let t = self.bb().es_bin(es_bin_op(op), lhs, rhs, result);
                self.bb().br(t, done_block, expt_block);
            }
        }

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    fn parse_unary_expr(&mut self, op: UnaryOp, operand: &'ast Node<Expr>) -> LowerResult<Ref> {
        if op == UnaryOp::Delete {
            return self.parse_delete_expr(operand);
        }

        let eref = self.parse_expr(operand)?;

        match op {
            UnaryOp::Void => {
                let done_block = self.new_block();
                let expt_block = self.new_block();

                let result = self.f().const_value(ValueTag::Undefined);
                let scratch = self.bb().mem_alloc(IrType::Value);
                self.ref_get_to(&eref, scratch, done_block, expt_block)?;

                self.set_cursor(expt_block);
                self.inflate_current_action();

                self.set_cursor(done_block);
                Ok(Ref::Value(result))
            }
            UnaryOp::Plus
            | UnaryOp::PreInc
            | UnaryOp::PreDec
            | UnaryOp::PostInc
            | UnaryOp::PostDec => self.parse_arith_unary_expr(op, &eref),
            UnaryOp::Typeof => self.parse_typeof_expr(&eref),
            UnaryOp::Minus | UnaryOp::BitNot | UnaryOp::LogNot => {
                let done_block = self.new_block();
                let expt_block = self.new_block();

                let result = self.bb().mem_alloc(IrType::Value);
                let operand = self.ref_get(&eref, expt_block)?;
                let es_op = match op {
                    UnaryOp::Minus => EsUnaryOp::Neg,
                    UnaryOp::BitNot => EsUnaryOp::BitNot,
                    _ => EsUnaryOp::LogNot,
                };
                let t = self.bb().es_unary(es_op, operand, result);
                self.bb().br(t, done_block, expt_block);

                self.set_cursor(expt_block);
                self.inflate_current_action();

                self.set_cursor(done_block);
                Ok(Ref::Value(result))
            }
            UnaryOp::Delete => unreachable!("handled above"),
        }
    }

    /// +, ++ and -- run through ToNumber and typed double arithmetic.
    fn parse_arith_unary_expr(&mut self, op: UnaryOp, eref: &Ref) -> LowerResult<Ref> {
        let work_block = self.new_block();
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let value = self.ref_get(eref, expt_block)?;
        let dbl = self.bb().mem_alloc(IrType::Double);
        let t = self.bb().val_to_double(value, dbl);
        self.bb().br(t, work_block, expt_block);

        self.set_cursor(work_block);
        if op == UnaryOp::Plus {
            let result = self.bb().val_from_double(dbl);
            self.bb().jmp(done_block);

            self.set_cursor(expt_block);
            self.inflate_current_action();

            self.set_cursor(done_block);
            return Ok(Ref::Value(result));
        }

        let one = self.f().const_double(1.0);
        let (result, updated) = match op {
            UnaryOp::PreInc => {
                let next = self.bb().bin_add(dbl, one);
                let boxed = self.bb().val_from_double(next);
                (boxed, boxed)
            }
            UnaryOp::PreDec => {
                let next = self.bb().bin_sub(dbl, one);
                let boxed = self.bb().val_from_double(next);
                (boxed, boxed)
            }
            UnaryOp::PostInc => {
                let old = self.bb().val_from_double(dbl);
                let next = self.bb().bin_add(dbl, one);
                let boxed = self.bb().val_from_double(next);
                (old, boxed)
            }
            _ => {
                let old = self.bb().val_from_double(dbl);
                let next = self.bb().bin_sub(dbl, one);
                let boxed = self.bb().val_from_double(next);
                (old, boxed)
            }
        };

        self.ref_put(eref, updated, done_block, expt_block)?;

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    /// typeof tolerates unresolvable references instead of faulting.
    fn parse_typeof_expr(&mut self, eref: &Ref) -> LowerResult<Ref> {
        let result = self.bb().mem_alloc(IrType::Value);

        let value = match eref {
            Ref::Value(value) => *value,
            reference => {
                let join_block = self.new_block();
                let fail_block = self.new_block();

                let scratch = self.bb().mem_alloc(IrType::Value);
                self.ref_get_to(reference, scratch, join_block, fail_block)?;

                self.set_cursor(fail_block);
                self.bb().ex_clear();
                let undefined = self.f().const_value(ValueTag::Undefined);
                self.bb().mem_store(scratch, undefined);
                self.bb().jmp(join_block);

                self.set_cursor(join_block);
                scratch
            }
        };

        let done_block = self.new_block();
        let expt_block = self.new_block();
        let t = self.bb().es_unary(EsUnaryOp::Typeof, value, result);
        self.bb().br(t, done_block, expt_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    fn parse_delete_expr(&mut self, operand: &'ast Node<Expr>) -> LowerResult<Ref> {
        match &operand.value {
            Expr::Property { object, key } => {
                let done_block = self.new_block();
                let expt_block = self.new_block();

                let result = if let Some(imm) = self.imm_prp_key(key) {
                    let oref = self.parse_expr(object)?;
                    let obj = self.ref_get(&oref, expt_block)?;
                    let result = self.bb().mem_alloc(IrType::Value);
                    let coercible = self.bb().val_tst_coerc(obj);
                    let del_block = self.new_block();
                    self.bb().br(coercible, del_block, expt_block);
                    self.set_cursor(del_block);
                    let t = self.bb().prp_del(obj, imm, result);
                    self.bb().br(t, done_block, expt_block);
                    result
                } else {
                    let kref = self.parse_expr(key)?;
                    let k = self.ref_get(&kref, expt_block)?;
                    let oref = self.parse_expr(object)?;
                    let obj = self.ref_get(&oref, expt_block)?;
                    let result = self.bb().mem_alloc(IrType::Value);
                    let coercible = self.bb().val_tst_coerc(obj);
                    let del_block = self.new_block();
                    self.bb().br(coercible, del_block, expt_block);
                    self.set_cursor(del_block);
                    let t = self.bb().prp_del_slow(obj, k, result);
                    self.bb().br(t, done_block, expt_block);
                    result
                };

                self.set_cursor(expt_block);
                self.inflate_current_action();

                self.set_cursor(done_block);
                Ok(Ref::Value(result))
            }
            Expr::Ident(ident) => {
                if self.strict_mode() {
                    return Err(LowerError::new(
                        LowerErrorKind::StrictDelete,
                        format!(
                            "cannot delete unqualified identifier `{}` in strict mode",
                            ident.name
                        ),
                        operand.span,
                    ));
                }
                if self.get_local(&ident.name).is_some() {
                    // Declarative environment bindings cannot be deleted.
                    let r = self.f().const_value(ValueTag::False);
                    return Ok(Ref::Value(r));
                }
                let done_block = self.new_block();
                let expt_block = self.new_block();

                let key = self.prp_key(&ident.name);
                let result = self.bb().mem_alloc(IrType::Value);
                let t = self.bb().ctx_del(key, result);
                self.bb().br(t, done_block, expt_block);

                self.set_cursor(expt_block);
                self.inflate_current_action();

                self.set_cursor(done_block);
                Ok(Ref::Value(result))
            }
            _ => {
                // delete of a non-reference always succeeds.
                let r = self.f().const_value(ValueTag::True);
                Ok(Ref::Value(r))
            }
        }
    }

    fn parse_assign_expr(
        &mut self,
        op: AssignOp,
        target: &'ast Node<Expr>,
        value: &'ast Node<Expr>,
    ) -> LowerResult<Ref> {
        let lref = self.parse_expr(target)?;
        let rref = self.parse_expr(value)?;

        let done_block = self.new_block();
        let expt_block = self.new_block();

        let result = if op == AssignOp::Assign {
            self.ref_get(&rref, expt_block)?
        } else {
            let work_block = self.new_block();
            let result = self.bb().mem_alloc(IrType::Value);
            let lhs = self.ref_get(&lref, expt_block)?;
            let rhs = self.ref_get(&rref, expt_block)?;
            let t = self.bb().es_bin(es_assign_op(op), lhs, rhs, result);
            self.bb().br(t, work_block, expt_block);
            self.set_cursor(work_block);
            result
        };

        self.ref_put(&lref, result, done_block, expt_block)?;

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    fn parse_cond_expr(
        &mut self,
        condition: &'ast Node<Expr>,
        then_expr: &'ast Node<Expr>,
        else_expr: &'ast Node<Expr>,
    ) -> LowerResult<Ref> {
        let true_block = self.new_block();
        let false_block = self.new_block();
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let result = self.bb().mem_alloc(IrType::Value);
        self.f().make_persistent(result);

        let cref = self.parse_expr(condition)?;
        let cond_value = self.ref_get(&cref, expt_block)?;
        let cond = self.bb().val_to_bool(cond_value);
        self.bb().br(cond, true_block, false_block);

        self.set_cursor(true_block);
        let tref = self.parse_expr(then_expr)?;
        self.ref_get_to(&tref, result, done_block, expt_block)?;

        self.set_cursor(false_block);
        let eref = self.parse_expr(else_expr)?;
        self.ref_get_to(&eref, result, done_block, expt_block)?;

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    /// A string or index-valued number literal key avoids the runtime
    /// ToString path; the key is interned into the data section instead.
    pub(crate) fn imm_prp_key(&mut self, key: &Node<Expr>) -> Option<NameKey> {
        match &key.value {
            Expr::Str(text) => Some(self.prp_key(text)),
            Expr::Number { value, text } => {
                if let Some(index) = str_to_index(text) {
                    return Some(index as NameKey);
                }
                if value.fract() == 0.0 && *value >= 0.0 && *value < u32::MAX as f64 {
                    Some(*value as u32 as NameKey)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn parse_prop_expr(
        &mut self,
        object: &'ast Node<Expr>,
        key: &'ast Node<Expr>,
    ) -> LowerResult<Ref> {
        if let Some(imm) = self.imm_prp_key(key) {
            let done_block = self.new_block();
            let expt_block = self.new_block();

            let slot = self.bb().mem_alloc(IrType::Value);
            let oref = self.parse_expr(object)?;
            self.ref_get_to(&oref, slot, done_block, expt_block)?;

            self.set_cursor(expt_block);
            self.inflate_current_action();

            self.set_cursor(done_block);
            Ok(Ref::Prp {
                object: slot,
                key: PrpKey::Imm(imm),
            })
        } else {
            let done_block = self.new_block();
            let expt_block = self.new_block();

            let kref = self.parse_expr(key)?;
            let k = self.ref_get(&kref, expt_block)?;
            let oref = self.parse_expr(object)?;
            let obj = self.ref_get(&oref, expt_block)?;
            self.bb().jmp(done_block);

            self.set_cursor(expt_block);
            self.inflate_current_action();

            self.set_cursor(done_block);
            Ok(Ref::Prp {
                object: obj,
                key: PrpKey::Value(k),
            })
        }
    }

    fn parse_call_expr(
        &mut self,
        callee: &'ast Node<Expr>,
        args: &'ast [Node<Expr>],
    ) -> LowerResult<Ref> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let argv = self
            .bb()
            .mem_alloc(IrType::array(IrType::Value, args.len()));
        for (i, arg) in args.iter().enumerate() {
            let aref = self.parse_expr(arg)?;
            let value = self.ref_get(&aref, expt_block)?;
            self.bb().arr_put(i, argv, value);
        }

        let result = match &callee.value {
            Expr::Property { object, key } => {
                if let Some(imm) = self.imm_prp_key(key) {
                    let oref = self.parse_expr(object)?;
                    let obj = self.ref_get(&oref, expt_block)?;
                    let result = self.bb().mem_alloc(IrType::Value);
                    let t = self.bb().call_keyed(obj, imm, args.len(), argv, result);
                    self.bb().br(t, done_block, expt_block);
                    result
                } else {
                    let kref = self.parse_expr(key)?;
                    let k = self.ref_get(&kref, expt_block)?;
                    let oref = self.parse_expr(object)?;
                    let obj = self.ref_get(&oref, expt_block)?;
                    let result = self.bb().mem_alloc(IrType::Value);
                    let t = self
                        .bb()
                        .call_keyed_slow(obj, k, args.len(), argv, result);
                    self.bb().br(t, done_block, expt_block);
                    result
                }
            }
            Expr::Ident(ident) => {
                let result = self.bb().mem_alloc(IrType::Value);
                let t = match self.get_local(&ident.name) {
                    Some(fun) => self.bb().call(fun, args.len(), argv, result),
                    None => {
                        // The runtime resolves the name against the scope
                        // chain and applies the this-binding rule.
                        let key = self.prp_key(&ident.name);
                        self.bb().call_named(key, args.len(), argv, result)
                    }
                };
                self.bb().br(t, done_block, expt_block);
                result
            }
            _ => {
                let fref = self.parse_expr(callee)?;
                let fun = self.ref_get(&fref, expt_block)?;
                let result = self.bb().mem_alloc(IrType::Value);
                let t = self.bb().call(fun, args.len(), argv, result);
                self.bb().br(t, done_block, expt_block);
                result
            }
        };

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    fn parse_call_new_expr(
        &mut self,
        callee: &'ast Node<Expr>,
        args: &'ast [Node<Expr>],
    ) -> LowerResult<Ref> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let fref = self.parse_expr(callee)?;
        let fun = self.ref_get(&fref, expt_block)?;

        let argv = self
            .bb()
            .mem_alloc(IrType::array(IrType::Value, args.len()));
        for (i, arg) in args.iter().enumerate() {
            let aref = self.parse_expr(arg)?;
            let value = self.ref_get(&aref, expt_block)?;
            self.bb().arr_put(i, argv, value);
        }

        let result = self.bb().mem_alloc(IrType::Value);
        let t = self.bb().call_new(fun, args.len(), argv, result);
        self.bb().br(t, done_block, expt_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    fn parse_array_lit(&mut self, values: &'ast [Node<Expr>]) -> LowerResult<Ref> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let array = self
            .bb()
            .mem_alloc(IrType::array(IrType::Value, values.len()));
        for (i, value) in values.iter().enumerate() {
            let vref = self.parse_expr(value)?;
            let v = self.ref_get(&vref, expt_block)?;
            self.bb().arr_put(i, array, v);
        }

        let result = self.bb().es_new_arr(values.len(), array);
        self.bb().jmp(done_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(result))
    }

    fn parse_obj_lit(&mut self, props: &'ast [ObjectProperty]) -> LowerResult<Ref> {
        let done_block = self.new_block();
        let expt_block = self.new_block();

        let object = self.bb().es_new_obj();

        for prop in props {
            match prop {
                ObjectProperty::Data { key, value } => {
                    let next_block = self.new_block();

                    let kref = self.parse_expr(key)?;
                    let k = self.ref_get(&kref, expt_block)?;
                    let vref = self.parse_expr(value)?;
                    let v = self.ref_get(&vref, expt_block)?;

                    let t = self.bb().prp_def_data(object, k, v);
                    self.bb().br(t, next_block, expt_block);
                    self.set_cursor(next_block);
                }
                ObjectProperty::Getter { name, function }
                | ObjectProperty::Setter { name, function } => {
                    let is_setter = matches!(prop, ObjectProperty::Setter { .. });
                    let next_block = self.new_block();

                    let fref = self.parse_expr(function)?;
                    let f = self.ref_get(&fref, expt_block)?;

                    let key = self.prp_key(&name.name);
                    let t = self.bb().prp_def_accessor(object, key, f, is_setter);
                    self.bb().br(t, next_block, expt_block);
                    self.set_cursor(next_block);
                }
            }
        }

        self.bb().jmp(done_block);

        self.set_cursor(expt_block);
        self.inflate_current_action();

        self.set_cursor(done_block);
        Ok(Ref::Value(object))
    }
}
