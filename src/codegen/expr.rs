//! Expression lowering with inline type checks.

use inkwell::values::{BasicMetadataValueEnum, IntValue};
use inkwell::IntPredicate;

use super::{ModuleBuilder, ParamTy, Value};
use crate::ast::{BinaryOp, ExprKind, Expression, Ident, Pos};
use crate::error::{CompileError, CompileResult};
use crate::types::{opaque_ptr, SymbolTable, Ty};

impl<'ctx> ModuleBuilder<'ctx> {
    pub(super) fn lower_expr(
        &mut self,
        expr: &Expression,
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<Value<'ctx>> {
        let pos = expr.pos;
        Ok(match &expr.kind {
            ExprKind::DecimalLiteral(value) => {
                Value::new(Ty::Decimal, self.ctx.i64_type().const_int(*value as u64, true))
            }
            ExprKind::BooleanLiteral(value) => {
                Value::new(Ty::Boolean, self.ctx.bool_type().const_int(*value as u64, false))
            }
            ExprKind::StringLiteral(text) => {
                let ptr = self.strings.intern(self.ctx, &self.module, ".str", text);
                Value::new(Ty::str_ptr(), ptr)
            }
            ExprKind::Identifier(name) => {
                let slot = scope.lookup(name)?;
                let llvm_ty = slot.ty.basic(self.ctx).ok_or_else(|| {
                    CompileError::internal(
                        format!("variable `{}` has no storage type", name.name),
                        pos,
                    )
                })?;
                let loaded = self.builder.build_load(llvm_ty, slot.ptr, &name.name)?;
                Value::new(slot.ty.clone(), loaded)
            }
            ExprKind::AddressOf(name) => {
                let slot = scope.lookup(name)?;
                Value::new(Ty::pointer_to(slot.ty.clone()), slot.ptr)
            }
            ExprKind::Deref(inner) => {
                let pointer = self.lower_expr(inner, scope)?;
                let Some(pointee) = pointer.ty.pointee() else {
                    return Err(CompileError::type_error(
                        format!("cannot dereference a value of type `{}`", pointer.ty),
                        inner.pos,
                    ));
                };
                let llvm_ty = pointee.basic(self.ctx).ok_or_else(|| {
                    CompileError::type_error(
                        format!("cannot dereference `{}`", pointer.ty),
                        inner.pos,
                    )
                })?;
                let address = pointer.pointer(inner.pos)?;
                let loaded = self.builder.build_load(llvm_ty, address, "deref")?;
                Value::new(pointee.clone(), loaded)
            }
            ExprKind::Exec { callee, args } => self.lower_call(callee, args, scope)?,
            ExprKind::Rev(operand) => {
                let value = self.lower_expr(operand, scope)?;
                let value = self.expect_int(&value, &Ty::Boolean, operand.pos)?;
                Value::new(Ty::Boolean, self.builder.build_not(value, "rev")?)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.lower_expr(lhs, scope)?;
                let right = self.lower_expr(rhs, scope)?;
                self.lower_binary(*op, (&left, lhs.pos), (&right, rhs.pos), pos)?
            }
        })
    }

    fn lower_call(
        &mut self,
        name: &Ident,
        args: &[Expression],
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<Value<'ctx>> {
        let Some(callee) = self.callees.get(&super::mangle(&name.name)).cloned() else {
            let message = if scope.lookup(name).is_ok() {
                format!("`{}` is a variable, not a function", name.name)
            } else {
                format!("unknown function `{}`", name.name)
            };
            return Err(CompileError::call(message, name.pos));
        };
        if callee.params.len() != args.len() {
            return Err(CompileError::call(
                format!(
                    "`{}` takes {} argument(s) but {} were given",
                    name.name,
                    callee.params.len(),
                    args.len()
                ),
                name.pos,
            ));
        }

        let mut lowered: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(args.len());
        for (param, arg) in callee.params.iter().zip(args) {
            let value = self.lower_expr(arg, scope)?;
            match param {
                ParamTy::Typed(expected) => {
                    if &value.ty != expected {
                        return Err(CompileError::mismatch(expected, &value.ty, arg.pos));
                    }
                    lowered.push(value.basic(arg.pos)?.into());
                }
                ParamTy::OpaquePointer => {
                    if !value.ty.is_pointer() {
                        return Err(CompileError::type_error(
                            format!("`{}` expects a pointer, found `{}`", name.name, value.ty),
                            arg.pos,
                        ));
                    }
                    let pointer = value.pointer(arg.pos)?;
                    let cast = self
                        .builder
                        .build_pointer_cast(pointer, opaque_ptr(self.ctx), "opaque")?;
                    lowered.push(cast.into());
                }
            }
        }

        let call = self.builder.build_call(callee.function, &lowered, "")?;
        Ok(match call.try_as_basic_value().left() {
            Some(result) => Value::new(callee.ret, result),
            None => Value::void(),
        })
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        (left, left_pos): (&Value<'ctx>, Pos),
        (right, right_pos): (&Value<'ctx>, Pos),
        pos: Pos,
    ) -> CompileResult<Value<'ctx>> {
        match op {
            BinaryOp::Or | BinaryOp::And => {
                let l = self.expect_int(left, &Ty::Boolean, left_pos)?;
                let r = self.expect_int(right, &Ty::Boolean, right_pos)?;
                let value = if op == BinaryOp::Or {
                    self.builder.build_or(l, r, "or")?
                } else {
                    self.builder.build_and(l, r, "and")?
                };
                Ok(Value::new(Ty::Boolean, value))
            }
            _ if op.is_ordering() => {
                let l = self.expect_int(left, &Ty::Decimal, left_pos)?;
                let r = self.expect_int(right, &Ty::Decimal, right_pos)?;
                let cmp = self.builder.build_int_compare(predicate(op), l, r, "cmp")?;
                Ok(Value::new(Ty::Boolean, cmp))
            }
            _ if op.is_equality() => {
                self.lower_equality(op, (left, left_pos), (right, right_pos), pos)
            }
            BinaryOp::Add | BinaryOp::Sub if left.ty.is_pointer() || right.ty.is_pointer() => {
                self.lower_pointer_offset(op, (left, left_pos), (right, right_pos), pos)
            }
            _ => {
                let l = self.expect_int(left, &Ty::Decimal, left_pos)?;
                let r = self.expect_int(right, &Ty::Decimal, right_pos)?;
                let value = match op {
                    BinaryOp::Add => self.builder.build_int_add(l, r, "add")?,
                    BinaryOp::Sub => self.builder.build_int_sub(l, r, "sub")?,
                    BinaryOp::Mul => self.builder.build_int_mul(l, r, "mul")?,
                    BinaryOp::Div => self.builder.build_int_signed_div(l, r, "div")?,
                    BinaryOp::Mod => self.builder.build_int_signed_rem(l, r, "mod")?,
                    other => {
                        return Err(CompileError::internal(
                            format!("{other:?} reached integer arithmetic"),
                            pos,
                        ))
                    }
                };
                Ok(Value::new(Ty::Decimal, value))
            }
        }
    }

    fn lower_equality(
        &mut self,
        op: BinaryOp,
        (left, left_pos): (&Value<'ctx>, Pos),
        (right, right_pos): (&Value<'ctx>, Pos),
        pos: Pos,
    ) -> CompileResult<Value<'ctx>> {
        if left.ty != right.ty {
            return Err(CompileError::mismatch(&left.ty, &right.ty, right_pos));
        }
        if left.ty.is_str_ptr() {
            return Err(CompileError::type_error(
                "strings cannot be compared with `eq` or `req`",
                pos,
            ));
        }

        let (l, r) = if left.ty.is_pointer() {
            let address = self.ctx.i64_type();
            (
                self.builder.build_ptr_to_int(left.pointer(left_pos)?, address, "lhs_addr")?,
                self.builder.build_ptr_to_int(right.pointer(right_pos)?, address, "rhs_addr")?,
            )
        } else {
            (left.int(left_pos)?, right.int(right_pos)?)
        };
        let cmp = self.builder.build_int_compare(predicate(op), l, r, "eq")?;
        Ok(Value::new(Ty::Boolean, cmp))
    }

    /// `ptr a n`, `n a ptr` and `ptr s n`: address `n` elements away.
    fn lower_pointer_offset(
        &mut self,
        op: BinaryOp,
        (left, left_pos): (&Value<'ctx>, Pos),
        (right, right_pos): (&Value<'ctx>, Pos),
        pos: Pos,
    ) -> CompileResult<Value<'ctx>> {
        if left.ty.is_pointer() && right.ty.is_pointer() {
            return Err(CompileError::type_error(
                format!("cannot combine two pointers (`{}` and `{}`)", left.ty, right.ty),
                pos,
            ));
        }
        if op == BinaryOp::Sub && right.ty.is_pointer() {
            return Err(CompileError::type_error(
                format!("cannot subtract a pointer (`{}`) from `{}`", right.ty, left.ty),
                right_pos,
            ));
        }

        let ((pointer, pointer_pos), (offset, offset_pos)) = if left.ty.is_pointer() {
            ((left, left_pos), (right, right_pos))
        } else {
            ((right, right_pos), (left, left_pos))
        };
        let mut index = self.expect_int(offset, &Ty::Decimal, offset_pos)?;
        if op == BinaryOp::Sub {
            index = self.builder.build_int_neg(index, "back")?;
        }

        let element = pointer
            .ty
            .pointee()
            .and_then(|pointee| pointee.basic(self.ctx))
            .ok_or_else(|| {
                CompileError::type_error(format!("cannot offset a `{}`", pointer.ty), pointer_pos)
            })?;
        // SAFETY: the offset is only computed here; loads and stores through
        // the result are the program's responsibility.
        let address = unsafe {
            self.builder
                .build_in_bounds_gep(element, pointer.pointer(pointer_pos)?, &[index], "offset")?
        };
        Ok(Value::new(pointer.ty.clone(), address))
    }

    /// Check that `value` has type `expected` and return its integer form.
    fn expect_int(
        &self,
        value: &Value<'ctx>,
        expected: &Ty,
        pos: Pos,
    ) -> CompileResult<IntValue<'ctx>> {
        if &value.ty != expected {
            return Err(CompileError::mismatch(expected, &value.ty, pos));
        }
        value.int(pos)
    }
}

fn predicate(op: BinaryOp) -> IntPredicate {
    match op {
        BinaryOp::Equals => IntPredicate::EQ,
        BinaryOp::RevEquals => IntPredicate::NE,
        BinaryOp::LessThan => IntPredicate::SLT,
        BinaryOp::LessThanEqual => IntPredicate::SLE,
        BinaryOp::GreaterThan => IntPredicate::SGT,
        _ => IntPredicate::SGE,
    }
}
