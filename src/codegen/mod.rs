//! LLVM IR generation for 1eft programs using Inkwell.
//!
//! [`ModuleBuilder::build`] installs the runtime library, declares every user
//! function, lowers the bodies one by one and finally wraps `start` into a
//! native `main`. Types are checked while lowering; there is no separate
//! checking pass, so the first mistake aborts the build.

mod entry;
mod expr;
mod runtime;
mod strings;

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, BasicTypeEnum};
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue};
use tracing::debug;

use crate::ast::{
    AssignTarget, Block, ElseIf, Expression, FunctionDef, Ident, IfStatement, Pos, Program,
    Statement, StmtKind,
};
use crate::error::{CompileError, CompileResult};
use crate::types::{Slot, SymbolTable, Ty};

pub use entry::ENTRY_NAME;
pub use runtime::{mangle, PREFIX};

use strings::StringPool;

/// Parameter contract of a callable function.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParamTy {
    Typed(Ty),
    /// Accepts any pointer, passed as an untyped `i8*`.
    OpaquePointer,
}

#[derive(Debug, Clone)]
pub(crate) struct Callee<'ctx> {
    pub function: FunctionValue<'ctx>,
    pub params: Vec<ParamTy>,
    pub ret: Ty,
}

/// A lowered expression: its language type plus the LLVM value, which is
/// absent for calls to `v@1d` functions.
#[derive(Debug, Clone)]
pub(crate) struct Value<'ctx> {
    pub ty: Ty,
    pub raw: Option<BasicValueEnum<'ctx>>,
}

impl<'ctx> Value<'ctx> {
    fn new(ty: Ty, raw: impl Into<BasicValueEnum<'ctx>>) -> Self {
        Self { ty, raw: Some(raw.into()) }
    }

    fn void() -> Self {
        Self { ty: Ty::Void, raw: None }
    }

    fn basic(&self, pos: Pos) -> CompileResult<BasicValueEnum<'ctx>> {
        self.raw.ok_or_else(|| {
            CompileError::type_error(format!("expected a value, found `{}`", self.ty), pos)
        })
    }

    fn int(&self, pos: Pos) -> CompileResult<IntValue<'ctx>> {
        match self.basic(pos)? {
            BasicValueEnum::IntValue(value) => Ok(value),
            other => Err(CompileError::internal(
                format!("`{}` lowered to non-integer {other:?}", self.ty),
                pos,
            )),
        }
    }

    fn pointer(&self, pos: Pos) -> CompileResult<PointerValue<'ctx>> {
        match self.basic(pos)? {
            BasicValueEnum::PointerValue(value) => Ok(value),
            other => Err(CompileError::internal(
                format!("`{}` lowered to non-pointer {other:?}", self.ty),
                pos,
            )),
        }
    }
}

/// The function whose body is being lowered.
struct Frame<'ctx> {
    function: FunctionValue<'ctx>,
    name: String,
    ret: Ty,
}

pub struct ModuleBuilder<'ctx> {
    ctx: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    strings: StringPool<'ctx>,
    callees: HashMap<String, Callee<'ctx>>,
}

impl<'ctx> ModuleBuilder<'ctx> {
    pub fn new(ctx: &'ctx Context, name: &str) -> Self {
        Self {
            ctx,
            module: ctx.create_module(name),
            builder: ctx.create_builder(),
            strings: StringPool::default(),
            callees: HashMap::new(),
        }
    }

    /// Lower a whole program into a fresh module.
    pub fn build(mut self, program: &Program) -> CompileResult<Module<'ctx>> {
        self.install_runtime()?;
        for def in &program.functions {
            self.declare_function(def)?;
        }
        for def in &program.functions {
            self.lower_function(def)?;
        }
        self.wrap_entry()?;
        Ok(self.module)
    }

    fn declare_function(&mut self, def: &FunctionDef) -> CompileResult<()> {
        let symbol = mangle(&def.name.name);
        if self.callees.contains_key(&symbol) {
            return Err(CompileError::scope(
                format!("function `{}` is already defined", def.name.name),
                def.name.pos,
            ));
        }

        let ret = Ty::from_ast(&def.return_type);
        if ret != Ty::Void {
            Ty::storable(&def.return_type, &def.name)?;
        }
        let params = def
            .params
            .iter()
            .map(|param| Ty::storable(&param.ty, &param.name))
            .collect::<CompileResult<Vec<_>>>()?;

        let llvm_params = params
            .iter()
            .filter_map(|ty| ty.basic(self.ctx))
            .map(BasicMetadataTypeEnum::from)
            .collect::<Vec<_>>();
        let function = self.module.add_function(&symbol, ret.fn_type(self.ctx, &llvm_params), None);
        debug!(function = %def.name.name, params = params.len(), ret = %ret, "declared function");

        self.callees.insert(
            symbol,
            Callee {
                function,
                params: params.into_iter().map(ParamTy::Typed).collect(),
                ret,
            },
        );
        Ok(())
    }

    fn lower_function(&mut self, def: &FunctionDef) -> CompileResult<()> {
        let callee = self
            .callees
            .get(&mangle(&def.name.name))
            .cloned()
            .ok_or_else(|| {
                CompileError::internal(
                    format!("function `{}` was never declared", def.name.name),
                    def.pos,
                )
            })?;
        let frame = Frame {
            function: callee.function,
            name: def.name.name.clone(),
            ret: callee.ret,
        };
        debug!(function = %frame.name, "lowering function");

        let entry = self.ctx.append_basic_block(frame.function, "entry");
        self.builder.position_at_end(entry);

        // Parameters and the top-level body share one scope.
        let mut scope = SymbolTable::new();
        let args = frame.function.get_param_iter();
        for ((param, ty), incoming) in def.params.iter().zip(callee.params).zip(args) {
            let ParamTy::Typed(ty) = ty else {
                return Err(CompileError::internal(
                    "user function with an opaque parameter",
                    param.pos,
                ));
            };
            let slot = self.declare_slot(&frame, &mut scope, &param.name, ty)?;
            self.builder.build_store(slot, incoming)?;
        }

        self.lower_block(&frame, &def.body, &mut scope)?;

        if !self.is_terminated() {
            if frame.ret != Ty::Void {
                return Err(CompileError::structural(
                    format!("non-v@1d function `{}` must end with a return statement", frame.name),
                    def.pos,
                ));
            }
            self.builder.build_return(None)?;
        }
        Ok(())
    }

    /// Allocate and bind a fresh stack slot for `name`.
    fn declare_slot(
        &self,
        frame: &Frame<'ctx>,
        scope: &mut SymbolTable<'ctx>,
        name: &Ident,
        ty: Ty,
    ) -> CompileResult<PointerValue<'ctx>> {
        if scope.is_declared_here(&name.name) {
            return Err(CompileError::scope(
                format!("variable `{}` is already declared in this scope", name.name),
                name.pos,
            ));
        }
        let llvm_ty = ty.basic(self.ctx).ok_or_else(|| {
            CompileError::type_error(format!("`{}` cannot have type `{ty}`", name.name), name.pos)
        })?;
        let ptr = self.entry_alloca(frame.function, llvm_ty, &name.name)?;
        scope.declare(name, Slot { ptr, ty })?;
        Ok(ptr)
    }

    /// Stack slots live in the entry block, so loops do not grow the stack.
    fn entry_alloca(
        &self,
        function: FunctionValue<'ctx>,
        ty: BasicTypeEnum<'ctx>,
        name: &str,
    ) -> CompileResult<PointerValue<'ctx>> {
        let entry = function
            .get_first_basic_block()
            .ok_or_else(|| CompileError::internal("function has no entry block", Pos::default()))?;
        let at_entry = self.ctx.create_builder();
        match entry.get_first_instruction() {
            Some(first) => at_entry.position_before(&first),
            None => at_entry.position_at_end(entry),
        }
        Ok(at_entry.build_alloca(ty, name)?)
    }

    fn is_terminated(&self) -> bool {
        self.builder
            .get_insert_block()
            .is_some_and(|block| block.get_terminator().is_some())
    }

    fn lower_block(
        &mut self,
        frame: &Frame<'ctx>,
        block: &Block,
        scope: &mut SymbolTable<'ctx>,
    ) -> CompileResult<()> {
        for stmt in &block.statements {
            if self.is_terminated() {
                debug!(function = %frame.name, pos = %stmt.pos, "skipping unreachable statements");
                break;
            }
            self.lower_statement(frame, stmt, scope)?;
        }
        Ok(())
    }

    fn lower_statement(
        &mut self,
        frame: &Frame<'ctx>,
        stmt: &Statement,
        scope: &mut SymbolTable<'ctx>,
    ) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.lower_expr(expr, scope)?;
            }
            StmtKind::NoOp => {}
            StmtKind::Return(value) => self.lower_return(frame, value.as_ref(), scope, stmt.pos)?,
            StmtKind::VarDecl { ty, name } => {
                let ty = Ty::storable(ty, name)?;
                self.declare_slot(frame, scope, name, ty)?;
            }
            StmtKind::VarAss { target, value } => self.lower_assignment(target, value, scope)?,
            StmtKind::If(if_stmt) => self.lower_if(frame, if_stmt, scope)?,
            StmtKind::As { condition, body } => self.lower_loop(frame, condition, body, scope)?,
        }
        Ok(())
    }

    fn lower_return(
        &mut self,
        frame: &Frame<'ctx>,
        value: Option<&Expression>,
        scope: &SymbolTable<'ctx>,
        pos: Pos,
    ) -> CompileResult<()> {
        let Some(expr) = value else {
            if frame.ret != Ty::Void {
                return Err(CompileError::type_error(
                    format!(
                        "function `{}` must return a value of type `{}`",
                        frame.name, frame.ret
                    ),
                    pos,
                ));
            }
            self.builder.build_return(None)?;
            return Ok(());
        };

        let value = self.lower_expr(expr, scope)?;
        match (&frame.ret, &value.ty) {
            // `ret f() $` where both are v@1d
            (Ty::Void, Ty::Void) => {
                self.builder.build_return(None)?;
            }
            (Ty::Void, found) => {
                return Err(CompileError::type_error(
                    format!(
                        "v@1d function `{}` cannot return a value of type `{found}`",
                        frame.name
                    ),
                    expr.pos,
                ));
            }
            (expected, found) if expected != found => {
                return Err(CompileError::mismatch(expected, found, expr.pos))
            }
            _ => {
                self.builder.build_return(Some(&value.basic(expr.pos)?))?;
            }
        }
        Ok(())
    }

    fn lower_assignment(
        &mut self,
        target: &AssignTarget,
        value: &Expression,
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<()> {
        let (location, element) = match target {
            AssignTarget::Name(name) => {
                let slot = scope.lookup(name)?;
                (slot.ptr, slot.ty.clone())
            }
            AssignTarget::Deref { pointer, pos } => {
                let target = self.lower_expr(pointer, scope)?;
                let Ty::Pointer(element) = &target.ty else {
                    return Err(CompileError::type_error(
                        format!("cannot assign through a value of type `{}`", target.ty),
                        *pos,
                    ));
                };
                (target.pointer(*pos)?, (**element).clone())
            }
        };

        let mut stored = self.lower_expr(value, scope)?;
        // Storing a string into a character cell takes its first character.
        if element == Ty::Char && stored.ty.is_str_ptr() {
            let ptr = stored.pointer(value.pos)?;
            let first = self.builder.build_load(self.ctx.i8_type(), ptr, "first_char")?;
            stored = Value::new(Ty::Char, first);
        }
        if stored.ty != element {
            return Err(CompileError::mismatch(&element, &stored.ty, value.pos));
        }
        self.builder.build_store(location, stored.basic(value.pos)?)?;
        Ok(())
    }

    /// Lower a condition that must be `b@@1`.
    fn lower_condition(
        &mut self,
        condition: &Expression,
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<IntValue<'ctx>> {
        let value = self.lower_expr(condition, scope)?;
        if value.ty != Ty::Boolean {
            return Err(CompileError::mismatch(&Ty::Boolean, &value.ty, condition.pos));
        }
        value.int(condition.pos)
    }

    fn lower_if(
        &mut self,
        frame: &Frame<'ctx>,
        if_stmt: &IfStatement,
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<()> {
        self.lower_conditional(
            frame,
            &if_stmt.condition,
            &if_stmt.body,
            &if_stmt.else_ifs,
            if_stmt.else_body.as_ref(),
            scope,
        )
    }

    /// One `if`/`e1if` arm followed by whatever remains of the chain.
    fn lower_conditional(
        &mut self,
        frame: &Frame<'ctx>,
        condition: &Expression,
        body: &Block,
        else_ifs: &[ElseIf],
        else_body: Option<&Block>,
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<()> {
        let cond = self.lower_condition(condition, scope)?;
        let then_bb = self.ctx.append_basic_block(frame.function, "then");

        if else_ifs.is_empty() && else_body.is_none() {
            let merge_bb = self.ctx.append_basic_block(frame.function, "endif");
            self.builder.build_conditional_branch(cond, then_bb, merge_bb)?;
            self.lower_arm(frame, then_bb, merge_bb, body, scope)?;
            return self.enter_merge(merge_bb);
        }

        let else_bb = self.ctx.append_basic_block(frame.function, "else");
        let merge_bb = self.ctx.append_basic_block(frame.function, "endif");
        self.builder.build_conditional_branch(cond, then_bb, else_bb)?;
        self.lower_arm(frame, then_bb, merge_bb, body, scope)?;

        self.builder.position_at_end(else_bb);
        match (else_ifs.split_first(), else_body) {
            (Some((next, rest)), _) => {
                self.lower_conditional(frame, &next.condition, &next.body, rest, else_body, scope)?;
            }
            (None, Some(block)) => self.lower_block(frame, block, &mut scope.nested())?,
            (None, None) => {
                return Err(CompileError::internal("unreachable state reached", condition.pos))
            }
        }
        if !self.is_terminated() {
            self.builder.build_unconditional_branch(merge_bb)?;
        }
        self.enter_merge(merge_bb)
    }

    fn lower_arm(
        &mut self,
        frame: &Frame<'ctx>,
        block: BasicBlock<'ctx>,
        merge: BasicBlock<'ctx>,
        body: &Block,
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<()> {
        self.builder.position_at_end(block);
        self.lower_block(frame, body, &mut scope.nested())?;
        if !self.is_terminated() {
            self.builder.build_unconditional_branch(merge)?;
        }
        Ok(())
    }

    /// Continue after a conditional. When every arm returned, nothing
    /// branches here and the block is closed with `unreachable`, which
    /// counts as terminated for the rest of the function.
    fn enter_merge(&mut self, merge: BasicBlock<'ctx>) -> CompileResult<()> {
        self.builder.position_at_end(merge);
        if merge.get_first_use().is_none() {
            self.builder.build_unreachable()?;
        }
        Ok(())
    }

    fn lower_loop(
        &mut self,
        frame: &Frame<'ctx>,
        condition: &Expression,
        body: &Block,
        scope: &SymbolTable<'ctx>,
    ) -> CompileResult<()> {
        let cond_bb = self.ctx.append_basic_block(frame.function, "as.cond");
        let body_bb = self.ctx.append_basic_block(frame.function, "as.body");
        let end_bb = self.ctx.append_basic_block(frame.function, "as.end");

        self.builder.build_unconditional_branch(cond_bb)?;
        self.builder.position_at_end(cond_bb);
        let cond = self.lower_condition(condition, scope)?;
        self.builder.build_conditional_branch(cond, body_bb, end_bb)?;

        self.builder.position_at_end(body_bb);
        self.lower_block(frame, body, &mut scope.nested())?;
        if !self.is_terminated() {
            self.builder.build_unconditional_branch(cond_bb)?;
        }

        self.builder.position_at_end(end_bb);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constructor, parser};

    fn build<'ctx>(ctx: &'ctx Context, src: &str) -> CompileResult<Module<'ctx>> {
        let program = constructor::construct(&parser::parse(src)?)?;
        ModuleBuilder::new(ctx, "test").build(&program)
    }

    fn ir(src: &str) -> String {
        let ctx = Context::create();
        let module = build(&ctx, src).unwrap();
        module.verify().unwrap();
        module.print_to_string().to_string()
    }

    fn error(src: &str) -> CompileError {
        let ctx = Context::create();
        build(&ctx, src).unwrap_err()
    }

    #[test]
    fn entry_function_is_prefixed_and_wrapped() {
        let ir = ir("fvnc dec start() %s ret ~~1~~ $ !s");
        assert!(ir.contains("define i64 @_1eft_start()"));
        assert!(ir.contains("define i32 @main()"));
        assert!(ir.contains("call i64 @_1eft_start()"));
    }

    #[test]
    fn missing_start_is_structural() {
        let err = error("fvnc dec begin() %s ret ~~1~~ $ !s");
        assert!(matches!(err, CompileError::Structural { .. }));
        assert_eq!(err.to_string(), "no valid `start` function found at 1:1");
    }

    #[test]
    fn start_with_wrong_signature_is_rejected() {
        assert!(matches!(error("fvnc v@1d start() %s n@p $ !s"), CompileError::Structural { .. }));
        assert!(matches!(
            error("fvnc dec start(dec x) %s ret x $ !s"),
            CompileError::Structural { .. }
        ));
    }

    #[test]
    fn falling_off_a_value_function_is_structural() {
        let err = error("fvnc dec start() %s dec x $ !s");
        assert_eq!(
            err.to_string(),
            "non-v@1d function `start` must end with a return statement at 1:1"
        );
    }

    #[test]
    fn void_functions_get_an_implicit_return() {
        let ir = ir("fvnc v@1d f() %s n@p $ !s fvnc dec start() %s f() $ ret ~~@~~ $ !s");
        assert!(ir.contains("define void @_1eft_f()"));
    }

    #[test]
    fn statements_after_a_return_are_not_lowered() {
        // the second return would be a type error if it were lowered
        ir("fvnc dec start() %s ret ~~1~~ $ ret trve $ !s");
    }

    #[test]
    fn if_where_every_arm_returns_needs_no_trailing_return() {
        let src = "fvnc dec pick(b@@1 c) %s if c %s ret ~~1~~ $ !s e1se %s ret ~~2~~ $ !s !s
                   fvnc dec start() %s ret pick(trve) $ !s";
        let ir = ir(src);
        assert!(ir.contains("unreachable"));
    }

    #[test]
    fn one_sided_if_still_needs_a_return() {
        let src = "fvnc dec start() %s if trve %s ret ~~1~~ $ !s !s";
        assert!(matches!(error(src), CompileError::Structural { .. }));
    }

    #[test]
    fn functions_can_call_later_definitions() {
        ir("fvnc dec start() %s ret twice(~~2~~) $ !s fvnc dec twice(dec x) %s ret x t ~~2~~ $ !s");
    }

    #[test]
    fn duplicate_functions_are_scope_errors() {
        let src = "fvnc dec start() %s ret ~~1~~ $ !s fvnc dec start() %s ret ~~2~~ $ !s";
        assert!(matches!(error(src), CompileError::Scope { .. }));
        let src = "fvnc v@1d wr1ted(dec x) %s n@p $ !s fvnc dec start() %s ret ~~2~~ $ !s";
        assert!(matches!(error(src), CompileError::Scope { .. }));
    }

    #[test]
    fn duplicate_parameters_are_scope_errors() {
        let src = "fvnc dec f(dec x, dec x) %s ret x $ !s fvnc dec start() %s ret ~~2~~ $ !s";
        assert!(matches!(error(src), CompileError::Scope { .. }));
    }

    #[test]
    fn return_types_are_checked() {
        let err = error("fvnc dec start() %s ret trve $ !s");
        assert_eq!(err.to_string(), "expected type `dec`, found `b@@1` at 1:25");
        assert!(matches!(
            error("fvnc v@1d f() %s ret ~~1~~ $ !s fvnc dec start() %s ret ~~1~~ $ !s"),
            CompileError::Type { .. }
        ));
        assert!(matches!(error("fvnc dec start() %s ret $ !s"), CompileError::Type { .. }));
    }

    #[test]
    fn void_call_may_be_returned_from_a_void_function() {
        ir("fvnc v@1d f() %s ret wr1te1(`hi`) $ !s fvnc dec start() %s f() $ ret ~~@~~ $ !s");
    }

    #[test]
    fn conditions_must_be_boolean() {
        let err = error("fvnc dec start() %s as ~~1~~ %s n@p $ !s ret ~~@~~ $ !s");
        assert_eq!(err.to_string(), "expected type `b@@1`, found `dec` at 1:24");
    }

    #[test]
    fn allocas_stay_in_the_entry_block() {
        let src = "fvnc dec start() %s
            dec i $ i = ~~@~~ $
            as i 1t ~~3~~ %s dec tmp $ tmp = i $ i = tmp a ~~1~~ $ !s
            ret i $
        !s";
        let ctx = Context::create();
        let module = build(&ctx, src).unwrap();
        let start = module.get_function("_1eft_start").unwrap();
        let blocks = start.get_basic_blocks();
        let mut allocas_outside_entry = 0;
        for block in &blocks[1..] {
            let mut inst = block.get_first_instruction();
            while let Some(current) = inst {
                if current.get_opcode() == inkwell::values::InstructionOpcode::Alloca {
                    allocas_outside_entry += 1;
                }
                inst = current.get_next_instruction();
            }
        }
        assert_eq!(allocas_outside_entry, 0);
    }
}
