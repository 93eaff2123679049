//! Entry point wrapping: auto-seeding plus the native `main`.

use tracing::debug;

use super::{mangle, ModuleBuilder};
use crate::ast::Pos;
use crate::error::{CompileError, CompileResult};
use crate::types::{opaque_ptr, Ty};

/// The user function every program must define: `fvnc dec start()`.
pub const ENTRY_NAME: &str = "start";

impl<'ctx> ModuleBuilder<'ctx> {
    pub(super) fn wrap_entry(&mut self) -> CompileResult<()> {
        let entry = self
            .callees
            .get(&mangle(ENTRY_NAME))
            .filter(|callee| callee.params.is_empty() && callee.ret == Ty::Decimal)
            .map(|callee| callee.function)
            .ok_or_else(|| {
                CompileError::structural(
                    format!("no valid `{ENTRY_NAME}` function found"),
                    Pos::default(),
                )
            })?;

        // Seed the generator from the clock before any user statement runs.
        let first_block = entry
            .get_first_basic_block()
            .ok_or_else(|| CompileError::internal("entry function has no body", Pos::default()))?;
        match first_block.get_first_instruction() {
            Some(first) => self.builder.position_before(&first),
            None => self.builder.position_at_end(first_block),
        }
        let now = self
            .builder
            .build_call(self.libc("time")?, &[opaque_ptr(self.ctx).const_null().into()], "now")?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CompileError::internal("time returned no value", Pos::default()))?;
        let seedrng = self
            .callees
            .get(&mangle("seedrng"))
            .map(|callee| callee.function)
            .ok_or_else(|| {
                CompileError::internal("runtime library is not installed", Pos::default())
            })?;
        self.builder.build_call(seedrng, &[now.into()], "")?;

        let i32_ty = self.ctx.i32_type();
        let main = self.module.add_function("main", i32_ty.fn_type(&[], false), None);
        self.builder.position_at_end(self.ctx.append_basic_block(main, "entry"));
        let status = self
            .builder
            .build_call(entry, &[], "status")?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| {
                CompileError::internal("entry function returned no value", Pos::default())
            })?;
        let status = self.builder.build_int_truncate(status.into_int_value(), i32_ty, "exit_code")?;
        self.builder.build_return(Some(&status))?;

        debug!(entry = %mangle(ENTRY_NAME), "wrapped entry function into main");
        Ok(())
    }
}
