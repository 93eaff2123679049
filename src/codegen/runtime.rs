//! Runtime support library, emitted into every module before user code.
//!
//! These are plain IR functions over a handful of C library calls. They are
//! registered as callees under the same `_1eft_` prefix as user functions,
//! so a user definition with one of these names is a redefinition.

use inkwell::module::Linkage;
use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::{BasicMetadataValueEnum, FunctionValue, IntValue};
use inkwell::AddressSpace;
use tracing::debug;

use super::{Callee, ModuleBuilder, ParamTy};
use crate::ast::Pos;
use crate::error::{CompileError, CompileResult};
use crate::types::{opaque_ptr, Ty};

/// Prefix shared by runtime and user functions in the emitted module.
pub const PREFIX: &str = "_1eft_";

/// Longest `i64` in decimal, its sign and the terminator.
const READ_BUFFER_LEN: u32 = 21;

/// Private global caching the `FILE*` that `readd` reads from.
const STDIN_GLOBAL: &str = ".stdin";

/// Left shifts applied to the first four `rand()` draws of `rng`; the fifth
/// is shifted right by [`RNG_TAIL_SHIFT`].
const RNG_SHIFTS: [u64; 4] = [48, 35, 22, 9];
const RNG_TAIL_SHIFT: u64 = 4;

pub fn mangle(name: &str) -> String {
    format!("{PREFIX}{name}")
}

impl<'ctx> ModuleBuilder<'ctx> {
    pub(super) fn install_runtime(&mut self) -> CompileResult<()> {
        self.define_wr1te()?;
        self.define_wr1te1()?;
        self.define_wr1ted()?;
        self.define_wr1teb()?;
        self.define_wr1tec()?;
        self.define_wr1tep()?;
        self.define_readd()?;
        self.define_seedrng()?;
        self.define_rng()?;
        debug!(functions = self.callees.len(), "installed runtime library");
        Ok(())
    }

    /// Get or declare one of the C library functions the runtime calls.
    pub(super) fn libc(&self, name: &str) -> CompileResult<FunctionValue<'ctx>> {
        if let Some(function) = self.module.get_function(name) {
            return Ok(function);
        }
        let i32_ty = self.ctx.i32_type();
        let i64_ty = self.ctx.i64_type();
        let ptr_ty = opaque_ptr(self.ctx);
        let fn_ty = match name {
            "printf" => i32_ty.fn_type(&[ptr_ty.into()], true),
            "puts" => i32_ty.fn_type(&[ptr_ty.into()], false),
            "fgets" => ptr_ty.fn_type(&[ptr_ty.into(), i32_ty.into(), ptr_ty.into()], false),
            "fdopen" => ptr_ty.fn_type(&[i32_ty.into(), ptr_ty.into()], false),
            "atol" => i64_ty.fn_type(&[ptr_ty.into()], false),
            "rand" => i32_ty.fn_type(&[], false),
            "srand" => self.ctx.void_type().fn_type(&[i32_ty.into()], false),
            "time" => i64_ty.fn_type(&[ptr_ty.into()], false),
            other => {
                return Err(CompileError::internal(
                    format!("unknown C function `{other}`"),
                    Pos::default(),
                ))
            }
        };
        Ok(self.module.add_function(name, fn_ty, Some(Linkage::External)))
    }

    /// Add a runtime function, register it as a callee and position the
    /// builder in its entry block.
    fn define_runtime(
        &mut self,
        name: &str,
        params: Vec<ParamTy>,
        ret: Ty,
    ) -> FunctionValue<'ctx> {
        let llvm_params = params
            .iter()
            .filter_map(|param| match param {
                ParamTy::Typed(ty) => ty.basic(self.ctx),
                ParamTy::OpaquePointer => Some(opaque_ptr(self.ctx).into()),
            })
            .map(BasicMetadataTypeEnum::from)
            .collect::<Vec<_>>();
        let symbol = mangle(name);
        let function = self
            .module
            .add_function(&symbol, ret.fn_type(self.ctx, &llvm_params), None);
        self.builder.position_at_end(self.ctx.append_basic_block(function, "entry"));
        self.callees.insert(symbol, Callee { function, params, ret });
        function
    }

    fn param(
        function: FunctionValue<'ctx>,
        index: u32,
    ) -> CompileResult<BasicMetadataValueEnum<'ctx>> {
        function.get_nth_param(index).map(Into::into).ok_or_else(|| {
            CompileError::internal(
                format!("runtime function lacks parameter {index}"),
                Pos::default(),
            )
        })
    }

    /// Call `printf` with a pooled format string and one argument.
    fn printf(
        &mut self,
        format_name: &str,
        format: &str,
        arg: BasicMetadataValueEnum<'ctx>,
    ) -> CompileResult<()> {
        let printf = self.libc("printf")?;
        let format = self.strings.intern(self.ctx, &self.module, format_name, format);
        self.builder.build_call(printf, &[format.into(), arg], "")?;
        Ok(())
    }

    fn define_wr1te(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("wr1te", vec![ParamTy::Typed(Ty::str_ptr())], Ty::Void);
        self.printf(".fmt.str", "%s", Self::param(function, 0)?)?;
        self.builder.build_return(None)?;
        Ok(())
    }

    fn define_wr1te1(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("wr1te1", vec![ParamTy::Typed(Ty::str_ptr())], Ty::Void);
        let puts = self.libc("puts")?;
        self.builder.build_call(puts, &[Self::param(function, 0)?], "")?;
        self.builder.build_return(None)?;
        Ok(())
    }

    fn define_wr1ted(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("wr1ted", vec![ParamTy::Typed(Ty::Decimal)], Ty::Void);
        self.printf(".fmt.dec", "%lld", Self::param(function, 0)?)?;
        self.builder.build_return(None)?;
        Ok(())
    }

    fn define_wr1teb(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("wr1teb", vec![ParamTy::Typed(Ty::Boolean)], Ty::Void);
        let flag = Self::param(function, 0)?.into_int_value();
        let yes = self.strings.intern(self.ctx, &self.module, ".str.bool", "true");
        let no = self.strings.intern(self.ctx, &self.module, ".str.bool", "false");
        let text = self.builder.build_select(flag, yes, no, "text")?;
        self.printf(".fmt.str", "%s", text.into())?;
        self.builder.build_return(None)?;
        Ok(())
    }

    fn define_wr1tec(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("wr1tec", vec![ParamTy::Typed(Ty::Char)], Ty::Void);
        let c = Self::param(function, 0)?.into_int_value();
        let widened = self.builder.build_int_s_extend(c, self.ctx.i32_type(), "widened")?;
        self.printf(".fmt.char", "%c", widened.into())?;
        self.builder.build_return(None)?;
        Ok(())
    }

    fn define_wr1tep(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("wr1tep", vec![ParamTy::OpaquePointer], Ty::Void);
        self.printf(".fmt.ptr", "%p", Self::param(function, 0)?)?;
        self.builder.build_return(None)?;
        Ok(())
    }

    /// `readd()`: read one line from stdin and parse it, 0 on read failure.
    ///
    /// The stdin stream is opened on the first call and cached in
    /// [`STDIN_GLOBAL`]; a second `fdopen` would lose whatever the first
    /// stream had already buffered.
    fn define_readd(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("readd", Vec::new(), Ty::Decimal);
        let i64_ty = self.ctx.i64_type();
        let i32_ty = self.ctx.i32_type();
        let ptr_ty = opaque_ptr(self.ctx);

        let cache = self.module.add_global(ptr_ty, Some(AddressSpace::default()), STDIN_GLOBAL);
        cache.set_initializer(&ptr_ty.const_null());
        cache.set_linkage(Linkage::Private);
        let cache = cache.as_pointer_value();

        let buffer_ty = self.ctx.i8_type().array_type(READ_BUFFER_LEN);
        let buffer = self.builder.build_alloca(buffer_ty, "buffer")?;
        let cached = self.builder.build_load(ptr_ty, cache, "cached")?;
        let unopened = self.builder.build_is_null(cached.into_pointer_value(), "unopened")?;

        let open_bb = self.ctx.append_basic_block(function, "open");
        let read_bb = self.ctx.append_basic_block(function, "read");
        let failed_bb = self.ctx.append_basic_block(function, "failed");
        let parse_bb = self.ctx.append_basic_block(function, "parse");
        self.builder.build_conditional_branch(unopened, open_bb, read_bb)?;

        self.builder.position_at_end(open_bb);
        let mode = self.strings.intern(self.ctx, &self.module, ".str.mode", "r");
        let opened = self.builder.build_call(
            self.libc("fdopen")?,
            &[i32_ty.const_zero().into(), mode.into()],
            "opened",
        )?;
        let opened = opened
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CompileError::internal("fdopen returned no value", Pos::default()))?;
        self.builder.build_store(cache, opened)?;
        self.builder.build_unconditional_branch(read_bb)?;

        self.builder.position_at_end(read_bb);
        let stdin = self.builder.build_load(ptr_ty, cache, "stdin")?;
        let line = self.builder.build_call(
            self.libc("fgets")?,
            &[
                buffer.into(),
                i32_ty.const_int(READ_BUFFER_LEN as u64, false).into(),
                stdin.into(),
            ],
            "line",
        )?;
        let line = line
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CompileError::internal("fgets returned no value", Pos::default()))?;
        let failed = self.builder.build_is_null(line.into_pointer_value(), "failed")?;
        self.builder.build_conditional_branch(failed, failed_bb, parse_bb)?;

        self.builder.position_at_end(failed_bb);
        self.builder.build_return(Some(&i64_ty.const_zero()))?;

        self.builder.position_at_end(parse_bb);
        let value = self.builder.build_call(self.libc("atol")?, &[buffer.into()], "value")?;
        let value = value
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CompileError::internal("atol returned no value", Pos::default()))?;
        self.builder.build_return(Some(&value))?;
        Ok(())
    }

    fn define_seedrng(&mut self) -> CompileResult<()> {
        let function = self.define_runtime("seedrng", vec![ParamTy::Typed(Ty::Decimal)], Ty::Void);
        let seed = Self::param(function, 0)?.into_int_value();
        let seed = self.builder.build_int_truncate(seed, self.ctx.i32_type(), "seed")?;
        self.builder.build_call(self.libc("srand")?, &[seed.into()], "")?;
        self.builder.build_return(None)?;
        Ok(())
    }

    /// `rng()`: five 15-bit `rand()` draws packed into one 64-bit value.
    fn define_rng(&mut self) -> CompileResult<()> {
        self.define_runtime("rng", Vec::new(), Ty::Decimal);
        let i64_ty = self.ctx.i64_type();

        let mut packed: Option<IntValue<'ctx>> = None;
        for shift in RNG_SHIFTS {
            let block = self.draw()?;
            let shifted = self
                .builder
                .build_left_shift(block, i64_ty.const_int(shift, false), "shifted")?;
            packed = Some(match packed {
                Some(acc) => self.builder.build_or(acc, shifted, "packed")?,
                None => shifted,
            });
        }
        let tail = self.draw()?;
        let tail = self
            .builder
            .build_right_shift(tail, i64_ty.const_int(RNG_TAIL_SHIFT, false), false, "tail")?;
        let packed = match packed {
            Some(acc) => self.builder.build_or(acc, tail, "packed")?,
            None => tail,
        };
        self.builder.build_return(Some(&packed))?;
        Ok(())
    }

    /// One `rand()` call widened to `i64`.
    fn draw(&self) -> CompileResult<IntValue<'ctx>> {
        let call = self.builder.build_call(self.libc("rand")?, &[], "draw")?;
        let raw = call
            .try_as_basic_value()
            .left()
            .ok_or_else(|| CompileError::internal("rand returned no value", Pos::default()))?
            .into_int_value();
        Ok(self.builder.build_int_z_extend(raw, self.ctx.i64_type(), "wide")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;

    fn runtime_ir() -> String {
        let ctx = Context::create();
        let mut builder = ModuleBuilder::new(&ctx, "runtime");
        builder.install_runtime().unwrap();
        builder.module.verify().unwrap();
        builder.module.print_to_string().to_string()
    }

    #[test]
    fn every_runtime_function_is_prefixed() {
        let ir = runtime_ir();
        let names = [
            "wr1te", "wr1te1", "wr1ted", "wr1teb", "wr1tec", "wr1tep", "readd", "seedrng", "rng",
        ];
        for name in names {
            assert!(ir.contains(&format!("@{}(", mangle(name))), "missing {name}");
        }
    }

    #[test]
    fn c_functions_keep_their_own_names() {
        let ir = runtime_ir();
        assert!(ir.contains("declare i32 @printf(ptr, ...)"));
        assert!(ir.contains("declare i32 @rand()"));
        assert!(ir.contains("declare void @srand(i32)"));
    }

    #[test]
    fn shared_format_strings_are_emitted_once() {
        let ir = runtime_ir();
        assert_eq!(ir.matches("c\"%s\\00\"").count(), 1);
        assert!(ir.contains("@.str.bool.1"));
    }

    #[test]
    fn read_buffer_fits_any_i64() {
        assert!(i64::MIN.to_string().len() + 1 <= READ_BUFFER_LEN as usize);
        assert!(runtime_ir().contains("alloca [21 x i8]"));
    }

    #[test]
    fn stdin_is_opened_once_and_cached() {
        let ir = runtime_ir();
        assert!(ir.contains("@.stdin = private global ptr null"));
        assert_eq!(ir.matches("call ptr @fdopen").count(), 1);
        assert!(ir.contains("store ptr %opened, ptr @.stdin"));
        assert!(ir.contains("%stdin = load ptr, ptr @.stdin"));
    }

    #[test]
    fn unknown_c_functions_are_internal_errors() {
        let ctx = Context::create();
        let builder = ModuleBuilder::new(&ctx, "runtime");
        assert!(matches!(builder.libc("malloc"), Err(CompileError::Internal { .. })));
    }
}
