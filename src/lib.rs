//! Compiler for the 1eft language.
//!
//! The pipeline is parse, construct, lower, emit and link, run once and in
//! order. Each stage is exposed on its own so tests and tools can stop
//! anywhere; [`compile`] runs all of them.

pub mod ast;
pub mod codegen;
pub mod constructor;
pub mod digits;
pub mod emit;
pub mod error;
pub mod link;
pub mod options;
pub mod parser;
pub mod syntax;
pub mod types;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use inkwell::context::Context;
use inkwell::module::Module;
use tracing::{debug, info};

pub use ast::Program;
pub use codegen::ModuleBuilder;
pub use error::{CompileError, CompileResult};
pub use options::{CompileOptions, OptLevel, OutputKind};

/// Source text to AST.
pub fn parse_program(src: &str) -> CompileResult<Program> {
    let tree = parser::parse(src)?;
    debug!(rule = ?tree.rule, children = tree.children.len(), "parsed source");
    let program = constructor::construct(&tree)?;
    debug!(functions = program.functions.len(), "constructed AST");
    Ok(program)
}

/// AST to a verified-ready LLVM module named `name`.
pub fn lower<'ctx>(
    ctx: &'ctx Context,
    program: &Program,
    name: &str,
) -> CompileResult<Module<'ctx>> {
    let module = ModuleBuilder::new(ctx, name).build(program)?;
    debug!(module = name, "lowered program");
    Ok(module)
}

/// `<path>.<extension>` without dropping an existing extension, so
/// `prog.out` gives `prog.out.s`.
pub fn sibling_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Emit `module` and write the requested artifact next to `output`.
///
/// Assembly goes to `<output>.s`. Objects go to `<output>.o`, are linked into
/// `output` and then removed. Returns the path of the final artifact.
pub fn write_output(
    module: &Module<'_>,
    output: &Path,
    options: &CompileOptions,
) -> CompileResult<PathBuf> {
    let buffer = emit::emit(module, options)?;
    match options.output {
        OutputKind::Assembly => {
            let asm = sibling_path(output, "s");
            fs::write(&asm, buffer.as_slice())?;
            info!(path = %asm.display(), "wrote assembly");
            Ok(asm)
        }
        OutputKind::Object => {
            let object = sibling_path(output, "o");
            fs::write(&object, buffer.as_slice())?;
            link::link_executable(&object, output)?;
            link::remove_object(&object);
            Ok(output.to_path_buf())
        }
    }
}

/// Run the whole pipeline on `src`.
pub fn compile(src: &str, output: &Path, options: &CompileOptions) -> CompileResult<PathBuf> {
    let program = parse_program(src)?;
    let ctx = Context::create();
    let name = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "1eft".to_string());
    let module = lower(&ctx, &program, &name)?;
    write_output(&module, output, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_paths_keep_the_existing_extension() {
        assert_eq!(
            sibling_path(Path::new("build/1eft.out"), "s"),
            PathBuf::from("build/1eft.out.s")
        );
        assert_eq!(sibling_path(Path::new("prog"), "o"), PathBuf::from("prog.o"));
    }

    #[test]
    fn parse_errors_surface_before_lowering() {
        let err = parse_program("fvnc dec start() %s ret ~~1~~ !s").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }
}
