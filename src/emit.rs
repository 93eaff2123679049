//! Target machine setup, optimisation and machine code emission.

use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use tracing::{debug, info};

use crate::error::{CompileError, CompileResult};
use crate::options::CompileOptions;

/// Check a lowered module with the LLVM verifier.
pub fn verify(module: &Module<'_>) -> CompileResult<()> {
    module.verify().map_err(|err| CompileError::toolchain(err.to_string()))
}

fn target_machine(options: &CompileOptions) -> CompileResult<TargetMachine> {
    let config = InitializationConfig::default();
    let (triple, cpu, features) = match &options.triple {
        Some(triple) => {
            Target::initialize_all(&config);
            (TargetTriple::create(triple), "generic".to_string(), String::new())
        }
        None => {
            Target::initialize_native(&config).map_err(CompileError::toolchain)?;
            (
                TargetMachine::get_default_triple(),
                TargetMachine::get_host_cpu_name().to_string(),
                TargetMachine::get_host_cpu_features().to_string(),
            )
        }
    };
    debug!(triple = %triple.as_str().to_string_lossy(), %cpu, "creating target machine");
    let target =
        Target::from_triple(&triple).map_err(|err| CompileError::toolchain(err.to_string()))?;
    target
        .create_target_machine(
            &triple,
            &cpu,
            &features,
            options.opt_level.llvm(),
            RelocMode::PIC,
            CodeModel::Default,
        )
        .ok_or_else(|| {
            CompileError::toolchain(format!(
                "cannot create a target machine for {}",
                triple.as_str().to_string_lossy()
            ))
        })
}

/// Verify, optionally optimise, and emit `module` as assembly or an object.
pub fn emit(module: &Module<'_>, options: &CompileOptions) -> CompileResult<MemoryBuffer> {
    let machine = target_machine(options)?;
    module.set_triple(&machine.get_triple());
    module.set_data_layout(&machine.get_target_data().get_data_layout());

    verify(module)?;

    if let Some(pipeline) = options.opt_level.pipeline() {
        debug!(%pipeline, "running optimisation passes");
        module
            .run_passes(&pipeline, &machine, PassBuilderOptions::create())
            .map_err(|err| CompileError::toolchain(err.to_string()))?;
    }

    let buffer = machine
        .write_to_memory_buffer(module, options.output.file_type())
        .map_err(|err| CompileError::toolchain(err.to_string()))?;
    info!(bytes = buffer.get_size(), output = ?options.output, "emitted module");
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use inkwell::context::Context;

    use super::*;
    use crate::codegen::ModuleBuilder;
    use crate::options::{OptLevel, OutputKind};
    use crate::{constructor, parser};

    fn emit_source(src: &str, options: &CompileOptions) -> Vec<u8> {
        let ctx = Context::create();
        let program = constructor::construct(&parser::parse(src).unwrap()).unwrap();
        let module = ModuleBuilder::new(&ctx, "emit").build(&program).unwrap();
        emit(&module, options).unwrap().as_slice().to_vec()
    }

    #[test]
    fn assembly_mentions_the_native_main() {
        let options = CompileOptions { output: OutputKind::Assembly, ..Default::default() };
        let asm = emit_source("fvnc dec start() %s ret ~~1~~ $ !s", &options);
        let asm = String::from_utf8(asm).unwrap();
        assert!(asm.contains("main"));
        assert!(asm.contains("_1eft_start"));
    }

    #[test]
    fn optimised_objects_are_emitted() {
        let options = CompileOptions {
            opt_level: OptLevel::new(2).unwrap(),
            ..Default::default()
        };
        let object = emit_source("fvnc dec start() %s ret ~~2~~ a ~~3~~ t ~~4~~ $ !s", &options);
        assert!(!object.is_empty());
    }

    #[test]
    fn explicit_triples_select_the_target() {
        let host = TargetMachine::get_default_triple();
        let options = CompileOptions {
            output: OutputKind::Assembly,
            triple: Some(host.as_str().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let asm = emit_source("fvnc dec start() %s ret ~~1~~ $ !s", &options);
        assert!(String::from_utf8(asm).unwrap().contains("_1eft_start"));
    }

    #[test]
    fn unknown_triples_are_toolchain_errors() {
        let ctx = Context::create();
        let program = constructor::construct(
            &parser::parse("fvnc dec start() %s ret ~~1~~ $ !s").unwrap(),
        )
        .unwrap();
        let module = ModuleBuilder::new(&ctx, "emit").build(&program).unwrap();
        let options = CompileOptions {
            triple: Some("nonsense-unknown-nowhere".to_string()),
            ..Default::default()
        };
        assert!(matches!(emit(&module, &options), Err(CompileError::Toolchain(_))));
    }
}
