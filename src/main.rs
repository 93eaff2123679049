use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use inkwell::context::Context as LlvmContext;
use tracing::{debug, error, info, Level};

use lang_1eft::{emit, lower, parse_program, write_output, CompileOptions, OptLevel, OutputKind};

#[derive(Parser, Debug)]
#[command(name = "leftc", version, about = "Compiler for the 1eft language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a 1eft source file into an executable or assembly.
    Compile {
        input: PathBuf,

        #[arg(default_value = "1eft.out")]
        output: PathBuf,

        #[arg(long, help = "Write target assembly to <output>.s instead of linking")]
        asm: bool,

        #[arg(long, help = "Log every stage and dump the AST and IR")]
        verbose: bool,

        #[arg(
            long,
            default_value_t = true,
            action = ArgAction::Set,
            help = "Emit output; --build=false only checks the program"
        )]
        build: bool,

        #[arg(long, default_value_t = 0, help = "Optimization level, 0 to 3")]
        opt: u8,

        #[arg(long, value_name = "TRIPLE", help = "Target triple; the host's when omitted")]
        target: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Compile { verbose, .. } = &cli.command;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(if *verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    let Command::Compile { input, output, asm, verbose, build, opt, target } = command;
    let options = CompileOptions {
        output: if asm { OutputKind::Assembly } else { OutputKind::Object },
        opt_level: OptLevel::new(opt)?,
        triple: target,
    };

    let src = fs::read_to_string(&input).with_context(|| format!("reading {:?}", input))?;
    let program = parse_program(&src).with_context(|| format!("compiling {:?}", input))?;
    if verbose {
        debug!("AST:\n{program:#?}");
    }

    let ctx = LlvmContext::create();
    let name = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "1eft".to_string());
    let module =
        lower(&ctx, &program, &name).with_context(|| format!("compiling {:?}", input))?;
    if verbose {
        debug!("IR:\n{}", module.print_to_string().to_string());
    }

    if !build {
        emit::verify(&module)?;
        info!(input = %input.display(), "program is valid");
        return Ok(());
    }

    let artifact = write_output(&module, &output, &options)?;
    info!(path = %artifact.display(), "built");
    Ok(())
}
