use std::cell::RefCell;
use std::collections::VecDeque;

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::OptimizationLevel;
use lang_1eft::{lower, parse_program, CompileResult};

type StartFn = unsafe extern "C" fn() -> i64;

thread_local! {
    static RAND_DRAWS: RefCell<VecDeque<i32>> = RefCell::new(VecDeque::new());
}

extern "C" fn scripted_rand() -> i32 {
    RAND_DRAWS.with(|draws| draws.borrow_mut().pop_front().unwrap_or(0))
}

pub fn lower_source<'ctx>(ctx: &'ctx Context, src: &str) -> CompileResult<Module<'ctx>> {
    let program = parse_program(src)?;
    lower(ctx, &program, "test")
}

/// Lower `src`, JIT it and return what `start` returns.
pub fn run_start(src: &str) -> i64 {
    run(src, None)
}

/// Like [`run_start`], with C `rand()` replaced by the given draws.
#[allow(dead_code)]
pub fn run_start_with_rand(src: &str, draws: &[i32]) -> i64 {
    run(src, Some(draws))
}

fn run(src: &str, draws: Option<&[i32]>) -> i64 {
    let ctx = Context::create();
    let module = lower_source(&ctx, src).expect("program should lower");
    module.verify().expect("module should verify");

    ExecutionEngine::link_in_mc_jit();
    let engine = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("jit should start");

    if let Some(draws) = draws {
        RAND_DRAWS.with(|queue| *queue.borrow_mut() = draws.iter().copied().collect());
        let rand = module.get_function("rand").expect("runtime declares rand");
        engine.add_global_mapping(&rand, scripted_rand as usize);
    }

    unsafe {
        let start = engine
            .get_function::<StartFn>("_1eft_start")
            .expect("start should be compiled");
        start.call()
    }
}
