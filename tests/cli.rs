use std::fs;
use std::process::Command;

fn leftc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_leftc"))
}

#[test]
fn missing_input_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let status = leftc()
        .args(["compile", "does-not-exist.1eft"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn out_of_range_optimization_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.1eft");
    fs::write(&input, "fvnc dec start() %s ret ~~@~~ $ !s").unwrap();
    let status = leftc()
        .arg("compile")
        .arg(&input)
        .args(["--opt", "7", "--build=false"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn compile_errors_exit_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.1eft");
    fs::write(&input, "fvnc dec start() %s ret trve $ !s").unwrap();
    let status = leftc().arg("compile").arg(&input).arg("--build=false").status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn check_only_runs_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.1eft");
    fs::write(&input, "fvnc dec start() %s ret ~~@~~ $ !s // done\n").unwrap();
    let status = leftc()
        .arg("compile")
        .arg(&input)
        .arg(dir.path().join("out"))
        .arg("--build=false")
        .status()
        .unwrap();
    assert!(status.success());
    assert!(!dir.path().join("out").exists());
    assert!(!dir.path().join("out.o").exists());
}

#[test]
fn unknown_target_triples_exit_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.1eft");
    fs::write(&input, "fvnc dec start() %s ret ~~@~~ $ !s").unwrap();
    let status = leftc()
        .arg("compile")
        .arg(&input)
        .arg(dir.path().join("out"))
        .args(["--asm", "--target", "nonsense-unknown-nowhere"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
    assert!(!dir.path().join("out.s").exists());
}
