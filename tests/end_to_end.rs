use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use lang_1eft::{compile, link, CompileOptions, OutputKind};

/// Build `src` into an executable in `dir`, or `None` when no `cc` exists.
fn build(dir: &Path, src: &str) -> Option<PathBuf> {
    if link::find_cc().is_err() {
        eprintln!("skipping: no `cc` on PATH");
        return None;
    }
    let exe = dir.join("prog");
    let built = compile(src, &exe, &CompileOptions::default()).expect("program should build");
    Some(built)
}

fn run(exe: &Path, stdin: &str) -> Output {
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("executable should start");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(stdin.as_bytes())
        .expect("stdin should accept input");
    child.wait_with_output().expect("executable should finish")
}

#[test]
fn exit_status_carries_the_start_result() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), "fvnc dec start() %s ret ~~2~~ a ~~3~~ t ~~4~~ $ !s") else {
        return;
    };
    assert_eq!(run(&exe, "").status.code(), Some(14));
    assert!(!dir.path().join("prog.o").exists(), "intermediate object should be removed");
}

#[test]
fn printing_a_negative_decimal() {
    let dir = tempfile::tempdir().unwrap();
    let src = "fvnc dec start() %s wr1ted(neg ~~b~~) $ ret ~~@~~ $ !s";
    let Some(exe) = build(dir.path(), src) else {
        return;
    };
    let output = run(&exe, "");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "-7");
}

#[test]
fn print_family() {
    let src = "fvnc dec start() %s
        wr1te(`a\\tb`) $
        wr1te1(`!`) $
        wr1teb(~~1~~ 1t ~~2~~) $
        wr1te(` `) $
        wr1teb(rev trve) $
        wr1tec(#`Q`) $
        ret ~~@~~ $
    !s";
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), src) else {
        return;
    };
    let output = run(&exe, "");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "a\tb!\ntrue falseQ");
}

#[test]
fn reading_a_decimal_from_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), "fvnc dec start() %s ret readd() a ~~1~~ $ !s") else {
        return;
    };
    assert_eq!(run(&exe, "41\n").status.code(), Some(42));
    assert_eq!(run(&exe, "").status.code(), Some(1));
}

#[test]
fn consecutive_reads_share_one_stdin_stream() {
    let src = "fvnc dec start() %s
        dec tens $ tens = readd() $
        ret tens t ~~1@~~ a readd() $
    !s";
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), src) else {
        return;
    };
    assert_eq!(run(&exe, "5\n7\n").status.code(), Some(57));
}

#[test]
fn addresses_print_in_hex() {
    let src = "fvnc dec start() %s dec x $ wr1tep(addr x) $ ret ~~@~~ $ !s";
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build(dir.path(), src) else {
        return;
    };
    let output = run(&exe, "");
    assert!(output.status.success());
    let printed = String::from_utf8_lossy(&output.stdout);
    assert!(printed.starts_with("0x"), "unexpected address {printed:?}");
    assert!(printed[2..].chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn assembly_output_is_written_next_to_the_output_path() {
    let dir = tempfile::tempdir().unwrap();
    let options = CompileOptions { output: OutputKind::Assembly, ..Default::default() };
    let src = "fvnc dec start() %s ret ~~1~~ $ !s";
    let asm = compile(src, &dir.path().join("prog"), &options).unwrap();
    assert_eq!(asm, dir.path().join("prog.s"));
    let text = std::fs::read_to_string(asm).unwrap();
    assert!(text.contains("_1eft_start"));
}
