//! End-to-end tests over listing files.

use std::path::Path;
use std::process::{Command, Output};

use bfence::{Hardener, LfenceConfig, Rule, parse_listing, read_listing};

const LISTING: &str = "\
target x86_64
relocs on

# switch dispatch through a table of handlers
func dispatch
    movl 0x4(%rdi), %eax
    cmpl $0x7, %eax
    ja .Lbad
.Lcall:
    callq *handlers(,%rax,8)
    retq
.Lbad:
    jmpq *0x10(%rsi)

func leaf ignored
    movq (%rdi), %rax
    retq
";

fn write_listing(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("input.s");
    std::fs::write(&path, text).expect("failed to write listing");
    path
}

fn bfence(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bfence"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run bfence")
}

#[test]
fn test_harden_file_round_trip() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let input = write_listing(temp.path(), LISTING);
    let output = temp.path().join("output.s");

    let (stats, text) = Hardener::new(LfenceConfig::active())
        .harden_file(&input, Some(output.as_path()))
        .expect("hardening failed");
    assert!(text.is_none());
    assert_eq!(stats.get(Rule::ConditionalBranch), 1);
    assert_eq!(stats.get(Rule::Load), 1);
    assert_eq!(stats.get(Rule::Return), 1);
    assert_eq!(stats.get(Rule::IndirectCall), 1);
    assert_eq!(stats.get(Rule::IndirectJump), 1);

    let hardened = read_listing(&output).expect("output does not parse");
    let original = parse_listing(LISTING).unwrap();
    assert_eq!(hardened.function("leaf"), original.function("leaf"));
    assert!(
        hardened.instruction_count() > original.instruction_count(),
        "nothing was inserted"
    );

    // A second run only finds the sites the inserted code introduces.
    let again = Hardener::new(LfenceConfig::active())
        .survey(&hardened)
        .get(Rule::IndirectCall);
    assert_eq!(again, 0);
}

#[test]
fn test_cli_harden_to_stdout() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let input = write_listing(temp.path(), LISTING);

    let out = bfence(&["harden", input.to_str().unwrap(), "--insert-lfences", "-s"]);
    assert!(out.status.success());

    let stdout = String::from_utf8(out.stdout).unwrap();
    let program = parse_listing(&stdout).expect("stdout is not a listing");
    let dispatch = program.function("dispatch").unwrap();
    let text: Vec<_> = dispatch.instructions().map(ToString::to_string).collect();
    assert_eq!(
        &text[..5],
        [
            "movl 0x4(%rdi), %eax",
            "lfence",
            "cmpl $0x7, %eax",
            "lfence",
            "ja .Lbad"
        ]
    );

    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.contains("lfenced indirect calls"));
}

#[test]
fn test_cli_disabled_is_identity() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let input = write_listing(temp.path(), LISTING);
    let output = temp.path().join("out.s");

    let out = bfence(&[
        "harden",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "-s",
    ]);
    assert!(out.status.success());
    assert_eq!(
        read_listing(&output).unwrap(),
        parse_listing(LISTING).unwrap()
    );
}

#[test]
fn test_cli_stats_respects_switches() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let input = write_listing(temp.path(), LISTING);

    let out = bfence(&[
        "stats",
        input.to_str().unwrap(),
        "--lfence-indirect-calls",
        "false",
        "-s",
    ]);
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    let count = |label: &str| -> u64 {
        stdout
            .lines()
            .find(|line| line.contains(label))
            .and_then(|line| line.split_whitespace().last())
            .and_then(|n| n.parse().ok())
            .unwrap_or_else(|| panic!("no {label} line in {stdout:?}"))
    };
    assert_eq!(count("branches"), 1);
    assert_eq!(count("indirect calls"), 0);
    assert_eq!(count("indirect jumps"), 1);
}

#[test]
fn test_cli_rejects_unsupported_target() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let input = write_listing(temp.path(), &LISTING.replace("x86_64", "aarch64"));

    let out = bfence(&["harden", input.to_str().unwrap(), "--insert-lfences"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.contains("aarch64"));
    assert!(out.stdout.is_empty());
}

#[test]
fn test_cli_reports_listing_line() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let input = write_listing(temp.path(), "func f\n    retq\n    movq %rax\n");

    let out = bfence(&["size", input.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8(out.stderr).unwrap().contains("line 3"));
}

#[test]
fn test_cli_size_table() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");
    let input = write_listing(temp.path(), LISTING);

    let out = bfence(&["size", input.to_str().unwrap(), "-s"]);
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.starts_with("| function |"));
    assert!(stdout.contains("| leaf "));
    assert!(stdout.lines().last().unwrap().starts_with("| total"));
}
