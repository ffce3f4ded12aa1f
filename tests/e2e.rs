use std::process::Command;

const ALICE: &str = "6f1c1a8e-0d4b-4f55-9a57-0a1b2c3d4e01";
const BOB: &str = "6f1c1a8e-0d4b-4f55-9a57-0a1b2c3d4e02";

fn run(args: &[&str]) -> (String, String, Option<i32>) {
    let output = Command::new(env!("CARGO_BIN_EXE_ki-ledger"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

fn run_fixture(fixture: &str) -> (String, String, Option<i32>) {
    run(&[&format!("tests/fixtures/{fixture}")])
}

#[test]
fn valid_entries() {
    let (stdout, stderr, code) = run_fixture("valid.csv");

    assert_eq!(code, Some(0));
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,balance,held,earned,spent");
    // the keyed transfer appears twice but is applied once
    assert_eq!(lines[1], format!("{ALICE},40,0,100,60"));
    assert_eq!(lines[2], format!("{BOB},70,0,80,10"));
    assert_eq!(lines.len(), 3);
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, code) = run_fixture("with_errors.csv");

    assert_eq!(code, Some(0));
    assert!(stderr.contains("unrecognized entry type"));
    assert!(stderr.contains("missing amount"));
    assert!(stderr.contains("must be a positive number of points"));
    assert!(stderr.contains("insufficient funds"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,balance,held,earned,spent");
    assert_eq!(lines[1], format!("{ALICE},75,0,100,25"));
    assert_eq!(lines.len(), 2);
}

#[test]
fn missing_argument_prints_usage() {
    let (stdout, stderr, code) = run(&[]);

    assert_eq!(code, Some(2));
    assert!(stdout.is_empty());
    assert!(stderr.contains("usage: ki-ledger"));
}

#[test]
fn missing_file_fails() {
    let (stdout, stderr, code) = run(&["tests/fixtures/nope.csv"]);

    assert_eq!(code, Some(1));
    assert!(stdout.is_empty());
    assert!(stderr.contains("failed to open"));
}
