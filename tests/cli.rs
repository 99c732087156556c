//! Integration tests for the gridfill command line

use std::fs;
use std::path::Path;
use std::process::Command;

const TEMPLATE: &str = r#"
[Months]
A1: "Month"
A1 note: "jx:area(lastCell=\"A2\")"
A2: "${m}"
A2 note: "jx:each(items=\"months\" var=\"m\" direction=\"RIGHT\" lastCell=\"A2\")"
"#;

fn run_fill(dir: &Path, template: &str, data: &str, extra: &[&str]) -> (String, String, i32) {
    let template_path = dir.join("template.grd");
    let data_path = dir.join("data.json");
    fs::write(&template_path, template).unwrap();
    fs::write(&data_path, data).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_gridfill"))
        .arg(&template_path)
        .arg("--data")
        .arg(&data_path)
        .args(extra)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute gridfill");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    (stdout, stderr, exit_code)
}

#[test]
fn test_fill_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_fill(
        dir.path(),
        TEMPLATE,
        r#"{"months": ["Jan", "Feb", "Mar", "Apr"]}"#,
        &["-o", "-"],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("[Months]"));
    assert!(stdout.contains("A2: \"Jan\""));
    assert!(stdout.contains("D2: \"Apr\""));
    assert!(!stdout.contains("jx:"));
}

#[test]
fn test_fill_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.grd");
    let out_arg = out.to_string_lossy().to_string();
    let (_, stderr, code) = run_fill(
        dir.path(),
        TEMPLATE,
        r#"{"months": ["Jan", "Feb"]}"#,
        &["--output", &out_arg],
    );
    assert_eq!(code, 0);
    assert!(stderr.contains("Filled"));
    let written = fs::read_to_string(&out).unwrap();
    assert!(written.contains("B2: \"Feb\""));
}

#[test]
fn test_diagnostics_are_warnings_unless_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let template = "A1: \"${missing}\"\nA1 note: \"jx:area(lastCell=\\\"A1\\\")\"\n";

    let (_, stderr, code) = run_fill(dir.path(), template, "{}", &["-o", "-"]);
    assert_eq!(code, 0);
    assert!(stderr.contains("Warning: Sheet1!A1"));

    let (_, stderr, code) = run_fill(dir.path(), template, "{}", &["-o", "-", "--fail-fast"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Error:"));
}

#[test]
fn test_custom_notation() {
    let dir = tempfile::tempdir().unwrap();
    let template = "A1: \"<<name>> ${name}\"\nA1 note: \"jx:area(lastCell=\\\"A1\\\")\"\n";
    let (stdout, _, code) = run_fill(
        dir.path(),
        template,
        r#"{"name": "Bob"}"#,
        &["-o", "-", "--notation", "<<", ">>"],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("A1: \"Bob ${name}\""));
}

#[test]
fn test_bad_inputs_fail() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_fill(dir.path(), TEMPLATE, "{not json", &["-o", "-"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Cannot read data file"));

    let (_, _, code) = run_fill(dir.path(), TEMPLATE, "{}", &[]);
    assert_eq!(code, 2);
}
