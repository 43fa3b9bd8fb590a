//! Golden tests for verifying JSON output format stability
//!
//! These tests ensure that the JSON output of rcopy stays stable for
//! scripts consuming it.
//!
//! Run with: `cargo test --features golden`

#![cfg(feature = "golden")]

use std::process::{Command, Output};

use tempfile::TempDir;

/// Set up a temporary working and config directory for isolated testing
fn setup_test_env() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(temp_dir.path().join("a.txt"), b"hello").expect("Failed to write source");
    temp_dir
}

fn rcopy(temp_dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rcopy"))
        .args(args)
        .current_dir(temp_dir.path())
        .env("RCOPY_CONFIG_DIR", temp_dir.path().join("config"))
        .output()
        .expect("Failed to execute rcopy")
}

mod session_tests {
    use super::*;

    #[test]
    fn test_session_list_empty_json() {
        let temp_dir = setup_test_env();
        let output = rcopy(&temp_dir, &["session", "list", "--json"]);

        assert!(output.status.success(), "Command should succeed");

        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
        insta::assert_json_snapshot!(json, @r#"
        {
          "sessions": []
        }
        "#);
    }

    #[test]
    fn test_session_clear_json() {
        let temp_dir = setup_test_env();
        let output = rcopy(&temp_dir, &["session", "clear", "--all", "--json"]);

        assert!(output.status.success(), "Command should succeed");

        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
        insta::assert_json_snapshot!(json, @r#"
        {
          "cleared": 0
        }
        "#);
    }
}

mod cp_tests {
    use super::*;

    #[test]
    fn test_cp_single_file_json() {
        let temp_dir = setup_test_env();
        let output = rcopy(&temp_dir, &["cp", "a.txt", "b.txt", "--json"]);

        assert!(output.status.success(), "Command should succeed");

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<serde_json::Value> = stdout
            .lines()
            .map(|line| serde_json::from_str(line).expect("Each line should be JSON"))
            .collect();
        insta::assert_json_snapshot!(lines, @r#"
        [
          {
            "source": "a.txt",
            "target": "b.txt",
            "length": 5
          },
          {
            "total_bytes": 5,
            "total_objects": 1,
            "copied_objects": 1,
            "copied_bytes": 5,
            "skipped_objects": 0,
            "failed_objects": 0,
            "unresolved_sources": 0,
            "speed": 0.0
          }
        ]
        "#);
    }

    #[test]
    fn test_cp_error_json() {
        let temp_dir = setup_test_env();
        let output = rcopy(&temp_dir, &["cp", "a.txt", "b.txt...", "--json"]);

        assert_eq!(output.status.code(), Some(2));

        let json: serde_json::Value =
            serde_json::from_slice(&output.stderr).expect("Error should be valid JSON");
        insta::assert_json_snapshot!(json, @r#"
        {
          "error": "Invalid path: recursive marker is not allowed on target 'b.txt...'"
        }
        "#);
    }
}
