//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::path::PathBuf;
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Schema file describing the `ParentConfig` / `SubConfig` pair plus a derived
/// experiment schema.
#[allow(dead_code)]
pub const SCHEMAS: &str = r#"
root = "Experiment"

[schemas.SubConfig]
value = 100
self_ref = { "$ref" = ".value" }
parent_ref = { "$ref" = "..base_value" }

[schemas.ParentConfig]
base_value = 42
optional = { "$required" = true }
sub = { "$schema" = "SubConfig" }
sub2 = { "$schema" = "SubConfig" }

[schemas.Experiment]
"$extends" = "ParentConfig"
base_value = 7
name = "baseline"
scaled = { "$ref" = ".sub.missing", "$default" = 1.5 }
"#;

/// Write `contents` to `name` inside `temp_dir` and return its path.
#[allow(dead_code)]
pub fn write_file(temp_dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = temp_dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
