/// Common test utilities and helpers for integration tests
use anyhow::{Context, Result};
use common::config::Configuration;
use common::testing::TestConfigBuilder;
use std::path::PathBuf;
use tempfile::TempDir;

pub mod fixtures;
pub mod generators;

/// Create a test configuration backed by in-memory stores
pub fn create_test_config() -> Configuration {
    TestConfigBuilder::new().build()
}

/// Write `contents` as `rowkeeper.toml` into a fresh temporary directory
pub fn write_config_file(contents: &str) -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new().context("Failed to create temp dir")?;
    let path = temp_dir.path().join("rowkeeper.toml");
    std::fs::write(&path, contents).context("Failed to write config file")?;
    Ok((temp_dir, path))
}

/// Initialize test logging
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
