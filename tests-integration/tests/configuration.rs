//! Configuration integration tests
//!
//! Loads a `rowkeeper.toml`, opens the stores it names and runs a job with
//! the limits it sets.

use anyhow::Result;
use common::config::Configuration;
use tests_integration::fixtures::MaintenanceTestContext;
use tests_integration::{generators, init_test_logging, write_config_file};
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
[documents]
dsn = "memory://"
prefix = "docs"

[tables]
dsn = "memory://"
prefix = "tables"

[retry]
max_retries = 2
initial_delay = "10ms"
backoff_multiplier = 2.0
max_delay = "50ms"

[sizer]
sample_size_per_table = 20
max_concurrency = 2

[pruner]
prune_empty_tables = true
dry_run = false
protected_tables = ["Keepers"]
page_size = 25

[environments.staging.documents]
dsn = "memory://"
prefix = "staging-docs"
"#;

/// Test: a config file drives store selection and job limits
#[tokio::test]
async fn test_config_file_drives_pruning() -> Result<()> {
    init_test_logging();

    let (_dir, path) = write_config_file(CONFIG)?;
    let config = Configuration::load_from_path(&path)?;
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.sizer.sample_size_per_table, 20);
    assert_eq!(config.environment("staging")?.documents.prefix, "staging-docs");

    let ctx = MaintenanceTestContext::from_config(config)?;
    generators::seed_table(ctx.tables().as_ref(), "Keepers", 0).await?;
    generators::seed_table(ctx.tables().as_ref(), "Stale", 0).await?;
    generators::seed_table(ctx.tables().as_ref(), "Live", 30).await?;

    let options = ctx.prune_options();
    assert!(options.prune_empty_tables && !options.dry_run);

    let sizer = &ctx.config.sizer;
    let decisions = ctx
        .pruner()
        .run(
            &options,
            sizer.sample_size_per_table,
            sizer.max_concurrency,
            &CancellationToken::new(),
        )
        .await?;
    let candidates: Vec<_> = decisions
        .iter()
        .filter(|d| d.is_candidate())
        .map(|d| d.table_name.as_str())
        .collect();
    assert_eq!(candidates, vec!["Stale"]);

    let live = decisions.iter().find(|d| d.table_name == "Live").expect("Live sampled");
    assert!(live.stats.is_estimate);
    Ok(())
}

/// Test: an unsupported DSN scheme is rejected before any store is opened
#[tokio::test]
async fn test_unsupported_dsn_is_rejected() -> Result<()> {
    let (_dir, path) = write_config_file("[tables]\ndsn = \"ftp://example.com/data\"\n")?;
    let config = Configuration::load_from_path(&path)?;

    assert!(MaintenanceTestContext::from_config(config).is_err());
    Ok(())
}
