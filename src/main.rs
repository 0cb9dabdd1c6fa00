//! Bildam runner binary
//!
//! Stages a JSON point file as a source relation, runs the clustering
//! engine with the configured options, and prints the run summary as
//! JSON on stdout.

use std::env;

use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bildam::config::{AppConfig, LogFormat};
use bildam::run::run_kmeans;
use bildam::storage::{create_store, RelationStore};
use bildam::types::{ColumnValue, SourceRecord};

/// One row of the `BILDAM_INPUT` file.
#[derive(Debug, Deserialize)]
struct InputPoint {
    id: Option<i64>,
    coords: Option<Vec<f64>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing; logs go to stderr so stdout stays parseable.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bildam={}", config.logging.level).into());
    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    let store = create_store(config.store_runtime()).await?;
    let options = config.run.to_options()?;

    // Stage the input file, if any, as the configured source relation.
    if let Ok(input_path) = env::var("BILDAM_INPUT") {
        tracing::info!("Staging input file {}", input_path);
        let data = tokio::fs::read(&input_path).await?;
        let rows: Vec<InputPoint> = serde_json::from_slice(&data)?;

        let records: Vec<SourceRecord> = rows
            .into_iter()
            .map(|row| {
                let mut columns = vec![(
                    options.src_col_data.clone(),
                    match row.coords {
                        Some(coords) => ColumnValue::Vector(coords),
                        None => ColumnValue::Null,
                    },
                )];
                if let Some(id_col) = &options.src_col_id {
                    columns.push((
                        id_col.clone(),
                        match row.id {
                            Some(id) => ColumnValue::Bigint(id),
                            None => ColumnValue::Null,
                        },
                    ));
                }
                SourceRecord::with_columns(columns)
            })
            .collect();
        store
            .register_source(&options.src_relation, records)
            .await?;
    }

    let summary = run_kmeans(store, options).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
