use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

use crate::run::RunOptions;
use crate::storage::StoreConfig;

/// Top-level application configuration loaded from file + environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSection,
    pub logging: LoggingSection,
    pub run: RunSection,
}

impl AppConfig {
    /// Load configuration from disk and environment.
    pub fn load() -> Result<Self> {
        let config_path = env::var("BILDAM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let mut builder = config::Config::builder();

        if Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(&config_path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BILDAM")
                .separator("_")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        let mut config: Self = settings.try_deserialize()?;

        if config.logging.level.trim().is_empty() {
            config.logging.level = "info".to_string();
        }

        Ok(config)
    }

    /// Resolve the storage configuration.
    pub fn store_runtime(&self) -> StoreConfig {
        self.storage.to_runtime()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StoreBackendKind,
    pub local: Option<LocalStorageSection>,
}

impl StorageSection {
    pub fn to_runtime(&self) -> StoreConfig {
        match self.backend {
            StoreBackendKind::Mem => StoreConfig::Mem,
            StoreBackendKind::Local => {
                let local = self.local.clone().unwrap_or_default();
                StoreConfig::Local {
                    root_path: local.root_path,
                }
            }
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Mem,
            local: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    #[default]
    Mem,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalStorageSection {
    pub root_path: String,
}

impl Default for LocalStorageSection {
    fn default() -> Self {
        Self {
            root_path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// The `[run]` section: the engine options, stringly-typed the way they
/// arrive from files and the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub src_relation: String,
    pub src_col_data: String,
    pub src_col_id: Option<String>,
    pub init_cset_rel: Option<String>,
    pub init_cset_col: Option<String>,
    pub init_method: String,
    pub sample_frac: Option<f64>,
    pub k: Option<usize>,
    pub t1: Option<f64>,
    pub t2: Option<f64>,
    pub dist_metric: String,
    pub max_iter: Option<i64>,
    pub conv_threshold: Option<f64>,
    pub evaluate: Option<bool>,
    pub out_points: String,
    pub out_centroids: String,
    pub verbose: bool,
    pub seed: Option<u64>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            src_relation: "points".to_string(),
            src_col_data: "coords".to_string(),
            src_col_id: None,
            init_cset_rel: None,
            init_cset_col: None,
            init_method: "random".to_string(),
            sample_frac: None,
            k: None,
            t1: None,
            t2: None,
            dist_metric: "l2norm".to_string(),
            max_iter: None,
            conv_threshold: None,
            evaluate: None,
            out_points: "kmeans_points".to_string(),
            out_centroids: "kmeans_centroids".to_string(),
            verbose: false,
            seed: None,
        }
    }
}

impl RunSection {
    /// Parse the stringly-typed knobs into engine options. Unrecognised
    /// metric or init-method names surface here.
    pub fn to_options(&self) -> crate::Result<RunOptions> {
        let mut options = RunOptions::new(
            self.src_relation.clone(),
            self.src_col_data.clone(),
            self.out_points.clone(),
            self.out_centroids.clone(),
        );
        options.src_col_id = self.src_col_id.clone();
        options.init_cset_rel = self.init_cset_rel.clone();
        options.init_cset_col = self.init_cset_col.clone();
        options.init_method = self.init_method.parse()?;
        options.sample_frac = self.sample_frac;
        options.k = self.k;
        options.t1 = self.t1;
        options.t2 = self.t2;
        options.dist_metric = self.dist_metric.parse()?;
        options.max_iter = self.max_iter;
        options.conv_threshold = self.conv_threshold;
        options.evaluate = self.evaluate;
        options.verbose = self.verbose;
        options.seed = self.seed;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DistanceMetric, InitMethod};
    use crate::Error;

    #[test]
    fn default_run_section_parses() {
        let options = RunSection::default().to_options().unwrap();
        assert_eq!(options.init_method, InitMethod::Random);
        assert_eq!(options.dist_metric, DistanceMetric::L2Norm);
        assert_eq!(options.out_points, "kmeans_points");
    }

    #[test]
    fn metric_aliases_flow_through() {
        let section = RunSection {
            dist_metric: "euclidean".to_string(),
            ..Default::default()
        };
        let options = section.to_options().unwrap();
        assert_eq!(options.dist_metric, DistanceMetric::L2Norm);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let section = RunSection {
            dist_metric: "hamming".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            section.to_options(),
            Err(Error::UnknownMetric(_))
        ));
    }

    #[test]
    fn unknown_init_method_is_rejected() {
        let section = RunSection {
            init_method: "farthest-first".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            section.to_options(),
            Err(Error::UnknownInitMethod(_))
        ));
    }

    #[test]
    fn mem_backend_is_the_default() {
        let config = AppConfig::default();
        assert!(matches!(config.store_runtime(), StoreConfig::Mem));
    }
}
