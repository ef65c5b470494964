use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

/// How per-shard legs are stitched back together
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CombinerKind {
    /// Legs joined with the `or` set operator
    #[default]
    Or,
    /// Legs JSON-encoded into a reserved selector for a sharding-aware executor
    Embedded,
}

/// Configuration for query sharding
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Whether parallelizable aggregations are split at all
    pub enabled: bool,
    /// Number of shards every split fans out to
    pub shard_count: usize,
    /// Strategy used to combine per-shard legs
    pub combiner: CombinerKind,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shard_count: 16,
            combiner: CombinerKind::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Namespace prefixed to every exported metric name
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "shardql".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Query sharding configuration
    pub sharding: ShardingConfig,
    /// Self-monitoring metrics configuration
    pub metrics: MetricsConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("shardql.toml"))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path)).extract().map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("SHARDQL__").split("__"))
    }
}
