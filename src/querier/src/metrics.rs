use prometheus::{IntCounter, Opts, Registry};

use crate::query::error::QuerierError;

/// Self-monitoring metrics of the sharding planner
#[derive(Clone, Debug)]
pub struct ShardingMetrics {
    /// Number of per-shard legs produced, incremented by the shard count on every split
    pub sharded_queries: IntCounter,
}

impl ShardingMetrics {
    pub fn new(registry: &Registry, namespace: &str) -> Result<Self, QuerierError> {
        let sharded_queries = IntCounter::with_opts(
            Opts::new(
                "query_frontend_sharded_queries_total",
                "Total number of sharded queries",
            )
            .namespace(namespace),
        )
        .map_err(|e| {
            QuerierError::Initialization(format!(
                "Failed to create sharded_queries metric: {e}"
            ))
        })?;

        registry
            .register(Box::new(sharded_queries.clone()))
            .map_err(|e| {
                QuerierError::Initialization(format!("Failed to register sharded_queries: {e}"))
            })?;

        Ok(Self { sharded_queries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_registered_under_namespace() {
        let registry = Registry::new();
        let metrics = ShardingMetrics::new(&registry, "shardql").unwrap();
        metrics.sharded_queries.inc_by(4);

        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(
            families[0].get_name(),
            "shardql_query_frontend_sharded_queries_total"
        );
        assert_eq!(families[0].get_metric()[0].get_counter().get_value(), 4.0);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ShardingMetrics::new(&registry, "shardql").unwrap();

        let err = ShardingMetrics::new(&registry, "shardql").unwrap_err();
        assert!(matches!(err, QuerierError::Initialization(_)));
    }

    #[test]
    fn test_empty_namespace_is_allowed() {
        let registry = Registry::new();
        ShardingMetrics::new(&registry, "").unwrap();
        assert_eq!(
            registry.gather()[0].get_name(),
            "query_frontend_sharded_queries_total"
        );
    }
}
