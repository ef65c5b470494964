use common::cli::utils;
use common::config::CombinerKind;
use figment::Jail;
use prometheus::Registry;
use querier::ShardingPlanner;
use querier::query::promql::astmapper::decode_embedded;
use querier::query::promql::ast::Expr;

#[test]
fn test_planner_from_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "shardql.toml",
            r#"
            [sharding]
            shard_count = 3
            "#,
        )?;

        let config = utils::load_config(None).unwrap();
        utils::validate_config(&config).unwrap();

        let registry = Registry::new();
        let planner = ShardingPlanner::new(&config, &registry).unwrap();
        let planned = planner
            .plan(r#"sum by (job) (rate(http_requests_total{job="api"}[5m]))"#)
            .unwrap();

        let query = planned.query();
        for shard in 0..3 {
            assert!(query.contains(&format!(r#"__query_shard__="{shard}_of_3""#)));
        }
        assert!(query.starts_with("sum by (job) (sum by (job, __query_shard__) ("));
        assert_eq!(planner.metrics().sharded_queries.get(), 3);

        let families = registry.gather();
        assert_eq!(
            families[0].get_name(),
            "shardql_query_frontend_sharded_queries_total"
        );
        Ok(())
    });
}

#[test]
fn test_env_selects_embedded_combiner() {
    Jail::expect_with(|jail| {
        jail.set_env("SHARDQL__SHARDING__SHARD_COUNT", "2");
        jail.set_env("SHARDQL__SHARDING__COMBINER", "embedded");
        jail.set_env("SHARDQL__METRICS__NAMESPACE", "frontend");

        let config = utils::load_config(None).unwrap();
        assert_eq!(config.sharding.combiner, CombinerKind::Embedded);

        let registry = Registry::new();
        let planner = ShardingPlanner::new(&config, &registry).unwrap();
        let planned = planner.plan("sum(up)").unwrap();

        let Expr::Aggregate(parent) = &planned.expr else {
            panic!("Expected Aggregate");
        };
        let legs = decode_embedded(&parent.expr).unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(
            registry.gather()[0].get_name(),
            "frontend_query_frontend_sharded_queries_total"
        );
        Ok(())
    });
}

#[test]
fn test_invalid_config_is_rejected_before_planning() {
    Jail::expect_with(|jail| {
        jail.set_env("SHARDQL__SHARDING__SHARD_COUNT", "0");

        let config = utils::load_config(None).unwrap();
        assert!(utils::validate_config(&config).is_err());
        assert!(ShardingPlanner::new(&config, &Registry::new()).is_err());
        Ok(())
    });
}
