use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use prometheus::{Encoder, Registry, TextEncoder};
use querier::ShardingPlanner;

#[derive(Parser)]
#[command(name = "shardql")]
#[command(about = "Rewrites PromQL queries into shard-parallel form")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shard a PromQL query and print the rewritten query
    Shard {
        /// PromQL query to rewrite
        query: String,

        #[arg(long, help = "Override the configured shard count")]
        shards: Option<usize>,

        #[arg(long, help = "Print self-monitoring metrics after sharding")]
        metrics: bool,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    let mut config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        Commands::Common(ref command) => utils::handle_common_command(command, &config),
        Commands::Shard {
            query,
            shards,
            metrics,
        } => {
            if let Some(shards) = shards {
                config.sharding.shard_count = shards;
            }
            utils::validate_config(&config)?;
            log::debug!(
                "Sharding query across {} shards",
                config.sharding.shard_count
            );

            let registry = Registry::new();
            let planner = ShardingPlanner::new(&config, &registry)
                .context("Failed to initialize sharding planner")?;
            let planned = planner
                .plan(&query)
                .with_context(|| format!("Failed to shard query: {query}"))?;

            println!("{}", planned.query());

            if metrics {
                let mut buffer = vec![];
                TextEncoder::new()
                    .encode(&registry.gather(), &mut buffer)
                    .context("Failed to encode metrics")?;
                eprint!(
                    "{}",
                    String::from_utf8(buffer).context("Metrics are not valid UTF-8")?
                );
            }
            Ok(())
        }
    }
}
