use std::io;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod categories;
mod cli;
mod clustering;
mod config;
mod errors;
mod events;
mod indexing;
mod preference;
mod recommender;
mod scoring;
mod semantic;
mod store;
#[cfg(test)]
mod tests;

use cli::Command;
use config::Config;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the JSON output
    fmt().with_writer(io::stderr).with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let config = Config::load_with(&args.data_dir)?;
    tracing::debug!(data_dir = %args.data_dir.display(), "configuration loaded");

    match args.command {
        Command::Recommend { user_id, top_k } => cli::handle_recommend(&config, &user_id, top_k),
        Command::RecommendBatch { user_ids, top_k } => {
            cli::handle_recommend_batch(&config, &user_ids, top_k)
        }
        Command::Rank { user_id, limit } => cli::handle_rank(&config, &user_id, limit),
        Command::RankBatch { user_ids, limit } => cli::handle_rank_batch(&config, &user_ids, limit),
        Command::Cluster => cli::handle_cluster(&config),
        Command::RankCluster { cluster_id, limit } => {
            cli::handle_rank_cluster(&config, cluster_id, limit)
        }
        Command::Preferences { user_id } => cli::handle_preferences(&config, &user_id),
        Command::Feedback {
            user_id,
            event_id,
            action,
            category,
            email_sent_at,
        } => cli::handle_feedback(
            &config,
            &user_id,
            &event_id,
            &action,
            category.as_deref(),
            email_sent_at.as_deref(),
        ),
        Command::EmbedEvents { batch_size, force } => {
            cli::handle_embed_events(&config, batch_size, force)
        }
    }
}
