use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod handlers;
mod provider;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml and the CSV tables
    #[clap(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Semantic recommendations for one user
    Recommend {
        user_id: String,

        /// Number of events to return (defaults to recommendation.top_k)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Semantic recommendations for several users. Failing users get an empty list.
    RecommendBatch {
        #[clap(required = true)]
        user_ids: Vec<String>,

        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Rank upcoming events by category preference and urgency
    Rank {
        user_id: String,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
    /// Rank upcoming events for several users. Failing users are left out.
    RankBatch {
        #[clap(required = true)]
        user_ids: Vec<String>,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
    /// Group users by declared preferences and store cluster templates
    Cluster,
    /// Rank upcoming events for every member of a stored cluster
    RankCluster {
        cluster_id: usize,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show stored and time-decayed preferences of a user
    Preferences { user_id: String },
    /// Record an interaction and update stored preferences
    Feedback {
        user_id: String,

        event_id: String,

        /// like, dislike or click
        action: String,

        /// Category override. Taken from the event when omitted.
        #[clap(short, long)]
        category: Option<String>,

        /// When the newsletter carrying the event was sent
        #[clap(long)]
        email_sent_at: Option<String>,
    },
    /// Compute embeddings for events that don't have one yet
    EmbedEvents {
        #[clap(short, long, default_value = "32")]
        batch_size: usize,

        /// Re-embed every event
        #[clap(short, long, default_value = "false")]
        force: bool,
    },
}
