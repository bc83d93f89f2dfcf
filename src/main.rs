use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rag_memory::Result;
use rag_memory::commands::{
    AddOptions, add_memory, clear_memories, configure, export_memories, import_memories,
    list_conversation, open_memory, search_memories, show_context, show_stats,
};
use rag_memory::config::Config;
use rag_memory::store::Role;

#[derive(Parser)]
#[command(name = "rag-memory")]
#[command(about = "Encrypted on-device semantic memory for retrieval-augmented prompts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure storage, embeddings and the context window
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Remember a piece of text
    Add {
        /// Text to remember
        text: String,
        /// Conversation the text belongs to
        #[arg(long)]
        conversation: Option<String>,
        /// Free-form category, e.g. "travel"
        #[arg(long)]
        category: Option<String>,
        /// Who said it: system, user or assistant
        #[arg(long)]
        role: Option<Role>,
        /// Store long text as a single record instead of chunking it
        #[arg(long)]
        no_chunk: bool,
    },
    /// Find memories similar to a query
    Search {
        query: String,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum cosine similarity, 0 to 1
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Print the context block a prompt would receive for a query
    Context {
        query: String,
        #[arg(long)]
        max_results: Option<usize>,
        /// Only use memories from this conversation
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Print the stored turns of a conversation
    History {
        conversation: String,
    },
    /// Show memory statistics
    Stats,
    /// Export all memories to a JSON file
    Export {
        file: PathBuf,
    },
    /// Import memories from a JSON export, re-embedding each one
    Import {
        file: PathBuf,
    },
    /// Delete memories
    Clear {
        /// Only delete memories from this conversation
        #[arg(long)]
        conversation: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Config { show } = cli.command {
        configure(show)?;
        return Ok(());
    }

    let config = Config::load_default()?;
    let memory = open_memory(&config).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Add {
            text,
            conversation,
            category,
            role,
            no_chunk,
        } => {
            let options = AddOptions {
                conversation,
                category,
                role,
                no_chunk,
            };
            add_memory(&memory, &text, &options).await?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            search_memories(&memory, &query, limit, threshold).await?;
        }
        Commands::Context {
            query,
            max_results,
            conversation,
        } => {
            show_context(&memory, &query, max_results, conversation).await?;
        }
        Commands::History { conversation } => {
            list_conversation(&memory, &conversation).await?;
        }
        Commands::Stats => {
            show_stats(&memory).await?;
        }
        Commands::Export { file } => {
            export_memories(&memory, &file).await?;
        }
        Commands::Import { file } => {
            import_memories(&memory, &file).await?;
        }
        Commands::Clear { conversation } => {
            clear_memories(&memory, conversation.as_deref()).await?;
        }
    }

    Ok(())
}
