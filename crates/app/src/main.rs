use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use llemmy::console::Console;
use llemmy::error::{OpenDatabaseSnafu, StartWorkflowSnafu};
use llemmy::{AppResult, LlemmySettings};
use llemmy_chat::ChatWorkflow;
use llemmy_storage::SqliteStorage;
use snafu::ResultExt;

/// Chat with configured language models from the terminal.
#[derive(Debug, Parser)]
#[command(name = "llemmy", version)]
struct Cli {
    /// Settings file; defaults to the user config directory.
    #[arg(long, env = "LLEMMY_SETTINGS")]
    settings: Option<PathBuf>,
    /// Chat database file, overriding the configured one.
    #[arg(long = "db")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "llemmy stopped");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let settings = LlemmySettings::load(cli.settings.as_deref());
    let database_path = cli
        .database
        .unwrap_or_else(|| settings.database_path.clone());

    let store = SqliteStorage::open(&database_path.to_string_lossy())
        .await
        .context(OpenDatabaseSnafu {
            stage: "open-chat-database",
            path: database_path.clone(),
        })?;
    tracing::info!(database_url = %store.database_url(), "chat database ready");

    let workflow = ChatWorkflow::new(
        settings.build_models(),
        Arc::new(store),
        settings.user_name.clone(),
    )
    .context(StartWorkflowSnafu {
        stage: "create-chat-workflow",
    })?;

    Console::new(workflow).run().await
}
