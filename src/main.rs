use std::env;
use std::path::Path;
use std::process::ExitCode;

use ki_ledger::Engine;
use ki_ledger::csv::{read_entries, write_accounts};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: ki-ledger <entries.csv>");
        return ExitCode::from(2);
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let entries = match read_entries(Path::new(&path)) {
        Ok(entries) => entries,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new();
    let (entry_sender, entry_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in entries {
            match result {
                Ok(entry) => {
                    if entry_sender.send(entry).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(entry_receiver)).await;

    if let Err(e) = write_accounts(std::io::stdout().lock(), engine.accounts()) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
