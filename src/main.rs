use clap::Parser;
use ocean_processor::cli::{self, Args};
use std::process;

fn main() {
    let args = Args::parse();

    if let Err(e) = cli::setup_logging(&args) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        tokio::select! {
            result = cli::run(args) => result,
            () = interrupted() => Err(anyhow::anyhow!("Processing interrupted by user")),
        }
    });

    match result {
        // Partial failures are already listed in the summary
        Ok(stats) if stats.files_failed > 0 => process::exit(2),
        Ok(_) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

/// Resolves on CTRL+C; never resolves if the handler cannot be installed
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => eprintln!("\nReceived CTRL+C, shutting down..."),
        Err(e) => {
            tracing::warn!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
