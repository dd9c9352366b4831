use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use logtail::{
    cli::{Cli, WatchTarget},
    core::{watch_directory, watch_file, TaskGroup, TailContext},
    output::StdoutSink,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli.setup_logging();

    if let Err(err) = run(&cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let filter = cli.filter_spec()?;
    let target = cli.target()?;

    let group = TaskGroup::new();
    let sink = Arc::new(StdoutSink::stdout(group.clone()));
    let ctx = TailContext::new(cli.display_mode(), filter, config.watcher, sink)?;

    let stopper = group.clone();
    ctrlc::set_handler(move || stopper.request_shutdown())
        .context("Failed to install Ctrl-C handler")?;

    match target {
        WatchTarget::File(path) => watch_file(&path, &ctx, &group)?,
        WatchTarget::Directory(dir) => watch_directory(&dir, &ctx, &group)?,
    }

    tokio::select! {
        _ = group.idle() => tracing::info!("Nothing left to watch"),
        _ = group.shutdown_requested() => tracing::info!("Shutting down"),
    }
    group.shutdown().await;

    Ok(())
}
