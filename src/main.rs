use clap::Parser;
use render_service::{setup_logging, Cli, CliRunner, Config};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting render-service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;
    let runner = CliRunner::new(config, &args).await?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);

    let result = tokio::select! {
        result = runner.run(args.command) => result,
        _ = shutdown_rx.recv() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    runner.service.shutdown().await;

    if let Err(e) = result {
        error!("Application error: {e}");
        std::process::exit(1);
    }

    info!("render-service stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if let Some(config_path) = &args.config {
        let content = tokio::fs::read_to_string(config_path).await?;
        serde_json::from_str(&content)?
    } else {
        Config::default()
    };

    // CLI arguments override the file.
    if let Some(max_concurrent) = args.max_concurrent {
        config.browser.max_concurrent = max_concurrent;
    }
    if let Some(timeout) = args.timeout {
        config.queue.processing_timeout_ms = timeout * 1000;
    }
    if let Some(output_dir) = &args.output_dir {
        config.storage.output_dir = output_dir.clone();
    }
    if let Some(state_dir) = &args.state_dir {
        config.storage.state_dir = state_dir.clone();
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    config.validate()?;

    info!(
        "Configuration loaded: {} concurrent per kind, queue cap {}, output {}",
        config.browser.max_concurrent,
        config.queue.max_size,
        config.storage.output_dir.display()
    );

    Ok(config)
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to create SIGINT handler");
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to create SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(());
    })
}
