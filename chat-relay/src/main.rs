use anyhow::Result;
use clap::Parser;
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command, ServeArgs},
    client,
    hub::Hub,
    relay::Relay,
    web::WebRelay,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let hub = Hub::new(args.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = TcpListener::bind(args.listen).await?;
    let relay = Relay::new(listener, hub.clone());
    info!("relay listening on {}", relay.local_addr()?);
    let relay_task = tokio::spawn(relay.run_until(wait_for(shutdown_rx.clone())));

    let web_task = if args.no_web {
        None
    } else {
        let listener = TcpListener::bind(args.web_addr()).await?;
        let web = WebRelay::new(listener, hub, args.static_dir.clone());
        info!("web relay listening on {}", web.local_addr()?);
        Some(tokio::spawn(web.run_until(wait_for(shutdown_rx))))
    };

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(err) = relay_task.await? {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }
    if let Some(web_task) = web_task {
        if let Err(err) = web_task.await? {
            warn!("web relay exited with error: {err:?}");
            return Err(err);
        }
    }

    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
