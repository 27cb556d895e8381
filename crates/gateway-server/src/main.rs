use anyhow::{Context, Result};
use clap::Parser;
use infrastructure::GatewayConfig;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gateway_server::{api, setup_app_state};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `default.toml` and `<RUN_MODE>.toml`
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// HTTP port, overrides `server.port`
    #[arg(long)]
    port: Option<u16>,

    /// Protocol connected at startup, overrides `default_protocol`
    #[arg(long)]
    protocol: Option<String>,

    /// Run both PLC transports against the built-in simulators
    #[arg(long)]
    simulated: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gateway_server=debug,application=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("PLC gateway starting...");

    let mut config = GatewayConfig::load(&args.config_dir)
        .with_context(|| format!("Failed to load configuration from {}", args.config_dir))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(protocol) = args.protocol {
        config.default_protocol = protocol;
    }
    if args.simulated {
        config.s7.simulated = true;
        config.opcua.simulated = true;
    }
    info!(
        protocol = %config.default_protocol,
        s7 = %config.s7.host,
        opcua = %config.opcua.endpoint,
        s7_simulated = config.s7.simulated,
        opcua_simulated = config.opcua.simulated,
        "Configuration loaded"
    );

    let state = setup_app_state(config).await?;
    let service = state.service.clone();

    // 1. Initial connect of the default protocol
    let started = service.start().await;
    if started.success {
        info!("{}", started.message);
    } else {
        warn!("Initial connect failed: {}", started.message);
    }

    // 2. Telemetry link
    if state.config.mqtt.enabled {
        let outcome = service.mqtt_connect(None, None).await;
        info!("{}", outcome.message);
    }

    // 3. Broadcast loop
    let cancel = state.shutdown.clone();
    let scheduler = tokio::spawn(state.scheduler.clone().run(cancel.clone()));

    // 4. HTTP API
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API listening on http://{}", addr);

    let app = api::create_router(state.clone());
    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            server_cancel.cancel();
        })
        .await?;

    info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = scheduler.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    service.shutdown().await;

    info!("Good bye!");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
