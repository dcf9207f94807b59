mod bridge;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use showrunner_bus::{MqttBus, MqttBusConfig};
use showrunner_core::bus::BusPublisher;
use showrunner_core::config::GameDefinition;
use showrunner_core::events::Warning;
use showrunner_engine::Engine;
use showrunner_engine::validate;

use config::ServerConfig;

/// Escape-room game orchestration engine.
#[derive(Debug, Parser)]
#[command(name = "showrunner", version, about)]
struct Cli {
    /// Server configuration file.
    #[arg(long, default_value = "showrunner.toml")]
    config: PathBuf,
    /// Game definition file (overrides the config entry).
    #[arg(long)]
    game: Option<PathBuf>,
    /// Parse the game definition as JSON instead of TOML.
    #[arg(long)]
    json: bool,
    /// Broker override as host or host:port.
    #[arg(long)]
    broker: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(bridge::WarningBridgeLayer)
        .init();

    let mut server_config = ServerConfig::load(&cli.config);
    if let Some(game) = cli.game {
        server_config.game = game;
    }
    if let Some(broker) = &cli.broker {
        match broker.split_once(':') {
            Some((host, port)) => {
                server_config.broker_host = host.to_string();
                server_config.broker_port = port.parse().unwrap_or_else(|_| {
                    tracing::error!(broker, "invalid broker port");
                    std::process::exit(1);
                });
            },
            None => server_config.broker_host = broker.clone(),
        }
    }
    server_config.validate();

    let definition = load_definition(&server_config.game, cli.json);
    let report = validate::validate(&definition);
    report.log();
    if report.is_fatal() {
        tracing::error!(
            errors = report.errors.len(),
            "game definition has fatal errors"
        );
        std::process::exit(1);
    }

    let (bus, mut messages, bus_task) = MqttBus::connect(MqttBusConfig {
        host: server_config.broker_host.clone(),
        port: server_config.broker_port,
        client_id: server_config.client_id.clone(),
        keep_alive_secs: 30,
    });

    let engine = match Engine::new(
        Arc::new(definition),
        Arc::clone(&bus) as Arc<dyn BusPublisher>,
    ) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "failed to build engine");
            std::process::exit(1);
        },
    };
    let handle = engine.spawn();

    // Subscribe the operator command topic and every zone state topic.
    let commands_topic = handle.ctx.topics.commands();
    if bus.subscribe(&commands_topic).await.is_err() {
        tracing::error!(topic = %commands_topic, "cannot subscribe command topic");
        std::process::exit(1);
    }
    for topic in handle.ctx.registry.state_topics() {
        let _ = bus.subscribe(&topic).await;
    }

    spawn_warning_publisher(Arc::clone(&bus) as Arc<dyn BusPublisher>, &handle.ctx);

    // Route inbound bus traffic: commands to the engine, state to adapters.
    let router_ctx = Arc::clone(&handle.ctx);
    let router_commands = handle.commands.clone();
    let router = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            if message.topic == router_ctx.topics.commands() {
                let _ = router_commands.send(message.payload);
            } else if !router_ctx.registry.observe_state(&message.topic, &message.payload) {
                tracing::debug!(topic = %message.topic, "unrouted message");
            }
        }
    });

    tracing::info!(
        broker = %format!("{}:{}", server_config.broker_host, server_config.broker_port),
        game_topic = handle.ctx.topics.base(),
        "showrunner up"
    );

    wait_for_shutdown().await;
    tracing::info!("shutting down");

    bridge::clear_sink();
    handle.cancel.cancel();
    let _ = handle.task.await;
    let _ = handle.heartbeat.await;
    router.abort();
    bus.disconnect().await;
    bus_task.abort();
}

fn load_definition(path: &std::path::Path, as_json: bool) -> GameDefinition {
    let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
        tracing::error!(path = %path.display(), error = %e, "cannot read game definition");
        std::process::exit(1);
    });
    let parsed = if as_json || path.extension().is_some_and(|ext| ext == "json") {
        GameDefinition::from_json_str(&content).map_err(|e| e.to_string())
    } else {
        toml::from_str::<GameDefinition>(&content).map_err(|e| e.to_string())
    };
    parsed.unwrap_or_else(|e| {
        tracing::error!(path = %path.display(), "invalid game definition: {e}");
        std::process::exit(1);
    })
}

/// Forward bridged warn/error logs onto the warnings topic. Publish
/// failures are swallowed here so the bridge can never feed itself.
fn spawn_warning_publisher(
    bus: Arc<dyn BusPublisher>,
    ctx: &Arc<showrunner_engine::ExecCtx>,
) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<bridge::BridgedLog>();
    bridge::set_sink(tx);
    let warnings_topic = ctx.topics.warnings();
    tokio::spawn(async move {
        while let Some(log) = rx.recv().await {
            let warning = Warning::new(format!("log_{}", log.level), log.message)
                .with("target", json!(log.target));
            let _ = bus.publish(&warnings_topic, warning.payload()).await;
        }
    });
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            },
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
