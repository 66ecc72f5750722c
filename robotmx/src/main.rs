use std::sync::Arc;

use axum::http::{header, Method};
use ractor::Actor;
use robotmx::actors::{spawn_telemetry_forwarder, RobotServerActor, RobotServerArguments};
use robotmx::api;
use robotmx::config::Config;
use robotmx::hardware::{SimulatedRobot, SimulatedRobotConfig};
use robotmx::orchestrator::{MountOrchestrator, OrchestratorConfig};
use robotmx::reporter::BroadcastReporter;
use robotmx::safety::{HttpSafetyGateway, NoopSafetyGateway, SharedSafetyGateway};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "robotmx=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        robot = %config.robot_name,
        bind_addr = %config.bind_addr,
        "robotmx starting"
    );

    let safety: SharedSafetyGateway = match &config.safety_url {
        Some(url) => {
            info!(url = %url, "using safety service");
            Arc::new(
                HttpSafetyGateway::new(url.clone(), config.safety_timeout)
                    .map_err(|e| anyhow::anyhow!("safety gateway setup failed: {e}"))?,
            )
        }
        None => {
            warn!("ROBOTMX_SAFETY_URL not set, robot will move without a safety service");
            Arc::new(NoopSafetyGateway)
        }
    };

    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
    let robot = Arc::new(
        SimulatedRobot::new(SimulatedRobotConfig {
            name: config.robot_name.clone(),
            task_delay: config.sim_task_delay,
        })
        .with_updates(telemetry_tx),
    );

    let reporter = BroadcastReporter::new(config.update_capacity);
    let orchestrator = Arc::new(MountOrchestrator::new(
        OrchestratorConfig {
            robot_name: config.robot_name.clone(),
            prepare_timeout: config.prepare_timeout,
        },
        robot,
        safety,
        Arc::new(reporter.clone()),
    ));

    let (server, _server_handle) = Actor::spawn(
        Some(format!("robot-server:{}", config.robot_name)),
        RobotServerActor,
        RobotServerArguments { orchestrator },
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to spawn robot server: {e}"))?;
    spawn_telemetry_forwarder(telemetry_rx, server.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600));

    let app = api::router()
        .with_state(api::ApiState {
            server,
            updates: reporter,
        })
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
