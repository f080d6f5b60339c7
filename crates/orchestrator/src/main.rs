//! Capacity orchestrator
//!
//! Routes requests to specialised agents, monitors their health, and serves
//! predictive capacity operations in-process.

use anyhow::{Context, Result};
use orchestrator_lib::{
    api::{self, AppState},
    datasource::{CapacityDataSource, DataSnapshot, InMemoryDataSource},
    health::{components, HealthRegistry},
    monitor::{HealthMonitor, HttpProbe, MonitorConfig, MonitorScheduler, SchedulerConfig},
    notify::{BridgeConfig, IncidentBridge, LogSink, NotificationSink, WebhookSink},
    observability::StructuredLogger,
    predictor::{capacity_descriptor, capacity_rules, CapacityAgent, CapacityEngine, SurgeTracker},
    registry::AgentRegistry,
    router::{EndpointDispatcher, HttpDispatcher, Router, RouterConfig, RoutingTable},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filtered by RUST_LOG
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting capacity-orchestrator");

    let config = config::OrchestratorConfig::load()?;
    info!(instance = %config.instance_name, port = config.api_port, "Orchestrator configured");

    let health_registry = HealthRegistry::with_default_components().await;
    let logger = StructuredLogger::new(&config.instance_name);
    let shutdown = CancellationToken::new();

    // Agents
    let mut descriptors = config.agents.clone();
    if !descriptors.iter().any(|a| a.name == capacity_descriptor().name) {
        descriptors.push(capacity_descriptor());
    }
    let registry = Arc::new(AgentRegistry::from_descriptors(descriptors)?);

    // Predictive engine
    let snapshot = match &config.snapshot_path {
        Some(path) => InMemoryDataSource::from_json_file(path)
            .with_context(|| format!("failed to load snapshot {}", path.display()))?,
        None => {
            warn!("No data snapshot configured, predictions will report insufficient history");
            InMemoryDataSource::new(DataSnapshot::default())
        }
    };
    let source: Arc<dyn CapacityDataSource> = Arc::new(snapshot);
    let engine = Arc::new(CapacityEngine::new(source, config.predictor.clone())?);

    // Notifications
    let sink: Arc<dyn NotificationSink> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone(), config.webhook_timeout())?),
        None => Arc::new(LogSink),
    };
    let bridge = Arc::new(
        IncidentBridge::new(
            sink,
            BridgeConfig {
                dedup_window: config.dedup_window(),
            },
        )
        .with_logger(logger.clone()),
    );

    // Health monitor
    let monitor = Arc::new(
        HealthMonitor::new(
            registry.clone(),
            Arc::new(HttpProbe::new()?),
            bridge.clone(),
            MonitorConfig {
                max_parallel_checks: config.max_parallel_checks,
                ..MonitorConfig::default()
            },
        )
        .with_shutdown(shutdown.clone())
        .with_logger(logger.clone()),
    );

    // Router
    let rules = if config.rules.is_empty() {
        capacity_rules()
    } else {
        config.rules.clone()
    };
    let table = RoutingTable::compile(&rules)?;
    table.validate_against(&registry)?;
    let dispatcher = EndpointDispatcher::new(HttpDispatcher::new(config.route_timeout())?)
        .with_local(
            capacity_descriptor().name,
            Arc::new(CapacityAgent::new(engine.clone())),
        );
    let router = Arc::new(
        Router::new(
            registry.clone(),
            monitor.clone(),
            Arc::new(dispatcher),
            table,
            RouterConfig {
                default_timeout: config.route_timeout(),
                max_in_flight: config.max_in_flight_routes,
                history_capacity: config.route_history,
                ..RouterConfig::default()
            },
        )
        .with_logger(logger.clone()),
    );

    logger.log_startup(ORCHESTRATOR_VERSION, registry.len(), router.rule_count().await);

    // Background sweep
    let scheduler = MonitorScheduler::new(
        monitor.clone(),
        bridge.clone(),
        health_registry.clone(),
        SchedulerConfig {
            tick_interval: config.monitor_tick(),
            surge_facilities: config.surge_facilities.clone(),
        },
    )
    .with_surge(engine.clone(), Arc::new(SurgeTracker::new()))
    .with_logger(logger.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    health_registry.set_healthy(components::ROUTER).await;
    health_registry.set_healthy(components::NOTIFIER).await;
    health_registry.set_ready(true).await;

    let state = Arc::new(AppState {
        router,
        monitor,
        engine,
        registry,
        health_registry: health_registry.clone(),
        shutdown: shutdown.clone(),
    });
    let app = api::create_router(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!(addr = %addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
    let server_handle = tokio::spawn(async move { server.await });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    shutdown.cancel();

    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Monitor scheduler task failed");
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
    }

    info!("Shutdown complete");
    Ok(())
}
