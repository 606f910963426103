// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  RouteCodex — Multi-provider LLM request router
//
//  Data plane:  axum ingress → module chain → upstream transport
//  Config:      YAML with env interpolation (figment)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use routecodex_bridge::{CompatibilityFactory, LlmSwitchFactory};
use routecodex_core::config::GatewayConfig;
use routecodex_core::matcher::RouteTable;
use routecodex_observability::snapshot::{LogSnapshotSink, NullSnapshotSink, SnapshotSink};
use routecodex_observability::MetricsCollector;
use routecodex_pipeline::memory::MemoryManager;
use routecodex_pipeline::registry::ModuleRegistry;
use routecodex_pipeline::{Connector, StaticInstancePool};
use routecodex_server::{server, state::AppState};
use routecodex_transport::{HttpKernel, ProfileRegistry, ProviderFactory};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const EXIT_GENERIC: u8 = 1;
const EXIT_CONFIG_INVALID: u8 = 2;
const EXIT_PRELOAD_FAILED: u8 = 3;
const EXIT_HEALTH_TIMEOUT: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "routecodex", version, about = "RouteCodex — Multi-provider LLM request router")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/routecodex/routecodex.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as line-delimited JSON
    #[arg(long)]
    log_json: bool,

    /// Poll the given /health URL until ready, then exit (for
    /// orchestration hooks). Exits 4 on timeout.
    #[arg(long)]
    check_health: Option<String>,

    /// Seconds to wait in --check-health mode
    #[arg(long, default_value_t = 30)]
    health_timeout_secs: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    routecodex_observability::logger::init(&cli.log_level, cli.log_json);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    if let Some(url) = cli.check_health.clone() {
        return runtime.block_on(check_health(url, cli.health_timeout_secs));
    }

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    info!(version = env!("CARGO_PKG_VERSION"), "RouteCodex starting");

    // ── Config ──
    let config = match GatewayConfig::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "Configuration invalid");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    // ── Route table (validates every route) ──
    let table = match RouteTable::build(config.routes.clone()) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            error!(error = %e, "Route table invalid");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    // ── Metrics ──
    let metrics = match MetricsCollector::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            error!(error = %e, "Metrics init failed");
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    // ── Transport ──
    let profile_registry = Arc::new(ProfileRegistry::builtin());
    let snapshots: Arc<dyn SnapshotSink> = if config.snapshots.enabled {
        Arc::new(LogSnapshotSink)
    } else {
        Arc::new(NullSnapshotSink)
    };
    let kernel = Arc::new(
        HttpKernel::new(config.upstream.clone(), snapshots, config.snapshots.enabled)
            .with_metrics(Arc::clone(&metrics)),
    );

    // ── Module factories ──
    let mut module_registry = ModuleRegistry::new();
    module_registry.register(Arc::new(LlmSwitchFactory));
    module_registry.register(Arc::new(CompatibilityFactory));
    module_registry.register(Arc::new(
        ProviderFactory::new(
            Arc::clone(&config),
            Arc::clone(&profile_registry),
            Arc::clone(&kernel),
        )
        .with_metrics(Arc::clone(&metrics)),
    ));

    // ── Instance pool preload ──
    let pool = Arc::new(StaticInstancePool::new(
        Arc::new(module_registry),
        config.pool.clone(),
    ));
    let routes = table.all_routes();
    if let Err(e) = pool.preload(&routes, &config.config_library) {
        error!(error = %e, "Pool preload failed");
        return ExitCode::from(EXIT_PRELOAD_FAILED);
    }
    let _probe = pool.spawn_probe();

    // ── Shared state ──
    metrics.pool_instances.set(pool.len() as i64);
    let memory = Arc::new(MemoryManager::new(config.memory.clone()));
    let connector = Arc::new(Connector::new(
        Arc::clone(&pool),
        config.config_library.clone(),
    ));
    let state = AppState::new(
        Arc::clone(&config),
        table,
        connector,
        metrics,
        memory,
    );
    state.mark_ready();

    info!(
        addr = %config.server.listen_addr,
        routes = routes.len(),
        instances = pool.len(),
        "RouteCodex is ready — serving traffic"
    );

    match server::serve(state).await {
        Ok(()) => {
            info!("RouteCodex stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::from(EXIT_GENERIC)
        }
    }
}

/// Poll `/health` until `ready: true` or the timeout elapses.
async fn check_health(url: String, timeout_secs: u64) -> ExitCode {
    let client = reqwest::Client::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        if std::time::Instant::now() >= deadline {
            error!(url = %url, "Health check timed out");
            return ExitCode::from(EXIT_HEALTH_TIMEOUT);
        }
        let ready = match client.get(&url).timeout(Duration::from_secs(2)).send().await {
            Ok(response) => response
                .json::<serde_json::Value>()
                .await
                .ok()
                .map(|body| body["ready"].as_bool().unwrap_or(false))
                .unwrap_or(false),
            Err(_) => false,
        };
        if ready {
            info!(url = %url, "Gateway ready");
            return ExitCode::SUCCESS;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
