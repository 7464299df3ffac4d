use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fleet_monitor::{
    actors::{
        command_bus::{ActionTable, CommandBusHandle},
        reporter::ReporterHandle,
    },
    api::{ApiConfig, ApiState, spawn_api_server},
    config::{InstanceConfig, read_config_file},
    runtime::InstanceContext,
    store::{SharedStore, redis::RedisStore},
};
use tracing::{error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Optional config file; the environment fills in everything it omits
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleet_monitor", LevelFilter::DEBUG),
        ("fleet_instance", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => InstanceConfig::from_env(),
    };
    info!(
        "instance {} starting with a {} MiB memory limit",
        config.instance_id, config.memory_limit_mib
    );

    let store: Arc<dyn SharedStore> = Arc::new(connect_store(&config.store_url).await);
    let ctx = Arc::new(InstanceContext::from_config(&config));

    let reporter = ReporterHandle::spawn(
        Arc::clone(&store),
        Arc::clone(&ctx),
        config.report_interval(),
    );
    let bus = subscribe_bus(&store, &ctx).await;

    let api_config = ApiConfig {
        bind_addr: SocketAddr::from((config.bind_addr, config.port)),
        enable_cors: true,
    };
    let state = ApiState::new(
        Arc::clone(&store),
        config.instance_id.clone(),
        config.stale_after(),
    );
    let addr = spawn_api_server(api_config, state).await?;
    info!("instance {} serving on {addr}", config.instance_id);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Err(e) = bus.shutdown().await {
        warn!("{e:#}");
    }
    if let Err(e) = reporter.shutdown().await {
        warn!("{e:#}");
    }

    Ok(())
}

/// Connect to the shared store, retrying until it answers
#[instrument(skip_all)]
async fn connect_store(url: &str) -> RedisStore {
    loop {
        match RedisStore::connect(url).await {
            Ok(store) => {
                info!("connected to {}", store.display_url());
                return store;
            }
            Err(e) => {
                error!("store connection failed: {e}, retrying in {CONNECT_RETRY_DELAY:?}");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

/// Subscribe to the instance channel, retrying until the store accepts it
#[instrument(skip_all, fields(instance = %ctx.instance_id()))]
async fn subscribe_bus(
    store: &Arc<dyn SharedStore>,
    ctx: &Arc<InstanceContext>,
) -> CommandBusHandle {
    loop {
        let actions = ActionTable::default();
        match CommandBusHandle::spawn(Arc::clone(store), Arc::clone(ctx), actions).await {
            Ok(bus) => return bus,
            Err(e) => {
                error!("subscription failed: {e}, retrying in {CONNECT_RETRY_DELAY:?}");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}
