use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use eyre::{eyre, Result, WrapErr};
use log::{error, info, warn};

use pichi::api;
use pichi::geo::{GeoDb, MaxMindGeoDb};
use pichi::server::SharedState;
use pichi::vo::Config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address the REST control plane binds to.
    #[arg(long, default_value = "::1")]
    listen: IpAddr,
    /// Port the REST control plane binds to.
    #[arg(long)]
    port: u16,
    /// Path to a MaxMind GeoIP2 country database.
    #[arg(long)]
    geo: std::path::PathBuf,
    /// Initial ingress/egress/rule/route configuration to load before
    /// accepting connections.
    #[arg(long)]
    json: Option<std::path::PathBuf>,

    /// Run as a background daemon. Accepted for interface completeness;
    /// forking/pid-file management is not implemented by this process.
    #[arg(long)]
    daemon: bool,
    /// Drop privileges to this user after binding. Same caveat as `--daemon`.
    #[arg(long)]
    user: Option<String>,
    /// Drop privileges to this group after binding. Same caveat as `--daemon`.
    #[arg(long)]
    group: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("RUST_LOG", "info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.daemon {
        warn!("--daemon was given but daemonization is not implemented by this process; running in the foreground");
    }
    if cli.user.is_some() || cli.group.is_some() {
        warn!("--user/--group were given but privilege dropping is not implemented by this process");
    }

    let geo: Box<dyn GeoDb> = Box::new(
        MaxMindGeoDb::open(&cli.geo)
            .wrap_err_with(|| format!("failed to open geo database at {}", cli.geo.display()))?,
    );

    let state = SharedState::new(geo);

    if let Some(path) = &cli.json {
        load_config(&state, path)
            .wrap_err_with(|| format!("failed to load initial config from {}", path.display()))?;
    }

    let api_bind = SocketAddr::new(cli.listen, cli.port);
    info!("starting REST control plane on {api_bind}");

    let routes = api::routes(Arc::clone(&state));
    warp::serve(routes).try_bind(api_bind).await;

    error!("REST control plane stopped");
    Err(eyre!("REST control plane exited"))
}

fn load_config(state: &Arc<SharedState>, path: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let config: Config = serde_json::from_slice(&bytes)?;

    for (name, vo) in config.egresses {
        state
            .egresses
            .lock()
            .expect("egress mutex poisoned")
            .update(name, vo)
            .map_err(|e| eyre!(e.to_string()))?;
    }
    for (name, vo) in config.ingresses {
        state
            .apply_ingress(name, vo)
            .map_err(|e| eyre!(e.to_string()))?;
    }
    for (name, vo) in config.rules {
        state
            .router
            .lock()
            .expect("router mutex poisoned")
            .update_rule(name, vo)
            .map_err(|e| eyre!(e.to_string()))?;
    }

    let egress_names = pichi::server::egress_names(state);
    state
        .router
        .lock()
        .expect("router mutex poisoned")
        .set_route(config.route, &egress_names)
        .map_err(|e| eyre!(e.to_string()))?;

    Ok(())
}
