use std::sync::Arc;

use anyhow::Context;
use waypoint_sync::api::{ApiGateway, ReqwestTransport};
use waypoint_sync::bootstrap::{Bootstrap, Route};
use waypoint_sync::config::ClientConfig;
use waypoint_sync::profile::ProfileResolver;
use waypoint_sync::session::SessionStore;
use waypoint_sync::storage::{DeviceStorage, FileStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ClientConfig::from_env().context("invalid configuration")?;

    eprintln!("Waypoint sync v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: {}", config.api_base_url);
    if config.dev_profile_fallback {
        eprintln!("   Dev profile fallback: enabled");
    }

    let file_storage = FileStorage::new(config.storage_path.clone());
    eprintln!("   Storage: {}", file_storage.path().display());
    let storage: Arc<dyn DeviceStorage> = Arc::new(file_storage);
    let transport = ReqwestTransport::new(&config).context("failed to build HTTP client")?;
    let gateway = Arc::new(ApiGateway::new(Arc::new(transport), &config));

    let session = Arc::new(SessionStore::new(gateway.clone(), storage.clone()));
    let _unauthorized = Arc::clone(&session).watch_gateway(gateway.subscribe());

    let mut resolver = ProfileResolver::new(gateway);
    if config.dev_profile_fallback {
        resolver = resolver.with_dev_fallback(storage);
    }
    let profile = Arc::new(resolver);

    let bootstrap = Bootstrap::new(session.clone(), profile.clone());
    let route = bootstrap.start().await;
    tracing::info!(route = %route, "Bootstrap complete");

    match &route {
        Route::GoHome => {
            if let Some(identity) = session.identity() {
                eprintln!("   Signed in as {}", identity.email);
            }
            if let Some(profile) = profile.profile() {
                let modes: Vec<String> =
                    profile.selected_modes.iter().map(ToString::to_string).collect();
                eprintln!("   Travel modes: {}", modes.join(", "));
            }
        }
        Route::ShowError(reason) => eprintln!("   Profile unavailable: {reason}"),
        _ => {}
    }
    println!("{route}");

    Ok(())
}
