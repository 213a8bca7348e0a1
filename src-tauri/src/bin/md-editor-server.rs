//! Runs the editor backend without a window.

use anyhow::Context;
use md_editor_lib::config::{AppPaths, ConfigStore, ServerSettings};
use md_editor_lib::server::{start_server, Services};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::discover().context("resolving application paths")?;
    let config = ConfigStore::open(&paths).context("opening configuration")?;
    let settings = ServerSettings::from_config(&config.get_app_config());

    md_editor_lib::init_tracing(&paths.log_dir(), settings.debug)
        .map_err(anyhow::Error::msg)
        .context("initializing tracing")?;

    let services = Arc::new(Services::open(paths).context("initializing services")?);
    let server = start_server(services, &settings.address())
        .await
        .context("starting http server")?;
    println!("Markdown editor backend listening on {}", server.url());

    let shutdown = server.shutdown_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping http server");
            let _ = shutdown.try_send(());
        }
    });

    server.wait().await.context("serving http")?;
    Ok(())
}
