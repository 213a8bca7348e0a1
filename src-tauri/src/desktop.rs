use crate::config::{AppPaths, ConfigStore, ServerSettings};
use crate::errors::{AppError, AppResult};
use crate::server::{start_server, ServerHandle, Services};
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tauri::{AppHandle, Manager, RunEvent, WebviewUrl, WebviewWindowBuilder};
use tracing::{info, warn};

const MAIN_WINDOW: &str = "main";
const WINDOW_TITLE: &str = "Markdown Editor";
const READY_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL: Duration = Duration::from_millis(50);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Holds the backend only when this process started it.
struct ShellState {
    backend: Mutex<Option<ServerHandle>>,
}

pub fn run() {
    let paths = match AppPaths::discover() {
        Ok(paths) => paths,
        Err(error) => {
            eprintln!("failed to resolve application paths: {}", error);
            std::process::exit(1);
        }
    };

    let settings = match ConfigStore::open(&paths) {
        Ok(store) => ServerSettings::from_config(&store.get_app_config()),
        Err(error) => {
            eprintln!("failed to open configuration: {}", error);
            std::process::exit(1);
        }
    };

    if let Err(error) = crate::init_tracing(&paths.log_dir(), settings.debug) {
        eprintln!("failed to initialize tracing: {}", error);
    }

    let services = match Services::open(paths) {
        Ok(services) => Arc::new(services),
        Err(error) => {
            tracing::error!(error = %error, "failed to initialize services");
            eprintln!("failed to initialize services: {}", error);
            std::process::exit(1);
        }
    };

    tauri::Builder::default()
        .setup(move |app| {
            let backend = if port_in_use(&settings) {
                info!(address = %settings.address(), "backend already running, reusing it");
                None
            } else {
                Some(tauri::async_runtime::block_on(start_server(
                    services.clone(),
                    &settings.address(),
                ))?)
            };

            tauri::async_runtime::block_on(wait_until_ready(&settings.address(), READY_TIMEOUT))?;

            let url: tauri::Url = settings.url().parse()?;
            WebviewWindowBuilder::new(app, MAIN_WINDOW, WebviewUrl::External(url))
                .title(WINDOW_TITLE)
                .inner_size(1800.0, 900.0)
                .resizable(true)
                .build()?;

            app.manage(ShellState {
                backend: Mutex::new(backend),
            });
            info!(url = %settings.url(), "editor window opened");
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("failed to build tauri app")
        .run(|app, event| {
            if let RunEvent::Exit = event {
                stop_backend(app);
            }
        });
}

fn port_in_use(settings: &ServerSettings) -> bool {
    StdTcpListener::bind((settings.host.as_str(), settings.port)).is_err()
}

async fn wait_until_ready(address: &str, timeout: Duration) -> AppResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::net::TcpStream::connect(address).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AppError::Timeout(format!(
                "backend at {} not ready after {} seconds",
                address,
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

fn stop_backend(app: &AppHandle) {
    let Some(state) = app.try_state::<ShellState>() else {
        return;
    };
    let backend = match state.backend.lock() {
        Ok(mut guard) => guard.take(),
        Err(_) => None,
    };
    let Some(backend) = backend else {
        info!("backend not started by this window, leaving it running");
        return;
    };

    if tauri::async_runtime::block_on(backend.stop(SHUTDOWN_GRACE)) {
        info!("backend stopped");
    } else {
        warn!("backend still running after shutdown grace period");
    }
}
