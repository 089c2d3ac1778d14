use log::{info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};

use gpio_vhal::{
    AppConfig, AppState, BackendConfig, LineBackend, LineManager, MockLineBackend, PropertyHub,
    SysfsBackend, ValuePool,
};

#[cfg(feature = "hardware-gpio")]
use gpio_vhal::LibgpiodBackend;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GPIO_VHAL_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load_from_file(&config_path)
        .unwrap_or_else(|e| panic!("Failed to load config: {e}"));

    match config.backend.clone() {
        BackendConfig::Sysfs { root } => serve(config, SysfsBackend::with_root(root)).await,
        #[cfg(feature = "hardware-gpio")]
        BackendConfig::Cdev { chip } => {
            let backend = LibgpiodBackend::new(&chip)
                .unwrap_or_else(|e| panic!("Failed to init libgpiod backend: {e}"));
            serve(config, backend).await
        }
        #[cfg(not(feature = "hardware-gpio"))]
        BackendConfig::Cdev { chip } => {
            panic!("Config error: backend 'cdev' ({chip}) needs the hardware-gpio feature")
        }
        BackendConfig::Mock => serve(config, MockLineBackend::new()).await,
    }
}

async fn serve<B: LineBackend>(config: AppConfig, backend: B) -> std::io::Result<()> {
    let table = Arc::new(config.pin_table.clone());
    let manager = LineManager::new(table, backend);
    let hub = Arc::new(PropertyHub::new(config.broadcast_capacity));
    let app_state = AppState::new(manager, hub);

    spawn_poller(app_state.clone(), Duration::from_millis(config.poll_interval_ms));

    let http_cfg = config.http.clone();
    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let scope_path = http_cfg.path.clone();
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .service(server_state.api_scope(&scope_path))
    })
    .client_request_timeout(config.http.request_timeout());

    let bind_addrs: String;
    let http_cfg = config.http.clone();
    let server = match (&http_cfg.unix_socket, &http_cfg.host) {
        (Some(socket_path), Some(host)) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = format!("{} and {}", socket_path, host);

            server.bind_uds(socket_path)?.bind_auto_h2c(host)?
        }
        (Some(socket_path), None) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = socket_path.clone();

            server.bind_uds(socket_path)?
        }
        (None, Some(host)) => {
            bind_addrs = host.clone();

            server.bind_auto_h2c(host)?
        }
        _ => {
            panic!("Config error: either 'unix_socket' or 'host' must be specified")
        }
    };

    info!("Starting server on {}...", bind_addrs);

    server.run().await
}

/// Periodic `read_all`. Pin reads block, so each cycle runs on the blocking
/// pool while holding the manager lock.
fn spawn_poller<B: LineBackend>(state: AppState<B>, period: Duration) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let manager = Arc::clone(&state.manager);
            let hub = Arc::clone(&state.hub);
            let polled =
                web::block(move || manager.lock().read_all(&ValuePool, hub.as_ref())).await;
            if let Err(e) = polled {
                warn!("poll cycle aborted: {e}");
            }
        }
    });
}
