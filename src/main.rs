use lenshare_api::app::create_app;
use lenshare_api::config::{load_config, save_default_config};
use lenshare_api::constants::{CONFIG_PATH, DATA_DIR};
use lenshare_api::database::{create_pool, init_database};
use lenshare_api::logging::{init_logging, install_panic_hook};
use lenshare_api::media_host::{HttpBlobFetcher, HttpMediaHost};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--init-config") {
        match save_default_config(&CONFIG_PATH) {
            Ok(_) => {
                println!("Default configuration saved to {:?}", *CONFIG_PATH);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Failed to save default configuration: {}", e);
                std::process::exit(1);
            }
        }
    }

    init_logging();
    install_panic_hook();

    let config = Arc::new(load_config(&CONFIG_PATH));

    std::fs::create_dir_all(&*DATA_DIR).ok();

    let pool = create_pool().expect("Failed to create database pool");

    {
        let conn = pool.get().expect("Failed to get connection");
        init_database(&conn).expect("Failed to initialize database");
    }

    let media_host =
        Arc::new(HttpMediaHost::new(&config.media_host).expect("Failed to create media host client"));
    let fetcher = Arc::new(HttpBlobFetcher::new().expect("Failed to create blob fetcher"));

    let app = create_app(Arc::clone(&config), pool, media_host, fetcher);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("Invalid server address");
    info!("Starting Lenshare API on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server failed");
}
