use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod config;
mod controllers;
mod db;
mod manager;
#[cfg(test)]
mod manager_tests;
mod models;
mod telegram;

use config::Config;
use db::Database;
use manager::BotManager;
use telegram::{BotConnector, TelegramConnector, WorkerRegistry};

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub manager: Arc<BotManager>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;
    let bind_addr = config.bind_addr.clone();

    log::info!("Initializing database at {}", config.database_url);
    if let Some(parent) = std::path::Path::new(&config.database_url).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    let connector: Arc<dyn BotConnector> = Arc::new(TelegramConnector);
    let registry = WorkerRegistry::new(db.clone(), connector.clone());
    let manager = Arc::new(BotManager::new(db.clone(), registry, connector));

    // Resume polling for every bot whose durable state says it was running
    // when the process last went down.
    let resumed = manager.start_marked().await;
    log::info!("Resumed polling for {} bots", resumed.len());

    log::info!("Starting HTTP server on {}:{}", bind_addr, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                config: config.clone(),
                manager: Arc::clone(&manager),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::bots::config)
            .configure(controllers::messages::config)
            .configure(controllers::admin::config)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
