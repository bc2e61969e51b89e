use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::io;
use std::sync::Arc;

use todoapp::auth::AUTH_HEADER;
use todoapp::config::Config;
use todoapp::routes::{self, health};
use todoapp::state::AppState;
use todoapp::store::{DocumentStore, MemoryStore, PgDocumentStore};

fn to_io_error(error: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error.to_string())
}

async fn open_store(config: &Config) -> io::Result<Arc<dyn DocumentStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgDocumentStore::connect(url, config.database_max_connections)
                .await
                .map_err(to_io_error)?;
            store.migrate().await.map_err(to_io_error)?;
            log::info!("Using PostgreSQL document store");
            Ok(Arc::new(store))
        }
        None => {
            log::warn!("DATABASE_URL not set; documents are kept in memory and lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| {
        log::error!("{}", e);
        to_io_error(e)
    })?;

    let store = open_store(&config).await?;
    let state = AppState::from_config(store, &config);
    state.prepare().await.map_err(to_io_error)?;
    let state = web::Data::new(state);

    log::info!("Starting TodoApp server at {}", config.server_url());
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .expose_headers([AUTH_HEADER])
                    .max_age(3600),
            )
            .wrap(Logger::default())
            .service(health::health)
            .configure(routes::config)
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await
}
