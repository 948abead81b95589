use std::sync::Arc;

use actix_cors::Cors;
use actix_web::dev::RequestHead;
use actix_web::http::header::HeaderValue;
use actix_web::{web, App, HttpServer};
use log::{error, info};

use jailbreak_server::api;
use jailbreak_server::level::LevelBook;
use jailbreak_server::provider::{build_provider, ModelProvider};
use jailbreak_server::util::api_util::AdminToken;
use jailbreak_server::util::config::Config;
use jailbreak_server::util::{cache::Cache, cipher_util, scoreboard};

fn cors_check(allowed: &[String], head: &HeaderValue, _: &RequestHead) -> bool {
    match head.to_str() {
        Ok(origin) => allowed.iter().any(|allowed| allowed == origin),
        Err(_) => false,
    }
}

fn startup_error<E: std::fmt::Display>(what: &str) -> impl FnOnce(E) -> std::io::Error + '_ {
    move |e| {
        error!("{what}: {e}");
        std::io::Error::other(format!("{what}: {e}"))
    }
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env().map_err(startup_error("Invalid configuration"))?;
    config.warn_on_gaps();

    let pool = scoreboard::open_pool(&config.database_url)
        .map_err(startup_error("Failed to open database"))?;
    {
        let mut conn = pool
            .get()
            .map_err(startup_error("Failed to link to db"))?;
        scoreboard::init_schema(&mut conn).map_err(startup_error("Failed to create schema"))?;
    }

    let provider: Arc<dyn ModelProvider> =
        build_provider(&config).map_err(startup_error("Failed to build provider"))?;
    let provider = web::Data::from(provider);

    let secret_key = match config.cookie_token.as_deref() {
        Some(token) => cipher_util::gen_cookie_key(token),
        None => cipher_util::gen_ephemeral_cookie_key(),
    };

    let levels = web::Data::new(LevelBook::from_config(&config));
    let cache = web::Data::new(Cache::new(pool));
    let admin_token = web::Data::new(AdminToken(config.admin_token.clone()));
    let origins = Arc::new(config.allowed_origins.clone());
    let production = config.production;

    info!("Listening on {}", config.bind_address);

    HttpServer::new(move || {
        let origins = origins.clone();
        App::new()
            .app_data(cache.clone())
            .app_data(levels.clone())
            .app_data(provider.clone())
            .app_data(admin_token.clone())
            .wrap(
                Cors::default()
                    .allowed_origin_fn(move |origin, head| cors_check(&origins, origin, head))
                    .allow_any_header()
                    .allow_any_method()
                    .supports_credentials(),
            )
            .wrap(api::session_middleware(secret_key.clone(), production))
            .configure(api::configure)
    })
    .bind(&config.bind_address)?
    .run()
    .await
}
