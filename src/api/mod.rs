pub mod game;
pub mod monitor;
pub mod scoreboard;

use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::cookie::{Key, SameSite};
use actix_web::web;

use crate::util::api_util::SESSION_COOKIE_NAME;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(monitor::index)
        .service(monitor::health)
        .service(monitor::cache_size)
        .service(monitor::clear_teams)
        .service(game::list_levels)
        .service(game::start)
        .service(game::status)
        .service(game::attack)
        .service(game::submit)
        .service(game::validate)
        .service(game::abandon)
        .service(scoreboard::scoreboard)
        .service(scoreboard::team);
}

/// Cross-site cookies need `Secure`, so plain-http development falls back to `Lax`.
pub fn session_middleware(key: Key, production: bool) -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), key)
        .cookie_name(SESSION_COOKIE_NAME.to_string())
        .cookie_secure(production)
        .cookie_same_site(if production {
            SameSite::None
        } else {
            SameSite::Lax
        })
        .build()
}
