use actix_web::http::header::ContentType;
use actix_web::{delete, get, web, HttpRequest, HttpResponse, Responder};
use log::warn;
use serde::Serialize;

use crate::provider::ModelProvider;
use crate::util::api_util::*;
use crate::util::cache::Cache;
use crate::util::config::ProviderKind;
use crate::util::scoreboard::{clear_teams as delete_all_teams, with_conn};

static INDEX_HTML: &str = include_str!("../../static/index.html");

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(INDEX_HTML)
}

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    provider: ProviderKind,
    model: &'a str,
    endpoint: &'a str,
    active_runs: u64,
}

// [[API]]
// desp: Liveness plus the provider in use.
// Method: GET
// URL: /health
// Request Body: N/A
// Response Body: `HealthResponse`
#[get("/health")]
async fn health(
    cache: web::Data<Cache>,
    provider: web::Data<dyn ModelProvider>,
) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        provider: provider.kind(),
        model: provider.model(),
        endpoint: provider.endpoint(),
        active_runs: cache.active_runs(),
    })
}

// [[API]]
// desp: Entry counts of the in-memory caches.
// Method: GET
// URL: /admin/cache_size
// Request Body: N/A
// Response Body: `CacheStatusResponse`
#[get("/admin/cache_size")]
async fn cache_size(
    req: HttpRequest,
    admin_token: web::Data<AdminToken>,
    cache: web::Data<Cache>,
) -> Result<impl Responder, APIError> {
    admin_check(&req, &admin_token)?;
    Ok(HttpResponse::Ok().json(cache.get_size()))
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    removed: usize,
}

// [[API]]
// desp: Remove every scoreboard row. Ids keep counting up afterwards.
// Method: DELETE
// URL: /admin/teams
// Request Body: N/A
// Response Body: `ClearResponse`
#[delete("/admin/teams")]
async fn clear_teams(
    req: HttpRequest,
    admin_token: web::Data<AdminToken>,
    cache: web::Data<Cache>,
) -> Result<impl Responder, APIError> {
    let location = "clear_teams";
    admin_check(&req, &admin_token)?;

    let removed = with_conn(cache.pool(), location, |conn| Ok(delete_all_teams(conn)?)).await?;
    cache.invalidate_scoreboard().await;
    warn!("Admin cleared the scoreboard ({removed} rows)");

    Ok(HttpResponse::Ok().json(ClearResponse { removed }))
}
