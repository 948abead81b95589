use actix_web::{get, web, HttpResponse, Responder};

use crate::util::api_util::*;
use crate::util::cache::Cache;
use crate::util::scoreboard::{fetch_team, with_conn};

// [[API]]
// desp: Finished teams, fastest first.
// Method: GET
// URL: /scoreboard
// Request Body: N/A
// Response Body: `Vec<TeamRecord>`
#[get("/scoreboard")]
async fn scoreboard(cache: web::Data<Cache>) -> Result<impl Responder, APIError> {
    let teams = cache.get_scoreboard().await?;
    Ok(HttpResponse::Ok().json(teams.as_slice()))
}

// [[API]]
// desp: One finished team by name.
// Method: GET
// URL: /team/{team_name}
// Request Body: N/A
// Response Body: `TeamRecord`
#[get("/team/{team_name}")]
async fn team(
    path: web::Path<String>,
    cache: web::Data<Cache>,
) -> Result<impl Responder, APIError> {
    let location = "team";
    let team_name = path.into_inner();

    let record = with_conn(cache.pool(), location, move |conn| {
        Ok(fetch_team(&team_name, conn)?)
    })
    .await?
    .ok_or(APIError::InvalidQuery)?;

    Ok(HttpResponse::Ok().json(record))
}
