use std::sync::{Arc, Mutex};

use actix_session::Session;
use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use serde::{Deserialize, Serialize};

use crate::engine::{run_attempt, stream_attempt, AttemptEvent};
use crate::level::{Level, LevelBook};
use crate::models::{LevelId, RunId, TeamId, LEVEL_COUNT};
use crate::provider::ModelProvider;
use crate::util::api_util::*;
use crate::util::cache::{Cache, SharedRun};
use crate::util::run::{lock_run, Run, UnlockOutcome};
use crate::util::scoreboard::{insert_team, team_exists, with_conn};

pub const MAX_TEAM_NAME_CHARS: usize = 64;
pub const MAX_PROMPT_CHARS: usize = 4000;
pub const MAX_PASSWORD_CHARS: usize = 128;

fn within(text: &str, max_chars: usize) -> bool {
    let count = text.chars().count();
    count >= 1 && count <= max_chars
}

pub fn valid_team_name(team_name: &str) -> bool {
    let trimmed = team_name.trim();
    within(trimmed, MAX_TEAM_NAME_CHARS) && !trimmed.chars().any(char::is_control)
}

pub fn valid_prompt(prompt: &str) -> bool {
    within(prompt.trim(), MAX_PROMPT_CHARS)
}

pub fn valid_level(level: LevelId) -> bool {
    (1..=LEVEL_COUNT as LevelId).contains(&level)
}

pub fn valid_password(password: &str) -> bool {
    within(password, MAX_PASSWORD_CHARS)
}

// [[API]]
// desp: List the levels, without their secrets.
// Method: GET
// URL: /levels
// Request Body: N/A
// Response Body: `Vec<LevelSummary>`
#[get("/levels")]
async fn list_levels(book: web::Data<LevelBook>) -> impl Responder {
    HttpResponse::Ok().json(book.summaries())
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    team_name: String,
}

impl APIRequest for StartRequest {
    fn ok(&self) -> bool {
        valid_team_name(&self.team_name)
    }
}

#[derive(Debug, Serialize)]
enum StartResponse {
    Started { run_id: RunId, level: LevelId },
    AlreadyStarted { run_id: RunId, level: LevelId },
    TeamNameTaken,
}

// [[API]]
// desp: Start a run for a team. A session with an unfinished run keeps it.
// Method: POST
// URL: /start
// Request Body: `StartRequest`
// Response Body: `StartResponse`
#[post("/start")]
async fn start(
    form: web::Json<StartRequest>,
    cache: web::Data<Cache>,
    session: Session,
) -> Result<impl Responder, APIError> {
    let location = "start";
    form.sanity()?;

    if let Some(run_id) = session_run_id(&session) {
        if let Some(run) = cache.get_run(run_id).await {
            let run = lock_run(&run);
            if !run.is_finished() {
                return Ok(HttpResponse::Ok().json(StartResponse::AlreadyStarted {
                    run_id,
                    level: run.level,
                }));
            }
        }
    }

    let team_name = form.into_inner().team_name.trim().to_owned();
    let exists = {
        let team_name = team_name.clone();
        with_conn(cache.pool(), location, move |conn| {
            Ok(team_exists(&team_name, conn)?)
        })
        .await?
    };
    if exists {
        return Ok(HttpResponse::Ok().json(StartResponse::TeamNameTaken));
    }

    let run = Run::new(team_name, Utc::now());
    let level = run.level;
    info!("Team {} started run {}", run.team_name, run.id);
    let run_id = cache.put_run(Arc::new(Mutex::new(run))).await;

    session
        .insert(SESSION_RUN_ID, run_id.to_string())
        .map_err(|e| log_server_error(e, location, ERROR_SESSION_INSERT))?;

    Ok(HttpResponse::Ok().json(StartResponse::Started { run_id, level }))
}

// [[API]]
// desp: Progress of the session's run.
// Method: GET
// URL: /status
// Request Body: N/A
// Response Body: `RunStatus`
#[get("/status")]
async fn status(cache: web::Data<Cache>, mut session: Session) -> Result<impl Responder, APIError> {
    let (_, run) = get_run(&mut session, &cache).await?;
    let progress = lock_run(&run).status(Utc::now());
    Ok(HttpResponse::Ok().json(progress))
}

#[derive(Debug, Deserialize)]
struct PromptRequest {
    prompt: String,
}

impl APIRequest for PromptRequest {
    fn ok(&self) -> bool {
        valid_prompt(&self.prompt)
    }
}

/// Records the prompt on the current level and hands back that level.
async fn begin_attempt(
    session: &mut Session,
    cache: &Cache,
    book: &LevelBook,
    prompt: &str,
) -> Result<(SharedRun, Level), APIError> {
    let (_, run) = get_run(session, cache).await?;
    let level_id = {
        let mut run = lock_run(&run);
        if run.is_finished() {
            return Err(APIError::RunFinished);
        }
        run.record_attempt(prompt);
        run.level
    };
    let level = book
        .get(level_id)
        .cloned()
        .ok_or(APIError::InvalidQuery)?;
    cache.put_run(run.clone()).await;
    Ok((run, level))
}

// [[API]]
// desp: Send a prompt to the model on the current level, streamed back as NDJSON.
// Method: POST
// URL: /attack
// Request Body: `PromptRequest`
// Response Body: lines of `AttemptEvent`
#[post("/attack")]
async fn attack(
    form: web::Json<PromptRequest>,
    cache: web::Data<Cache>,
    book: web::Data<LevelBook>,
    provider: web::Data<dyn ModelProvider>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "attack";
    form.sanity()?;

    let prompt = form.into_inner().prompt.trim().to_owned();
    let (run, level) = begin_attempt(&mut session, &cache, &book, &prompt).await?;
    let level_id = level.id;

    let body = stream_attempt(provider.into_inner(), level, prompt).map(move |event| {
        if let AttemptEvent::Complete(outcome) = &event {
            lock_run(&run).record_outcome(level_id, outcome.success);
        }
        event
            .to_ndjson()
            .map(web::Bytes::from)
            .map_err(|e| log_server_error(e, location, ERROR_ENCODE))
    });

    Ok(HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body))
}

// [[API]]
// desp: Same as `/attack`, but waits for the full answer.
// Method: POST
// URL: /submit
// Request Body: `PromptRequest`
// Response Body: `AttemptResult`
#[post("/submit")]
async fn submit(
    form: web::Json<PromptRequest>,
    cache: web::Data<Cache>,
    book: web::Data<LevelBook>,
    provider: web::Data<dyn ModelProvider>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    form.sanity()?;

    let prompt = form.into_inner().prompt.trim().to_owned();
    let (run, level) = begin_attempt(&mut session, &cache, &book, &prompt).await?;
    let level_id = level.id;

    let result = run_attempt(provider.into_inner(), level, prompt).await;
    lock_run(&run).record_outcome(level_id, result.success);

    Ok(HttpResponse::Ok().json(result))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    level: LevelId,
    password: String,
}

impl APIRequest for ValidateRequest {
    fn ok(&self) -> bool {
        valid_level(self.level) && valid_password(&self.password)
    }
}

#[derive(Debug, Serialize)]
enum ValidateResponse {
    Unlocked {
        level: LevelId,
        next_level: LevelId,
    },
    Finished {
        team_id: TeamId,
        overall_time_sec: f64,
    },
    WrongPassword,
    WrongLevel {
        current: LevelId,
    },
}

// [[API]]
// desp: Check a level password. Clearing the last level writes the scoreboard row.
// Method: POST
// URL: /validate
// Request Body: `ValidateRequest`
// Response Body: `ValidateResponse`
#[post("/validate")]
async fn validate(
    form: web::Json<ValidateRequest>,
    cache: web::Data<Cache>,
    book: web::Data<LevelBook>,
    mut session: Session,
) -> Result<impl Responder, APIError> {
    let location = "validate";
    form.sanity()?;

    let level = book.get(form.level).ok_or(APIError::InvalidFormData)?;
    let (_, run) = get_run(&mut session, &cache).await?;

    let outcome = {
        let mut run = lock_run(&run);
        if run.is_finished() {
            return Err(APIError::RunFinished);
        }
        if run.level == form.level && !level.check_password(&form.password) {
            info!("Wrong password for level {} from {}", form.level, run.team_name);
            return Ok(HttpResponse::Ok().json(ValidateResponse::WrongPassword));
        }
        run.unlock(form.level, Utc::now())
    };

    let response = match outcome {
        UnlockOutcome::Unlocked { next_level } => {
            cache.put_run(run).await;
            ValidateResponse::Unlocked {
                level: form.level,
                next_level,
            }
        }
        UnlockOutcome::WrongLevel { current } => ValidateResponse::WrongLevel { current },
        UnlockOutcome::AlreadyFinished => return Err(APIError::RunFinished),
        UnlockOutcome::Finished(new_team) => {
            let overall_time_sec = new_team.overall_time_sec;
            let inserted =
                with_conn(cache.pool(), location, move |conn| insert_team(&new_team, conn)).await;
            let team_id = match inserted {
                Ok(team_id) => team_id,
                Err(APIError::TeamNameTaken) => return Err(APIError::TeamNameTaken),
                Err(e) => {
                    lock_run(&run).reopen();
                    return Err(e);
                }
            };
            cache.invalidate_scoreboard().await;
            ValidateResponse::Finished {
                team_id,
                overall_time_sec,
            }
        }
    };

    Ok(HttpResponse::Ok().json(response))
}

#[derive(Debug, Serialize)]
enum AbandonResponse {
    Abandoned,
    NoActiveRun,
}

// [[API]]
// desp: Drop the session's run without recording anything.
// Method: POST
// URL: /abandon
// Request Body: N/A
// Response Body: `AbandonResponse`
#[post("/abandon")]
async fn abandon(cache: web::Data<Cache>, session: Session) -> impl Responder {
    let response = match session_run_id(&session) {
        Some(run_id) => {
            session.remove(SESSION_RUN_ID);
            match cache.remove_run(run_id).await {
                Some(_) => {
                    info!("Run {run_id} abandoned");
                    AbandonResponse::Abandoned
                }
                None => AbandonResponse::NoActiveRun,
            }
        }
        None => AbandonResponse::NoActiveRun,
    };
    HttpResponse::Ok().json(response)
}
