use std::fmt::Display;
use std::sync::{Arc, Mutex};

use actix_session::Session;
use actix_web::{
    error,
    http::{header::ContentType, StatusCode},
    HttpRequest, HttpResponse,
};
use derive_more::derive::Display;
use diesel::result::Error;
use log::{error, warn};

use crate::models::RunId;
use crate::util::cache::Cache;
use crate::util::cipher_util::check_token;
use crate::util::run::Run;
use crate::Ext;

#[derive(Debug, Clone, Default)]
pub struct AdminToken(pub Option<String>);

pub trait APIRequest: Sized {
    fn ok(&self) -> bool;
    fn sanity(&self) -> Result<(), APIError> {
        if self.ok() {
            Ok(())
        } else {
            Err(APIError::InvalidFormData)
        }
    }
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum APIError {
    #[display("Invalid form data")]
    InvalidFormData,

    #[display("Invalid query")]
    InvalidQuery,

    #[display("No active run")]
    NoActiveRun,

    #[display("Run already finished")]
    RunFinished,

    #[display("Team name already taken")]
    TeamNameTaken,

    #[display("Unauthorized access")]
    Unauthorized,

    #[display("Server error at {location}, ref[{refnum}]: {msg}")]
    ServerError {
        location: &'static str,
        msg: &'static str,
        refnum: uuid::Uuid,
    },
}

impl APIError {
    pub fn set_location(self, location: &'static str) -> Self {
        match self {
            APIError::ServerError {
                location: _,
                msg,
                refnum,
            } => APIError::ServerError {
                location,
                msg,
                refnum,
            },
            _ => self,
        }
    }

    pub fn log(&self) {
        if let APIError::ServerError {
            location,
            msg,
            refnum,
        } = self
        {
            error!("Server error at {location}, ref[{refnum}]: {msg}");
        }
    }
}

impl std::error::Error for APIError {}

impl From<Error> for APIError {
    fn from(e: Error) -> Self {
        new_unlocated_server_error(e, "Transaction")
    }
}

impl error::ResponseError for APIError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::html())
            .body(self.to_string())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            APIError::InvalidFormData => StatusCode::NOT_ACCEPTABLE,
            APIError::TeamNameTaken => StatusCode::CONFLICT,
            APIError::Unauthorized => StatusCode::UNAUTHORIZED,
            APIError::ServerError {
                location: _,
                msg: _,
                refnum: _,
            } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Looks up the run bound to this session. A session pointing at an expired
/// run is cleared so the next `/start` begins fresh.
pub async fn get_run(
    session: &mut Session,
    cache: &Cache,
) -> Result<(RunId, Arc<Mutex<Run>>), APIError> {
    let run_id = session_run_id(session).ok_or(APIError::NoActiveRun)?;

    match cache.get_run(run_id).await {
        Some(run) => Ok((run_id, run)),
        None => {
            session.remove(SESSION_RUN_ID);
            Err(APIError::NoActiveRun)
        }
    }
}

/// Admin routes are closed when no token is configured.
pub fn admin_check(req: &HttpRequest, admin_token: &AdminToken) -> Result<(), APIError> {
    let expected = admin_token.0.as_deref().ok_or(APIError::Unauthorized)?;
    let provided = req
        .headers()
        .get(HEADER_ADMIN_TOKEN)
        .and_then(|value| value.to_str().ok())
        .ok_or(APIError::Unauthorized)?;

    if check_token(expected, provided) {
        Ok(())
    } else {
        warn!("Rejected admin request from {:?}", req.peer_addr());
        Err(APIError::Unauthorized)
    }
}

pub fn session_run_id(session: &Session) -> Option<RunId> {
    session
        .get::<String>(SESSION_RUN_ID)
        .ok()
        .flatten()
        .and_then(|raw| raw.parse::<RunId>().ok())
}

pub fn log_server_error<E>(error: E, location: &'static str, msg: &'static str) -> APIError
where
    E: Display,
{
    new_unlocated_server_error(error, msg)
        .set_location(location)
        .tap(APIError::log)
}

pub fn new_unlocated_server_error<E>(error: E, msg: &'static str) -> APIError
where
    E: Display,
{
    let refnum = uuid::Uuid::new_v4();
    error!("Error [{refnum}]: {error}");
    APIError::ServerError {
        location: LOCATION_UNKNOWN,
        msg,
        refnum,
    }
}

pub static SESSION_RUN_ID: &str = "run_id";
pub static SESSION_COOKIE_NAME: &str = "jb_session";

pub static ERROR_DB_CONNECTION: &str = "db_connction_failed";
pub static ERROR_SESSION_INSERT: &str = "session_setting_failed";
pub static ERROR_BLOCKING: &str = "blocking_task_failed";
pub static ERROR_ENCODE: &str = "encoding_failed";

pub static LOCATION_UNKNOWN: &str = "[unknown]";

pub static HEADER_ADMIN_TOKEN: &str = "X-Admin-Token";
