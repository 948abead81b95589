use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PoolError};
use diesel::result::{DatabaseErrorKind, Error};
use diesel::sqlite::SqliteConnection;
use log::info;

use crate::models::{NewTeam, TeamId, TeamRecord};
use crate::schema::teams;
use crate::util::api_util::{log_server_error, APIError, ERROR_BLOCKING, ERROR_DB_CONNECTION};
use crate::DbPool;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS teams (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    team_name        TEXT    NOT NULL UNIQUE,
    overall_time_sec REAL    NOT NULL,
    prompt1          TEXT,
    prompt2          TEXT,
    prompt3          TEXT,
    prompt4          TEXT
);
";

const IN_MEMORY: &str = ":memory:";

#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Opens the pool. An in-memory database lives inside a single connection,
/// so the pool is pinned to that one connection.
pub fn open_pool(database_url: &str) -> Result<DbPool, PoolError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let builder = Pool::builder()
        .connection_customizer(Box::new(SqlitePragmas))
        .connection_timeout(Duration::from_secs(10));

    let builder = if database_url == IN_MEMORY {
        builder.max_size(1).idle_timeout(None).max_lifetime(None)
    } else {
        builder.max_size(8)
    };
    builder.build(manager)
}

pub fn init_schema(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute(SCHEMA)
}

/// Runs `f` with a pooled connection on the blocking thread pool.
pub async fn with_conn<T, F>(pool: &DbPool, location: &'static str, f: F) -> Result<T, APIError>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, APIError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| log_server_error(e, location, ERROR_DB_CONNECTION))?;
        f(&mut *conn).map_err(|e| e.set_location(location))
    })
    .await
    .map_err(|e| log_server_error(e, location, ERROR_BLOCKING))?
}

pub fn insert_team(new_team: &NewTeam, conn: &mut SqliteConnection) -> Result<TeamId, APIError> {
    match diesel::insert_into(teams::table)
        .values(new_team)
        .returning(teams::id)
        .get_result::<TeamId>(conn)
    {
        Ok(id) => {
            info!(
                "Team {} recorded as #{id} with {:.3}s",
                new_team.team_name, new_team.overall_time_sec
            );
            Ok(id)
        }
        Err(Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Err(APIError::TeamNameTaken)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn fetch_team(team_name: &str, conn: &mut SqliteConnection) -> QueryResult<Option<TeamRecord>> {
    teams::table
        .filter(teams::team_name.eq(team_name))
        .select(TeamRecord::as_select())
        .first(conn)
        .optional()
}

pub fn team_exists(team_name: &str, conn: &mut SqliteConnection) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        teams::table.filter(teams::team_name.eq(team_name)),
    ))
    .get_result(conn)
}

pub fn list_teams(conn: &mut SqliteConnection) -> QueryResult<Vec<TeamRecord>> {
    teams::table
        .order((teams::overall_time_sec.asc(), teams::id.asc()))
        .select(TeamRecord::as_select())
        .load(conn)
}

pub fn clear_teams(conn: &mut SqliteConnection) -> QueryResult<usize> {
    let removed = diesel::delete(teams::table).execute(conn)?;
    info!("Scoreboard cleared, {removed} rows removed");
    Ok(removed)
}
