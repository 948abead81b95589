use std::sync::{Arc, Mutex};

use moka::future::Cache as MokaCache;
use serde::Serialize;

use crate::models::{RunId, TeamRecord};
use crate::util::api_util::APIError;
use crate::util::expiry::{log_eviction, Expiration, TaggedExpiry};
use crate::util::run::{lock_run, Run};
use crate::util::scoreboard::{list_teams, with_conn};
use crate::DbPool;

const RUN_CAPACITY: u64 = 4096;

pub type SharedRun = Arc<Mutex<Run>>;

pub struct Cache {
    runs: MokaCache<RunId, (Expiration, SharedRun)>,
    scoreboard: MokaCache<(), (Expiration, Arc<Vec<TeamRecord>>)>,
    pool: DbPool,
}

#[derive(Debug, Serialize)]
pub struct CacheStatusResponse {
    runs: u64,
    scoreboard: u64,
}

impl Cache {
    pub fn new(pool: DbPool) -> Self {
        Self {
            runs: MokaCache::builder()
                .max_capacity(RUN_CAPACITY)
                .expire_after(TaggedExpiry)
                .eviction_listener(log_eviction)
                .build(),
            scoreboard: MokaCache::builder()
                .max_capacity(1)
                .expire_after(TaggedExpiry)
                .build(),
            pool,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn get_size(&self) -> CacheStatusResponse {
        CacheStatusResponse {
            runs: self.runs.entry_count(),
            scoreboard: self.scoreboard.entry_count(),
        }
    }

    pub fn active_runs(&self) -> u64 {
        self.runs.entry_count()
    }

    pub async fn get_run(&self, run_id: RunId) -> Option<SharedRun> {
        self.runs.get(&run_id).await.map(|(_, run)| run)
    }

    /// Inserting again under the same id refreshes the inactivity timer.
    pub async fn put_run(&self, run: SharedRun) -> RunId {
        let run_id = lock_run(&run).id;
        self.runs.insert(run_id, (Expiration::Run, run)).await;
        run_id
    }

    pub async fn remove_run(&self, run_id: RunId) -> Option<SharedRun> {
        self.runs.remove(&run_id).await.map(|(_, run)| run)
    }

    pub async fn get_scoreboard(&self) -> Result<Arc<Vec<TeamRecord>>, APIError> {
        if let Some((_, data)) = self.scoreboard.get(&()).await {
            return Ok(data);
        }
        let teams = with_conn(&self.pool, "scoreboard", |conn| Ok(list_teams(conn)?)).await?;
        let teams = Arc::new(teams);
        self.scoreboard
            .insert((), (Expiration::Scoreboard, teams.clone()))
            .await;
        Ok(teams)
    }

    pub async fn invalidate_scoreboard(&self) {
        self.scoreboard.invalidate(&()).await;
    }
}
