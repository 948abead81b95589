use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{LevelId, NewTeam, RunId, LEVEL_COUNT};

/// One team's pass through the levels. The scoreboard row is written only
/// when the last level is unlocked.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub team_name: String,
    pub started_at: DateTime<Utc>,
    pub level: LevelId,
    pub last_prompt: Option<String>,
    pub leaked: bool,
    pub prompts: [Option<String>; LEVEL_COUNT],
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq)]
pub enum UnlockOutcome {
    Unlocked { next_level: LevelId },
    Finished(NewTeam),
    WrongLevel { current: LevelId },
    AlreadyFinished,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RunStatus {
    pub run_id: RunId,
    pub team_name: String,
    pub level: LevelId,
    pub completed_levels: Vec<LevelId>,
    pub leaked_current_level: bool,
    pub elapsed_sec: f64,
    pub finished: bool,
}

pub fn lock_run(run: &Mutex<Run>) -> MutexGuard<'_, Run> {
    run.lock().unwrap_or_else(PoisonError::into_inner)
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds().max(0);
    millis as f64 / 1000.0
}

impl Run {
    pub fn new(team_name: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new_v4(),
            team_name,
            started_at,
            level: 1,
            last_prompt: None,
            leaked: false,
            prompts: Default::default(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn record_attempt(&mut self, prompt: &str) {
        self.last_prompt = Some(prompt.to_owned());
    }

    /// Outcomes from a level the run has already moved past are dropped.
    pub fn record_outcome(&mut self, level: LevelId, leaked: bool) {
        if level == self.level && leaked {
            self.leaked = true;
        }
    }

    pub fn unlock(&mut self, level: LevelId, now: DateTime<Utc>) -> UnlockOutcome {
        if self.is_finished() {
            return UnlockOutcome::AlreadyFinished;
        }
        if level != self.level {
            return UnlockOutcome::WrongLevel {
                current: self.level,
            };
        }

        let slot = (level as usize).saturating_sub(1);
        if let Some(prompt) = self.prompts.get_mut(slot) {
            *prompt = self.last_prompt.take();
        }
        self.leaked = false;

        if level as usize >= LEVEL_COUNT {
            self.finished_at = Some(now);
            UnlockOutcome::Finished(
                NewTeam::new(self.team_name.clone(), seconds_between(self.started_at, now))
                    .with_prompts(self.prompts.clone()),
            )
        } else {
            self.level += 1;
            UnlockOutcome::Unlocked {
                next_level: self.level,
            }
        }
    }

    /// Undoes a finish whose scoreboard row could not be written, so the
    /// last level can be validated again with its prompt intact.
    pub fn reopen(&mut self) {
        if self.finished_at.take().is_some() {
            self.last_prompt = self.prompts[LEVEL_COUNT - 1].take();
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> RunStatus {
        let completed = if self.is_finished() {
            LEVEL_COUNT as LevelId
        } else {
            self.level - 1
        };
        RunStatus {
            run_id: self.id,
            team_name: self.team_name.clone(),
            level: self.level,
            completed_levels: (1..=completed).collect(),
            leaked_current_level: self.leaked,
            elapsed_sec: seconds_between(self.started_at, self.finished_at.unwrap_or(now)),
            finished: self.is_finished(),
        }
    }
}
