use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use moka::notification::RemovalCause;
use moka::Expiry;

/// Lifetime tag stored next to each cached value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Expiration {
    /// Scoreboard snapshot; any finish invalidates it sooner.
    Scoreboard,
    /// Inactivity window of a run.
    Run,
}

impl Expiration {
    pub fn as_duration(&self) -> Duration {
        match self {
            Expiration::Scoreboard => Duration::from_secs(600),
            Expiration::Run => Duration::from_secs(2 * 60 * 60),
        }
    }
}

pub struct TaggedExpiry;

impl<K, V> Expiry<K, (Expiration, V)> for TaggedExpiry
where
    K: Clone + std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn expire_after_create(
        &self,
        _key: &K,
        value: &(Expiration, V),
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.0.as_duration())
    }

    // Every write refreshes the entry, so an active run keeps living.
    fn expire_after_update(
        &self,
        _key: &K,
        value: &(Expiration, V),
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.0.as_duration())
    }
}

pub fn log_eviction<K: Debug, V>(key: Arc<K>, _value: V, cause: RemovalCause) {
    if matches!(cause, RemovalCause::Expired) {
        info!("Run {key:?} expired after inactivity");
    } else {
        info!("Run {key:?} dropped from cache: {cause:?}");
    }
}
