//! Observation log and daily rollups
//!
//! Observations are appended once per completed run under
//! `(run_id, "observation")`. Daily aggregates live under
//! `("daily", "YYYY-MM-DD")` and are written only if absent, so recomputing
//! a day is idempotent.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use feedline_core::{Clock, RetryPolicy, SharedClock, retry_with_backoff};
use serde::{Deserialize, Serialize};

use crate::paging::scan_all;
use crate::table::{NewRow, Precondition, PutOutcome, SharedTable};
use crate::{Result, StoreError};

pub const OBSERVATION_KEY: &str = "observation";
pub const DAILY_PARTITION: &str = "daily";

pub const DEFAULT_OBSERVATION_TTL_DAYS: i64 = 14;
pub const DEFAULT_DAILY_TTL_DAYS: i64 = 90;

/// One measurement per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    /// Average sentiment of the run.
    pub value: f64,
    /// Posts scored.
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub observations: u64,
    pub items: u64,
    pub computed_at: DateTime<Utc>,
}

impl DailyAggregate {
    fn from_observations(
        date: NaiveDate,
        observations: &[Observation],
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if observations.is_empty() {
            return None;
        }
        let values = observations.iter().map(|o| o.value);
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
        let average = values.sum::<f64>() / observations.len() as f64;
        Some(Self {
            date,
            min,
            max,
            average,
            observations: observations.len() as u64,
            items: observations.iter().map(|o| o.count).sum(),
            computed_at: now,
        })
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Observation and daily-aggregate tables.
#[derive(Clone)]
pub struct TimeSeriesStore {
    observations: SharedTable,
    daily: SharedTable,
    clock: SharedClock,
    observation_ttl: Duration,
    daily_ttl: Duration,
    retry: RetryPolicy,
}

impl TimeSeriesStore {
    pub fn new(observations: SharedTable, daily: SharedTable, clock: SharedClock) -> Self {
        Self {
            observations,
            daily,
            clock,
            observation_ttl: Duration::days(DEFAULT_OBSERVATION_TTL_DAYS),
            daily_ttl: Duration::days(DEFAULT_DAILY_TTL_DAYS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ttls(mut self, observation_ttl: Duration, daily_ttl: Duration) -> Self {
        self.observation_ttl = observation_ttl;
        self.daily_ttl = daily_ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Append the observation for its run. A second observation for the
    /// same run is ignored and the stored one returned.
    pub fn store_observation(&self, obs: &Observation) -> Result<Observation> {
        if !obs.value.is_finite() {
            return Err(StoreError::Invalid(format!(
                "{}: observation value {} is not finite",
                obs.run_id, obs.value
            )));
        }
        let expires_at = (self.clock.now() + self.observation_ttl).timestamp();
        let row = NewRow::encode(obs.run_id.clone(), OBSERVATION_KEY, Some(expires_at), obs)?;
        let outcome = retry_with_backoff(
            &format!("{}/{OBSERVATION_KEY}: put", obs.run_id),
            &self.retry,
            || self.observations.put(row.clone(), Precondition::DoesNotExist),
        )?;
        match outcome {
            PutOutcome::Written { .. } => Ok(obs.clone()),
            PutOutcome::PreconditionFailed { .. } => {
                log::warn!("{}: observation already recorded, keeping it", obs.run_id);
                self.observations
                    .get(&obs.run_id, OBSERVATION_KEY)?
                    .ok_or_else(|| StoreError::NotFound(format!("{}/{OBSERVATION_KEY}", obs.run_id)))?
                    .decode()
            }
        }
    }

    fn all_observations(&self) -> Result<Vec<Observation>> {
        let mut out = Vec::new();
        for row in scan_all(self.observations.as_ref(), self.retry) {
            let row = row?;
            if row.sk == OBSERVATION_KEY {
                out.push(row.decode()?);
            }
        }
        Ok(out)
    }

    /// Observations no older than `window`, oldest first.
    pub fn get_history(&self, window: Duration) -> Result<Vec<Observation>> {
        let since = self.clock.now() - window;
        let mut history: Vec<Observation> = self
            .all_observations()?
            .into_iter()
            .filter(|o| o.timestamp >= since)
            .collect();
        history.sort_by_key(|o| o.timestamp);
        Ok(history)
    }

    pub fn get_daily(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        let key = date_key(date);
        let row = retry_with_backoff(&format!("{DAILY_PARTITION}/{key}: get"), &self.retry, || {
            self.daily.get(DAILY_PARTITION, &key)
        })?;
        row.map(|r| r.decode()).transpose()
    }

    /// Roll up the observations of `date` (UTC).
    ///
    /// An existing row is returned unchanged. With no observations nothing
    /// is written and `None` is returned.
    pub fn compute_daily_aggregate(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        if let Some(existing) = self.get_daily(date)? {
            log::debug!("{date}: daily aggregate already present");
            return Ok(Some(existing));
        }

        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start + Duration::hours(24);
        let day: Vec<Observation> = self
            .all_observations()?
            .into_iter()
            .filter(|o| o.timestamp >= start && o.timestamp < end)
            .collect();

        let now = self.clock.now();
        let Some(aggregate) = DailyAggregate::from_observations(date, &day, now) else {
            log::info!("{date}: no observations, skipping daily aggregate");
            return Ok(None);
        };

        let key = date_key(date);
        let row = NewRow::encode(
            DAILY_PARTITION,
            key.clone(),
            Some((now + self.daily_ttl).timestamp()),
            &aggregate,
        )?;
        let outcome = retry_with_backoff(&format!("{DAILY_PARTITION}/{key}: put"), &self.retry, || {
            self.daily.put(row.clone(), Precondition::DoesNotExist)
        })?;
        match outcome {
            PutOutcome::Written { .. } => {
                log::info!(
                    "{date}: daily aggregate over {} observations (avg {:.3})",
                    aggregate.observations,
                    aggregate.average
                );
                Ok(Some(aggregate))
            }
            // Lost the race; the winner's row is authoritative.
            PutOutcome::PreconditionFailed { .. } => self.get_daily(date),
        }
    }
}
