//! Sequential two-pass fetch scheduling.
//!
//! Pass 1 walks every unit once with a politeness delay before each fetch and
//! defers failures instead of retrying them. If anything was deferred, a single
//! cooldown follows, then Pass 2 retries each deferred unit exactly once with a
//! longer delay. Only one fetch is ever in flight.

use std::collections::BTreeMap;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::progress::StatusReporter;
use crate::{ContentUnit, FailureKind, FetchError, Stage, UnitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    Fixed(Duration),
    /// Uniformly random in `min..=max`.
    Uniform { min: Duration, max: Duration },
}

impl DelayPolicy {
    pub fn sample(&self) -> Duration {
        match *self {
            DelayPolicy::Fixed(delay) => delay,
            DelayPolicy::Uniform { min, max } => {
                let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
                let lo_ms = lo.as_millis() as u64;
                let hi_ms = hi.as_millis() as u64;
                if lo_ms == hi_ms {
                    return lo;
                }
                Duration::from_millis(rand::rng().random_range(lo_ms..=hi_ms))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub first_pass_delay: DelayPolicy,
    pub cooldown: Duration,
    pub retry_delay: Duration,
    /// Upper bound on a single fetch; an expired fetch counts as a transient failure.
    pub fetch_timeout: Option<Duration>,
}

impl ScheduleConfig {
    /// Heavy per-item fetches such as full chapter pages.
    pub fn chapters() -> Self {
        Self {
            first_pass_delay: DelayPolicy::Uniform {
                min: Duration::from_millis(1500),
                max: Duration::from_millis(3000),
            },
            cooldown: Duration::from_secs(5),
            retry_delay: Duration::from_secs(3),
            fetch_timeout: Some(Duration::from_secs(60)),
        }
    }

    /// Light per-item fetches such as private documents.
    pub fn documents() -> Self {
        Self {
            first_pass_delay: DelayPolicy::Fixed(Duration::from_millis(500)),
            ..Self::chapters()
        }
    }

    /// No waiting at all. Intended for tests and local mirrors.
    pub fn immediate() -> Self {
        Self {
            first_pass_delay: DelayPolicy::Fixed(Duration::ZERO),
            cooldown: Duration::ZERO,
            retry_delay: Duration::ZERO,
            fetch_timeout: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::chapters()
    }
}

/// Per-unit fetch function: returns the unit's raw content.
///
/// `Ok` with blank content is treated the same as an error.
#[async_trait::async_trait]
pub trait UnitFetch: Send + Sync {
    async fn fetch_unit(&self, unit: &ContentUnit) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Fetched { pass: u8 },
    Failed(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Every input unit, in sequence order, with status and content filled in.
    pub units: Vec<ContentUnit>,
    pub outcomes: BTreeMap<u32, UnitOutcome>,
    pub success_count: usize,
    pub permanent_failure_count: usize,
}

impl ScheduleReport {
    pub fn total(&self) -> usize {
        self.units.len()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("nothing to fetch")]
    NoUnits,
    #[error("unit sequence numbers must run 1..={expected_last} in order (found {found} at position {position})")]
    BrokenSequence {
        expected_last: usize,
        position: usize,
        found: u32,
    },
    #[error("cancelled")]
    Cancelled,
}

pub struct FetchScheduler {
    config: ScheduleConfig,
    cancel: CancellationToken,
}

impl FetchScheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Fetches every unit. Individual unit failures never surface as `Err`;
    /// only an unusable unit list or cancellation does.
    pub async fn run(
        &self,
        mut units: Vec<ContentUnit>,
        fetch: &dyn UnitFetch,
        reporter: StatusReporter<'_>,
    ) -> Result<ScheduleReport, ScheduleError> {
        validate_sequence(&units)?;
        let total = units.len();
        let mut outcomes = BTreeMap::new();
        let mut deferred = Vec::new();

        engine_info!("Pass 1: fetching {} units", total);
        for index in 0..total {
            let unit = &units[index];
            reporter.status(
                Stage::Fetching { pass: 1 },
                format!("Fetching {} ({}/{})", unit.label, unit.sequence, total),
            );
            self.pause(self.config.first_pass_delay.sample()).await?;
            match self.attempt(fetch, &units[index]).await? {
                Ok(content) => {
                    record_success(&mut units[index], content);
                    outcomes.insert(units[index].sequence, UnitOutcome::Fetched { pass: 1 });
                }
                Err(err) => {
                    engine_warn!(
                        "Unit {} ({}) deferred: {}",
                        units[index].sequence,
                        units[index].label,
                        err
                    );
                    outcomes.insert(units[index].sequence, UnitOutcome::Failed(err));
                    deferred.push(index);
                }
            }
        }

        if !deferred.is_empty() {
            reporter.status(
                Stage::Cooldown,
                format!(
                    "{} of {} failed, retrying after {:?}",
                    deferred.len(),
                    total,
                    self.config.cooldown
                ),
            );
            engine_info!("Cooldown {:?} before retrying {} units", self.config.cooldown, deferred.len());
            self.pause(self.config.cooldown).await?;

            for (attempt, &index) in deferred.iter().enumerate() {
                reporter.status(
                    Stage::Fetching { pass: 2 },
                    format!(
                        "Retrying {} ({}/{})",
                        units[index].label,
                        attempt + 1,
                        deferred.len()
                    ),
                );
                self.pause(self.config.retry_delay).await?;
                match self.attempt(fetch, &units[index]).await? {
                    Ok(content) => {
                        engine_debug!("Unit {} recovered on retry", units[index].sequence);
                        record_success(&mut units[index], content);
                        outcomes.insert(units[index].sequence, UnitOutcome::Fetched { pass: 2 });
                    }
                    Err(err) => {
                        engine_warn!(
                            "Unit {} ({}) failed permanently: {}",
                            units[index].sequence,
                            units[index].label,
                            err
                        );
                        units[index].status = UnitStatus::Failed;
                        outcomes.insert(units[index].sequence, UnitOutcome::Failed(err));
                    }
                }
            }
        }

        let success_count = units.iter().filter(|unit| unit.is_fetched()).count();
        let permanent_failure_count = total - success_count;
        engine_info!(
            "Fetched {} of {} units ({} failed)",
            success_count,
            total,
            permanent_failure_count
        );

        Ok(ScheduleReport {
            units,
            outcomes,
            success_count,
            permanent_failure_count,
        })
    }

    async fn pause(&self, duration: Duration) -> Result<(), ScheduleError> {
        if self.cancel.is_cancelled() {
            return Err(ScheduleError::Cancelled);
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ScheduleError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// One fetch. The outer `Err` is cancellation; the inner result is the unit's outcome.
    async fn attempt(
        &self,
        fetch: &dyn UnitFetch,
        unit: &ContentUnit,
    ) -> Result<Result<String, FetchError>, ScheduleError> {
        if self.cancel.is_cancelled() {
            return Err(ScheduleError::Cancelled);
        }
        let bounded = async {
            match self.config.fetch_timeout {
                Some(limit) => tokio::time::timeout(limit, fetch.fetch_unit(unit))
                    .await
                    .unwrap_or_else(|_| {
                        Err(FetchError::new(
                            FailureKind::Timeout,
                            format!("no response within {limit:?}"),
                        ))
                    }),
                None => fetch.fetch_unit(unit).await,
            }
        };
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ScheduleError::Cancelled),
            result = bounded => result,
        };
        Ok(match result {
            Ok(content) if content.trim().is_empty() => {
                Err(FetchError::new(FailureKind::EmptyContent, "blank content"))
            }
            other => other,
        })
    }
}

fn record_success(unit: &mut ContentUnit, content: String) {
    unit.raw_content = Some(content);
    unit.status = UnitStatus::Fetched;
}

fn validate_sequence(units: &[ContentUnit]) -> Result<(), ScheduleError> {
    if units.is_empty() {
        return Err(ScheduleError::NoUnits);
    }
    for (position, unit) in units.iter().enumerate() {
        if unit.sequence as usize != position + 1 {
            return Err(ScheduleError::BrokenSequence {
                expected_last: units.len(),
                position,
                found: unit.sequence,
            });
        }
    }
    Ok(())
}
