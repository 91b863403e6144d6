//! Automated root-rotation scheduling.
//!
//! The backend registers a job whenever a config write carries an enabled
//! rotation policy and deregisters it when the policy is cleared. Hosts that
//! cannot schedule use [`UnsupportedRotationManager`]; the binary uses
//! [`RotationScheduler`], which runs both periods and cron schedules.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::models::{parse_rotation_schedule, AutomatedRotationParams};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationJob {
    /// Storage path whose rotation the job drives.
    pub path: String,
    pub schedule: Option<String>,
    pub period: Option<Duration>,
    pub window: Option<Duration>,
}

impl RotationJob {
    pub fn from_params(path: impl Into<String>, params: &AutomatedRotationParams) -> Self {
        Self {
            path: path.into(),
            schedule: params.rotation_schedule.clone(),
            period: (params.rotation_period > 0).then(|| Duration::from_secs(params.rotation_period)),
            window: (params.rotation_window > 0).then(|| Duration::from_secs(params.rotation_window)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotationManagerError {
    /// The host has no rotation manager. Callers treat this as a warning.
    #[error("automated rotation is not supported by this host")]
    Unsupported,
    #[error("rotation job rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait RotationManager: Send + Sync {
    async fn register(&self, job: RotationJob) -> Result<(), RotationManagerError>;
    async fn deregister(&self, path: &str) -> Result<(), RotationManagerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedRotationManager;

#[async_trait]
impl RotationManager for UnsupportedRotationManager {
    async fn register(&self, _job: RotationJob) -> Result<(), RotationManagerError> {
        Err(RotationManagerError::Unsupported)
    }

    async fn deregister(&self, _path: &str) -> Result<(), RotationManagerError> {
        Err(RotationManagerError::Unsupported)
    }
}

/// In-process scheduler. Each registered path gets a task that sends the path
/// on the tick channel at every period or cron fire time; the receiver
/// performs the rotation.
pub struct RotationScheduler {
    jobs: Arc<DashMap<String, JoinHandle<()>>>,
    ticks: mpsc::Sender<String>,
}

impl RotationScheduler {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (ticks, rx) = mpsc::channel(16);
        (
            Self {
                jobs: Arc::new(DashMap::new()),
                ticks,
            },
            rx,
        )
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.jobs.contains_key(path)
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        for entry in self.jobs.iter() {
            entry.value().abort();
        }
    }
}

#[async_trait]
impl RotationManager for RotationScheduler {
    async fn register(&self, job: RotationJob) -> Result<(), RotationManagerError> {
        let ticks = self.ticks.clone();
        let path = job.path.clone();

        let handle = match (&job.schedule, job.period) {
            (Some(expr), _) => {
                let schedule = parse_rotation_schedule(expr).map_err(|e| {
                    RotationManagerError::Rejected(format!("invalid schedule '{}': {}", expr, e))
                })?;
                tracing::info!(path = %job.path, schedule = %expr, "rotation job registered");
                tokio::spawn(run_cron(schedule, path, ticks))
            }
            (None, Some(period)) if !period.is_zero() => {
                tracing::info!(path = %job.path, period_secs = period.as_secs(), "rotation job registered");
                tokio::spawn(run_period(period, path, ticks))
            }
            (None, _) => {
                return Err(RotationManagerError::Rejected(
                    "a rotation_schedule or positive rotation_period is required".into(),
                ))
            }
        };

        if let Some(previous) = self.jobs.insert(job.path.clone(), handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn deregister(&self, path: &str) -> Result<(), RotationManagerError> {
        if let Some((_, handle)) = self.jobs.remove(path) {
            handle.abort();
            tracing::info!(path = %path, "rotation job deregistered");
        }
        Ok(())
    }
}

async fn run_period(period: Duration, path: String, ticks: mpsc::Sender<String>) {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        tracing::debug!(path = %path, "rotation tick");
        if ticks.send(path.clone()).await.is_err() {
            break;
        }
    }
}

async fn run_cron(schedule: cron::Schedule, path: String, ticks: mpsc::Sender<String>) {
    let mut last = Utc::now();
    loop {
        let Some(next) = schedule.after(&last).next() else {
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        time::sleep(wait).await;
        last = next;
        tracing::debug!(path = %path, fire_at = %next, "rotation tick");
        if ticks.send(path.clone()).await.is_err() {
            break;
        }
    }
}
