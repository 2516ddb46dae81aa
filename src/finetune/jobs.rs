use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::finetune::FinetuneError;
use crate::worker::JobState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinetuneJob {
    pub job_id: String,
    pub model_name: String,
    pub state: JobState,
    pub files_for_training: usize,
    pub dataset_sha256: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FinetuneJob {
    pub fn queued(
        model_name: impl Into<String>,
        files_for_training: usize,
        dataset_sha256: impl Into<String>,
    ) -> Self {
        let now = timestamp();
        Self {
            job_id: Uuid::new_v4().to_string(),
            model_name: model_name.into(),
            state: JobState::Queued,
            files_for_training,
            dataset_sha256: dataset_sha256.into(),
            created_at: now.clone(),
            updated_at: now,
            error: None,
        }
    }
}

pub const DEFAULT_RETAINED_JOBS: usize = 256;

/// In-memory job table shared by the HTTP layer and the blocking workers.
///
/// Once the table grows past `retain_limit`, the oldest finished jobs are
/// dropped. Active jobs are never evicted.
#[derive(Debug)]
pub struct FinetuneJobRegistry {
    jobs: Mutex<HashMap<String, FinetuneJob>>,
    retain_limit: usize,
}

impl Default for FinetuneJobRegistry {
    fn default() -> Self {
        Self::with_retain_limit(DEFAULT_RETAINED_JOBS)
    }
}

impl FinetuneJobRegistry {
    pub fn with_retain_limit(retain_limit: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retain_limit,
        }
    }

    pub fn insert(&self, job: FinetuneJob) -> Result<(), FinetuneError> {
        let mut jobs = self.jobs.lock().map_err(|_| FinetuneError::RegistryPoisoned)?;
        jobs.insert(job.job_id.clone(), job);
        evict_finished(&mut jobs, self.retain_limit);
        Ok(())
    }

    pub fn job_count(&self) -> Result<usize, FinetuneError> {
        let jobs = self.jobs.lock().map_err(|_| FinetuneError::RegistryPoisoned)?;
        Ok(jobs.len())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<FinetuneJob>, FinetuneError> {
        let jobs = self.jobs.lock().map_err(|_| FinetuneError::RegistryPoisoned)?;
        Ok(jobs.get(job_id).cloned())
    }

    pub fn transition(
        &self,
        job_id: &str,
        next: JobState,
        error: Option<String>,
    ) -> Result<FinetuneJob, FinetuneError> {
        let mut jobs = self.jobs.lock().map_err(|_| FinetuneError::RegistryPoisoned)?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| FinetuneError::UnknownJob(job_id.to_string()))?;
        if !job.state.can_transition_to(next) {
            return Err(FinetuneError::InvalidTransition {
                from: job.state.as_str(),
                to: next.as_str(),
            });
        }
        job.state = next;
        job.updated_at = timestamp();
        if error.is_some() {
            job.error = error;
        }
        info!(job_id, state = next.as_str(), "finetune job transitioned");
        Ok(job.clone())
    }
}

fn evict_finished(jobs: &mut HashMap<String, FinetuneJob>, retain_limit: usize) {
    if jobs.len() <= retain_limit {
        return;
    }
    let mut finished = jobs
        .values()
        .filter(|job| job.state.is_terminal())
        .map(|job| (job.updated_at.clone(), job.job_id.clone()))
        .collect::<Vec<_>>();
    // RFC 3339 timestamps with a fixed precision order lexicographically.
    finished.sort();
    let excess = jobs.len() - retain_limit;
    for (_, job_id) in finished.into_iter().take(excess) {
        jobs.remove(job_id.as_str());
        debug!(job_id = job_id.as_str(), "evicted finished finetune job");
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
