use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::manager::job_manager::JobManager;
use crate::models::job::JobId;
use crate::package::commands::PackageCommands;

/// Result of upgrading one package in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeOutcome {
    pub id: String,
    pub job_id: Option<JobId>,
    pub success: bool,
}

/// Upgrades packages one after another. Each job is awaited through bounded
/// polling so other jobs and queries keep being served meanwhile.
pub fn upgrade_all<I, S>(
    commands: &PackageCommands,
    manager: &JobManager,
    ids: I,
    poll_interval: Duration,
) -> Vec<UpgradeOutcome>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut outcomes = Vec::new();
    for id in ids {
        let id = id.as_ref();
        let job_id = match commands.start_upgrade(manager, id) {
            Ok(job_id) => job_id,
            Err(e) => {
                warn!("Skipping upgrade of '{}': {}", id, e);
                outcomes.push(UpgradeOutcome {
                    id: id.to_string(),
                    job_id: None,
                    success: false,
                });
                continue;
            }
        };

        info!("Upgrading '{}' as job '{}'.", id, job_id);
        let success = manager
            .wait_for_job(&job_id, poll_interval, None)
            .and_then(|job| job.success())
            .unwrap_or(false);
        outcomes.push(UpgradeOutcome {
            id: id.to_string(),
            job_id: Some(job_id),
            success,
        });
    }
    outcomes
}
