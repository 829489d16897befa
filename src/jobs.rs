use libc::pid_t;
use tracing::{debug, warn};

use crate::execution::{try_wait, ExitStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Job {
    pub(crate) pid: pid_t,
    pub(crate) command: String,
}

/// Background children started by this shell that have not been reaped yet.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub(crate) fn add(&mut self, pid: pid_t, command: String) {
        debug!(pid, command = command.as_str(), "background job started");
        self.jobs.push(Job { pid, command });
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Reaps the jobs that have terminated, without blocking, and returns them
    /// in the order they were started.
    pub(crate) fn reap(&mut self) -> Vec<(Job, ExitStatus)> {
        let mut finished = Vec::new();

        self.jobs.retain(|job| match try_wait(job.pid) {
            Ok(None) => true,
            Ok(Some(status)) => {
                finished.push((job.clone(), status));
                false
            }
            Err(error) => {
                warn!(pid = job.pid, %error, "dropping background job");
                false
            }
        });

        finished
    }
}
