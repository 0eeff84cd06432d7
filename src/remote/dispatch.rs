use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::{RemoteError, RemoteStore};
use crate::journaling::autosave::{SaveRequest, SaveTicket};
use crate::session::document::DocumentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveJob {
    pub ticket: SaveTicket,
    pub document_id: DocumentId,
    pub content: String,
}

impl From<SaveRequest> for SaveJob {
    fn from(request: SaveRequest) -> Self {
        Self {
            ticket: request.ticket,
            document_id: request.document_id,
            content: request.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveResult {
    pub ticket: SaveTicket,
    pub document_id: DocumentId,
    pub outcome: Result<(), RemoteError>,
}

fn run_job(remote: &dyn RemoteStore, job: SaveJob) -> SaveResult {
    let outcome = remote.save_content(&job.document_id, &job.content);
    SaveResult {
        ticket: job.ticket,
        document_id: job.document_id,
        outcome,
    }
}

/// Executes save jobs. Results are collected by the single state thread and
/// fed to the auto-save engine in arrival order.
pub trait SaveDispatch: Send {
    fn submit(&mut self, job: SaveJob);
    fn try_results(&mut self) -> Vec<SaveResult>;
    fn wait_result(&mut self, timeout: Duration) -> Option<SaveResult>;
    fn in_flight(&self) -> usize;
}

/// Runs each save on the calling thread; used by the CLI and tests.
pub struct InlineDispatch {
    remote: Arc<dyn RemoteStore>,
    ready: Vec<SaveResult>,
}

impl InlineDispatch {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            ready: Vec::new(),
        }
    }
}

impl SaveDispatch for InlineDispatch {
    fn submit(&mut self, job: SaveJob) {
        let result = run_job(self.remote.as_ref(), job);
        self.ready.push(result);
    }

    fn try_results(&mut self) -> Vec<SaveResult> {
        std::mem::take(&mut self.ready)
    }

    fn wait_result(&mut self, _timeout: Duration) -> Option<SaveResult> {
        if self.ready.is_empty() {
            None
        } else {
            Some(self.ready.remove(0))
        }
    }

    fn in_flight(&self) -> usize {
        self.ready.len()
    }
}

pub struct ThreadedDispatch {
    jobs: Option<Sender<SaveJob>>,
    results: Receiver<SaveResult>,
    worker: Option<JoinHandle<()>>,
    /// Jobs the worker could not accept, already turned into failures.
    rejected: Vec<SaveResult>,
    in_flight: usize,
}

impl ThreadedDispatch {
    pub fn spawn(remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let (job_tx, job_rx) = unbounded::<SaveJob>();
        let (result_tx, result_rx) = unbounded::<SaveResult>();
        let worker = thread::Builder::new()
            .name("quill-save".into())
            .spawn(move || {
                for job in job_rx {
                    let result = run_job(remote.as_ref(), job);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
                tracing::debug!("save worker stopped");
            })
            .context("spawning save worker")?;
        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            worker: Some(worker),
            rejected: Vec::new(),
            in_flight: 0,
        })
    }
}

impl SaveDispatch for ThreadedDispatch {
    fn submit(&mut self, job: SaveJob) {
        self.in_flight += 1;
        let sent = match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|err| err.into_inner()),
            None => Err(job),
        };
        if let Err(job) = sent {
            tracing::error!(ticket = ?job.ticket, "save worker is gone");
            self.rejected.push(SaveResult {
                ticket: job.ticket,
                document_id: job.document_id,
                outcome: Err(RemoteError::Transient("save worker unavailable".into())),
            });
        }
    }

    fn try_results(&mut self) -> Vec<SaveResult> {
        let mut results = std::mem::take(&mut self.rejected);
        results.extend(self.results.try_iter());
        self.in_flight = self.in_flight.saturating_sub(results.len());
        results
    }

    fn wait_result(&mut self, timeout: Duration) -> Option<SaveResult> {
        let result = if self.rejected.is_empty() {
            match self.results.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        } else {
            self.rejected.remove(0)
        };
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(result)
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl Drop for ThreadedDispatch {
    fn drop(&mut self) {
        self.jobs.take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        // a worker stuck in a remote call is left to finish on its own
        if self.in_flight > 0 {
            tracing::warn!(in_flight = self.in_flight, "detaching busy save worker");
            return;
        }
        if worker.join().is_err() {
            tracing::error!("save worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;
    use assert_matches::assert_matches;

    fn job(ticket: SaveTicket, id: &str, content: &str) -> SaveJob {
        SaveJob {
            ticket,
            document_id: DocumentId::from(id),
            content: content.to_string(),
        }
    }

    #[test]
    fn inline_dispatch_runs_immediately() {
        let remote = Arc::new(MemoryRemote::with_documents([("a", "old")]));
        let mut dispatch = InlineDispatch::new(remote.clone());
        dispatch.submit(job(SaveTicket::for_tests(1), "a", "new"));
        assert_eq!(dispatch.in_flight(), 1);
        let results = dispatch.try_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Ok(()));
        assert_eq!(remote.content(&DocumentId::from("a")).as_deref(), Some("new"));
        assert_eq!(dispatch.in_flight(), 0);
    }

    #[test]
    fn threaded_dispatch_returns_results_in_order() {
        let remote = Arc::new(MemoryRemote::with_documents([("a", ""), ("b", "")]));
        remote.fail_next(&DocumentId::from("b"), RemoteError::Transient("offline".into()));
        let mut dispatch = ThreadedDispatch::spawn(remote.clone()).unwrap();
        dispatch.submit(job(SaveTicket::for_tests(1), "a", "one"));
        dispatch.submit(job(SaveTicket::for_tests(2), "b", "two"));
        assert_eq!(dispatch.in_flight(), 2);

        let first = dispatch.wait_result(Duration::from_secs(5)).unwrap();
        let second = dispatch.wait_result(Duration::from_secs(5)).unwrap();
        assert_eq!(first.ticket, SaveTicket::for_tests(1));
        assert_eq!(first.outcome, Ok(()));
        assert_matches!(second.outcome, Err(RemoteError::Transient(_)));
        assert_eq!(dispatch.in_flight(), 0);
        assert_eq!(remote.save_calls(), 2);
    }

    #[test]
    fn dropping_a_busy_dispatch_does_not_wait_for_the_remote() {
        let remote = Arc::new(MemoryRemote::with_documents([("a", "")]));
        remote.delay(&DocumentId::from("a"), Duration::from_secs(2));
        let mut dispatch = ThreadedDispatch::spawn(remote).unwrap();
        dispatch.submit(job(SaveTicket::for_tests(1), "a", "slow"));

        let started = std::time::Instant::now();
        drop(dispatch);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
