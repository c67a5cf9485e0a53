use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use toonregen_contracts::rounds::CandidateId;
use tracing::debug;

use crate::error_chain_text;
use crate::providers::{GeneratedImage, ProviderCall, SharedProvider};

pub(crate) struct Job {
    pub provider: SharedProvider,
    pub call: ProviderCall,
    /// Set once the candidate is expired or forgotten; a worker that sees it
    /// drops the job without calling the provider.
    pub cancelled: Arc<AtomicBool>,
}

pub(crate) struct Completion {
    pub candidate_id: CandidateId,
    pub outcome: std::result::Result<GeneratedImage, String>,
    pub elapsed: Duration,
}

/// What workers report back, in order per job: `Started` then `Finished`.
pub(crate) enum DispatchEvent {
    Started {
        candidate_id: CandidateId,
        at: Instant,
    },
    Finished(Completion),
}

/// Fixed set of worker threads running blocking provider calls.
///
/// Jobs are taken in submission order; events come back on one channel in
/// completion order. Dropping the pool closes the job queue and detaches the
/// workers: whatever they are still running finishes into a closed channel.
pub(crate) struct DispatchPool {
    jobs: Option<Sender<Job>>,
    events: Receiver<DispatchEvent>,
    workers: usize,
}

impl DispatchPool {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (done_tx, done_rx) = mpsc::channel::<DispatchEvent>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        for worker in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let done_tx = done_tx.clone();
            thread::Builder::new()
                .name(format!("toonregen-dispatch-{worker}"))
                .spawn(move || worker_loop(&job_rx, &done_tx))
                .context("failed to spawn dispatch worker")?;
        }

        Ok(Self {
            jobs: Some(job_tx),
            events: done_rx,
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        let Some(jobs) = self.jobs.as_ref() else {
            anyhow::bail!("dispatch pool is shut down");
        };
        jobs.send(job)
            .map_err(|_| anyhow::anyhow!("dispatch workers are gone"))
    }

    pub fn try_next(&self) -> Option<DispatchEvent> {
        self.events.try_recv().ok()
    }

    pub fn next_within(&self, timeout: Duration) -> Option<DispatchEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.jobs.take();
    }
}

fn worker_loop(jobs: &Mutex<Receiver<Job>>, done: &Sender<DispatchEvent>) {
    loop {
        let next = match jobs.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => return,
        };
        let Ok(job) = next else {
            return;
        };

        let candidate_id = job.call.candidate_id.clone();
        if job.cancelled.load(Ordering::SeqCst) {
            debug!(candidate = %candidate_id, "skipping cancelled job");
            continue;
        }
        let started = Instant::now();
        let notice = DispatchEvent::Started {
            candidate_id: candidate_id.clone(),
            at: started,
        };
        if done.send(notice).is_err() {
            return;
        }
        debug!(
            candidate = %candidate_id,
            provider = job.provider.name(),
            index = job.call.index,
            "provider call started"
        );
        let outcome = job
            .provider
            .generate(&job.call)
            .map_err(|err| error_chain_text(&err, 600));
        let completion = Completion {
            candidate_id,
            outcome,
            elapsed: started.elapsed(),
        };
        if done.send(DispatchEvent::Finished(completion)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{bail, Result};
    use serde_json::Map;
    use toonregen_contracts::rounds::CandidateId;

    use super::{DispatchEvent, DispatchPool, Job};
    use crate::config::CallPolicy;
    use crate::providers::{
        GeneratedImage, ImageProvider, ProviderCall, ProviderInputs, SharedProvider,
    };

    struct EvenOnly {
        calls: AtomicUsize,
    }

    impl ImageProvider for EvenOnly {
        fn name(&self) -> &str {
            "even-only"
        }

        fn generate(&self, call: &ProviderCall) -> Result<GeneratedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if call.index % 2 == 1 {
                bail!("odd index {}", call.index);
            }
            Ok(GeneratedImage {
                bytes: vec![call.index as u8],
                mime_type: "image/png".to_string(),
                metadata: Map::new(),
            })
        }
    }

    #[test]
    fn every_live_job_reports_start_and_completion() -> Result<()> {
        let provider = Arc::new(EvenOnly {
            calls: AtomicUsize::new(0),
        });
        let pool = DispatchPool::new(2)?;
        assert_eq!(pool.workers(), 2);
        for index in 0..5 {
            pool.submit(Job {
                provider: Arc::clone(&provider) as SharedProvider,
                call: ProviderCall {
                    candidate_id: CandidateId::from(format!("c-{index}").as_str()),
                    index,
                    prompt: "p".to_string(),
                    inputs: Arc::new(ProviderInputs::default()),
                    policy: CallPolicy::default(),
                },
                cancelled: Arc::new(AtomicBool::new(index == 4)),
            })?;
        }

        let mut started = 0;
        let mut ok = 0;
        let mut failed = Vec::new();
        while ok + failed.len() < 4 {
            match pool.next_within(Duration::from_secs(5)).expect("event") {
                DispatchEvent::Started { .. } => started += 1,
                DispatchEvent::Finished(completion) => match completion.outcome {
                    Ok(_) => ok += 1,
                    Err(message) => failed.push(message),
                },
            }
        }
        failed.sort();
        assert_eq!(started, 4);
        assert_eq!(ok, 2);
        assert_eq!(failed, vec!["odd index 1", "odd index 3"]);
        assert!(pool.next_within(Duration::from_millis(100)).is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        Ok(())
    }
}
