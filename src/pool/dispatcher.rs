//! Bounded-concurrency dispatch of probes.
//!
//! Epistemic foundation:
//! - K_i: At most `threads` requests are in flight at once (semaphore)
//! - K_i: Elapsed time covers only the request, not the wait for a permit
//! - K_i: Batches are atomic: every probe yields exactly one ProbeResult
//! - B_i: A request may fail → recorded as a rejected response, never dropped
//! - I^R: `threads` and progress display are configurable

use crate::models::{OrmLeakError, Probe, ProbeResponse, ProbeResult, Result};
use crate::oracle::Oracle;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Issues probes through an oracle with a bounded worker pool.
pub struct Dispatcher<O: Oracle + ?Sized> {
    /// Oracle sending the requests (shared with worker tasks)
    oracle: Arc<O>,
    /// Semaphore bounding concurrent requests to the pool size
    semaphore: Arc<Semaphore>,
    /// Probes sent through this dispatcher
    probes_sent: Arc<AtomicU64>,
    /// Show a progress bar over batches
    progress: bool,
}

impl<O: Oracle + ?Sized + 'static> Dispatcher<O> {
    /// Create a new dispatcher.
    pub fn new(oracle: Arc<O>, threads: usize) -> Self {
        Self {
            oracle,
            semaphore: Arc::new(Semaphore::new(threads.max(1))),
            probes_sent: Arc::new(AtomicU64::new(0)),
            progress: false,
        }
    }

    /// Show a progress bar while firing several batches.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn oracle(&self) -> &Arc<O> {
        &self.oracle
    }

    /// Number of probes sent so far.
    pub fn probes_sent(&self) -> u64 {
        self.probes_sent.load(Ordering::Relaxed)
    }

    /// Send one probe, timing the request.
    async fn send_probe(
        oracle: Arc<O>,
        semaphore: Arc<Semaphore>,
        probes_sent: Arc<AtomicU64>,
        probe: Probe,
    ) -> ProbeResult {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ProbeResult {
                    probe,
                    response: ProbeResponse::failed("dispatcher closed"),
                    elapsed: Default::default(),
                };
            }
        };

        let start = Instant::now();
        let response = match oracle.send_request(&probe.payload).await {
            Ok(response) => response,
            Err(e) => {
                debug!(candidate = %probe.candidate, error = %e, "Probe failed");
                ProbeResponse::failed(e.to_string())
            }
        };
        let elapsed = start.elapsed();
        probes_sent.fetch_add(1, Ordering::Relaxed);

        ProbeResult {
            probe,
            response,
            elapsed,
        }
    }

    fn spawn(&self, probes: Vec<Probe>) -> Vec<JoinHandle<ProbeResult>> {
        probes
            .into_iter()
            .map(|probe| {
                tokio::spawn(Self::send_probe(
                    Arc::clone(&self.oracle),
                    Arc::clone(&self.semaphore),
                    Arc::clone(&self.probes_sent),
                    probe,
                ))
            })
            .collect()
    }

    /// Fire a batch in random order and wait for every probe to complete.
    pub async fn fire_batch(&self, mut probes: Vec<Probe>) -> Result<Vec<ProbeResult>> {
        probes.shuffle(&mut rand::rng());

        let handles = self.spawn(probes);
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle
                .await
                .map_err(|e| OrmLeakError::Internal(format!("probe task failed: {e}")))?;
            results.push(result);
        }

        Ok(results)
    }

    /// Fire batches strictly one after another.
    pub async fn fire_batches(&self, batches: Vec<Vec<Probe>>) -> Result<Vec<Vec<ProbeResult>>> {
        let pb = if self.progress && batches.len() > 1 {
            let pb = ProgressBar::new(batches.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut results = Vec::with_capacity(batches.len());
        for batch in batches {
            results.push(self.fire_batch(batch).await?);
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        Ok(results)
    }

    /// Fire probes and return the first hit in submission order.
    ///
    /// Outstanding requests are aborted as soon as the hit is known.
    pub async fn first_match<F>(&self, probes: Vec<Probe>, is_hit: F) -> Result<Option<ProbeResult>>
    where
        F: Fn(&ProbeResponse) -> bool,
    {
        let mut handles = self.spawn(probes).into_iter();

        while let Some(handle) = handles.next() {
            let result = handle
                .await
                .map_err(|e| OrmLeakError::Internal(format!("probe task failed: {e}")))?;
            if is_hit(&result.response) {
                for pending in handles {
                    pending.abort();
                }
                return Ok(Some(result));
            }
        }

        Ok(None)
    }
}
