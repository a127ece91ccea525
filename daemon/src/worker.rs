use std::sync::Arc;

use aspm_core::{ingest_batch, models::IngestBatch, DbHandle, IngestMode, IngestReport};
use thiserror::Error;
use tokio::{
	sync::{mpsc, oneshot, Semaphore},
	task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
	#[error("ingest worker is shut down")]
	Closed,

	#[error("batch was dropped before it finished")]
	Dropped,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
	/// Batches ingested at once.
	pub concurrency: usize,
	/// Queued batches before `submit` waits.
	pub queue_capacity: usize,
	pub mode: IngestMode,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			concurrency: 4,
			queue_capacity: 64,
			mode: IngestMode::BestEffort,
		}
	}
}

impl From<&aspm_core::config::IngestConfig> for WorkerConfig {
	fn from(c: &aspm_core::config::IngestConfig) -> Self {
		Self {
			concurrency: c.concurrency,
			queue_capacity: c.queue_capacity,
			mode: IngestMode::from_fail_fast(c.fail_fast),
		}
	}
}

struct Job {
	batch: IngestBatch,
	reply: oneshot::Sender<IngestReport>,
}

/// Resolves to the report once the batch has been ingested.
#[derive(Debug)]
pub struct IngestTicket {
	rx: oneshot::Receiver<IngestReport>,
}

impl IngestTicket {
	pub async fn wait(self) -> Result<IngestReport, WorkerError> {
		self.rx.await.map_err(|_| WorkerError::Dropped)
	}
}

/// Handle to the background worker task.
pub struct IngestWorker {
	tx: Option<mpsc::Sender<Job>>,
	task: JoinHandle<()>,
}

impl IngestWorker {
	pub fn spawn(db: DbHandle, config: WorkerConfig) -> Self {
		let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
		let task = tokio::spawn(run(db, rx, config));
		Self { tx: Some(tx), task }
	}

	/// Queue a batch. Waits if the queue is full.
	pub async fn submit(&self, batch: IngestBatch) -> Result<IngestTicket, WorkerError> {
		let tx = self.tx.as_ref().ok_or(WorkerError::Closed)?;
		let (reply, rx) = oneshot::channel();
		tx.send(Job { batch, reply }).await.map_err(|_| WorkerError::Closed)?;
		Ok(IngestTicket { rx })
	}

	/// Stop accepting batches and wait for queued and in-flight ones.
	pub async fn shutdown(mut self) {
		drop(self.tx.take());
		if let Err(e) = (&mut self.task).await {
			warn!("ingest worker task failed: {e}");
		}
	}
}

async fn run(db: DbHandle, mut rx: mpsc::Receiver<Job>, config: WorkerConfig) {
	let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
	let mut in_flight = JoinSet::new();

	info!(concurrency = config.concurrency, mode = ?config.mode, "ingest worker started");

	while let Some(job) = rx.recv().await {
		let Ok(permit) = semaphore.clone().acquire_owned().await else {
			break;
		};
		let db = db.clone();
		let mode = config.mode;

		in_flight.spawn(async move {
			let report = ingest_batch(&db, &job.batch, mode).await;
			drop(permit);
			if job.reply.send(report).is_err() {
				debug!("submitter went away before the report was ready");
			}
		});

		// reap finished batches so the set does not grow unbounded
		while let Some(done) = in_flight.try_join_next() {
			if let Err(e) = done {
				warn!("ingest task failed: {e}");
			}
		}
	}

	while let Some(done) = in_flight.join_next().await {
		if let Err(e) = done {
			warn!("ingest task failed: {e}");
		}
	}

	info!("ingest worker stopped");
}
