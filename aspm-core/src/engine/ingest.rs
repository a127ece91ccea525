use thiserror::Error;
use tracing::{info, warn};

use crate::{
	db::{DbHandle, StoreError},
	models::{CanonicalFinding, IngestBatch, ValidationError},
};

#[derive(Debug, Error)]
pub enum IngestError {
	#[error("invalid scan result: {0}")]
	Invalid(#[from] ValidationError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("not attempted: an earlier item in the batch failed")]
	Skipped,
}

/// What to do with the rest of a batch once one item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestMode {
	#[default]
	BestEffort,
	FailFast,
}

impl IngestMode {
	pub fn from_fail_fast(fail_fast: bool) -> Self {
		if fail_fast {
			IngestMode::FailFast
		} else {
			IngestMode::BestEffort
		}
	}
}

#[derive(Debug)]
pub struct ItemFailure {
	/// Position of the result in the batch.
	pub index: usize,
	pub fingerprint: Option<String>,
	pub error: IngestError,
}

#[derive(Debug, Default)]
pub struct IngestReport {
	/// Fingerprints written, in batch order.
	pub ingested: Vec<String>,
	pub failures: Vec<ItemFailure>,
}

impl IngestReport {
	pub fn is_clean(&self) -> bool {
		self.failures.is_empty()
	}

	pub fn total(&self) -> usize {
		self.ingested.len() + self.failures.len()
	}
}

/// Ingest every result in a webhook batch, one store transaction per result.
///
/// Items are independent: in best-effort mode a failing item is recorded and
/// the rest still go in. Replaying a batch only refreshes `updated_at`.
pub async fn ingest_batch(db: &DbHandle, batch: &IngestBatch, mode: IngestMode) -> IngestReport {
	let mut report = IngestReport::default();

	for (index, result) in batch.results.iter().enumerate() {
		let fingerprint = Some(result.fingerprint.trim().to_string()).filter(|f| !f.is_empty());

		let outcome = match CanonicalFinding::from_scan(result, &batch.repo_name, &batch.commit) {
			Ok(finding) => db
				.upsert_finding(&finding)
				.await
				.map(|()| finding.keys.fingerprint)
				.map_err(IngestError::from),
			Err(e) => Err(IngestError::from(e)),
		};

		match outcome {
			Ok(fp) => report.ingested.push(fp),
			Err(error) => {
				warn!(index, fingerprint = ?fingerprint, "scan result not ingested: {error}");
				report.failures.push(ItemFailure { index, fingerprint, error });

				if mode == IngestMode::FailFast {
					for (rest, skipped) in batch.results.iter().enumerate().skip(index + 1) {
						report.failures.push(ItemFailure {
							index: rest,
							fingerprint: Some(skipped.fingerprint.clone()),
							error: IngestError::Skipped,
						});
					}
					break;
				}
			}
		}
	}

	info!(
		repo = %batch.repo_name,
		commit = %batch.commit,
		ingested = report.ingested.len(),
		failed = report.failures.len(),
		"batch ingested"
	);

	report
}
