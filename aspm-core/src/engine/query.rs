use std::sync::Arc;

use tracing::warn;

use crate::{
	db::{DbHandle, StoreError},
	explain::{degraded_message, Explainer},
	models::FindingRecord,
};

pub async fn list_risks(db: &DbHandle) -> Result<Vec<FindingRecord>, StoreError> {
	db.list_findings().await
}

pub async fn get_finding(db: &DbHandle, fingerprint: &str) -> Result<Option<FindingRecord>, StoreError> {
	db.get_finding(fingerprint).await
}

/// Any status string is accepted.
pub async fn set_status(db: &DbHandle, fingerprint: &str, status: &str) -> Result<Option<FindingRecord>, StoreError> {
	db.update_status(fingerprint, status).await
}

/// Explain a finding. `Ok(None)` if the fingerprint is unknown, in which
/// case the explainer is never called.
///
/// Explainer failures (including a panic) come back as a degraded message,
/// never as an error. Store failures during the lookup still propagate.
pub async fn explain_risk(
	db: &DbHandle,
	explainer: Arc<dyn Explainer>,
	fingerprint: &str,
) -> Result<Option<String>, StoreError> {
	let Some(finding) = db.get_finding(fingerprint).await? else {
		return Ok(None);
	};

	let provider = explainer.provider().to_string();

	// Providers use blocking HTTP, so run them off the runtime
	let outcome = tokio::task::spawn_blocking(move || explainer.explain(&finding)).await;

	let text = match outcome {
		Ok(Ok(text)) => text,
		Ok(Err(e)) => {
			warn!(provider = %provider, fingerprint, "explainer failed: {e}");
			degraded_message(&provider, &e)
		}
		Err(e) => {
			warn!(provider = %provider, fingerprint, "explainer task failed: {e}");
			degraded_message(&provider, &e)
		}
	};

	Ok(Some(text))
}
