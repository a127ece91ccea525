use aspm_core::{
	db,
	models::{IngestBatch, ScanResult},
	IngestMode,
};
use daemon::{IngestWorker, WorkerConfig};

fn batch(commit: &str, fingerprints: &[&str]) -> IngestBatch {
	IngestBatch {
		results: fingerprints
			.iter()
			.enumerate()
			.map(|(i, fp)| ScanResult {
				check_id: "rule".into(),
				path: format!("src/file_{i}.py"),
				line: 1,
				message: String::new(),
				severity: "medium".into(),
				code_snippet: String::new(),
				fingerprint: fp.to_string(),
			})
			.collect(),
		repo_name: "acme/app".into(),
		commit: commit.into(),
	}
}

#[tokio::test]
async fn ingests_submitted_batches() {
	let db = db::open_in_memory().await.unwrap();
	let worker = IngestWorker::spawn(db.clone(), WorkerConfig::default());

	let a = worker.submit(batch("c1", &["a1", "a2"])).await.unwrap();
	let b = worker.submit(batch("c2", &["b1"])).await.unwrap();

	let a = a.wait().await.unwrap();
	let b = b.wait().await.unwrap();
	assert_eq!(a.ingested, vec!["a1", "a2"]);
	assert_eq!(b.ingested, vec!["b1"]);

	worker.shutdown().await;
	assert_eq!(db.graph_stats().await.unwrap().findings, 3);
}

#[tokio::test]
async fn shutdown_drains_queue() {
	let db = db::open_in_memory().await.unwrap();
	let worker = IngestWorker::spawn(
		db.clone(),
		WorkerConfig {
			concurrency: 1,
			queue_capacity: 8,
			mode: IngestMode::BestEffort,
		},
	);

	let mut tickets = Vec::new();
	for i in 0..5 {
		let fp = format!("f{i}");
		tickets.push(worker.submit(batch("c", &[fp.as_str()])).await.unwrap());
	}
	worker.shutdown().await;

	for ticket in tickets {
		assert!(ticket.wait().await.unwrap().is_clean());
	}
	assert_eq!(db.graph_stats().await.unwrap().findings, 5);
}

#[tokio::test]
async fn failures_come_back_in_the_report() {
	let db = db::open_in_memory().await.unwrap();
	let worker = IngestWorker::spawn(db, WorkerConfig::default());

	let report = worker
		.submit(batch("c", &["good", " "]))
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	assert_eq!(report.ingested, vec!["good"]);
	assert_eq!(report.failures.len(), 1);
	assert_eq!(report.failures[0].index, 1);

	worker.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_batches_on_one_commit_all_land() {
	let db = db::open_in_memory().await.unwrap();
	let worker = IngestWorker::spawn(db.clone(), WorkerConfig::default());

	let mut tickets = Vec::new();
	for i in 0..12 {
		let fp = format!("p{i}");
		tickets.push(worker.submit(batch("c", &[fp.as_str()])).await.unwrap());
	}
	for ticket in tickets {
		let report = ticket.wait().await.unwrap();
		assert!(report.is_clean(), "{:?}", report.failures);
	}

	worker.shutdown().await;
	let stats = db.graph_stats().await.unwrap();
	assert_eq!(stats.findings, 12);
	assert_eq!(stats.commits, 1);
	assert_eq!(stats.files, 1);
}
