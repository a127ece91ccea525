pub mod finding;
pub mod keys;
pub mod payload;

pub use finding::{compare_for_listing, severity_rank, status, FindingRecord, GraphStats};
pub use keys::{CanonicalFinding, FindingAttributes, GraphKeys, ValidationError};
pub use payload::{IngestBatch, ScanResult, SemgrepWebhook};
