// src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A brand-protection keyword. Matched case-insensitively as a substring
/// against certificate CN/SAN values, but stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// A certificate as extracted from one CT log entry. Transient: produced
/// only by `leaf_parser::parse`, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    /// Leaf timestamp, ms since Unix epoch.
    pub timestamp: u64,
    /// Serial number rendered as lowercase hex.
    pub serial: String,
    /// Subject Common Name, empty if absent.
    pub common_name: String,
    /// DNS SAN entries in their original order.
    pub sans: Vec<String>,
    /// Issuer CN, or first issuer Organization if CN absent, else empty.
    pub issuer: String,
    pub not_before: i64,
    pub not_after: i64,
}

/// A certificate that matched at least one keyword, as persisted.
#[derive(Debug, Clone)]
pub struct MatchedCertificate {
    pub serial: String,
    pub common_name: String,
    pub sans: Vec<String>,
    pub issuer: String,
    pub not_before: i64,
    pub not_after: i64,
    pub timestamp: u64,
    pub keyword_id: i64,
    pub matched_domain: String,
    pub ct_log_index: u64,
}

impl MatchedCertificate {
    pub fn from_parsed(
        cert: &ParsedCertificate,
        keyword_id: i64,
        matched_domain: String,
        ct_log_index: u64,
    ) -> Self {
        Self {
            serial: cert.serial.clone(),
            common_name: cert.common_name.clone(),
            sans: cert.sans.clone(),
            issuer: cert.issuer.clone(),
            not_before: cert.not_before,
            not_after: cert.not_after,
            timestamp: cert.timestamp,
            keyword_id,
            matched_domain,
            ct_log_index,
        }
    }
}

/// A persisted row of `matched_certificates`, as read back for listing/export.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub id: i64,
    pub cert: MatchedCertificate,
    pub discovered_at: DateTime<Utc>,
}

/// The singleton progress/metrics row. Exactly one exists per deployment.
#[derive(Debug, Clone)]
pub struct MonitorProgress {
    pub last_processed_index: u64,
    pub last_tree_size: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_processed: u64,
    pub certs_in_last_cycle: u64,
    pub matches_in_last_cycle: u64,
    pub parse_errors_in_last_cycle: u64,
    pub is_running: bool,
    pub last_error: String,
    pub updated_at: DateTime<Utc>,
}

impl MonitorProgress {
    /// The state of a brand new deployment: nothing processed, worker not running.
    pub fn fresh() -> Self {
        let now = Utc::now();
        Self {
            last_processed_index: 0,
            last_tree_size: 0,
            last_run_at: None,
            total_processed: 0,
            certs_in_last_cycle: 0,
            matches_in_last_cycle: 0,
            parse_errors_in_last_cycle: 0,
            is_running: false,
            last_error: String::new(),
            updated_at: now,
        }
    }
}

/// Filters for the paginated match-listing read model.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub keyword_id: Option<i64>,
    pub domain_pattern: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl MatchQuery {
    pub fn first_page() -> Self {
        Self {
            keyword_id: None,
            domain_pattern: None,
            limit: 100,
            offset: 0,
        }
    }
}
