// src/export.rs
//! Bulk CSV export over the persisted match rows.

use anyhow::{Context, Result};

use crate::types::MatchRecord;

/// Render `records` as a CSV document (header + one row per match), in the
/// order given. Callers typically pass the result of `StateStore::list_matches`.
pub fn export_matches_csv(records: &[MatchRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "id",
        "serial",
        "common_name",
        "sans",
        "issuer",
        "not_before",
        "not_after",
        "keyword_id",
        "matched_domain",
        "ct_log_index",
        "discovered_at",
    ])?;

    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.cert.serial.clone(),
            record.cert.common_name.clone(),
            record.cert.sans.join(";"),
            record.cert.issuer.clone(),
            record.cert.not_before.to_string(),
            record.cert.not_after.to_string(),
            record.cert.keyword_id.to_string(),
            record.cert.matched_domain.clone(),
            record.cert.ct_log_index.to_string(),
            record.discovered_at.to_rfc3339(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .context("failed to flush CSV writer")?;

    String::from_utf8(bytes).context("CSV output was not valid UTF-8")
}
