// src/matcher.rs
//! Pure keyword matching against a parsed certificate's CN/SAN fields.

use crate::types::{Keyword, ParsedCertificate};

/// For each keyword, in order, emit at most one `(keyword_id, matched_domain)`.
///
/// CN is checked before SANs; among SANs the first (in original certificate
/// order) that contains the keyword wins. The returned `matched_domain`
/// preserves the certificate's original case even though the comparison
/// itself is case-insensitive.
pub fn match_certificate(cert: &ParsedCertificate, keywords: &[Keyword]) -> Vec<(i64, String)> {
    let mut results = Vec::new();

    for kw in keywords {
        let needle = kw.value.to_lowercase();

        if !cert.common_name.is_empty() && cert.common_name.to_lowercase().contains(&needle) {
            results.push((kw.id, cert.common_name.clone()));
            continue;
        }

        if let Some(san) = cert
            .sans
            .iter()
            .find(|san| san.to_lowercase().contains(&needle))
        {
            results.push((kw.id, san.clone()));
        }
    }

    results
}
