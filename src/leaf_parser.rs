// src/leaf_parser.rs
//! Decodes one RFC 6962 `MerkleTreeLeaf` + `extra_data` pair into a
//! `ParsedCertificate`.

use std::fmt;

use hex::encode as hex_encode;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

use crate::types::ParsedCertificate;

const VERSION_OFFSET: usize = 0;
const LEAF_TYPE_OFFSET: usize = 1;
const TIMESTAMP_OFFSET: usize = 2;
const ENTRY_TYPE_OFFSET: usize = 10;
const X509_LEN_OFFSET: usize = 12;
const X509_CERT_OFFSET: usize = 15;

const ENTRY_TYPE_X509: u16 = 0;
const ENTRY_TYPE_PRECERT: u16 = 1;

/// Why a leaf could not be turned into a `ParsedCertificate`.
///
/// Every variant is non-fatal to the batch: callers count it and move on
/// (see `worker::process_batch`).
#[derive(Debug)]
pub enum LeafParseError {
    /// `leaf_input` (or the `extra_data` framing it points into) was
    /// shorter than its own declared lengths require.
    TooShort,
    /// `entry_type` was neither 0 (x509_entry) nor 1 (precert_entry).
    UnknownType(u16),
    /// The bytes were present and long enough, but did not decode as DER.
    ParseFailed(String),
}

impl fmt::Display for LeafParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafParseError::TooShort => write!(f, "leaf input too short"),
            LeafParseError::UnknownType(t) => write!(f, "unknown entry_type: {t}"),
            LeafParseError::ParseFailed(msg) => write!(f, "certificate parse failed: {msg}"),
        }
    }
}

impl std::error::Error for LeafParseError {}

/// Parse a raw `(leaf_input, extra_data)` pair from `get-entries`.
///
/// `leaf_input` carries the `MerkleTreeLeaf` header and, for `x509_entry`,
/// the certificate itself. For `precert_entry`, `leaf_input` only carries
/// the unparseable TBSCertificate; the parseable certificate lives in
/// `extra_data` (see §4.2 of the spec this implements).
pub fn parse(leaf_input: &[u8], extra_data: &[u8]) -> Result<ParsedCertificate, LeafParseError> {
    if leaf_input.len() < ENTRY_TYPE_OFFSET + 2 {
        return Err(LeafParseError::TooShort);
    }

    let _version = leaf_input[VERSION_OFFSET];
    let _leaf_type = leaf_input[LEAF_TYPE_OFFSET];

    let timestamp = u64::from_be_bytes(
        leaf_input[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]
            .try_into()
            .expect("8-byte slice"),
    );

    let entry_type = u16::from_be_bytes(
        leaf_input[ENTRY_TYPE_OFFSET..ENTRY_TYPE_OFFSET + 2]
            .try_into()
            .expect("2-byte slice"),
    );

    let der = match entry_type {
        ENTRY_TYPE_X509 => extract_x509_der(leaf_input)?,
        ENTRY_TYPE_PRECERT => extract_precert_der(extra_data)?,
        other => return Err(LeafParseError::UnknownType(other)),
    };

    certificate_from_der(der, timestamp)
}

fn extract_x509_der(leaf_input: &[u8]) -> Result<&[u8], LeafParseError> {
    if leaf_input.len() < X509_CERT_OFFSET {
        return Err(LeafParseError::TooShort);
    }

    let len = u24_be(&leaf_input[X509_LEN_OFFSET..X509_LEN_OFFSET + 3]);
    let end = X509_CERT_OFFSET
        .checked_add(len)
        .ok_or(LeafParseError::TooShort)?;

    if leaf_input.len() < end {
        return Err(LeafParseError::TooShort);
    }

    Ok(&leaf_input[X509_CERT_OFFSET..end])
}

fn extract_precert_der(extra_data: &[u8]) -> Result<&[u8], LeafParseError> {
    if extra_data.len() < 3 {
        return Err(LeafParseError::TooShort);
    }

    let len = u24_be(&extra_data[0..3]);
    let end = 3usize.checked_add(len).ok_or(LeafParseError::TooShort)?;

    if extra_data.len() < end {
        return Err(LeafParseError::TooShort);
    }

    Ok(&extra_data[3..end])
}

fn u24_be(bytes: &[u8]) -> usize {
    ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize)
}

fn certificate_from_der(der: &[u8], timestamp: u64) -> Result<ParsedCertificate, LeafParseError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| LeafParseError::ParseFailed(format!("{e:?}")))?;

    let serial = hex_encode(cert.raw_serial());

    let common_name = extract_cn(cert.subject()).unwrap_or_default();

    let mut sans = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    sans.push(dns.to_string());
                }
            }
        }
    }

    let issuer = extract_cn(cert.issuer())
        .or_else(|| extract_organization(cert.issuer()))
        .unwrap_or_default();

    Ok(ParsedCertificate {
        timestamp,
        serial,
        common_name,
        sans,
        issuer,
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
    })
}

fn extract_cn(name: &X509Name) -> Option<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &oid_registry::OID_X509_COMMON_NAME {
                if let Ok(v) = attr.attr_value().as_str() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

fn extract_organization(name: &X509Name) -> Option<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &oid_registry::OID_X509_ORGANIZATION_NAME {
                if let Ok(v) = attr.attr_value().as_str() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}
