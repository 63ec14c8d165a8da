//! Certificate identity extraction.
//!
//! Parses an X.509 DER-encoded client certificate and extracts the fields the
//! identity policy matches on: Common Name, Organisational Unit, SAN URIs,
//! SAN DNS names and the SHA-256 fingerprint of the whole certificate.

use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Extracted identity fields from a client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertIdentity {
    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// First Organisational Unit (OU) in the subject.
    pub organizational_unit: Option<String>,

    /// Subject Alternative Name: URI entries (e.g. SPIFFE IDs).
    pub san_uris: Vec<String>,

    /// Subject Alternative Name: DNS entries.
    pub san_dns_names: Vec<String>,

    /// Lowercase hex SHA-256 of the DER encoding.
    pub fingerprint: String,

    /// Label for logs: SPIFFE URI, else CN, else a fingerprint prefix.
    pub display_name: String,
}

impl CertIdentity {
    /// Parse a DER-encoded certificate and extract its identity fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` when `der` is not a well-formed certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("Failed to parse client certificate: {e}")))?;

        let common_name = extract_cn(&cert);
        let organizational_unit = extract_ou(&cert);
        let (san_uris, san_dns_names) = extract_sans(&cert);
        let fingerprint = fingerprint(der);
        let display_name = display_name(common_name.as_deref(), &san_uris, &fingerprint);

        Ok(Self {
            common_name,
            organizational_unit,
            san_uris,
            san_dns_names,
            fingerprint,
            display_name,
        })
    }
}

/// Lowercase hex SHA-256 of `der`.
#[must_use]
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_ou(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_organizational_unit()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_sans(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<String>) {
    let mut uris = Vec::new();
    let mut dns_names = Vec::new();

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::URI(uri) => uris.push((*uri).to_owned()),
                GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                _ => {}
            }
        }
    }

    (uris, dns_names)
}

fn display_name(cn: Option<&str>, san_uris: &[String], fingerprint: &str) -> String {
    san_uris
        .iter()
        .find(|u| u.starts_with("spiffe://"))
        .map(String::as_str)
        .or(cn)
        .map_or_else(
            || format!("sha256:{}", &fingerprint[..fingerprint.len().min(16)]),
            str::to_owned,
        )
}
