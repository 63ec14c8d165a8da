//! Private CA for issuing gate and device certificates.
//!
//! Backs the `certgate tls` commands. Every issued certificate carries both
//! the `serverAuth` and `clientAuth` extended key usages, so the same CA
//! issues the gate's server certificate and the client certificates the
//! portal authenticates.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use time::OffsetDateTime;

use crate::{Error, Result};

/// Clock skew tolerated between issuer and verifier.
const BACKDATE: time::Duration = time::Duration::minutes(5);

/// A certificate and its private key, PEM encoded.
#[derive(Debug, Clone)]
pub struct PemPair {
    /// Certificate.
    pub cert_pem: String,
    /// PKCS#8 private key.
    pub key_pem: String,
}

impl PemPair {
    /// Write `<stem>.crt` and `<stem>.key` under `dir`, creating it if
    /// needed. On Unix the key file is readable by the owner only.
    pub fn save(&self, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("Cannot create '{}': {e}", dir.display())))?;

        let cert_path = dir.join(format!("{stem}.crt"));
        fs::write(&cert_path, &self.cert_pem)
            .map_err(|e| Error::Config(format!("Cannot write '{}': {e}", cert_path.display())))?;

        let key_path = dir.join(format!("{stem}.key"));
        write_private(&key_path, self.key_pem.as_bytes())
            .map_err(|e| Error::Config(format!("Cannot write '{}': {e}", key_path.display())))
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}

/// Who a certificate is issued to.
#[derive(Debug, Clone)]
pub struct Subject {
    /// Subject common name.
    pub common_name: String,
    /// Subject organizational unit.
    pub organizational_unit: Option<String>,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// URI subject alternative names (e.g. SPIFFE IDs).
    pub uris: Vec<String>,
    /// Days until expiry.
    pub validity_days: u32,
}

impl Subject {
    /// A subject with only a common name, valid for a year.
    #[must_use]
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organizational_unit: None,
            dns_names: Vec::new(),
            uris: Vec::new(),
            validity_days: 365,
        }
    }

    fn alt_names(&self) -> Result<Vec<SanType>> {
        let dns = self.dns_names.iter().map(|name| ia5(name, "DNS").map(SanType::DnsName));
        let uris = self.uris.iter().map(|uri| ia5(uri, "URI").map(SanType::URI));
        dns.chain(uris).collect()
    }
}

fn ia5(value: &str, kind: &str) -> Result<Ia5String> {
    Ia5String::try_from(value)
        .map_err(|e| Error::Certificate(format!("Invalid {kind} SAN '{value}': {e}")))
}

/// A CA able to sign leaf certificates.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    pem: PemPair,
}

impl CertificateAuthority {
    /// Create a new self-signed CA.
    pub fn generate(common_name: &str, validity_days: u32) -> Result<Self> {
        let key = KeyPair::generate().map_err(rcgen_error("generate CA key"))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name, None);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        (params.not_before, params.not_after) = validity(validity_days)?;

        let cert = params
            .self_signed(&key)
            .map_err(rcgen_error("self-sign CA certificate"))?;
        Self::from_pem(&cert.pem(), &key.serialize_pem())
    }

    /// A CA from its PEM certificate and key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem).map_err(rcgen_error("parse CA key"))?;
        let issuer =
            Issuer::from_ca_cert_pem(cert_pem, key).map_err(rcgen_error("parse CA certificate"))?;
        Ok(Self {
            issuer,
            pem: PemPair {
                cert_pem: cert_pem.to_owned(),
                key_pem: key_pem.to_owned(),
            },
        })
    }

    /// A CA from PEM files on disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let read = |path: &Path| {
            fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))
        };
        Self::from_pem(&read(cert_path)?, &read(key_path)?)
    }

    /// The CA's own certificate and key.
    #[must_use]
    pub fn pem(&self) -> &PemPair {
        &self.pem
    }

    /// Sign a fresh key pair for `subject`.
    pub fn issue(&self, subject: &Subject) -> Result<PemPair> {
        let key = KeyPair::generate().map_err(rcgen_error("generate leaf key"))?;

        let mut params = CertificateParams::default();
        params.distinguished_name =
            distinguished_name(&subject.common_name, subject.organizational_unit.as_deref());
        params.subject_alt_names = subject.alt_names()?;
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        (params.not_before, params.not_after) = validity(subject.validity_days)?;

        let cert = params
            .signed_by(&key, &self.issuer)
            .map_err(rcgen_error("sign leaf certificate"))?;

        Ok(PemPair {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority").finish_non_exhaustive()
    }
}

fn distinguished_name(common_name: &str, organizational_unit: Option<&str>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    if let Some(ou) = organizational_unit {
        dn.push(DnType::OrganizationalUnitName, ou);
    }
    dn
}

fn rcgen_error(action: &'static str) -> impl FnOnce(rcgen::Error) -> Error {
    move |e| Error::Certificate(format!("Failed to {action}: {e}"))
}

/// `(not_before, not_after)` for a certificate issued now.
fn validity(days: u32) -> Result<(OffsetDateTime, OffsetDateTime)> {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Internal(format!("System clock before 1970: {e}")))?;
    let now = i64::try_from(since_epoch.as_secs())
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .ok_or_else(|| Error::Internal("System clock out of range".to_string()))?;

    let not_after = now
        .checked_add(time::Duration::days(i64::from(days)))
        .ok_or_else(|| Error::Certificate(format!("Validity of {days} days is out of range")))?;
    Ok((now - BACKDATE, not_after))
}
