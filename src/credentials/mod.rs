//! Credentials submitted to a [`Portal`](crate::portal::Portal).
//!
//! A request either presents a client certificate, which becomes a
//! [`Credential::Certificate`], or presents nothing, which becomes the
//! [`ANONYMOUS`] sentinel.

mod identity;

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;

pub use identity::{CertIdentity, fingerprint};

use crate::Result;

/// The anonymous credential, used when no client certificate is presented.
pub const ANONYMOUS: Credential = Credential::Anonymous;

/// An identity assertion made by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// No certificate was presented.
    Anonymous,
    /// The peer presented a client certificate.
    Certificate(CertificateCredential),
}

impl Credential {
    /// Default credential factory: wrap the raw peer certificate.
    #[must_use]
    pub fn from_certificate(certificate: CertificateDer<'static>) -> Self {
        Self::Certificate(CertificateCredential::new(certificate))
    }

    /// Returns `true` for the anonymous sentinel.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// A client certificate, as presented on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateCredential {
    certificate: CertificateDer<'static>,
}

impl CertificateCredential {
    /// Wrap a DER-encoded certificate.
    #[must_use]
    pub fn new(certificate: CertificateDer<'static>) -> Self {
        Self { certificate }
    }

    /// The raw certificate.
    #[must_use]
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Parse the certificate into its identity fields.
    pub fn identity(&self) -> Result<CertIdentity> {
        CertIdentity::from_der(self.certificate.as_ref())
    }
}

impl fmt::Debug for CertificateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateCredential")
            .field("sha256", &fingerprint(self.certificate.as_ref()))
            .finish()
    }
}

/// Maps a raw peer certificate to the credential submitted to the portal.
pub type CredentialFactory = Arc<dyn Fn(CertificateDer<'static>) -> Credential + Send + Sync>;

/// The factory used when none is configured.
#[must_use]
pub fn default_credential_factory() -> CredentialFactory {
    Arc::new(Credential::from_certificate)
}
