//! TLS server context construction.
//!
//! Policy applied to every context:
//! - TLS 1.2 and TLS 1.3 only
//! - server key checked against the certificate at construction time
//! - with a verify callback: a client certificate is required and the
//!   callback decides; without: no client certificate is requested
//! - with single-use keys (default): no session resumption, so every
//!   handshake runs a fresh ephemeral key exchange
//! - ALPN: `h2`, then `http/1.1`

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::NoServerSessionStorage;
use rustls::sign::CertifiedKey;
use rustls::{InconsistentKeys, RootCertStore, ServerConfig};
use tracing::{debug, warn};

use super::pem::{load_certs, load_private_key};
use super::verify::{AcceptAnyCertificate, AcceptPreverified, CallbackVerifier, VerifyCallback};
use crate::config::{ClientVerification, TlsConfig};
use crate::{Error, Result};

/// Builds the server's TLS context once and hands out the cached result.
pub struct TlsContextBuilder {
    private_key_file: Option<PathBuf>,
    certificate_file: Option<PathBuf>,
    ca_file: Option<PathBuf>,
    verify_callback: Option<Arc<dyn VerifyCallback>>,
    enable_single_use_keys: bool,
    context: OnceCell<Arc<ServerConfig>>,
}

impl Default for TlsContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsContextBuilder {
    /// A builder with no files, no callback and single-use keys enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            private_key_file: None,
            certificate_file: None,
            ca_file: None,
            verify_callback: None,
            enable_single_use_keys: true,
            context: OnceCell::new(),
        }
    }

    /// Builder for the listener described by `config`.
    ///
    /// `client_verification` maps to the verify callback: `none` sets no
    /// callback, `accept_any` accepts every chain, `trusted_ca` accepts the
    /// chains that validate against `ca_file`.
    #[must_use]
    pub fn from_config(config: &TlsConfig) -> Self {
        let mut builder = Self::new().single_use_keys(config.single_use_keys);
        if let Some(path) = &config.private_key_file {
            builder = builder.private_key_file(path);
        }
        if let Some(path) = &config.certificate_file {
            builder = builder.certificate_file(path);
        }
        if let Some(path) = &config.ca_file {
            builder = builder.ca_file(path);
        }
        match config.client_verification {
            ClientVerification::None => builder,
            ClientVerification::AcceptAny => builder.verify_callback(AcceptAnyCertificate),
            ClientVerification::TrustedCa => builder.verify_callback(AcceptPreverified),
        }
    }

    /// PEM file holding the server private key.
    #[must_use]
    pub fn private_key_file(mut self, path: impl AsRef<Path>) -> Self {
        self.private_key_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// PEM file holding the server certificate chain, end-entity first.
    #[must_use]
    pub fn certificate_file(mut self, path: impl AsRef<Path>) -> Self {
        self.certificate_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// PEM bundle of CAs client chains are preverified against.
    #[must_use]
    pub fn ca_file(mut self, path: impl AsRef<Path>) -> Self {
        self.ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Require client certificates and let `callback` decide on them.
    #[must_use]
    pub fn verify_callback(mut self, callback: impl VerifyCallback + 'static) -> Self {
        self.verify_callback = Some(Arc::new(callback));
        self
    }

    /// Toggle single-use ephemeral keys (default on).
    #[must_use]
    pub fn single_use_keys(mut self, enable: bool) -> Self {
        self.enable_single_use_keys = enable;
        self
    }

    /// The TLS context, built on first call.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when only one of the key and certificate files is
    ///   set, when neither is, or when a file cannot be loaded
    /// - [`Error::CertificateMismatch`] when the key does not belong to the
    ///   certificate
    /// - [`Error::Tls`] for any other rustls failure
    ///
    /// A failed build is not cached; the next call tries again.
    pub fn get_context(&self) -> Result<Arc<ServerConfig>> {
        self.context
            .get_or_try_init(|| self.build().map(Arc::new))
            .cloned()
    }

    fn build(&self) -> Result<ServerConfig> {
        let (cert_path, key_path) = match (&self.certificate_file, &self.private_key_file) {
            (Some(cert), Some(key)) => (cert, key),
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::Config(
                    "certificate_file and private_key_file must be given together".to_string(),
                ));
            }
            (None, None) => {
                return Err(Error::Config(
                    "a TLS context needs certificate_file and private_key_file".to_string(),
                ));
            }
        };

        let provider = Arc::new(aws_lc_rs::default_provider());
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        check_key_matches(&provider, cert_path, &certs, &key)?;

        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?;

        let builder = match &self.verify_callback {
            Some(callback) => {
                let roots = self.ca_file.as_deref().map(load_roots).transpose()?;
                let verifier = CallbackVerifier::new(Arc::clone(callback), roots, &provider)?;
                builder.with_client_cert_verifier(Arc::new(verifier))
            }
            None => builder.with_no_client_auth(),
        };

        let mut config = builder.with_single_cert(certs, key)?;

        if self.enable_single_use_keys {
            config.session_storage = Arc::new(NoServerSessionStorage {});
            config.send_tls13_tickets = 0;
        }

        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        debug!(
            certificate = %cert_path.display(),
            client_auth = self.verify_callback.is_some(),
            single_use_keys = self.enable_single_use_keys,
            "TLS context built"
        );

        Ok(config)
    }
}

fn check_key_matches(
    provider: &CryptoProvider,
    cert_path: &Path,
    certs: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<()> {
    let signing_key = provider.key_provider.load_private_key(key.clone_key())?;
    match CertifiedKey::new(certs.to_vec(), signing_key).keys_match() {
        Ok(()) => Ok(()),
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) => {
            Err(Error::CertificateMismatch {
                certificate: cert_path.display().to_string(),
            })
        }
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {
            warn!(
                certificate = %cert_path.display(),
                "Cannot check whether the private key matches the certificate"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| {
            Error::Config(format!(
                "Failed to add CA cert from '{}' to trust store: {e}",
                path.display()
            ))
        })?;
    }
    Ok(roots)
}

impl fmt::Debug for TlsContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContextBuilder")
            .field("private_key_file", &self.private_key_file)
            .field("certificate_file", &self.certificate_file)
            .field("ca_file", &self.ca_file)
            .field("verify_callback", &self.verify_callback.is_some())
            .field("enable_single_use_keys", &self.enable_single_use_keys)
            .field("built", &self.context.get().is_some())
            .finish()
    }
}
