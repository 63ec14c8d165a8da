//! Client certificate verification driven by an application callback.
//!
//! The callback sees every element of the presented chain, deepest first,
//! together with the result of the standard chain validation ("preverify").
//! It has the final say: a chain that failed preverification can still be
//! accepted (e.g. self-signed device certificates that the portal
//! authorizes by fingerprint), and a chain that passed can still be refused.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use tracing::debug;

use crate::{Error, Result};

/// One chain element as seen by a [`VerifyCallback`].
///
/// rustls hands client verifiers no connection state, so the remote
/// address is not available here; the portal sees it through
/// [`ConnectionInfo`](crate::transport::ConnectionInfo).
#[derive(Debug, Clone, Copy)]
pub struct PeerVerification<'a> {
    /// The certificate at this position.
    pub certificate: &'a CertificateDer<'a>,
    /// Position in the chain; 0 is the client's own certificate.
    pub depth: usize,
    /// Why standard chain validation failed, if it did.
    pub error: Option<&'a rustls::Error>,
    /// `true` when standard chain validation succeeded.
    pub preverify_ok: bool,
}

/// Decides whether a client certificate chain is accepted.
///
/// Called once per chain element; any `false` fails the handshake.
pub trait VerifyCallback: Send + Sync {
    /// Accept or reject one chain element.
    fn verify(&self, peer: &PeerVerification<'_>) -> bool;
}

impl<F> VerifyCallback for F
where
    F: Fn(&PeerVerification<'_>) -> bool + Send + Sync,
{
    fn verify(&self, peer: &PeerVerification<'_>) -> bool {
        self(peer)
    }
}

/// Accepts exactly the chains that pass standard validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptPreverified;

impl VerifyCallback for AcceptPreverified {
    fn verify(&self, peer: &PeerVerification<'_>) -> bool {
        peer.preverify_ok
    }
}

/// Accepts any chain; authorization is left to the portal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyCertificate;

impl VerifyCallback for AcceptAnyCertificate {
    fn verify(&self, _peer: &PeerVerification<'_>) -> bool {
        true
    }
}

/// `ClientCertVerifier` requiring a client certificate and delegating the
/// decision to a [`VerifyCallback`].
pub(crate) struct CallbackVerifier {
    callback: Arc<dyn VerifyCallback>,
    preverifier: Option<Arc<dyn ClientCertVerifier>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl CallbackVerifier {
    /// Build a verifier. With `roots`, chains are preverified against them;
    /// without, every chain fails preverification with `UnknownIssuer`.
    pub(crate) fn new(
        callback: Arc<dyn VerifyCallback>,
        roots: Option<RootCertStore>,
        provider: &Arc<CryptoProvider>,
    ) -> Result<Self> {
        let preverifier = roots
            .map(|roots| {
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(provider))
                    .build()
                    .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))
            })
            .transpose()?;

        Ok(Self {
            callback,
            preverifier,
            algorithms: provider.signature_verification_algorithms,
        })
    }

    fn preverify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        match &self.preverifier {
            Some(inner) => inner
                .verify_client_cert(end_entity, intermediates, now)
                .map(|_| ()),
            None => Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            )),
        }
    }
}

impl fmt::Debug for CallbackVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackVerifier")
            .field("preverify", &self.preverifier.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientCertVerifier for CallbackVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        match &self.preverifier {
            Some(inner) => inner.root_hint_subjects(),
            None => &[],
        }
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let preverified = self.preverify(end_entity, intermediates, now);
        let error = preverified.as_ref().err();

        let chain = std::iter::once(end_entity).chain(intermediates);
        for (depth, certificate) in chain.enumerate().collect::<Vec<_>>().into_iter().rev() {
            let peer = PeerVerification {
                certificate,
                depth,
                error,
                preverify_ok: error.is_none(),
            };
            if !self.callback.verify(&peer) {
                debug!(depth, preverify_ok = peer.preverify_ok, "Client certificate rejected");
                return Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ));
            }
        }

        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
