//! Per-connection transport information.
//!
//! The listener builds one [`ConnectionInfo`] per accepted connection and
//! injects a clone into the extensions of every HTTP request served on it.
//! The site reads it back when building a [`Request`](crate::resource::Request).

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use tokio_util::sync::CancellationToken;

/// Transport-level facts about the connection a request arrived on.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    /// Remote socket address, when known.
    pub remote_addr: Option<SocketAddr>,
    /// Client certificate chain presented during the TLS handshake,
    /// end-entity first. `None` for plain connections or anonymous clients.
    pub peer_certificates: Option<Arc<Vec<CertificateDer<'static>>>>,
    /// Cancelled once the connection has been closed.
    pub closed: CancellationToken,
}

impl ConnectionInfo {
    /// Connection info for a plain (non-TLS) connection.
    #[must_use]
    pub fn plain(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            ..Self::default()
        }
    }

    /// Connection info for a TLS connection with an optional client chain.
    #[must_use]
    pub fn tls(remote_addr: SocketAddr, chain: Option<&[CertificateDer<'static>]>) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            peer_certificates: chain
                .filter(|c| !c.is_empty())
                .map(|c| Arc::new(c.to_vec())),
            closed: CancellationToken::new(),
        }
    }

    /// The end-entity certificate presented by the peer, if any.
    #[must_use]
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.peer_certificates.as_ref().and_then(|chain| chain.first())
    }

    /// Returns `true` once the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4443".parse().unwrap()
    }

    #[test]
    fn plain_connection_has_no_certificate() {
        let info = ConnectionInfo::plain(addr());
        assert!(info.peer_certificate().is_none());
        assert!(!info.is_closed());
    }

    #[test]
    fn tls_connection_exposes_end_entity_first() {
        let leaf = CertificateDer::from(vec![1u8, 2, 3]);
        let issuer = CertificateDer::from(vec![4u8, 5, 6]);
        let info = ConnectionInfo::tls(addr(), Some(&[leaf.clone(), issuer]));
        assert_eq!(info.peer_certificate(), Some(&leaf));
    }

    #[test]
    fn empty_chain_is_treated_as_anonymous() {
        let info = ConnectionInfo::tls(addr(), Some(&[]));
        assert!(info.peer_certificate().is_none());
    }

    #[test]
    fn closing_is_visible_through_clones() {
        let info = ConnectionInfo::plain(addr());
        let seen_by_request = info.clone();
        info.closed.cancel();
        assert!(seen_by_request.is_closed());
    }
}
