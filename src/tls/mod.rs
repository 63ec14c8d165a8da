//! TLS context policy and certificate tooling.
//!
//! - [`TlsContextBuilder`] builds the cached `rustls::ServerConfig`
//! - [`VerifyCallback`] lets the application decide on client chains
//! - [`load_certs`] / [`load_private_key`] read PEM files
//! - [`CertificateAuthority`] issues gate and device certificates for the
//!   `tls` commands

mod certgen;
mod context;
mod pem;
mod verify;

pub use certgen::{CertificateAuthority, PemPair, Subject};
pub use context::TlsContextBuilder;
pub use pem::{load_certs, load_private_key};
pub use verify::{AcceptAnyCertificate, AcceptPreverified, PeerVerification, VerifyCallback};
