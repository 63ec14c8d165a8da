//! certgate library
//!
//! Mutual-TLS authentication gate for resource-tree HTTP servers.
//!
//! Every request is authenticated by the client certificate presented on its
//! TLS connection. A pluggable [`Portal`](portal::Portal) resolves the
//! certificate to an avatar: the root of the resource subtree the client may
//! reach. Rejected clients get a 401, portal failures a generic 500.
//!
//! ```text
//! TLS accept (rustls, client cert) ─► Site ─► AuthSessionWrapper
//!                                                │ Portal::login
//!                          ┌─────────────────────┼──────────────────┐
//!                    ResourceWrapper(avatar)  Unauthorized     ErrorPage(500)
//!                    (logout after response)     (401)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod portal;
pub mod realm;
pub mod resource;
pub mod server;
pub mod tls;
pub mod transport;

use std::sync::Arc;

pub use error::{Error, LoginError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::AuthSessionWrapper;
use crate::config::Config;
use crate::portal::{CertificatePortal, Realm};
use crate::server::Site;

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}

/// Site gating `realm` behind a [`CertificatePortal`] configured from
/// `config.portal`.
pub fn build_site(config: &Config, realm: Arc<dyn Realm>) -> Site {
    let portal = CertificatePortal::new(&config.portal, realm);
    Site::new(Arc::new(AuthSessionWrapper::new(Arc::new(portal))))
}
