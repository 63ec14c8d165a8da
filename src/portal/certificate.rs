//! The stock certificate portal.
//!
//! ```text
//! Credential
//!   → Anonymous?        allow_anonymous ? AvatarId::Anonymous : Unauthorized
//!   → Certificate       parse (x509-parser)          failure: LoginFailed
//!   → IdentityPolicy    first match wins             deny:    Unauthorized
//!   → Realm             build the avatar subtree     failure: Unexpected
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{AvatarInterface, IdentityPolicy, LoginSuccess, LogoutHandle, PolicyDecision, Portal};
use crate::config::PortalConfig;
use crate::credentials::{CertIdentity, Credential};
use crate::error::LoginError;
use crate::resource::Resource;

/// Who an avatar is being built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarId {
    /// A client without certificate.
    Anonymous,
    /// A client identified by its certificate.
    Certificate(CertIdentity),
}

impl AvatarId {
    /// Label for logs.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::Anonymous => "<anonymous>",
            Self::Certificate(identity) => &identity.display_name,
        }
    }
}

/// An avatar built by a [`Realm`].
#[derive(Debug)]
pub struct Avatar {
    /// Root of the subtree the client may reach.
    pub resource: Arc<dyn Resource>,
    /// Session state to release once the client is done, if any.
    pub logout: Option<LogoutHandle>,
}

/// Builds avatars for authenticated clients.
///
/// The file-storage server plugs its own realm in here.
#[async_trait]
pub trait Realm: Send + Sync {
    /// Build the avatar for `id`.
    async fn request_avatar(&self, id: &AvatarId) -> anyhow::Result<Avatar>;
}

/// Portal authenticating clients by their TLS certificate.
pub struct CertificatePortal {
    realm: Arc<dyn Realm>,
    policy: IdentityPolicy,
    allow_anonymous: bool,
}

impl CertificatePortal {
    /// Create a portal from configuration and a realm.
    pub fn new(config: &PortalConfig, realm: Arc<dyn Realm>) -> Self {
        let policy = IdentityPolicy::from_config(config);
        if policy.is_empty() {
            warn!("Portal has no identity rules: every certificate will be refused");
        }
        Self {
            realm,
            policy,
            allow_anonymous: config.allow_anonymous,
        }
    }

    fn check(&self, credential: &Credential) -> Result<AvatarId, LoginError> {
        match credential {
            Credential::Anonymous if self.allow_anonymous => Ok(AvatarId::Anonymous),
            Credential::Anonymous => Err(LoginError::Unauthorized(
                "anonymous access is disabled".to_string(),
            )),
            Credential::Certificate(cert) => {
                let identity = cert
                    .identity()
                    .map_err(|e| LoginError::LoginFailed(e.to_string()))?;
                match self.policy.evaluate(&identity) {
                    PolicyDecision::Allow => Ok(AvatarId::Certificate(identity)),
                    PolicyDecision::Deny => Err(LoginError::Unauthorized(format!(
                        "certificate '{}' is not allowed",
                        identity.display_name
                    ))),
                }
            }
        }
    }
}

#[async_trait]
impl Portal for CertificatePortal {
    async fn login(
        &self,
        credential: Credential,
        interface: AvatarInterface,
    ) -> Result<LoginSuccess, LoginError> {
        let id = match self.check(&credential) {
            Ok(id) => id,
            Err(e) => {
                info!(error = %e, "Login refused");
                return Err(e);
            }
        };

        let avatar = self.realm.request_avatar(&id).await?;
        debug!(identity = %id.display_name(), "Login succeeded");

        let name = id.display_name().to_owned();
        let realm_logout = avatar.logout;
        let logout = LogoutHandle::new(move || {
            if let Some(handle) = realm_logout {
                handle.fire();
            }
            debug!(identity = %name, "Session released");
        });

        Ok(LoginSuccess {
            interface,
            avatar: avatar.resource,
            logout,
        })
    }
}
