//! Default realm: tells clients who they are.
//!
//! ```text
//! /         → "Hello, <display name>"
//! /whoami   → identity as JSON
//! ```
//!
//! Deployments serving files plug their own [`Realm`] into the
//! [`CertificatePortal`](crate::portal::CertificatePortal) instead.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderValue, header};
use serde::Serialize;

use crate::Result;
use crate::credentials::CertIdentity;
use crate::portal::{Avatar, AvatarId, Realm};
use crate::resource::{ErrorPage, RenderOutput, Request, Resource};

/// Realm whose avatars describe the authenticated identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRealm;

#[async_trait]
impl Realm for IdentityRealm {
    async fn request_avatar(&self, id: &AvatarId) -> anyhow::Result<Avatar> {
        Ok(Avatar {
            resource: Arc::new(IdentityHome { id: id.clone() }),
            logout: None,
        })
    }
}

#[derive(Debug)]
struct IdentityHome {
    id: AvatarId,
}

#[async_trait]
impl Resource for IdentityHome {
    async fn get_child(&self, segment: &str, _request: &mut Request) -> Arc<dyn Resource> {
        match segment {
            "whoami" => Arc::new(WhoAmI { id: self.id.clone() }),
            _ => Arc::new(ErrorPage::not_found()),
        }
    }

    async fn render(&self, request: &mut Request) -> Result<RenderOutput> {
        request.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Ok(format!("Hello, {}\n", self.id.display_name()).into())
    }
}

#[derive(Debug)]
struct WhoAmI {
    id: AvatarId,
}

#[derive(Serialize)]
struct WhoAmIBody<'a> {
    anonymous: bool,
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate: Option<&'a CertIdentity>,
}

#[async_trait]
impl Resource for WhoAmI {
    fn is_leaf(&self) -> bool {
        true
    }

    async fn render(&self, request: &mut Request) -> Result<RenderOutput> {
        let certificate = match &self.id {
            AvatarId::Anonymous => None,
            AvatarId::Certificate(identity) => Some(identity),
        };
        let body = serde_json::to_vec(&WhoAmIBody {
            anonymous: certificate.is_none(),
            display_name: self.id.display_name(),
            certificate,
        })?;
        request.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(body.into())
    }
}
