//! Request authentication.
//!
//! # Modules
//!
//! - `session`: the gate (certificate → credential → portal login)
//! - `wrapper`: logout-tracking proxy for the authorized subtree
//! - `unauthorized`: the 401 leaf

mod session;
mod unauthorized;
mod wrapper;

pub use session::AuthSessionWrapper;
pub use unauthorized::UnauthorizedResource;
pub use wrapper::ResourceWrapper;
