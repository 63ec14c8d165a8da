//! HTTP serving: the resource-tree site and the (m)TLS listener.

mod body;
mod listener;
mod site;

pub use body::FinishBody;
pub use listener::{Server, shutdown_signal};
pub use site::Site;
