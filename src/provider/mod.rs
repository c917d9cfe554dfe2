//! Provisioning API seam.
//!
//! The plan executor talks to the outside world through the [`Provisioner`]
//! trait only. The HTTP implementation maps trait calls onto the remote
//! provisioning service; tests substitute a mock.

mod api;
mod http;

pub use api::{Provisioner, ResourceHandle};
pub use http::HttpProvisioner;

#[cfg(test)]
pub use api::MockProvisioner;
