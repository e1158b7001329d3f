//! Registry endpoints and login sessions
//!
//! This module describes the two sides of a mirror and how to authenticate against each.

pub mod endpoint;
pub mod session;

pub use endpoint::{AuthMode, CredentialSource, RegistryEndpoint};
pub use session::{RegistrySession, SessionHandle};
