//! Credential models: the persisted access/refresh pair and the redacting secret wrapper.

pub mod credential;
pub mod secret;

pub use credential::*;
pub use secret::*;
