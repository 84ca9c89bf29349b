//! Credential management
//!
//! Provides [`CredentialResolver`], which finds a provider API key from an
//! explicit argument, the environment, or the config file, and the redacting
//! [`ApiKey`] wrapper that carries it.

mod credentials;

pub use credentials::{ApiKey, CredentialResolver, CredentialSource, EnvLookup};
