//! Credential protection.
//!
//! Credentials are stored in `Zeroizing` containers, skipped during
//! serialization and redacted from logs and error messages.

mod credentials;

pub use credentials::Credentials;
