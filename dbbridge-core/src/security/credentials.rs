//! Credential container with automatic memory zeroing.
//!
//! Passwords live in `Zeroizing` buffers, are cleared on drop and never show
//! up in `Debug` output.

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

/// Username and optional password for a server engine.
///
/// # Example
///
/// ```rust
/// use dbbridge_core::security::Credentials;
///
/// let creds = Credentials::new("admin", Some("secret".to_string()));
/// assert_eq!(creds.username(), "admin");
/// assert!(creds.has_password());
/// assert!(!format!("{creds:?}").contains("secret"));
/// ```
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Credentials {
    username: Zeroizing<String>,
    password: Zeroizing<Option<String>>,
}

impl Credentials {
    /// Creates new credentials.
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: Zeroizing::new(username.into()),
            password: Zeroizing::new(password),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password as handed to the driver. Empty when none was supplied.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    /// Checks if password is present without exposing it.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username.as_str())
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_new() {
        let creds = Credentials::new("testuser", Some("testpass".to_string()));
        assert_eq!(creds.username(), "testuser");
        assert_eq!(creds.password(), "testpass");
        assert!(creds.has_password());
    }

    #[test]
    fn test_credentials_no_password() {
        let creds = Credentials::new("testuser", None);
        assert!(!creds.has_password());
        assert_eq!(creds.password(), "");
    }

    #[test]
    fn test_debug_masks_password() {
        let creds = Credentials::new("sa", Some("Str0ng!Pass".to_string()));
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("sa"));
        assert!(rendered.contains("****"));
        assert!(!rendered.contains("Str0ng"));
    }

    #[test]
    fn test_credentials_clone() {
        let creds1 = Credentials::new("user", Some("pass".to_string()));
        let creds2 = creds1.clone();
        assert_eq!(creds1.username(), creds2.username());
        assert_eq!(creds1.has_password(), creds2.has_password());
    }
}
