//! Credentials that must never reach logs.
//!
//! Re-exports [`secrecy`]. A `SecretString` field renders as `[REDACTED]`
//! under `Debug`, so config structs holding object-store or mail credentials
//! can keep `#[derive(Debug)]` and still be passed to `tracing` fields.
//! Reading the value requires an explicit [`ExposeSecret::expose_secret`].
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StorageAccess {
//!     bucket: String,
//!     key: SecretString,
//! }
//!
//! let access = StorageAccess {
//!     bucket: "class-recordings".to_string(),
//!     key: SecretString::from("hunter2"),
//! };
//! assert!(!format!("{access:?}").contains("hunter2"));
//! assert_eq!(access.key.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_redacts_value() {
        let key = SecretString::from("gcs-hmac-secret");
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("gcs-hmac-secret"));
    }

    #[test]
    fn test_deserialized_credentials_stay_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct MailerCredentials {
            account: String,
            api_key: SecretString,
        }

        let creds: MailerCredentials =
            serde_json::from_str(r#"{"account": "invites", "api_key": "mk-123"}"#).unwrap();

        assert_eq!(creds.api_key.expose_secret(), "mk-123");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("invites"));
        assert!(!rendered.contains("mk-123"));
    }
}
