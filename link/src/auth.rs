//! Session credential for the Jobdesk API and push channel.
//!
//! A [`Credential`] is the bearer token issued at login together with the id
//! of the employer account it authenticates. The id names the private push
//! channel (`user.<id>`); the token is attached to every REST call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bearer credential for the current session.
///
/// Two credentials are the same session iff both the token and the user id
/// match. The token is redacted from `Debug` output.
///
/// # Example
///
/// ```rust
/// use jobdesk_link::Credential;
///
/// let credential = Credential::new("eyJhbGc...", "42");
/// assert_eq!(credential.private_channel(), "user.42");
/// ```
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Credential {
    /// Opaque bearer token.
    pub token: String,

    /// Id of the authenticated employer account.
    pub user_id: String,
}

impl Credential {
    /// Create a credential from a token and the id of its user.
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }

    /// Logical name of this user's private channel.
    pub fn private_channel(&self) -> String {
        format!("user.{}", self.user_id)
    }

    /// Attach `Authorization: Bearer <token>` to an HTTP request.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.token)
    }

    /// Whether the credential carries anything usable.
    pub fn is_usable(&self) -> bool {
        !self.token.trim().is_empty() && !self.user_id.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}
