use serde::Deserialize;

/// Username/password pair resolved from the credential store. Lives only for
/// the duration of one invocation and is never logged or serialized.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ResolvedCredential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait CredentialStore {
    fn resolve(&self, secret_arn: &str) -> Result<ResolvedCredential, String>;
}

/// Parses the JSON secret string an RDS master-user secret carries.
pub fn parse_secret_string(secret: &str) -> Result<ResolvedCredential, String> {
    let credential: ResolvedCredential = serde_json::from_str(secret)
        .map_err(|error| format!("secret must be JSON with username and password: {error}"))?;

    if credential.username.trim().is_empty() {
        return Err("secret username is empty".to_string());
    }
    if credential.password.is_empty() {
        return Err("secret password is empty".to_string());
    }

    Ok(credential)
}
