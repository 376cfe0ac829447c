//! Header credentials for the target and source APIs.

use reqwest::blocking::RequestBuilder;

pub const EMAIL_HEADER: &str = "X-CH-Auth-Email";
pub const TOKEN_HEADER: &str = "X-CH-Auth-API-Token";

/// How a request is authenticated. Resolved by the caller (flag > env);
/// this crate never reads the environment.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Email + API token header pair.
    EmailToken { email: String, token: String },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `Authorization: Token <token>` (NetBox).
    Token(String),
}

impl Credentials {
    pub fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::EmailToken { email, token } => req.header(EMAIL_HEADER, email).header(TOKEN_HEADER, token),
            Self::Bearer(token) => req.bearer_auth(token),
            Self::Token(token) => req.header(reqwest::header::AUTHORIZATION, format!("Token {token}")),
        }
    }
}

// Tokens stay out of logs and panics.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmailToken { email, .. } => write!(f, "EmailToken({email}, ***)"),
            Self::Bearer(_) => write!(f, "Bearer(***)"),
            Self::Token(_) => write!(f, "Token(***)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_tokens() {
        let creds = Credentials::EmailToken {
            email: "ops@example.com".into(),
            token: "s3cret".into(),
        };
        let shown = format!("{creds:?} {:?}", Credentials::Bearer("s3cret".into()));
        assert!(!shown.contains("s3cret"));
        assert!(shown.contains("ops@example.com"));
    }
}
