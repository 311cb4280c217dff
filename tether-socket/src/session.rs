//! Session token access and redaction.

use tether_core::constants::{TOKEN_PREVIEW_HEAD, TOKEN_PREVIEW_TAIL};

/// Read-only access to the stored auth token.
pub trait TokenSource: Send + Sync {
    /// The current token, or `None` when not signed in.
    fn auth_token(&self) -> Option<String>;
}

/// A fixed token, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(token))
        }
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn auth_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Redacted preview of a token for diagnostics: first 10 and last 6 characters.
///
/// Tokens too short to hide anything render fully masked.
pub fn token_preview(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= TOKEN_PREVIEW_HEAD + TOKEN_PREVIEW_TAIL {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..TOKEN_PREVIEW_HEAD].iter().collect();
    let tail: String = chars[chars.len() - TOKEN_PREVIEW_TAIL..].iter().collect();
    format!("{head}...{tail}")
}
