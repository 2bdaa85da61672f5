//! Error types for chatdeck.
//!
//! Provider failures are classified into a small taxonomy and turned into
//! chat text; they never interrupt the session state machine. Storage
//! failures are recovered locally and only logged.

use thiserror::Error;

/// A classified failure of one upstream provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// No API key was configured for the provider.
    #[error("no API key configured")]
    MissingApiKey,

    /// The provider rejected the API key.
    #[error("invalid API key")]
    Unauthorized,

    /// Credit balance or quota is exhausted, or access was denied.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Too many requests.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Overload or 5xx from the provider.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// Anything the classifier does not recognize (network, protocol, ...).
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Classify a failure from its HTTP status (when known) and message text.
    ///
    /// Message substrings win over status codes: some providers report an
    /// exhausted balance as 400 or 429.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lower = message.to_lowercase();
        let message = message.to_string();

        const QUOTA_HINTS: &[&str] = &[
            "credit balance",
            "insufficient_quota",
            "exceeded your current quota",
            "insufficient credits",
        ];
        const AUTH_HINTS: &[&str] = &[
            "invalid api key",
            "invalid x-api-key",
            "api key not valid",
            "incorrect api key",
            "authentication_error",
        ];

        if QUOTA_HINTS.iter().any(|hint| lower.contains(hint)) {
            return ProviderError::QuotaExhausted(message);
        }
        if status == Some(401) || AUTH_HINTS.iter().any(|hint| lower.contains(hint)) {
            return ProviderError::Unauthorized;
        }
        match status {
            Some(402) | Some(403) => ProviderError::QuotaExhausted(message),
            Some(429) => ProviderError::RateLimited(message),
            Some(code) if (500..=599).contains(&code) => ProviderError::Unavailable(message),
            _ if lower.contains("rate_limit") || lower.contains("rate limit") => {
                ProviderError::RateLimited(message)
            }
            _ if lower.contains("overloaded") => ProviderError::Unavailable(message),
            _ => ProviderError::Other(message),
        }
    }

    /// Markdown warning shown in place of (or after) the assistant reply.
    pub fn warning(&self, vendor: &str) -> String {
        match self {
            ProviderError::MissingApiKey => format!(
                "\n\n⚠️ **Error: Missing {} API Key.**\nSet it in your config file or environment and try again.",
                vendor
            ),
            ProviderError::Unauthorized => format!(
                "\n\n⚠️ **Error: Invalid {} API Key.**\nPlease check your config file.",
                vendor
            ),
            ProviderError::QuotaExhausted(_) => format!(
                "\n\n⚠️ **Error: {} Credit Balance is Exhausted.**\nAdd funds with the provider or switch to another model with `/model`.",
                vendor
            ),
            ProviderError::RateLimited(_) => format!(
                "\n\n⚠️ **Error: {} Rate Limit Reached.**\nPlease wait a moment before sending another message.",
                vendor
            ),
            ProviderError::Unavailable(_) => format!(
                "\n\n⚠️ **Error: {} is Overloaded.**\nThe servers are busy. Please try again in a moment.",
                vendor
            ),
            ProviderError::Other(message) if message.is_empty() => {
                "\n\n⚠️ **System Error**".to_string()
            }
            ProviderError::Other(message) => format!("\n\n⚠️ **System Error** - {}", message),
        }
    }
}

/// Pull a one-line summary out of a provider error body.
///
/// Looks at `error.message`, a string `error`, then `message`; falls back to
/// the trimmed body itself.
pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_string();
    };

    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()));

    match summary {
        Some(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        None => trimmed.to_string(),
    }
}

/// Failures of the persistence layer. Never surfaced to the user.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {size} bytes written, limit is {limit}")]
    QuotaExceeded { size: usize, limit: usize },

    #[error("corrupt session data: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by controller actions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("model '{0}' is not available")]
    UnknownModel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_credit_balance_beats_status() {
        let err = ProviderError::classify(
            Some(400),
            "Your credit balance is too low to access the Anthropic API.",
        );
        assert!(matches!(err, ProviderError::QuotaExhausted(_)));
    }

    #[test]
    fn test_classify_openai_quota_on_429() {
        let err = ProviderError::classify(Some(429), "insufficient_quota: check your plan");
        assert!(matches!(err, ProviderError::QuotaExhausted(_)));
    }

    #[test]
    fn test_classify_auth() {
        assert_eq!(ProviderError::classify(Some(401), "nope"), ProviderError::Unauthorized);
        assert_eq!(
            ProviderError::classify(Some(400), "API key not valid. Please pass a valid API key."),
            ProviderError::Unauthorized
        );
    }

    #[test]
    fn test_classify_access_denied_as_quota() {
        let err = ProviderError::classify(Some(403), "team has no credits");
        assert!(matches!(err, ProviderError::QuotaExhausted(_)));
    }

    #[test]
    fn test_classify_rate_limit_and_overload() {
        assert!(matches!(
            ProviderError::classify(Some(429), "slow down"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            ProviderError::classify(Some(529), "Overloaded"),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            ProviderError::classify(None, "overloaded_error: Overloaded"),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            ProviderError::classify(None, "rate_limit_error: too many"),
            ProviderError::RateLimited(_)
        ));
    }

    #[test]
    fn test_classify_unknown() {
        let err = ProviderError::classify(None, "connection reset");
        assert_eq!(err, ProviderError::Other("connection reset".to_string()));
    }

    #[test]
    fn test_warning_texts() {
        let auth = ProviderError::Unauthorized.warning("Anthropic");
        assert!(auth.starts_with("\n\n⚠️ **Error: Invalid Anthropic API Key.**"));

        let other = ProviderError::Other("socket closed".to_string()).warning("Groq");
        assert_eq!(other, "\n\n⚠️ **System Error** - socket closed");

        let quota = ProviderError::QuotaExhausted(String::new()).warning("xAI");
        assert!(quota.contains("switch to another model"));
    }

    #[test]
    fn test_summarize_error_body() {
        let body = r#"{"error":{"message":"Invalid  API\nkey","type":"invalid_request_error"}}"#;
        assert_eq!(summarize_error_body(body), "Invalid API key");

        assert_eq!(summarize_error_body(r#"{"error":"bad"}"#), "bad");
        assert_eq!(summarize_error_body(r#"{"message":"gone"}"#), "gone");
        assert_eq!(summarize_error_body("  <html>502</html> "), "<html>502</html>");
    }
}
