//! Classification of free-text provider errors
//!
//! Provider errors arrive as unbounded third-party text, so classification is
//! an ordered rule table matched top to bottom. The first matching rule wins,
//! which makes the order of [`RULES`] the precedence: specific patterns sit
//! above generic ones (an open circuit is checked before a generic 5xx, a 550
//! recipient rejection before the 5xx catch-all).
//!
//! Classification never fails. Unrecognised text is treated as possibly
//! transient: `UNKNOWN` / `TEMPORARY`, retry and fallback both recommended.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Broad class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Authentication,
    RateLimiting,
    Network,
    Validation,
    Recipient,
    Content,
    Quota,
    Configuration,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Authentication => "AUTHENTICATION",
            Self::RateLimiting => "RATE_LIMITING",
            Self::Network => "NETWORK",
            Self::Validation => "VALIDATION",
            Self::Recipient => "RECIPIENT",
            Self::Content => "CONTENT",
            Self::Quota => "QUOTA",
            Self::Configuration => "CONFIGURATION",
            Self::Unknown => "UNKNOWN",
        })
    }
}

/// How serious a failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    /// Likely to go away on its own
    Temporary,
    /// Will not succeed without a change to the request
    Permanent,
    /// Needs operator attention
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Temporary => "TEMPORARY",
            Self::Permanent => "PERMANENT",
            Self::Critical => "CRITICAL",
        })
    }
}

/// A classified failure
///
/// Derived from the raw error every time it is needed. The raw error, not
/// this value, is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// Human readable explanation
    pub message: String,
    /// What the caller or operator should do about it
    pub suggested_action: String,
    pub should_retry: bool,
    pub should_fallback: bool,
    /// Provider that reported the error, when known
    pub provider: Option<String>,
    /// Three digit status code found in, or supplied with, the error
    pub code: Option<String>,
}

struct Rule {
    pattern: Regex,
    category: ErrorCategory,
    severity: ErrorSeverity,
    message: &'static str,
    suggested_action: &'static str,
    should_retry: bool,
    should_fallback: bool,
}

/// Rule definitions in precedence order:
/// (pattern, category, severity, message, action, retry, fallback)
type RuleSpec = (
    &'static str,
    ErrorCategory,
    ErrorSeverity,
    &'static str,
    &'static str,
    bool,
    bool,
);

const RULE_SPECS: &[RuleSpec] = &[
    (
        r"(?i)circuit(\s+breaker)?\s+(is\s+)?open",
        ErrorCategory::Network,
        ErrorSeverity::Temporary,
        "Provider temporarily disabled after repeated failures",
        "Wait for the provider to recover or use another provider",
        true,
        true,
    ),
    (
        r"(?i)\b429\b|rate[\s_-]?limit|too many requests|throttl",
        ErrorCategory::RateLimiting,
        ErrorSeverity::Temporary,
        "Provider rate limit reached",
        "Slow down sending and retry later",
        true,
        true,
    ),
    (
        r"(?i)\b40[13]\b|unauthori[sz]ed|forbidden|invalid api[\s_-]?key|authentication failed|invalid credentials",
        ErrorCategory::Authentication,
        ErrorSeverity::Permanent,
        "Provider rejected the credentials",
        "Check the provider API key and permissions",
        false,
        true,
    ),
    (
        r"(?i)quota|daily limit|monthly limit|insufficient credits|limit exceeded",
        ErrorCategory::Quota,
        ErrorSeverity::Temporary,
        "Provider sending quota exhausted",
        "Upgrade the plan or wait for the quota to reset",
        false,
        true,
    ),
    (
        r"(?i)\b55[013]\b|user unknown|no such user|mailbox (unavailable|not found|does not exist)|recipient (address )?rejected|bounced",
        ErrorCategory::Recipient,
        ErrorSeverity::Permanent,
        "Recipient address was rejected",
        "Verify the recipient address",
        false,
        false,
    ),
    (
        r"(?i)\b40[04]\b|\b422\b|invalid (email|recipient|sender|from|to)\b|malformed|missing required|validation",
        ErrorCategory::Validation,
        ErrorSeverity::Permanent,
        "Request failed validation",
        "Fix the request fields before resending",
        false,
        false,
    ),
    (
        r"(?i)spam|\b552\b|\b554\b|message (too large|size exceeds)|content (rejected|blocked)",
        ErrorCategory::Content,
        ErrorSeverity::Permanent,
        "Message content was rejected",
        "Review the message content and size",
        false,
        true,
    ),
    (
        r"(?i)not configured|missing (api key|configuration|credentials)|invalid configuration|(sender|domain) (not verified|unverified)",
        ErrorCategory::Configuration,
        ErrorSeverity::Critical,
        "Provider is misconfigured",
        "Fix the provider configuration",
        false,
        true,
    ),
    (
        r"(?i)timed?[\s_-]?out|econnrefused|econnreset|enotfound|etimedout|connection (refused|reset|closed|failed)|socket hang up|network|dns",
        ErrorCategory::Network,
        ErrorSeverity::Temporary,
        "Could not reach the provider",
        "Retry shortly, the failure is likely transient",
        true,
        true,
    ),
    (
        r"(?i)\b5\d{2}\b|server error|service unavailable|bad gateway|internal error",
        ErrorCategory::Network,
        ErrorSeverity::Temporary,
        "Provider reported a server error",
        "Retry shortly or use another provider",
        true,
        true,
    ),
];

/// Compiled rule table
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RULE_SPECS
        .iter()
        .filter_map(
            |&(pattern, category, severity, message, suggested_action, retry, fallback)| {
                Regex::new(pattern).ok().map(|pattern| Rule {
                    pattern,
                    category,
                    severity,
                    message,
                    suggested_action,
                    should_retry: retry,
                    should_fallback: fallback,
                })
            },
        )
        .collect()
});

static STATUS_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[1-5]\d{2}\b").ok());

/// Stateless error classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorNormalizer;

impl ErrorNormalizer {
    /// Classify a raw error
    ///
    /// A supplied `code` takes part in matching and is reported as is;
    /// otherwise the first three digit status code in `error` is reported.
    #[must_use]
    pub fn normalize(error: &str, provider: Option<&str>, code: Option<&str>) -> NormalizedError {
        let haystack = match code {
            Some(code) => format!("{code} {error}"),
            None => error.to_string(),
        };

        let code = code
            .map(str::to_string)
            .or_else(|| extract_status_code(error));
        let provider = provider.map(str::to_string);

        RULES
            .iter()
            .find(|rule| rule.pattern.is_match(&haystack))
            .map_or_else(
                || NormalizedError {
                    category: ErrorCategory::Unknown,
                    severity: ErrorSeverity::Temporary,
                    message: "Unrecognised provider error".to_string(),
                    suggested_action: "Retry, and contact support if the problem persists"
                        .to_string(),
                    should_retry: true,
                    should_fallback: true,
                    provider: provider.clone(),
                    code: code.clone(),
                },
                |rule| NormalizedError {
                    category: rule.category,
                    severity: rule.severity,
                    message: rule.message.to_string(),
                    suggested_action: rule.suggested_action.to_string(),
                    should_retry: rule.should_retry,
                    should_fallback: rule.should_fallback,
                    provider: provider.clone(),
                    code: code.clone(),
                },
            )
    }
}

/// First three digit status code in `error`, if any
#[must_use]
pub fn extract_status_code(error: &str) -> Option<String> {
    STATUS_CODE
        .as_ref()?
        .find(error)
        .map(|m| m.as_str().to_string())
}
