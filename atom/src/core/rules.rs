//! Keyword and pattern tables driving text classification.
//!
//! These are data, not code: both tables deserialize from TOML (see
//! [`crate::io::config::load_rules`]) and carry a `version` so a rules file can
//! be swapped without touching the state machine.

use serde::{Deserialize, Serialize};

/// Current version of the built-in rule tables.
pub const RULES_VERSION: u32 = 1;

/// Exponential backoff parameters: `min(base * 2^(attempt-1), cap)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backoff {
    pub base_secs: u64,
    pub cap_secs: u64,
}

/// Rules for turning raw agent output into an [`OutcomeKind`](crate::core::types::OutcomeKind).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierRules {
    pub version: u32,
    /// Case-insensitive regexes that identify a session/usage limit.
    pub session_limit_patterns: Vec<String>,
    /// Added to a parsed reset time.
    pub reset_time_buffer_secs: u64,
    /// Wait used when no reset time can be parsed.
    pub default_session_wait_secs: u64,
    pub network_keywords: Vec<String>,
    /// Substrings that mark a zero-exit invocation as failed anyway.
    pub error_markers: Vec<String>,
    pub network_backoff: Backoff,
    pub other_backoff: Backoff,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            version: RULES_VERSION,
            session_limit_patterns: vec![
                r"(session|usage) limit (reached|exceeded)".to_string(),
                r"limit will reset".to_string(),
                r"5-hour limit".to_string(),
            ],
            reset_time_buffer_secs: 300,
            default_session_wait_secs: 3600,
            network_keywords: ["network", "timeout", "connection", "temporary"]
                .into_iter()
                .map(String::from)
                .collect(),
            error_markers: vec!["api error".to_string()],
            network_backoff: Backoff {
                base_secs: 5,
                cap_secs: 300,
            },
            other_backoff: Backoff {
                base_secs: 10,
                cap_secs: 600,
            },
        }
    }
}

/// Keyword tables for heuristic task scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalyzerRules {
    pub version: u32,
    /// Exact (trimmed, lowercased) texts treated as conversational filler.
    pub fillers: Vec<String>,
    /// Prefixes of short, single-intent requests.
    pub simple_verbs: Vec<String>,
    /// Upper bound on the length of a simple-verb request.
    pub trivial_max_chars: usize,
    pub complex_keywords: Vec<String>,
    pub moderate_keywords: Vec<String>,
    /// Tasks longer than this are COMPLEX regardless of keywords.
    pub complex_length_chars: usize,
    /// Memory queries and fallbacks are truncated to this many characters.
    pub query_max_chars: usize,
}

impl Default for AnalyzerRules {
    fn default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|w| (*w).to_string()).collect()
        }
        Self {
            version: RULES_VERSION,
            fillers: words(&[
                "hello", "hi", "hey", "test", "ping", "thanks", "thank you", "ok",
            ]),
            simple_verbs: words(&[
                "print", "show", "what is", "what's", "list", "echo", "display", "tell me",
            ]),
            trivial_max_chars: 30,
            complex_keywords: words(&[
                "implement",
                "design",
                "build",
                "architecture",
                "migrate",
                "refactor",
                "integrate",
                "system",
                "framework",
                "optimize",
            ]),
            moderate_keywords: words(&[
                "add", "fix", "update", "function", "modify", "change", "create", "improve",
                "debug",
            ]),
            complex_length_chars: 200,
            query_max_chars: 200,
        }
    }
}
