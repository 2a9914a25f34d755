//! Speech-to-text result interpretation.
//!
//! The speech endpoint answers with `RecognitionStatus` plus `DisplayText`.
//! Anything other than a successful recognition collapses into one of two
//! static user texts: "not understood" for recognizer-level misses, and the
//! generic failure text for degraded-service outcomes.

use crate::analysis::client::Outcome;

/// Shown when the recognizer produced no transcript
pub const NOT_UNDERSTOOD_MSG: &str = "I could not understand the audio. Sorry";

/// Interpreted result of one speech-to-text call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcription {
    /// The recognized transcript
    Text(String),
    /// The recognizer ran but did not understand the audio
    NotUnderstood,
    /// The service was degraded; carries the static failure text
    ServiceFailure(&'static str),
}

impl Transcription {
    /// The text to send to the user for this result
    #[must_use]
    pub fn user_text(&self) -> &str {
        match self {
            Self::Text(t) => t,
            Self::NotUnderstood => NOT_UNDERSTOOD_MSG,
            Self::ServiceFailure(msg) => msg,
        }
    }
}

/// Map a raw service outcome to a transcription result
#[must_use]
pub fn interpret(outcome: &Outcome) -> Transcription {
    match outcome {
        Outcome::Success(body) => {
            let status = body
                .get("RecognitionStatus")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();

            if status == "Success" {
                body.get("DisplayText")
                    .and_then(serde_json::Value::as_str)
                    .map_or(Transcription::NotUnderstood, |text| {
                        Transcription::Text(text.to_string())
                    })
            } else {
                // NoMatch, InitialSilenceTimeout, BabbleTimeout, ...
                Transcription::NotUnderstood
            }
        }
        Outcome::NoResult => Transcription::NotUnderstood,
        Outcome::QuotaExceeded | Outcome::Failed => {
            // user_message() is always present for these variants
            Transcription::ServiceFailure(
                outcome
                    .user_message()
                    .unwrap_or(crate::analysis::client::GENERIC_FAILURE_MSG),
            )
        }
    }
}
