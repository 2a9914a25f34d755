//! Per-chat dialogue state.
//!
//! The session is a sum type: which artifact is pending is carried by the
//! state itself, so a session can never hold both a stored-file reference and
//! a URL. A new qualifying artifact replaces the pending one atomically via a
//! dialogue update; reaching a terminal point resets the dialogue to `Idle`.

use serde::{Deserialize, Serialize};
use teloxide::types::FileId;

/// Where the pending artifact lives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactSource {
    /// A file stored by the messaging gateway
    FileId(FileId),
    /// A remote URL the user sent
    Url(String),
}

/// The single pending artifact of an active session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingArtifact {
    pub source: ArtifactSource,
    /// Message that carried the artifact, for threaded replies
    pub origin_msg: i32,
}

/// Represents the current state of the user dialogue
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub enum State {
    /// No active session
    #[default]
    Idle,
    /// An image artifact is pending; waiting for a task keyword
    AwaitingImageTask(PendingArtifact),
    /// An audio artifact is pending; waiting for a task keyword
    AwaitingAudioTask(PendingArtifact),
    /// Waiting for free-text feedback
    AwaitingFeedback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        assert!(matches!(State::default(), State::Idle));
    }

    #[tokio::test]
    async fn test_cancel_resets_every_waiting_state_to_idle() {
        use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};
        use teloxide::types::ChatId;

        let artifact = PendingArtifact {
            source: ArtifactSource::Url("https://example.com/pic.jpg".to_string()),
            origin_msg: 3,
        };
        let waiting = [
            State::AwaitingImageTask(artifact.clone()),
            State::AwaitingAudioTask(artifact),
            State::AwaitingFeedback,
        ];

        let storage = InMemStorage::<State>::new();
        for state in waiting {
            let dialogue = Dialogue::new(storage.clone(), ChatId(7));
            dialogue.update(state).await.expect("state stored");

            // Cancelling exits the dialogue; pending input goes with it
            dialogue.exit().await.expect("state cleared");
            assert!(
                dialogue.get().await.expect("storage readable").is_none(),
                "cancelled session must fall back to the default Idle state"
            );
        }
    }

    #[test]
    fn test_pending_artifact_holds_one_source() {
        let artifact = PendingArtifact {
            source: ArtifactSource::Url("https://example.com/pic.jpg".to_string()),
            origin_msg: 7,
        };
        let state = State::AwaitingImageTask(artifact.clone());

        // Replacing the artifact is a whole-state swap, never a partial merge
        let replaced = State::AwaitingImageTask(PendingArtifact {
            source: ArtifactSource::FileId(FileId("abc123".to_string())),
            origin_msg: 9,
        });

        match (&state, &replaced) {
            (State::AwaitingImageTask(a), State::AwaitingImageTask(b)) => {
                assert_ne!(a, b);
                assert_eq!(a, &artifact);
            }
            _ => panic!("both states should be awaiting an image task"),
        }
    }
}
