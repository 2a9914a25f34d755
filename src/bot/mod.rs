/// Command and message handlers
pub mod handlers;
/// Session state for the artifact-then-task dialogue
pub mod state;
