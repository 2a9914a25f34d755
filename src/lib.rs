//! Cognition Bot
//!
//! A Telegram bot that runs remote cognitive services over images and audio:
//! categories, tags, descriptions, colour schemes, face demographics and
//! emotions, and speech-to-text.

/// Remote analysis services and result rendering
pub mod analysis;
/// Telegram bot implementation
pub mod bot;
/// Configuration management
pub mod config;
/// Feedback intake and delivery
pub mod feedback;
/// Artifact download, format checks and conversion
pub mod media;
