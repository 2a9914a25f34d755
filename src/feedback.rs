//! Feedback collection: language validation and operator delivery.
//!
//! Free-text feedback is accepted only when it reads as English or Chinese.
//! Accepted feedback goes to the operator either as a transactional email or
//! as a structured log record, selected by configuration.

use anyhow::{anyhow, Context, Result};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;
use whatlang::Lang;

use crate::config::Settings;

/// Prompt sent when the feedback flow starts
pub const FEEDBACK_PROMPT: &str =
    "Please send me your feedback or type /cancel to cancel this operation. \
     My developer can understand English and Chinese.";
/// Re-prompt for feedback in an unsupported language
pub const FEEDBACK_LANG_REJECTED_MSG: &str =
    "The feedback you sent is not in English or Chinese. Please try again.";
/// Acknowledgement for accepted feedback
pub const FEEDBACK_THANKS_MSG: &str =
    "Thank you for your feedback, I will let my developer know.";

/// Subject line for feedback email
const FEEDBACK_EMAIL_SUBJECT: &str = "Cognition Bot Feedback";

/// Whether the text reads as English or Chinese with non-zero confidence
#[must_use]
pub fn is_acceptable_language(text: &str) -> bool {
    whatlang::detect(text).is_some_and(|info| {
        matches!(info.lang(), Lang::Eng | Lang::Cmn) && info.confidence() > 0.0
    })
}

/// Deliver accepted feedback to the operator channel.
///
/// # Errors
///
/// Returns an error when email delivery is configured but fails; the log
/// channel never fails.
pub async fn deliver(settings: &Settings, user_id: i64, text: &str) -> Result<()> {
    if settings.email_feedback {
        send_email(settings, user_id, text).await
    } else {
        info!("Feedback received from {}: {}", user_id, text);
        Ok(())
    }
}

async fn send_email(settings: &Settings, user_id: i64, text: &str) -> Result<()> {
    let address = settings
        .feedback_email
        .as_deref()
        .ok_or_else(|| anyhow!("email feedback enabled but FEEDBACK_EMAIL is unset"))?;
    let password = settings
        .feedback_email_password
        .as_deref()
        .ok_or_else(|| anyhow!("email feedback enabled but FEEDBACK_EMAIL_PASSWORD is unset"))?;
    let smtp_host = settings
        .smtp_host
        .as_deref()
        .ok_or_else(|| anyhow!("email feedback enabled but SMTP_HOST is unset"))?;

    let mailbox = address
        .parse()
        .with_context(|| format!("invalid feedback address {address}"))?;

    let message = Message::builder()
        .from(mailbox)
        .to(address
            .parse()
            .with_context(|| format!("invalid feedback address {address}"))?)
        .subject(FEEDBACK_EMAIL_SUBJECT)
        .body(format!("Feedback received from {user_id}\n\n{text}"))
        .context("failed to build feedback email")?;

    let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
        .context("failed to configure SMTP relay")?
        .credentials(Credentials::new(address.to_string(), password.to_string()))
        .build();

    mailer
        .send(message)
        .await
        .context("failed to send feedback email")?;

    Ok(())
}
