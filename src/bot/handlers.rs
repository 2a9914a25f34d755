//! Telegram handlers: intake of artifacts, task keyword dispatch, commands,
//! and the feedback flow.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton,
    KeyboardMarkup, KeyboardRemove, MessageId, ReplyParameters,
};
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use crate::analysis::client::GENERIC_FAILURE_MSG;
use crate::analysis::orchestrator::{self, AnalysisTask, HttpBackend, Reply};
use crate::bot::state::{ArtifactSource, PendingArtifact, State};
use crate::config::{Settings, ANALYSIS_IMAGE_SIZE_LIMIT, DOWNLOAD_SIZE_LIMIT};
use crate::{feedback, media};

/// Dialogue handle used by every stateful handler
pub type BotDialogue = Dialogue<State, teloxide::dispatching::dialogue::InMemStorage<State>>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "Start the bot.")]
    Start,
    #[command(description = "Show how to use the bot.")]
    Help,
    #[command(description = "Support the developer.")]
    Donate,
    #[command(description = "Send feedback to the developer.")]
    Feedback,
    #[command(description = "Cancel the current operation.")]
    Cancel,
    #[command(description = "Operator broadcast: /send <user id> <message>.")]
    Send(String),
}

/// Extract the sender id, falling back to 0 for channel posts
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from
        .as_ref()
        .and_then(|u| i64::try_from(u.id.0).ok())
        .unwrap_or(0)
}

/// Keyboard offered for a pending image: task keywords sorted, then
/// Full Analysis and Cancel, laid out in rows of three
#[must_use]
pub fn image_task_keyboard() -> KeyboardMarkup {
    let mut keywords: Vec<&str> = vec![
        AnalysisTask::Categories.keyword(),
        AnalysisTask::Tags.keyword(),
        AnalysisTask::Description.keyword(),
        AnalysisTask::Faces.keyword(),
        AnalysisTask::ImageType.keyword(),
        AnalysisTask::Colour.keyword(),
    ];
    keywords.sort_unstable();
    keywords.push(AnalysisTask::FullAnalysis.keyword());
    keywords.push("Cancel");

    let rows: Vec<Vec<KeyboardButton>> = keywords
        .chunks(3)
        .map(|row| row.iter().map(|k| KeyboardButton::new(*k)).collect())
        .collect();

    KeyboardMarkup::new(rows).resize_keyboard().one_time_keyboard()
}

/// Keyboard offered for a pending audio artifact
#[must_use]
pub fn audio_task_keyboard() -> KeyboardMarkup {
    let rows = vec![
        vec![KeyboardButton::new(AnalysisTask::ToText.keyword())],
        vec![KeyboardButton::new("Cancel")],
    ];
    KeyboardMarkup::new(rows).resize_keyboard().one_time_keyboard()
}

pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    // Group chats get no welcome spam
    if msg.chat.is_group() {
        return Ok(());
    }

    let text = "Welcome to Cognition Bot!\n\n\
                I can provide you cognitive services. I can look for faces to look for \
                their age, gender and emotions in an image. I can also do speech-to-text \
                with an audio etc.\n\n\
                Type /help to see how to use me.";
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    let text = "Simply send me an image or an audio and I will go from there with you. \
                You can also send me links of the image or audio.\n\n\
                When sending me an image, I highly recommend you to send it as a document \
                to prevent compression of the image and to get a more accurate result.";

    let mut request = bot.send_message(msg.chat.id, text);
    if let Ok(url) = reqwest::Url::parse("https://t.me/storebot?start=cognitionbot") {
        let keyboard =
            InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url("Rate me", url)]]);
        request = request.reply_markup(keyboard);
    }
    request.await?;
    Ok(())
}

pub async fn donate(bot: Bot, msg: Message, settings: Arc<Settings>) -> Result<()> {
    let address = settings
        .feedback_email
        .clone()
        .unwrap_or_else(|| "sample@email.com".to_string());
    let text = format!(
        "Want to help keep me online? Please donate to {address} through PayPal.\n\n\
         Donations help me to stay on my server and keep running."
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Cancel is valid from any non-idle state: pending input is discarded and no
/// analysis call is made
pub async fn cancel(bot: Bot, msg: Message, dialogue: BotDialogue) -> Result<()> {
    dialogue.exit().await.map_err(|e| anyhow!(e.to_string()))?;
    bot.send_message(msg.chat.id, "Operation cancelled.")
        .reply_markup(KeyboardRemove::new())
        .await?;
    Ok(())
}

pub async fn feedback_entry(bot: Bot, msg: Message, dialogue: BotDialogue) -> Result<()> {
    dialogue
        .update(State::AwaitingFeedback)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    bot.send_message(msg.chat.id, feedback::FEEDBACK_PROMPT)
        .await?;
    Ok(())
}

/// Operator-only one-shot broadcast: `/send <user id> <message>`.
/// Silently ignored for anyone else.
pub async fn send_broadcast(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    args: String,
) -> Result<()> {
    let operator_id = get_user_id_safe(&msg);
    if !settings.is_operator(operator_id) {
        return Ok(());
    }

    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let target: i64 = match parts.next().and_then(|id| id.parse().ok()) {
        Some(id) => id,
        None => {
            bot.send_message(msg.chat.id, "Usage: /send <user id> <message>")
                .await?;
            return Ok(());
        }
    };
    let text = parts.next().unwrap_or_default().trim();
    if text.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /send <user id> <message>")
            .await?;
        return Ok(());
    }

    if let Err(e) = bot.send_message(ChatId(target), text).await {
        error!("Broadcast to {} failed: {}", target, e);
        bot.send_message(msg.chat.id, "Failed to send message")
            .await?;
    }

    Ok(())
}

/// How the artifact reached the bot; decides which rejection text applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// Uploaded through Telegram (document, photo, audio, voice)
    Upload,
    /// Referenced by URL
    Remote,
}

/// Byte ceiling for one artifact kind
#[must_use]
pub const fn ceiling_for(kind: media::ArtifactKind) -> u64 {
    match kind {
        media::ArtifactKind::Image => ANALYSIS_IMAGE_SIZE_LIMIT,
        media::ArtifactKind::Audio => DOWNLOAD_SIZE_LIMIT,
    }
}

/// Accept/reject decision for one inbound artifact. Runs before any dialogue
/// update or network call, so a rejection leaves the session idle. An unknown
/// declared size is accepted; the download path re-checks the received body.
///
/// # Errors
///
/// Returns the rejection text to send when the declared size is over the
/// ceiling for this artifact kind.
pub fn vet_artifact(
    kind: media::ArtifactKind,
    declared_size: Option<u64>,
    origin: ArtifactOrigin,
) -> Result<media::ArtifactKind, &'static str> {
    if declared_size.is_some_and(|size| size > ceiling_for(kind)) {
        return Err(match origin {
            ArtifactOrigin::Upload => media::IMAGE_TOO_LARGE_MSG,
            ArtifactOrigin::Remote => media::URL_IMAGE_TOO_LARGE_MSG,
        });
    }
    Ok(kind)
}

/// Whether this message qualifies as a new artifact submission
#[must_use]
pub fn is_artifact_message(msg: &Message) -> bool {
    msg.document().is_some()
        || msg.photo().is_some()
        || msg.audio().is_some()
        || msg.voice().is_some()
        || artifact_url(msg).is_some()
}

fn artifact_url(msg: &Message) -> Option<&str> {
    let text = msg.text()?;
    if !(text.starts_with("http://") || text.starts_with("https://")) {
        return None;
    }
    media::guess_kind(text).map(|_| text)
}

/// Intake of a new artifact: classify, enforce ceilings, store exactly one
/// pending reference, and offer the task keyboard for the detected flow.
///
/// Rejections reply with a fixed text and leave the session idle. A new
/// qualifying artifact while another is pending replaces it atomically
/// through the dialogue update.
pub async fn handle_intake(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    backend: Arc<HttpBackend>,
) -> Result<()> {
    let origin_msg = msg.id.0;

    // Document: trust its file name for the MIME guess, then apply ceilings
    if let Some(doc) = msg.document() {
        let Some(kind) = doc.file_name.as_deref().and_then(media::guess_kind) else {
            return Ok(());
        };

        let kind = match vet_artifact(
            kind,
            Some(u64::from(doc.file.size)),
            ArtifactOrigin::Upload,
        ) {
            Ok(kind) => kind,
            Err(rejection) => {
                bot.send_message(msg.chat.id, rejection).await?;
                return Ok(());
            }
        };

        let artifact = PendingArtifact {
            source: ArtifactSource::FileId(doc.file.id.clone()),
            origin_msg,
        };
        return match kind {
            media::ArtifactKind::Image => enter_image_flow(bot, msg, dialogue, artifact).await,
            media::ArtifactKind::Audio => enter_audio_flow(bot, msg, dialogue, artifact).await,
        };
    }

    // Native photo attachment
    if let Some(photo) = msg.photo().and_then(|p| p.last()) {
        if let Err(rejection) = vet_artifact(
            media::ArtifactKind::Image,
            Some(u64::from(photo.file.size)),
            ArtifactOrigin::Upload,
        ) {
            bot.send_message(msg.chat.id, rejection).await?;
            return Ok(());
        }
        let artifact = PendingArtifact {
            source: ArtifactSource::FileId(photo.file.id.clone()),
            origin_msg,
        };
        return enter_image_flow(bot, msg, dialogue, artifact).await;
    }

    // Native audio or voice attachment
    let audio_file = msg
        .audio()
        .map(|a| &a.file)
        .or_else(|| msg.voice().map(|v| &v.file));
    if let Some(file) = audio_file {
        if let Err(rejection) = vet_artifact(
            media::ArtifactKind::Audio,
            Some(u64::from(file.size)),
            ArtifactOrigin::Upload,
        ) {
            bot.send_message(msg.chat.id, rejection).await?;
            return Ok(());
        }
        let artifact = PendingArtifact {
            source: ArtifactSource::FileId(file.id.clone()),
            origin_msg,
        };
        return enter_audio_flow(bot, msg, dialogue, artifact).await;
    }

    // URL: confirm it is live and within the ceiling before accepting
    if let Some(url) = artifact_url(&msg) {
        let kind = match media::guess_kind(url) {
            Some(kind) => kind,
            None => return Ok(()),
        };

        let declared_length = match media::probe_url(backend.http(), url).await {
            Ok(length) => length,
            Err(e) => {
                info!("URL probe failed for {}: {}", url, e);
                bot.send_message(msg.chat.id, media::URL_UNREACHABLE_MSG)
                    .await?;
                return Ok(());
            }
        };

        if let Err(rejection) = vet_artifact(kind, declared_length, ArtifactOrigin::Remote) {
            bot.send_message(msg.chat.id, rejection).await?;
            return Ok(());
        }

        let artifact = PendingArtifact {
            source: ArtifactSource::Url(url.to_string()),
            origin_msg,
        };
        return match kind {
            media::ArtifactKind::Image => enter_image_flow(bot, msg, dialogue, artifact).await,
            media::ArtifactKind::Audio => enter_audio_flow(bot, msg, dialogue, artifact).await,
        };
    }

    Ok(())
}

async fn enter_image_flow(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    artifact: PendingArtifact,
) -> Result<()> {
    dialogue
        .update(State::AwaitingImageTask(artifact))
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    bot.send_message(
        msg.chat.id,
        "Please tell me what do you want me to look for on the image.",
    )
    .reply_markup(image_task_keyboard())
    .await?;
    Ok(())
}

async fn enter_audio_flow(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    artifact: PendingArtifact,
) -> Result<()> {
    dialogue
        .update(State::AwaitingAudioTask(artifact))
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    bot.send_message(
        msg.chat.id,
        "Please tell me what do you want me to do with the audio.",
    )
    .reply_markup(audio_task_keyboard())
    .await?;
    Ok(())
}

/// Reply sink for one task execution, threaded to the artifact message
struct TelegramReply {
    bot: Bot,
    chat_id: ChatId,
    origin: MessageId,
}

#[async_trait]
impl Reply for TelegramReply {
    async fn text(&self, text: &str) -> Result<()> {
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }

    async fn text_threaded(&self, text: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, text)
            .reply_parameters(ReplyParameters::new(self.origin))
            .await?;
        Ok(())
    }

    async fn document(&self, bytes: Vec<u8>, caption: &str) -> Result<()> {
        self.bot
            .send_document(
                self.chat_id,
                InputFile::memory(bytes).file_name("faces.jpg"),
            )
            .caption(caption.to_string())
            .await?;
        Ok(())
    }
}

/// Fetch the pending artifact's bytes; the failure text depends on whether it
/// came from storage or a URL
async fn fetch_artifact(
    bot: &Bot,
    backend: &HttpBackend,
    source: &ArtifactSource,
    ceiling: u64,
    url_failure_msg: &'static str,
) -> Result<Bytes, &'static str> {
    match source {
        ArtifactSource::FileId(file_id) => media::download_telegram_file(bot, file_id)
            .await
            .map_err(|e| {
                error!("Telegram file download failed: {}", e);
                GENERIC_FAILURE_MSG
            }),
        ArtifactSource::Url(url) => media::download_url(backend.http(), url, ceiling)
            .await
            .map_err(|e| {
                warn!("URL download failed for {}: {}", url, e);
                url_failure_msg
            }),
    }
}

/// A task keyword arrived for a pending image. The session ends after the
/// pipeline completes, whatever the outcome; a new artifact starts over.
pub async fn handle_image_task(
    bot: Bot,
    msg: Message,
    artifact: PendingArtifact,
    dialogue: BotDialogue,
    backend: Arc<HttpBackend>,
    font: Arc<ab_glyph::FontVec>,
) -> Result<()> {
    // A fresh artifact replaces the pending one
    if is_artifact_message(&msg) {
        return handle_intake(bot, msg, dialogue, backend).await;
    }

    let text = msg.text().unwrap_or_default();
    if text.eq_ignore_ascii_case("cancel") {
        return cancel(bot, msg, dialogue).await;
    }

    let task = match AnalysisTask::parse(text) {
        Some(task) if task.is_image_task() => task,
        // Unknown keyword: stay in this state and let the user try again
        _ => return Ok(()),
    };

    bot.send_message(msg.chat.id, task.progress_text())
        .reply_markup(KeyboardRemove::new())
        .await?;
    bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;

    // Consume the pending artifact before any network call: the session is
    // terminal from here on, success or not
    dialogue.exit().await.map_err(|e| anyhow!(e.to_string()))?;

    let image = match fetch_artifact(
        &bot,
        &backend,
        &artifact.source,
        ceiling_for(media::ArtifactKind::Image),
        media::IMAGE_DOWNLOAD_FAILED_MSG,
    )
    .await
    {
        Ok(bytes) => bytes,
        Err(user_msg) => {
            bot.send_message(msg.chat.id, user_msg).await?;
            return Ok(());
        }
    };

    let image = match media::normalize_image(image) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Image normalization failed: {}", e);
            bot.send_message(msg.chat.id, GENERIC_FAILURE_MSG).await?;
            return Ok(());
        }
    };

    let reply = TelegramReply {
        bot,
        chat_id: msg.chat.id,
        origin: MessageId(artifact.origin_msg),
    };

    orchestrator::run_image_task(task, backend.as_ref(), &reply, image, &font).await
}

/// A task keyword arrived for a pending audio artifact
pub async fn handle_audio_task(
    bot: Bot,
    msg: Message,
    artifact: PendingArtifact,
    dialogue: BotDialogue,
    backend: Arc<HttpBackend>,
) -> Result<()> {
    if is_artifact_message(&msg) {
        return handle_intake(bot, msg, dialogue, backend).await;
    }

    let text = msg.text().unwrap_or_default();
    if text.eq_ignore_ascii_case("cancel") {
        return cancel(bot, msg, dialogue).await;
    }

    if AnalysisTask::parse(text) != Some(AnalysisTask::ToText) {
        return Ok(());
    }

    bot.send_message(msg.chat.id, AnalysisTask::ToText.progress_text())
        .reply_markup(KeyboardRemove::new())
        .await?;
    bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;

    dialogue.exit().await.map_err(|e| anyhow!(e.to_string()))?;

    let audio = match fetch_artifact(
        &bot,
        &backend,
        &artifact.source,
        ceiling_for(media::ArtifactKind::Audio),
        media::AUDIO_DOWNLOAD_FAILED_MSG,
    )
    .await
    {
        Ok(bytes) => bytes,
        Err(user_msg) => {
            bot.send_message(msg.chat.id, user_msg).await?;
            return Ok(());
        }
    };

    let wav = match media::convert_audio_to_wav(&audio).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Audio conversion failed: {}", e);
            bot.send_message(msg.chat.id, GENERIC_FAILURE_MSG).await?;
            return Ok(());
        }
    };

    let reply = TelegramReply {
        bot,
        chat_id: msg.chat.id,
        origin: MessageId(artifact.origin_msg),
    };

    orchestrator::run_speech(backend.as_ref(), &reply, wav).await
}

/// Free text while the feedback flow is active: validate the language,
/// re-prompt on rejection, deliver and end on acceptance
pub async fn handle_feedback(
    bot: Bot,
    msg: Message,
    dialogue: BotDialogue,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if !feedback::is_acceptable_language(text) {
        bot.send_message(msg.chat.id, feedback::FEEDBACK_LANG_REJECTED_MSG)
            .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, feedback::FEEDBACK_THANKS_MSG)
        .await?;

    let user_id = get_user_id_safe(&msg);
    if let Err(e) = feedback::deliver(&settings, user_id, text).await {
        error!("Feedback delivery failed: {}", e);
    }

    dialogue.exit().await.map_err(|e| anyhow!(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_keyboard_layout() {
        let keyboard = image_task_keyboard();
        let labels: Vec<Vec<String>> = keyboard
            .keyboard
            .iter()
            .map(|row| row.iter().map(|b| b.text.clone()).collect())
            .collect();

        assert_eq!(
            labels,
            vec![
                vec!["Categories", "Colour", "Description"],
                vec!["Faces", "Image Type", "Tags"],
                vec!["Full Analysis", "Cancel"],
            ]
        );
    }

    #[test]
    fn test_oversized_document_is_rejected() {
        let over = ANALYSIS_IMAGE_SIZE_LIMIT + 1;
        assert_eq!(
            vet_artifact(media::ArtifactKind::Image, Some(over), ArtifactOrigin::Upload),
            Err(media::IMAGE_TOO_LARGE_MSG)
        );

        let over = DOWNLOAD_SIZE_LIMIT + 1;
        assert_eq!(
            vet_artifact(media::ArtifactKind::Audio, Some(over), ArtifactOrigin::Upload),
            Err(media::IMAGE_TOO_LARGE_MSG)
        );
    }

    #[test]
    fn test_oversized_url_artifact_is_rejected_with_url_text() {
        assert_eq!(
            vet_artifact(
                media::ArtifactKind::Image,
                Some(ANALYSIS_IMAGE_SIZE_LIMIT + 1),
                ArtifactOrigin::Remote
            ),
            Err(media::URL_IMAGE_TOO_LARGE_MSG)
        );
    }

    #[test]
    fn test_artifact_at_the_ceiling_is_accepted() {
        assert_eq!(
            vet_artifact(
                media::ArtifactKind::Image,
                Some(ANALYSIS_IMAGE_SIZE_LIMIT),
                ArtifactOrigin::Upload
            ),
            Ok(media::ArtifactKind::Image)
        );
        assert_eq!(
            vet_artifact(
                media::ArtifactKind::Audio,
                Some(DOWNLOAD_SIZE_LIMIT),
                ArtifactOrigin::Remote
            ),
            Ok(media::ArtifactKind::Audio)
        );
    }

    #[test]
    fn test_unknown_declared_size_is_accepted() {
        // The download path re-checks the received body
        assert_eq!(
            vet_artifact(media::ArtifactKind::Audio, None, ArtifactOrigin::Remote),
            Ok(media::ArtifactKind::Audio)
        );
    }

    #[test]
    fn test_ceiling_per_artifact_kind() {
        assert_eq!(ceiling_for(media::ArtifactKind::Image), ANALYSIS_IMAGE_SIZE_LIMIT);
        assert_eq!(ceiling_for(media::ArtifactKind::Audio), DOWNLOAD_SIZE_LIMIT);
    }

    #[test]
    fn test_audio_keyboard_layout() {
        let keyboard = audio_task_keyboard();
        let labels: Vec<Vec<String>> = keyboard
            .keyboard
            .iter()
            .map(|row| row.iter().map(|b| b.text.clone()).collect())
            .collect();

        assert_eq!(labels, vec![vec!["To Text"], vec!["Cancel"]]);
    }
}
