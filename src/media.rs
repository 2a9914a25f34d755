//! Artifact I/O: Telegram file downloads, URL probing and fetching, image
//! normalization, and audio conversion.
//!
//! Audio conversion shells out to `ffmpeg` inside a [`tempfile::TempDir`];
//! the directory is removed when the guard drops, so scratch files are
//! cleaned up on every exit path.

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use std::io::Cursor;
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{error, warn};

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};

/// Rejection text for an oversized uploaded document
pub const IMAGE_TOO_LARGE_MSG: &str =
    "The file you sent is too large for me to process. Sorry.";
/// Rejection text for an oversized image behind a URL
pub const URL_IMAGE_TOO_LARGE_MSG: &str =
    "The image on the URL you sent me is too large for me to process. Sorry.";
/// Rejection text for an unreachable URL
pub const URL_UNREACHABLE_MSG: &str =
    "I could not retrieve the file from the URL you sent me. Please try again.";
/// Failure text for an image URL that stopped resolving mid-flow
pub const IMAGE_DOWNLOAD_FAILED_MSG: &str =
    "I could not download the image from the URL you sent me. Please check the URL and try again.";
/// Failure text for an audio URL that stopped resolving mid-flow
pub const AUDIO_DOWNLOAD_FAILED_MSG: &str =
    "I could not download the audio from the URL you sent me. Please check the URL and try again.";

/// Broad artifact classification derived from a guessed MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Audio,
}

/// Guess the artifact kind from a file name or URL path
#[must_use]
pub fn guess_kind(name_or_url: &str) -> Option<ArtifactKind> {
    let path = name_or_url.split(['?', '#']).next().unwrap_or(name_or_url);
    let mime = mime_guess::from_path(path).first()?;

    match mime.type_() {
        t if t == mime_guess::mime::IMAGE => Some(ArtifactKind::Image),
        t if t == mime_guess::mime::AUDIO => Some(ArtifactKind::Audio),
        _ => None,
    }
}

/// Probe a URL before accepting it: verify it answers with a success status
/// and report the declared content length, without consuming the body.
///
/// # Errors
///
/// Returns an error on transport failure or a non-success status.
pub async fn probe_url(http: &reqwest::Client, url: &str) -> Result<Option<u64>> {
    let response = http
        .get(url)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    if !response.status().is_success() {
        bail!("URL {} answered with status {}", url, response.status());
    }

    Ok(response.content_length())
}

/// Download a URL, enforcing the byte ceiling both on the declared length and
/// the received body.
///
/// # Errors
///
/// Returns an error on transport failure, non-success status, or a body
/// larger than `limit`.
pub async fn download_url(http: &reqwest::Client, url: &str, limit: u64) -> Result<Bytes> {
    let response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to download {url}"))?;

    if !response.status().is_success() {
        bail!("URL {} answered with status {}", url, response.status());
    }

    if let Some(length) = response.content_length() {
        if length > limit {
            bail!("URL {} declares {} bytes, over the {} byte ceiling", url, length, limit);
        }
    }

    let body = response.bytes().await?;
    if body.len() as u64 > limit {
        bail!("URL {} body exceeds the {} byte ceiling", url, limit);
    }

    Ok(body)
}

/// Download a stored Telegram file by id, with retry on transient failures
///
/// # Errors
///
/// Returns the last error after all attempts fail.
pub async fn download_telegram_file(bot: &Bot, file_id: &FileId) -> Result<Bytes> {
    retry_telegram_operation(|| async {
        let file = bot.get_file(file_id.clone()).await?;
        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(Bytes::from(buf))
    })
    .await
}

/// Retry a Telegram API operation with exponential backoff and jitter
async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

/// Formats the analysis services accept without conversion
const SUPPORTED_IMAGE_FORMATS: [image::ImageFormat; 4] = [
    image::ImageFormat::Jpeg,
    image::ImageFormat::Png,
    image::ImageFormat::Gif,
    image::ImageFormat::Bmp,
];

/// Re-encode the image as JPEG when its format is outside the supported set;
/// supported formats pass through untouched.
///
/// # Errors
///
/// Returns an error if the payload is not a decodable image.
pub fn normalize_image(bytes: Bytes) -> Result<Bytes> {
    let reader = image::ImageReader::new(Cursor::new(bytes.as_ref()))
        .with_guessed_format()
        .context("failed to guess image format")?;

    match reader.format() {
        Some(format) if SUPPORTED_IMAGE_FORMATS.contains(&format) => Ok(bytes),
        _ => {
            let decoded = reader.decode().context("failed to decode image")?;
            let mut out = Cursor::new(Vec::new());
            decoded
                .to_rgb8()
                .write_to(&mut out, image::ImageFormat::Jpeg)
                .context("failed to re-encode image as JPEG")?;
            Ok(Bytes::from(out.into_inner()))
        }
    }
}

/// Convert an audio buffer to 16 kHz mono WAV via ffmpeg.
///
/// # Errors
///
/// Returns an error if ffmpeg is unavailable or the conversion fails.
pub async fn convert_audio_to_wav(bytes: &[u8]) -> Result<Bytes> {
    let scratch = tempfile::tempdir().context("failed to create scratch directory")?;
    let input = scratch.path().join("input");
    let output = scratch.path().join("output.wav");

    tokio::fs::write(&input, bytes)
        .await
        .context("failed to write scratch audio file")?;

    let result = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(&input)
        .args(["-ar", "16000", "-ac", "1"])
        .arg(&output)
        .output()
        .await
        .context("failed to run ffmpeg")?;

    if !result.status.success() {
        error!(
            "ffmpeg conversion failed: {}",
            String::from_utf8_lossy(&result.stderr)
        );
        return Err(anyhow!("ffmpeg exited with {}", result.status));
    }

    let wav = tokio::fs::read(&output)
        .await
        .context("failed to read converted audio")?;

    // scratch dropped here; both files removed regardless of outcome
    Ok(Bytes::from(wav))
}
