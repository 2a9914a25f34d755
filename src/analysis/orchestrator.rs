//! Per-task analysis pipelines.
//!
//! Each task maps to a fixed pipeline of one or two service calls. The
//! two-call tasks (faces, full analysis) chain the vision face detection into
//! the emotion call, correlating the two results by face rectangle, and
//! implement the partial-failure policy: whichever side degrades, the user is
//! told which capability is missing and still receives whatever is available.

use ab_glyph::FontVec;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, warn};

use crate::analysis::client::{Outcome, ServiceClient, GENERIC_FAILURE_MSG};
use crate::analysis::faces::{
    build_records, parse_accent_colour, serialize_rectangles, FaceRecords, FaceRect,
};
use crate::analysis::render;
use crate::analysis::speech;
use crate::analysis::vision::{features_param, EmotionFace, VisionAnalysis, VisualFeature};
use crate::config::Settings;

/// Shown when neither service found a face
pub const NO_FACES_MSG: &str = "I could not find any faces on the image.";
/// Shown when emotions were annotated but demographic data was unavailable
pub const DEMOGRAPHICS_MISSING_MSG: &str =
    "I could only look at the emotions on the image but not the age and gender \
     as I probably ran out of quota of processing that information.";

/// The analysis capability selected by the user for the current artifact.
/// Immutable once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisTask {
    FullAnalysis,
    Categories,
    Colour,
    Description,
    Faces,
    ImageType,
    Tags,
    ToText,
}

impl AnalysisTask {
    /// Parse a task keyword, case-insensitively. Both spellings of colour are
    /// accepted. Returns `None` for anything outside the closed set.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "full analysis" => Some(Self::FullAnalysis),
            "categories" => Some(Self::Categories),
            "colour" | "color" => Some(Self::Colour),
            "description" => Some(Self::Description),
            "faces" => Some(Self::Faces),
            "image type" => Some(Self::ImageType),
            "tags" => Some(Self::Tags),
            "to text" => Some(Self::ToText),
            _ => None,
        }
    }

    /// The keyboard label for this task
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::FullAnalysis => "Full Analysis",
            Self::Categories => "Categories",
            Self::Colour => "Colour",
            Self::Description => "Description",
            Self::Faces => "Faces",
            Self::ImageType => "Image Type",
            Self::Tags => "Tags",
            Self::ToText => "To Text",
        }
    }

    /// Acknowledgement sent while the pipeline runs
    #[must_use]
    pub const fn progress_text(self) -> &'static str {
        match self {
            Self::FullAnalysis => "Analysing the image.",
            Self::Categories => "Looking for the categories on the image.",
            Self::Colour => "Analysing the colours on the image.",
            Self::Description => "Trying to describe the image.",
            Self::Faces => "Analysing the faces on the image.",
            Self::ImageType => "Identifying the image type.",
            Self::Tags => "Looking for the tags on the image.",
            Self::ToText => "Analysing your audio.",
        }
    }

    /// Whether this task operates on an image artifact
    #[must_use]
    pub const fn is_image_task(self) -> bool {
        !matches!(self, Self::ToText)
    }
}

/// Outbound analysis calls, abstracted for testing
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// One vision analysis call with the given feature flags
    async fn vision(
        &self,
        image: &Bytes,
        features: &[VisualFeature],
        details: Option<&str>,
    ) -> Outcome;

    /// One face-emotion call; `face_rectangles` is the serialized rectangle
    /// list from a prior detection, absent when nothing was detected
    async fn emotion(&self, image: &Bytes, face_rectangles: Option<&str>) -> Outcome;

    /// One speech-to-text call over a mono WAV buffer
    async fn speech(&self, wav: &Bytes) -> Outcome;
}

/// Production backend: the retrying client against the configured endpoints
pub struct HttpBackend {
    client: ServiceClient,
    settings: Arc<Settings>,
}

impl HttpBackend {
    #[must_use]
    pub fn new(client: ServiceClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// The shared HTTP client, for plain downloads and URL probing
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        self.client.http()
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn vision(
        &self,
        image: &Bytes,
        features: &[VisualFeature],
        details: Option<&str>,
    ) -> Outcome {
        let features = features_param(features);
        let mut params = vec![("visualFeatures", features.as_str())];
        if let Some(details) = details {
            params.push(("details", details));
        }

        self.client
            .execute(
                &self.settings.vision_url,
                &self.settings.vision_token,
                image.clone(),
                &params,
            )
            .await
    }

    async fn emotion(&self, image: &Bytes, face_rectangles: Option<&str>) -> Outcome {
        let params: Vec<(&str, &str)> = face_rectangles
            .map(|rects| vec![("faceRectangles", rects)])
            .unwrap_or_default();

        self.client
            .execute(
                &self.settings.emotion_url,
                &self.settings.emotion_token,
                image.clone(),
                &params,
            )
            .await
    }

    async fn speech(&self, wav: &Bytes) -> Outcome {
        self.client
            .execute(
                &self.settings.speech_url,
                &self.settings.speech_token,
                wav.clone(),
                &[("language", "en-US"), ("format", "simple")],
            )
            .await
    }
}

/// Outbound replies for one task execution, abstracted for testing
#[async_trait]
pub trait Reply: Send + Sync {
    /// Send plain text
    async fn text(&self, text: &str) -> Result<()>;

    /// Send text threaded to the message that carried the artifact
    async fn text_threaded(&self, text: &str) -> Result<()>;

    /// Send an image document with a caption
    async fn document(&self, bytes: Vec<u8>, caption: &str) -> Result<()>;
}

/// Run one image task pipeline to completion.
///
/// # Errors
///
/// Returns an error only when a reply cannot be delivered; service failures
/// are absorbed into user-facing text per the partial-failure policy.
pub async fn run_image_task(
    task: AnalysisTask,
    backend: &dyn AnalysisBackend,
    reply: &dyn Reply,
    image: Bytes,
    font: &FontVec,
) -> Result<()> {
    match task {
        AnalysisTask::Categories => run_categories(backend, reply, &image).await,
        AnalysisTask::Colour => run_colour(backend, reply, &image).await,
        AnalysisTask::Description => run_description(backend, reply, &image).await,
        AnalysisTask::ImageType => run_image_type(backend, reply, &image).await,
        AnalysisTask::Tags => run_tags(backend, reply, &image).await,
        AnalysisTask::Faces => run_faces(backend, reply, &image, font).await,
        AnalysisTask::FullAnalysis => run_full_analysis(backend, reply, &image, font).await,
        AnalysisTask::ToText => {
            // Audio tasks go through run_speech; reaching here is a dispatch bug
            warn!("ToText dispatched as an image task");
            reply.text(GENERIC_FAILURE_MSG).await
        }
    }
}

/// Run the speech-to-text pipeline over an already converted WAV buffer.
///
/// # Errors
///
/// Returns an error only when the reply cannot be delivered.
pub async fn run_speech(backend: &dyn AnalysisBackend, reply: &dyn Reply, wav: Bytes) -> Result<()> {
    let outcome = backend.speech(&wav).await;
    let transcription = speech::interpret(&outcome);
    reply.text_threaded(transcription.user_text()).await
}

/// Parse a success payload, logging and reporting malformed bodies
async fn parse_analysis(body: serde_json::Value, reply: &dyn Reply) -> Result<Option<VisionAnalysis>> {
    match serde_json::from_value::<VisionAnalysis>(body) {
        Ok(analysis) => Ok(Some(analysis)),
        Err(e) => {
            error!("Malformed vision response: {}", e);
            reply.text(GENERIC_FAILURE_MSG).await?;
            Ok(None)
        }
    }
}

async fn run_categories(
    backend: &dyn AnalysisBackend,
    reply: &dyn Reply,
    image: &Bytes,
) -> Result<()> {
    let outcome = backend
        .vision(image, &[VisualFeature::Categories], None)
        .await;

    match outcome {
        Outcome::Success(body) => {
            if let Some(analysis) = parse_analysis(body, reply).await? {
                reply
                    .text_threaded(&render::categories_reply(&analysis.categories))
                    .await?;
            }
        }
        other => {
            if let Some(msg) = other.user_message() {
                reply.text(msg).await?;
            }
        }
    }

    Ok(())
}

async fn run_tags(backend: &dyn AnalysisBackend, reply: &dyn Reply, image: &Bytes) -> Result<()> {
    let outcome = backend.vision(image, &[VisualFeature::Tags], None).await;

    match outcome {
        Outcome::Success(body) => {
            if let Some(analysis) = parse_analysis(body, reply).await? {
                reply
                    .text_threaded(&render::tags_reply(&analysis.tags))
                    .await?;
            }
        }
        other => {
            if let Some(msg) = other.user_message() {
                reply.text(msg).await?;
            }
        }
    }

    Ok(())
}

async fn run_description(
    backend: &dyn AnalysisBackend,
    reply: &dyn Reply,
    image: &Bytes,
) -> Result<()> {
    let outcome = backend
        .vision(image, &[VisualFeature::Description], Some("Landmarks"))
        .await;

    match outcome {
        Outcome::Success(body) => {
            if let Some(analysis) = parse_analysis(body, reply).await? {
                reply
                    .text_threaded(&render::description_reply(&analysis))
                    .await?;
            }
        }
        other => {
            if let Some(msg) = other.user_message() {
                reply.text(msg).await?;
            }
        }
    }

    Ok(())
}

async fn run_colour(backend: &dyn AnalysisBackend, reply: &dyn Reply, image: &Bytes) -> Result<()> {
    let outcome = backend.vision(image, &[VisualFeature::Color], None).await;

    match outcome {
        Outcome::Success(body) => {
            if let Some(analysis) = parse_analysis(body, reply).await? {
                match &analysis.color {
                    Some(colour) => {
                        reply.text_threaded(&render::colour_reply(colour)).await?;
                    }
                    None => reply.text(GENERIC_FAILURE_MSG).await?,
                }
            }
        }
        other => {
            if let Some(msg) = other.user_message() {
                reply.text(msg).await?;
            }
        }
    }

    Ok(())
}

async fn run_image_type(
    backend: &dyn AnalysisBackend,
    reply: &dyn Reply,
    image: &Bytes,
) -> Result<()> {
    let outcome = backend
        .vision(image, &[VisualFeature::ImageType], None)
        .await;

    match outcome {
        Outcome::Success(body) => {
            if let Some(analysis) = parse_analysis(body, reply).await? {
                match &analysis.image_type {
                    Some(image_type) => {
                        reply
                            .text_threaded(&render::image_type_reply(image_type))
                            .await?;
                    }
                    None => reply.text(GENERIC_FAILURE_MSG).await?,
                }
            }
        }
        other => {
            if let Some(msg) = other.user_message() {
                reply.text(msg).await?;
            }
        }
    }

    Ok(())
}

/// Detection result carried into the emotion leg of a chained pipeline
struct Detection {
    records: FaceRecords,
    /// Rectangles in detection order, for the `faceRectangles` parameter
    rects: Vec<FaceRect>,
    accent_colour: Option<image::Rgba<u8>>,
    /// Static failure text when the detection call was degraded
    error: Option<&'static str>,
}

impl Detection {
    fn degraded(error: &'static str) -> Self {
        Self {
            records: FaceRecords::new(),
            rects: Vec::new(),
            accent_colour: None,
            error: Some(error),
        }
    }

    fn from_analysis(analysis: &VisionAnalysis) -> Self {
        Self {
            records: build_records(&analysis.faces),
            rects: analysis
                .faces
                .iter()
                .map(|f| f.face_rectangle)
                .collect(),
            accent_colour: analysis
                .color
                .as_ref()
                .and_then(|c| parse_accent_colour(&c.accent_color)),
            error: None,
        }
    }
}

/// Second leg of the chained pipelines: call the emotion service and reply
/// with the annotated image, applying the partial-failure policy.
///
/// The emotion call runs even when no face was detected (empty rectangle
/// list): the service performs its own detection in that case.
async fn run_emotion_leg(
    backend: &dyn AnalysisBackend,
    reply: &dyn Reply,
    image: &Bytes,
    detection: Detection,
    font: &FontVec,
    caption: &str,
) -> Result<()> {
    let rect_param = if detection.rects.is_empty() {
        None
    } else {
        Some(serialize_rectangles(&detection.rects))
    };

    let outcome = backend.emotion(image, rect_param.as_deref()).await;

    match outcome {
        Outcome::Success(body) => {
            let emotion_faces: Vec<EmotionFace> = match serde_json::from_value(body) {
                Ok(faces) => faces,
                Err(e) => {
                    error!("Malformed emotion response: {}", e);
                    reply.text(GENERIC_FAILURE_MSG).await?;
                    return Ok(());
                }
            };

            match crate::analysis::faces::annotate(
                image,
                &emotion_faces,
                &detection.records,
                detection.accent_colour,
                font,
            ) {
                Ok(annotated) => {
                    reply.document(annotated, caption).await?;
                    // Emotion succeeded but demographics were lost to a
                    // degraded detection call
                    if detection.error.is_some() {
                        reply.text(DEMOGRAPHICS_MISSING_MSG).await?;
                    }
                }
                Err(e) => {
                    error!("Failed to annotate image: {}", e);
                    reply.text(GENERIC_FAILURE_MSG).await?;
                }
            }
        }
        Outcome::NoResult => {
            reply.text(NO_FACES_MSG).await?;
        }
        other => {
            if let Some(msg) = other.user_message() {
                reply.text(msg).await?;
            }
        }
    }

    Ok(())
}

async fn run_faces(
    backend: &dyn AnalysisBackend,
    reply: &dyn Reply,
    image: &Bytes,
    font: &FontVec,
) -> Result<()> {
    let outcome = backend
        .vision(image, &[VisualFeature::Faces, VisualFeature::Color], None)
        .await;

    let detection = match outcome {
        Outcome::Success(body) => {
            let Some(analysis) = parse_analysis(body, reply).await? else {
                return Ok(());
            };
            Detection::from_analysis(&analysis)
        }
        // Nothing detected and no service error: clean terminal state, the
        // emotion call is deliberately skipped
        Outcome::NoResult => {
            reply.text(NO_FACES_MSG).await?;
            return Ok(());
        }
        other => Detection::degraded(other.user_message().unwrap_or(GENERIC_FAILURE_MSG)),
    };

    run_emotion_leg(
        backend,
        reply,
        image,
        detection,
        font,
        "Here are the faces on the image.",
    )
    .await
}

async fn run_full_analysis(
    backend: &dyn AnalysisBackend,
    reply: &dyn Reply,
    image: &Bytes,
    font: &FontVec,
) -> Result<()> {
    let outcome = backend
        .vision(
            image,
            &[
                VisualFeature::Categories,
                VisualFeature::Tags,
                VisualFeature::Description,
                VisualFeature::Faces,
                VisualFeature::ImageType,
                VisualFeature::Color,
            ],
            Some("Celebrities, Landmarks"),
        )
        .await;

    // Unlike the faces task, a vision failure here is fatal: the summary is
    // the point of this task, so the emotion call is not attempted without it
    let detection = match outcome {
        Outcome::Success(body) => {
            let Some(analysis) = parse_analysis(body, reply).await? else {
                return Ok(());
            };
            reply.text_threaded(&render::full_summary(&analysis)).await?;
            Detection::from_analysis(&analysis)
        }
        Outcome::NoResult => {
            reply.text(GENERIC_FAILURE_MSG).await?;
            return Ok(());
        }
        other => {
            if let Some(msg) = other.user_message() {
                reply.text(msg).await?;
            }
            return Ok(());
        }
    };

    run_emotion_leg(
        backend,
        reply,
        image,
        detection,
        font,
        "Here are the faces analysis on the image.",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parsing_is_case_insensitive() {
        assert_eq!(
            AnalysisTask::parse("Full Analysis"),
            Some(AnalysisTask::FullAnalysis)
        );
        assert_eq!(
            AnalysisTask::parse("full analysis"),
            Some(AnalysisTask::FullAnalysis)
        );
        assert_eq!(AnalysisTask::parse("FACES"), Some(AnalysisTask::Faces));
        assert_eq!(AnalysisTask::parse("Image Type"), Some(AnalysisTask::ImageType));
        assert_eq!(AnalysisTask::parse("To Text"), Some(AnalysisTask::ToText));
    }

    #[test]
    fn test_task_parsing_accepts_both_colour_spellings() {
        assert_eq!(AnalysisTask::parse("Colour"), Some(AnalysisTask::Colour));
        assert_eq!(AnalysisTask::parse("Color"), Some(AnalysisTask::Colour));
    }

    #[test]
    fn test_task_parsing_rejects_unknown_keywords() {
        assert_eq!(AnalysisTask::parse("Cancel"), None);
        assert_eq!(AnalysisTask::parse(""), None);
        assert_eq!(AnalysisTask::parse("Facesss"), None);
        assert_eq!(AnalysisTask::parse("Full"), None);
    }

    #[test]
    fn test_image_task_classification() {
        assert!(AnalysisTask::Faces.is_image_task());
        assert!(AnalysisTask::FullAnalysis.is_image_task());
        assert!(!AnalysisTask::ToText.is_image_task());
    }
}
