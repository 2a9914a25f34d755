//! Typed payloads for the vision and face-emotion services.

use crate::analysis::faces::FaceRect;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Feature flags for the vision analysis endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualFeature {
    Categories,
    Tags,
    Description,
    Faces,
    ImageType,
    Color,
}

impl VisualFeature {
    /// Wire name of the feature flag
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Categories => "Categories",
            Self::Tags => "Tags",
            Self::Description => "Description",
            Self::Faces => "Faces",
            Self::ImageType => "ImageType",
            Self::Color => "Color",
        }
    }
}

/// Render feature flags into the `visualFeatures` query parameter
#[must_use]
pub fn features_param(features: &[VisualFeature]) -> String {
    features
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Top-level vision analysis response.
/// Sub-objects are present only when the matching feature flag was requested.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionAnalysis {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub description: Option<Description>,
    #[serde(default)]
    pub faces: Vec<Face>,
    pub image_type: Option<ImageType>,
    pub color: Option<ColorInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Category {
    pub name: String,
    pub detail: Option<CategoryDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryDetail {
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Landmark {
    pub name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub captions: Vec<Caption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Caption {
    pub text: String,
    pub confidence: f64,
}

/// A detected face with demographic data
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Face {
    pub age: u32,
    pub gender: String,
    pub face_rectangle: FaceRect,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageType {
    pub clip_art_type: usize,
    pub line_drawing_type: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorInfo {
    pub dominant_color_foreground: String,
    pub dominant_color_background: String,
    #[serde(default)]
    pub dominant_colors: Vec<String>,
    pub accent_color: String,
    #[serde(rename = "isBWImg")]
    pub is_bw_img: bool,
}

/// One face in the emotion-service response.
///
/// Scores map emotion labels to confidence values. `BTreeMap` gives a stable
/// iteration order, so tie-breaking in the dominant-emotion argmax is
/// deterministic (first label in alphabetical order wins).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionFace {
    pub face_rectangle: FaceRect,
    pub scores: BTreeMap<String, f64>,
}
