//! Face correlation and image annotation.
//!
//! The vision service reports faces with demographic data; the emotion service
//! reports faces with emotion scores. The two calls are correlated by the
//! face's bounding rectangle, using exact value equality. Near-identical
//! rectangles do not merge; the face keeps its emotion label and simply has
//! no demographic prefix.

use ab_glyph::{FontVec, PxScale};
use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;

use crate::analysis::vision::{EmotionFace, Face};

/// Vertical space reserved above a face for its label
const LABEL_OFFSET: u32 = 50;
/// Point size for label text
const LABEL_SCALE: f32 = 16.0;
/// Label background fill, semi-transparent light grey
const LABEL_BACKGROUND: Rgba<u8> = Rgba([241, 241, 242, 170]);
/// Label text colour when the image has no accent colour
const DEFAULT_LABEL_COLOUR: Rgba<u8> = Rgba([25, 149, 173, 255]);

/// A face bounding rectangle, used as the join key between the vision and
/// emotion calls. Equality is by exact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    /// Wire form of one rectangle: `left,top,width,height`
    #[must_use]
    pub fn to_tuple_string(self) -> String {
        format!("{},{},{},{}", self.left, self.top, self.width, self.height)
    }
}

/// Serialize rectangles for the emotion service's `faceRectangles` parameter:
/// tuples joined by `;`
#[must_use]
pub fn serialize_rectangles(rects: &[FaceRect]) -> String {
    rects
        .iter()
        .map(|r| r.to_tuple_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Age and gender reported by the vision face detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demographics {
    pub age: u32,
    pub gender: String,
}

/// Correlation map from face rectangle to demographic data.
/// Built fresh per request, discarded after rendering.
pub type FaceRecords = HashMap<FaceRect, Demographics>;

/// Build correlation records from the vision detection result
#[must_use]
pub fn build_records(faces: &[Face]) -> FaceRecords {
    faces
        .iter()
        .map(|f| {
            (
                f.face_rectangle,
                Demographics {
                    age: f.age,
                    gender: f.gender.clone(),
                },
            )
        })
        .collect()
}

/// Dominant emotion: the label with the maximum score. Ties are broken by the
/// first label encountered in iteration order (alphabetical, see
/// [`EmotionFace::scores`]). Returns `None` for an empty score map.
#[must_use]
pub fn dominant_emotion(face: &EmotionFace) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for (label, score) in &face.scores {
        match best {
            Some((_, top)) if *score <= top => {}
            _ => best = Some((label, *score)),
        }
    }
    best.map(|(label, _)| capitalize(label))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}

/// Vertical position of the label background: `LABEL_OFFSET` above the face,
/// clamped to the top edge so it never leaves the canvas
#[must_use]
pub fn label_top(face_top: u32) -> u32 {
    face_top.saturating_sub(LABEL_OFFSET)
}

/// Parse the vision service's accent colour (`"B5893E"`, optionally with a
/// leading `#`) into a label colour
#[must_use]
pub fn parse_accent_colour(accent: &str) -> Option<Rgba<u8>> {
    let hex = accent.strip_prefix('#').unwrap_or(accent);
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgba([r, g, b, 255]))
}

/// Errors from the annotation step
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode annotated image: {0}")]
    Encode(image::ImageError),
}

/// Draw one annotated image: a bounding box per emotion-service face, topped
/// by a label with the dominant emotion, prefixed with age/gender when the
/// detection call supplied demographics for the exact same rectangle.
///
/// # Errors
///
/// Returns [`AnnotateError`] if the payload cannot be decoded or the result
/// cannot be encoded as JPEG.
pub fn annotate(
    image_bytes: &[u8],
    emotion_faces: &[EmotionFace],
    records: &FaceRecords,
    accent_colour: Option<Rgba<u8>>,
    font: &FontVec,
) -> Result<Vec<u8>, AnnotateError> {
    let mut canvas: RgbaImage = image::load_from_memory(image_bytes)?.to_rgba8();
    let label_colour = accent_colour.unwrap_or(DEFAULT_LABEL_COLOUR);
    let scale = PxScale::from(LABEL_SCALE);

    for face in emotion_faces {
        let rect = face.face_rectangle;
        let Some(emotion) = dominant_emotion(face) else {
            continue;
        };

        let mut lines = Vec::new();
        if let Some(demo) = records.get(&rect) {
            lines.push(format!("{} {}", demo.gender, demo.age));
        }
        lines.push(emotion);

        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(rect.left as i32, rect.top as i32)
                .of_size(rect.width.max(1), rect.height.max(1)),
            label_colour,
        );

        let label_y = label_top(rect.top);
        let line_height = LABEL_SCALE.ceil() as u32 + 2;
        let label_width = lines
            .iter()
            .map(|line| text_size(scale, font, line).0)
            .max()
            .unwrap_or(0);
        let label_height = line_height * lines.len() as u32;

        blend_rect(
            &mut canvas,
            rect.left,
            label_y,
            label_width.max(1),
            label_height,
            LABEL_BACKGROUND,
        );

        for (i, line) in lines.iter().enumerate() {
            draw_text_mut(
                &mut canvas,
                label_colour,
                rect.left as i32,
                (label_y + line_height * i as u32) as i32,
                scale,
                font,
                line,
            );
        }
    }

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(canvas)
        .to_rgb8()
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .map_err(AnnotateError::Encode)?;

    Ok(out.into_inner())
}

/// Alpha-blend a filled rectangle onto the canvas, clipped to its bounds
fn blend_rect(canvas: &mut RgbaImage, left: u32, top: u32, width: u32, height: u32, fill: Rgba<u8>) {
    let right = left.saturating_add(width).min(canvas.width());
    let bottom = top.saturating_add(height).min(canvas.height());

    for y in top..bottom {
        for x in left..right {
            canvas.get_pixel_mut(x, y).blend(&fill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn rect(left: u32, top: u32, width: u32, height: u32) -> FaceRect {
        FaceRect {
            left,
            top,
            width,
            height,
        }
    }

    fn emotion_face(r: FaceRect, scores: &[(&str, f64)]) -> EmotionFace {
        EmotionFace {
            face_rectangle: r,
            scores: scores
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_rectangle_serialization() {
        let rects = [rect(10, 10, 50, 50), rect(1, 2, 3, 4)];
        assert_eq!(serialize_rectangles(&rects), "10,10,50,50;1,2,3,4");
        assert_eq!(serialize_rectangles(&[]), "");
    }

    #[test]
    fn test_exact_match_correlation() {
        let mut records = FaceRecords::new();
        records.insert(
            rect(10, 10, 50, 50),
            Demographics {
                age: 30,
                gender: "Male".to_string(),
            },
        );

        assert!(records.contains_key(&rect(10, 10, 50, 50)));
        // Near-miss rectangles do not merge
        assert!(!records.contains_key(&rect(10, 10, 50, 51)));
        assert!(!records.contains_key(&rect(11, 10, 50, 50)));
    }

    #[test]
    fn test_dominant_emotion_argmax() {
        let face = emotion_face(
            rect(0, 0, 10, 10),
            &[("happiness", 0.9), ("sadness", 0.05), ("neutral", 0.05)],
        );
        assert_eq!(dominant_emotion(&face).as_deref(), Some("Happiness"));
    }

    #[test]
    fn test_dominant_emotion_tie_takes_first_in_iteration_order() {
        let face = emotion_face(rect(0, 0, 10, 10), &[("surprise", 0.5), ("anger", 0.5)]);
        // BTreeMap iterates alphabetically; the first label seen wins the tie
        assert_eq!(dominant_emotion(&face).as_deref(), Some("Anger"));
    }

    #[test]
    fn test_dominant_emotion_empty_scores() {
        let face = emotion_face(rect(0, 0, 10, 10), &[]);
        assert_eq!(dominant_emotion(&face), None);
    }

    #[test]
    fn test_label_top_clamped_at_canvas_edge() {
        assert_eq!(label_top(200), 150);
        assert_eq!(label_top(50), 0);
        assert_eq!(label_top(20), 0);
        assert_eq!(label_top(0), 0);
    }

    #[test]
    fn test_parse_accent_colour() {
        assert_eq!(
            parse_accent_colour("B5893E"),
            Some(Rgba([0xB5, 0x89, 0x3E, 255]))
        );
        assert_eq!(
            parse_accent_colour("#B5893E"),
            Some(Rgba([0xB5, 0x89, 0x3E, 255]))
        );
        assert_eq!(parse_accent_colour("nonsense"), None);
        assert_eq!(parse_accent_colour(""), None);
    }

    #[test]
    fn test_build_records_keys_by_rectangle() {
        let faces = vec![Face {
            age: 28,
            gender: "Female".to_string(),
            face_rectangle: rect(5, 6, 7, 8),
        }];
        let records = build_records(&faces);
        assert_eq!(
            records.get(&rect(5, 6, 7, 8)),
            Some(&Demographics {
                age: 28,
                gender: "Female".to_string()
            })
        );
    }

    #[test]
    fn test_blend_rect_clips_to_canvas() {
        let mut canvas = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        blend_rect(&mut canvas, 2, 2, 10, 10, Rgba([255, 255, 255, 255]));
        assert_eq!(canvas.get_pixel(3, 3), &Rgba([255, 255, 255, 255]));
        assert_eq!(canvas.get_pixel(1, 1), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_blend_rect_survives_extreme_service_rectangles() {
        // left + width would overflow u32 if added naively
        let mut canvas = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        blend_rect(&mut canvas, 1, 1, u32::MAX, u32::MAX, Rgba([255, 255, 255, 255]));
        assert_eq!(canvas.get_pixel(3, 3), &Rgba([255, 255, 255, 255]));
        assert_eq!(canvas.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }
}
