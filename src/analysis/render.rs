//! User-visible text rendering for analysis results.
//!
//! The phrasing here is a user-facing contract: enumerations join the last
//! two items with "and" (no Oxford comma), heads switch between singular and
//! plural, and tag/category normalization follows fixed rules.

use crate::analysis::vision::{Caption, Category, ColorInfo, ImageType, Landmark, VisionAnalysis};
use crate::config::CLIP_ART_TYPES;

/// Join items as `"a, b and c"`: the second-to-last item is joined to the
/// last with `" and "`, everything before with `", "`
#[must_use]
pub fn join_natural(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    }
}

/// Category names drop trailing underscores; interior underscores become
/// spaces (`"outdoor_mountain_"` renders as `"outdoor mountain"`)
#[must_use]
pub fn format_category_name(name: &str) -> String {
    name.trim_end_matches('_').replace('_', " ")
}

/// Tags are hashtags: `#` prefix, trailing underscores dropped, interior
/// spaces removed
#[must_use]
pub fn format_tag(name: &str) -> String {
    format!("#{}", name.trim_end_matches('_').replace(' ', ""))
}

/// Reply for the categories task
#[must_use]
pub fn categories_reply(categories: &[Category]) -> String {
    let names: Vec<String> = categories
        .iter()
        .map(|c| format_category_name(&c.name))
        .collect();

    let head = if names.len() == 1 {
        "I think it belongs to the category of "
    } else {
        "I think it belongs to the categories of "
    };

    format!("{}{}", head, join_natural(&names))
}

/// Reply for the tags task
#[must_use]
pub fn tags_reply(tags: &[crate::analysis::vision::Tag]) -> String {
    let names: Vec<String> = tags.iter().map(|t| format_tag(&t.name)).collect();

    let head = if names.len() == 1 {
        "I think it is "
    } else {
        "I think it has tags of "
    };

    format!("{}{}", head, join_natural(&names))
}

/// The landmark with the highest confidence across all category details
#[must_use]
pub fn best_landmark(categories: &[Category]) -> Option<&Landmark> {
    categories
        .iter()
        .filter_map(|c| c.detail.as_ref())
        .flat_map(|d| d.landmarks.iter())
        .fold(None, |best: Option<&Landmark>, candidate| match best {
            Some(b) if b.confidence >= candidate.confidence => Some(b),
            _ => Some(candidate),
        })
}

/// The caption with the highest confidence
#[must_use]
pub fn best_caption(captions: &[Caption]) -> Option<&Caption> {
    captions
        .iter()
        .fold(None, |best: Option<&Caption>, candidate| match best {
            Some(b) if b.confidence >= candidate.confidence => Some(b),
            _ => Some(candidate),
        })
}

/// Reply for the description task. A recognized landmark beats the generated
/// caption.
#[must_use]
pub fn description_reply(analysis: &VisionAnalysis) -> String {
    if let Some(landmark) = best_landmark(&analysis.categories) {
        return format!("I'll say it's the {}.", landmark.name);
    }

    let caption = analysis
        .description
        .as_ref()
        .and_then(|d| best_caption(&d.captions))
        .map_or("something I cannot describe", |c| c.text.as_str());

    format!("I'll say it's {caption}.")
}

/// Reply for the colour task.
/// The foreground colour is reported as received; the background is
/// lowercased. This asymmetry is inherited, user-visible behaviour.
#[must_use]
pub fn colour_reply(colour: &ColorInfo) -> String {
    let mut text = if colour.is_bw_img {
        "This is a black and white image.\n\n".to_string()
    } else {
        "This is not a black and white image.\n\n".to_string()
    };

    text += &format!(
        "{} and {} dominate the foreground and background respectively. ",
        colour.dominant_color_foreground,
        colour.dominant_color_background.to_lowercase()
    );
    text += &format!(
        "The dominant colours include {}.\n\n",
        lowercase_joined(&colour.dominant_colors)
    );
    text += &format!("And the accent colour is #{}.", colour.accent_color);

    text
}

/// Reply for the image-type task
#[must_use]
pub fn image_type_reply(image_type: &ImageType) -> String {
    let clip_art = CLIP_ART_TYPES
        .get(image_type.clip_art_type)
        .copied()
        .unwrap_or("non-clip-art");

    let mut text = if clip_art == "ambiguous" {
        "I'm not sure if it's a clip art or not, but ".to_string()
    } else {
        format!("I think it's a {clip_art}, and ")
    };

    if image_type.line_drawing_type != 0 {
        text += "I think it's a line drawing.";
    } else {
        text += "I think it's not a line drawing.";
    }

    text
}

/// The multi-section summary for the full-analysis task. Ends with a notice
/// that face analysis is still in flight, since the emotion call follows.
#[must_use]
pub fn full_summary(analysis: &VisionAnalysis) -> String {
    let mut text = "Here is a summary of it:\n\n".to_string();

    let category_names: Vec<String> = analysis
        .categories
        .iter()
        .map(|c| format_category_name(&c.name))
        .collect();
    text += if category_names.len() == 1 {
        "Category: "
    } else {
        "Categories: "
    };
    text += &join_natural(&category_names);
    text += "\n";

    let tag_names: Vec<String> = analysis.tags.iter().map(|t| format_tag(&t.name)).collect();
    text += if tag_names.len() == 1 { "Tag: " } else { "Tags: " };
    text += &join_natural(&tag_names);
    text += "\n\n";

    if let Some(landmark) = best_landmark(&analysis.categories) {
        text += &format!("Description: it's the {}.\n\n", landmark.name);
    } else {
        let caption = analysis
            .description
            .as_ref()
            .and_then(|d| best_caption(&d.captions))
            .map_or("something I cannot describe", |c| c.text.as_str());
        text += &format!("Description: it's {caption}.\n\n");
    }

    if let Some(image_type) = &analysis.image_type {
        let clip_art = CLIP_ART_TYPES
            .get(image_type.clip_art_type)
            .copied()
            .unwrap_or("non-clip-art");
        text += &format!("Clip art type: {clip_art}\n");
        text += if image_type.line_drawing_type != 0 {
            "Line drawing: yes\n\n"
        } else {
            "Line drawing: no\n\n"
        };
    }

    if let Some(colour) = &analysis.color {
        text += if colour.is_bw_img {
            "Black and white image: yes\n"
        } else {
            "Black and white image: no\n"
        };
        text += &format!(
            "Foreground dominant colour: {}\n",
            colour.dominant_color_foreground.to_lowercase()
        );
        text += &format!(
            "Background dominant colour: {}\n",
            colour.dominant_color_background.to_lowercase()
        );
        text += &format!(
            "Dominant colours: {}\n",
            lowercase_joined(&colour.dominant_colors)
        );
        text += &format!("Accent colour: #{}\n\n", colour.accent_color);
    }

    text += "I am still analysing the faces on the image. \
             You can look at the summary while you are waiting.";

    text
}

fn lowercase_joined(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::vision::Tag;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_join_natural() {
        assert_eq!(join_natural(&[]), "");
        assert_eq!(join_natural(&strings(&["a"])), "a");
        assert_eq!(join_natural(&strings(&["a", "b"])), "a and b");
        assert_eq!(join_natural(&strings(&["a", "b", "c"])), "a, b and c");
        assert_eq!(
            join_natural(&strings(&["w", "x", "y", "z"])),
            "w, x, y and z"
        );
    }

    #[test]
    fn test_category_name_normalization() {
        assert_eq!(format_category_name("outdoor_mountain_"), "outdoor mountain");
        assert_eq!(format_category_name("people_"), "people");
        assert_eq!(format_category_name("abstract"), "abstract");
    }

    #[test]
    fn test_tag_normalization() {
        assert_eq!(format_tag("snow"), "#snow");
        assert_eq!(format_tag("outdoor_"), "#outdoor");
        assert_eq!(format_tag("water sport"), "#watersport");
    }

    #[test]
    fn test_categories_reply_singular_plural() {
        let one = vec![Category {
            name: "people_".to_string(),
            detail: None,
        }];
        assert_eq!(
            categories_reply(&one),
            "I think it belongs to the category of people"
        );

        let many = vec![
            Category {
                name: "outdoor_".to_string(),
                detail: None,
            },
            Category {
                name: "building_".to_string(),
                detail: None,
            },
            Category {
                name: "sky_object".to_string(),
                detail: None,
            },
        ];
        assert_eq!(
            categories_reply(&many),
            "I think it belongs to the categories of outdoor, building and sky object"
        );
    }

    #[test]
    fn test_tags_reply_singular_plural() {
        let one = vec![Tag {
            name: "snow".to_string(),
        }];
        assert_eq!(tags_reply(&one), "I think it is #snow");

        let many = vec![
            Tag {
                name: "snow".to_string(),
            },
            Tag {
                name: "water sport".to_string(),
            },
        ];
        assert_eq!(tags_reply(&many), "I think it has tags of #snow and #watersport");
    }

    #[test]
    fn test_description_prefers_landmark() {
        let analysis = VisionAnalysis {
            categories: vec![Category {
                name: "building_".to_string(),
                detail: Some(crate::analysis::vision::CategoryDetail {
                    landmarks: vec![
                        Landmark {
                            name: "Colosseum".to_string(),
                            confidence: 0.4,
                        },
                        Landmark {
                            name: "Eiffel Tower".to_string(),
                            confidence: 0.9,
                        },
                    ],
                }),
            }],
            tags: vec![],
            description: Some(crate::analysis::vision::Description {
                captions: vec![Caption {
                    text: "a large tower".to_string(),
                    confidence: 0.8,
                }],
            }),
            faces: vec![],
            image_type: None,
            color: None,
        };

        assert_eq!(description_reply(&analysis), "I'll say it's the Eiffel Tower.");
    }

    #[test]
    fn test_description_falls_back_to_best_caption() {
        let analysis = VisionAnalysis {
            categories: vec![],
            tags: vec![],
            description: Some(crate::analysis::vision::Description {
                captions: vec![
                    Caption {
                        text: "a cat".to_string(),
                        confidence: 0.3,
                    },
                    Caption {
                        text: "a dog on grass".to_string(),
                        confidence: 0.7,
                    },
                ],
            }),
            faces: vec![],
            image_type: None,
            color: None,
        };

        assert_eq!(description_reply(&analysis), "I'll say it's a dog on grass.");
    }

    #[test]
    fn test_colour_reply_keeps_foreground_case() {
        let colour = ColorInfo {
            dominant_color_foreground: "Grey".to_string(),
            dominant_color_background: "Blue".to_string(),
            dominant_colors: vec!["Grey".to_string(), "Blue".to_string()],
            accent_color: "B5893E".to_string(),
            is_bw_img: false,
        };

        let text = colour_reply(&colour);
        assert!(text.starts_with("This is not a black and white image.\n\n"));
        assert!(text.contains("Grey and blue dominate the foreground and background respectively."));
        assert!(text.contains("The dominant colours include grey, blue.\n\n"));
        assert!(text.ends_with("And the accent colour is #B5893E."));
    }

    #[test]
    fn test_image_type_reply_variants() {
        let ambiguous = ImageType {
            clip_art_type: 1,
            line_drawing_type: 0,
        };
        assert_eq!(
            image_type_reply(&ambiguous),
            "I'm not sure if it's a clip art or not, but I think it's not a line drawing."
        );

        let clip_art = ImageType {
            clip_art_type: 3,
            line_drawing_type: 1,
        };
        assert_eq!(
            image_type_reply(&clip_art),
            "I think it's a good-clip-art, and I think it's a line drawing."
        );
    }

    #[test]
    fn test_full_summary_sections() {
        let analysis = VisionAnalysis {
            categories: vec![
                Category {
                    name: "outdoor_".to_string(),
                    detail: None,
                },
                Category {
                    name: "building_".to_string(),
                    detail: None,
                },
            ],
            tags: vec![
                Tag {
                    name: "sky".to_string(),
                },
                Tag {
                    name: "tower".to_string(),
                },
                Tag {
                    name: "water sport".to_string(),
                },
            ],
            description: Some(crate::analysis::vision::Description {
                captions: vec![Caption {
                    text: "a tall tower".to_string(),
                    confidence: 0.9,
                }],
            }),
            faces: vec![],
            image_type: Some(ImageType {
                clip_art_type: 0,
                line_drawing_type: 0,
            }),
            color: Some(ColorInfo {
                dominant_color_foreground: "Grey".to_string(),
                dominant_color_background: "Blue".to_string(),
                dominant_colors: vec!["Grey".to_string()],
                accent_color: "B5893E".to_string(),
                is_bw_img: false,
            }),
        };

        let text = full_summary(&analysis);
        assert!(text.contains("Categories: outdoor and building\n"));
        assert!(text.contains("Tags: #sky, #tower and #watersport\n\n"));
        assert!(text.contains("Description: it's a tall tower.\n\n"));
        assert!(text.contains("Clip art type: non-clip-art\nLine drawing: no\n\n"));
        assert!(text.contains("Foreground dominant colour: grey\n"));
        assert!(text.contains("Accent colour: #B5893E\n\n"));
        assert!(text.ends_with("You can look at the summary while you are waiting."));
    }
}
