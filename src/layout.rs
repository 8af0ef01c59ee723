use serde::{Deserialize, Serialize};
use std::mem;
use std::path::{Path, PathBuf};

use crate::error::ContextError;
use crate::font::DocumentFont;

/// The font size every text line is laid out and rendered at.
pub const DEFAULT_FONT_SIZE: f32 = 12.0;
/// Distance from the page top to the first text baseline.
const TEXT_TOP_OFFSET: f32 = 100.0;
/// Vertical distance between two consecutive text baselines.
const LINE_PITCH: f32 = 20.0;
/// Gap between the last text line and the first image.
const TEXT_TO_IMAGE_GAP: f32 = 50.0;
/// Combined horizontal margin an image must leave free on a page.
const IMAGE_HORIZONTAL_MARGIN: f32 = 100.0;
/// Nothing is placed below this distance from the page bottom.
const BOTTOM_MARGIN: f32 = 50.0;
/// Vertical gap between two consecutive images.
const IMAGE_GAP: f32 = 30.0;
/// Slack absorbing the rounding of the scaled image heights in the page-break comparison.
const PAGE_BREAK_TOLERANCE: f32 = 0.01;
/// Left edge of the lines produced by the plain-text conversion.
const PLAIN_TEXT_LEFT_MARGIN: f32 = 40.0;
/// Distance from the page top to the first line of the plain-text conversion.
const PLAIN_TEXT_TOP_OFFSET: f32 = 42.0;

/// The page dimensions the layout is computed against, in PDF points (1/72 inch),
/// with the origin at the bottom-left corner. Defaults to US letter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        PageGeometry {
            width: 612.0,
            height: 792.0,
        }
    }
}

/// A reference to the raw bytes of an image resource on disk, together with its intrinsic
/// pixel dimensions. Created when an image arrives, consumed read-only by the layout engine
/// and the renderer, deleted once the owning flow terminates.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    pub path: PathBuf,
    pub width_px: u32,
    pub height_px: u32,
}

impl ImageResource {
    /// Probes the file header for the intrinsic dimensions without decoding the pixel data.
    pub fn from_path(path: &Path) -> Result<ImageResource, ContextError> {
        let (width_px, height_px) = image::image_dimensions(path).map_err(|error| {
            ContextError::with_error(format!("Failed to probe the image {:?}", path), &error)
        })?;
        if width_px == 0 || height_px == 0 {
            return Err(ContextError::with_context(format!(
                "The image {:?} has a degenerate size of {}x{} pixels",
                path, width_px, height_px
            )));
        }

        Ok(ImageResource {
            path: path.to_path_buf(),
            width_px,
            height_px,
        })
    }
}

/// A single positioned placement within a page, output of the layout engine and input to
/// the renderer. Coordinates follow the PDF convention, `y` grows from the page bottom and
/// designates the baseline for text and the lower-left corner for images.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    TextLine {
        text: String,
        x: f32,
        y: f32,
        font_size: f32,
    },
    Image {
        /// Index into the image list the layout was computed from.
        index: usize,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

/// An ordered sequence of draw operations making up one output page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub operations: Vec<DrawOp>,
}

/// Lays out one text block followed by the given images into a sequence of pages.
///
/// The text is split on newlines; every non-blank line is trimmed and horizontally centered
/// at the fixed font size, stacked top-down from `height - 100` with a 20 unit pitch. Blank
/// lines are dropped entirely and leave no vertical gap. Images follow beneath a 50 unit
/// gap in arrival order, each scaled uniformly so that it exceeds neither the horizontal
/// margin nor the vertical room left above the bottom margin, and horizontally centered.
/// An image scaled to consume the whole remaining height moves to a fresh page instead,
/// keeping its already-computed size; this also covers the image that is too tall for an
/// otherwise-empty page. The result always holds at least one page.
pub fn layout(
    text: Option<&str>,
    images: &[ImageResource],
    geometry: &PageGeometry,
    font: &DocumentFont,
) -> Vec<Page> {
    let mut completed_pages = Vec::new();
    let mut current_page = Page::default();
    let mut current_y = geometry.height - TEXT_TOP_OFFSET;

    if let Some(text) = text {
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let text_width = font.text_width(line, DEFAULT_FONT_SIZE);
            current_page.operations.push(DrawOp::TextLine {
                text: line.to_string(),
                x: (geometry.width - text_width) / 2.0,
                y: current_y,
                font_size: DEFAULT_FONT_SIZE,
            });
            current_y -= LINE_PITCH;
        }
    }

    current_y -= TEXT_TO_IMAGE_GAP;

    for (index, image) in images.iter().enumerate() {
        let max_width = geometry.width - IMAGE_HORIZONTAL_MARGIN;
        let room = current_y - BOTTOM_MARGIN;
        // When no room is left above the bottom margin the image is sized against half the
        // page instead, which forces the page break below
        let max_height = if room > 0.0 {
            room
        } else {
            geometry.height / 2.0
        };

        let scale_factor =
            (max_width / image.width_px as f32).min(max_height / image.height_px as f32);
        let scaled_width = image.width_px as f32 * scale_factor;
        let scaled_height = image.height_px as f32 * scale_factor;
        let x = (geometry.width - scaled_width) / 2.0;

        current_y -= scaled_height;
        if current_y <= BOTTOM_MARGIN + PAGE_BREAK_TOLERANCE {
            // The image would touch or cross the bottom margin: finalize this page and
            // place it on a fresh one at the size already computed
            completed_pages.push(mem::take(&mut current_page));
            current_y = geometry.height - scaled_height - BOTTOM_MARGIN;
        }

        current_page.operations.push(DrawOp::Image {
            index,
            x,
            y: current_y,
            width: scaled_width,
            height: scaled_height,
        });
        current_y -= IMAGE_GAP;
    }

    completed_pages.push(current_page);
    completed_pages
}

/// Lays out plain text for the internal text-file conversion: every line is emitted
/// left-aligned at the fixed font size under a fixed top margin, blank lines keep their
/// vertical advance, and the layout continues on a new page once the cursor passes the
/// bottom margin.
pub fn layout_plain_text(text: &str, geometry: &PageGeometry) -> Vec<Page> {
    let mut completed_pages = Vec::new();
    let mut current_page = Page::default();
    let mut current_y = geometry.height - PLAIN_TEXT_TOP_OFFSET;

    for line in text.lines() {
        if current_y < BOTTOM_MARGIN {
            completed_pages.push(mem::take(&mut current_page));
            current_y = geometry.height - PLAIN_TEXT_TOP_OFFSET;
        }
        let line = line.trim();
        if !line.is_empty() {
            current_page.operations.push(DrawOp::TextLine {
                text: line.to_string(),
                x: PLAIN_TEXT_LEFT_MARGIN,
                y: current_y,
                font_size: DEFAULT_FONT_SIZE,
            });
        }
        current_y -= LINE_PITCH;
    }

    completed_pages.push(current_page);
    completed_pages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter() -> PageGeometry {
        PageGeometry::default()
    }

    fn image(width_px: u32, height_px: u32) -> ImageResource {
        ImageResource {
            path: PathBuf::from("image.png"),
            width_px,
            height_px,
        }
    }

    #[test]
    fn text_lines_are_centered_and_stacked() {
        let font = DocumentFont::Builtin;
        let geometry = letter();
        let pages = layout(Some("Hello\nWorld"), &[], &geometry, &font);

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].operations.len(), 2);
        let mut expected_y = geometry.height - 100.0;
        for operation in &pages[0].operations {
            match operation {
                DrawOp::TextLine {
                    text,
                    x,
                    y,
                    font_size,
                } => {
                    let text_width = font.text_width(text, *font_size);
                    // Centering leaves the same margin on both sides
                    assert!((x + text_width - (geometry.width - x)).abs() < 1e-3);
                    assert!((y - expected_y).abs() < 1e-3);
                    expected_y -= 20.0;
                }
                DrawOp::Image { .. } => panic!("no image was submitted"),
            }
        }
    }

    #[test]
    fn blank_lines_are_dropped_without_leaving_gaps() {
        let font = DocumentFont::Builtin;
        let pages = layout(Some("first\n\n   \nsecond"), &[], &letter(), &font);

        let baselines: Vec<f32> = pages[0]
            .operations
            .iter()
            .map(|operation| match operation {
                DrawOp::TextLine { y, .. } => *y,
                DrawOp::Image { .. } => panic!("no image was submitted"),
            })
            .collect();
        assert_eq!(baselines.len(), 2);
        assert!((baselines[0] - baselines[1] - 20.0).abs() < 1e-3);
    }

    #[test]
    fn empty_input_yields_a_single_empty_page() {
        let font = DocumentFont::Builtin;
        let pages = layout(None, &[], &letter(), &font);
        assert_eq!(pages.len(), 1);
        assert!(pages[0].operations.is_empty());
    }

    #[test]
    fn images_preserve_aspect_ratio_and_respect_the_margins() {
        let font = DocumentFont::Builtin;
        let geometry = letter();
        let resources = vec![image(800, 600), image(300, 300)];
        let pages = layout(Some("caption"), &resources, &geometry, &font);

        let mut seen = 0;
        for page in &pages {
            for operation in &page.operations {
                if let DrawOp::Image {
                    index,
                    width,
                    height,
                    x,
                    ..
                } = operation
                {
                    let resource = &resources[*index];
                    let original_ratio = resource.width_px as f32 / resource.height_px as f32;
                    assert!((width / height - original_ratio).abs() < 1e-3);
                    assert!(*width <= geometry.width - 100.0 + 1e-3);
                    assert!((x + width / 2.0 - geometry.width / 2.0).abs() < 1e-3);
                    seen += 1;
                }
            }
        }
        assert_eq!(seen, resources.len());
    }

    #[test]
    fn image_order_is_preserved_across_pages() {
        let font = DocumentFont::Builtin;
        // Tall images so that the sequence spans several pages
        let resources: Vec<ImageResource> = (0..6).map(|_| image(200, 1400)).collect();
        let pages = layout(None, &resources, &letter(), &font);

        assert!(pages.len() > 1);
        let placed_indices: Vec<usize> = pages
            .iter()
            .flat_map(|page| &page.operations)
            .filter_map(|operation| match operation {
                DrawOp::Image { index, .. } => Some(*index),
                DrawOp::TextLine { .. } => None,
            })
            .collect();
        assert_eq!(placed_indices, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn a_tall_image_following_text_moves_to_its_own_page() {
        let font = DocumentFont::Builtin;
        let geometry = letter();
        // Taller than the room left under the text, so the height constraint binds
        let resources = vec![image(100, 2000)];
        let pages = layout(Some("Hello\nWorld"), &resources, &geometry, &font);

        assert_eq!(pages.len(), 2);
        assert!(pages[0]
            .operations
            .iter()
            .all(|operation| matches!(operation, DrawOp::TextLine { .. })));
        assert_eq!(pages[1].operations.len(), 1);
        match &pages[1].operations[0] {
            DrawOp::Image { y, height, .. } => {
                // Placed against the top margin of the fresh page
                assert!((y + height - (geometry.height - 50.0)).abs() < 1e-2);
            }
            DrawOp::TextLine { .. } => panic!("the second page holds only the image"),
        }
    }

    #[test]
    fn images_never_cross_the_bottom_margin() {
        let font = DocumentFont::Builtin;
        let geometry = letter();
        let resources: Vec<ImageResource> =
            vec![image(640, 480), image(1200, 900), image(90, 1600)];
        let pages = layout(Some("one line"), &resources, &geometry, &font);

        for page in &pages {
            for operation in &page.operations {
                if let DrawOp::Image { y, height, .. } = operation {
                    assert!(*y >= 50.0 - 1e-2);
                    assert!(y + height <= geometry.height + 1e-2);
                }
            }
        }
    }

    #[test]
    fn plain_text_lines_are_left_aligned_and_paginated() {
        let geometry = letter();
        let many_lines = (0..60)
            .map(|index| format!("line {}", index))
            .collect::<Vec<_>>()
            .join("\n");
        let pages = layout_plain_text(&many_lines, &geometry);

        assert!(pages.len() > 1);
        for page in &pages {
            for operation in &page.operations {
                match operation {
                    DrawOp::TextLine { x, y, .. } => {
                        assert!((x - 40.0).abs() < 1e-3);
                        assert!(*y >= 50.0 - 20.0);
                    }
                    DrawOp::Image { .. } => panic!("plain text produces no images"),
                }
            }
        }
    }
}
