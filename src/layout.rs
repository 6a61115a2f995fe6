//! Page layout model shared by PDF sources and the linearizer
//!
//! Coordinates use a top-left origin with y growing downward, so the top of
//! a box is `y0`.

use crate::PdfError;

/// Axis-aligned bounding box `[x0, y0, x1, y1]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Vertical center, used to pair image blocks with placements
    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

/// A run of text drawn with a single font
#[derive(Debug, Clone)]
pub struct TextSpan {
    pub text: String,
    pub font: String,
    pub font_size: f32,
}

impl TextSpan {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: String::new(),
            font_size: 0.0,
        }
    }
}

/// A line of spans sharing a baseline
#[derive(Debug, Clone)]
pub struct TextLine {
    pub spans: Vec<TextSpan>,
    pub bbox: BBox,
}

impl TextLine {
    /// Span text concatenated in drawing order
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

/// A unit of page content
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text { bbox: BBox, lines: Vec<TextLine> },
    Image { bbox: BBox },
}

impl ContentBlock {
    pub fn bbox(&self) -> &BBox {
        match self {
            ContentBlock::Text { bbox, .. } | ContentBlock::Image { bbox } => bbox,
        }
    }

    /// Convenience constructor: one span per line, bbox supplied by caller
    pub fn text_from_lines(bbox: BBox, lines: &[&str]) -> Self {
        let lines = lines
            .iter()
            .map(|l| TextLine {
                spans: vec![TextSpan::new(*l)],
                bbox,
            })
            .collect();
        ContentBlock::Text { bbox, lines }
    }
}

/// Opaque handle to an image payload inside the source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xref(pub u32, pub u16);

impl std::fmt::Display for Xref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.0, self.1)
    }
}

/// Where an embeddable image is drawn on a page
#[derive(Debug, Clone)]
pub struct ImagePlacement {
    pub bbox: BBox,
    /// `None` when the payload cannot be resolved (inline images, direct streams)
    pub xref: Option<Xref>,
}

/// Everything the linearizer needs from one page
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    /// 1-based page number
    pub page_number: u32,
    pub blocks: Vec<ContentBlock>,
    pub placements: Vec<ImagePlacement>,
}

/// Raw image bytes plus the file extension they should be stored under
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Vec<u8>,
    /// `None` means the source has no opinion; callers default to `png`
    pub ext: Option<String>,
}

/// Access to a parsed document, page by page
///
/// Implemented by [`crate::extractor::LopdfSource`]; tests use in-memory
/// implementations.
pub trait DocumentSource {
    /// Number of pages in the document
    fn page_count(&self) -> u32;

    /// Blocks and image placements for a 1-based page number
    fn page_layout(&self, page_number: u32) -> Result<PageLayout, PdfError>;

    /// Fetch the binary payload behind a placement's xref
    fn extract_image(&self, xref: Xref) -> Result<ImagePayload, PdfError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_and_union() {
        let a = BBox::new(10.0, 20.0, 30.0, 40.0);
        let b = BBox::new(5.0, 25.0, 50.0, 35.0);
        assert_eq!(a.center_y(), 30.0);
        assert_eq!(a.union(&b), BBox::new(5.0, 20.0, 50.0, 40.0));
    }

    #[test]
    fn test_line_text_concatenates_spans() {
        let line = TextLine {
            spans: vec![TextSpan::new("Hello "), TextSpan::new("World")],
            bbox: BBox::default(),
        };
        assert_eq!(line.text(), "Hello World");
    }
}
