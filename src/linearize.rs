//! Block linearization
//!
//! Merges each page's text and image blocks into one top-to-bottom text
//! stream. Image blocks are replaced by `[FIGURE:<id>]` markers and their
//! payloads written to an [`ImageSink`].
//!
//! Reading order comes from sorting blocks by their top edge only, which is
//! right for single-column pages and wrong for multi-column ones.

use crate::layout::{BBox, ContentBlock, DocumentSource, ImagePlacement, PageLayout, Xref};
use crate::output::{ExtractedImage, ExtractionResult, ImageSink};
use crate::PdfError;

/// Written between consecutive pages
const PAGE_SEPARATOR: &str = "\n\n";

/// How image blocks are paired with placements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementMatching {
    /// Placements are first keyed by vertical center; a later placement with
    /// exactly the same center replaces the earlier one
    #[default]
    CenterKeyed,
    /// Every placement is a candidate
    Nearest,
}

/// Options for block linearization
#[derive(Debug, Clone)]
pub struct LinearizeOptions {
    /// Maximum vertical-center distance (exclusive) between an image block
    /// and its placement
    pub tolerance: f32,
    pub matching: PlacementMatching,
}

impl Default for LinearizeOptions {
    fn default() -> Self {
        Self {
            tolerance: 50.0,
            matching: PlacementMatching::CenterKeyed,
        }
    }
}

/// Linearize every page of `source`, writing image payloads to `sink`
///
/// Never fails: unreadable pages contribute an empty fragment and image
/// failures degrade to marker variants.
pub fn linearize<S, K>(source: &S, sink: &mut K, options: &LinearizeOptions) -> ExtractionResult
where
    S: DocumentSource + ?Sized,
    K: ImageSink + ?Sized,
{
    let mut linearizer = Linearizer {
        source,
        sink,
        options,
        images_seen: 0,
        result: ExtractionResult::default(),
    };

    let page_count = source.page_count();
    for page_number in 1..=page_count {
        match source.page_layout(page_number) {
            Ok(layout) => linearizer.page(&layout),
            Err(e) => log::warn!("Skipping unreadable page {}: {}", page_number, e),
        }
        if page_number < page_count {
            linearizer.result.text_with_images.push_str(PAGE_SEPARATOR);
        }
    }

    linearizer.result
}

/// Candidate placements as `(center_y, placement)`, in scan order
fn placement_candidates(
    placements: &[ImagePlacement],
    matching: PlacementMatching,
) -> Vec<(f32, &ImagePlacement)> {
    match matching {
        PlacementMatching::Nearest => placements.iter().map(|p| (p.bbox.center_y(), p)).collect(),
        PlacementMatching::CenterKeyed => {
            let mut keyed: Vec<(f32, &ImagePlacement)> = Vec::with_capacity(placements.len());
            for placement in placements {
                let center = placement.bbox.center_y();
                match keyed.iter_mut().find(|(c, _)| *c == center) {
                    Some(entry) => entry.1 = placement,
                    None => keyed.push((center, placement)),
                }
            }
            keyed
        }
    }
}

/// Closest candidate strictly within `tolerance`; ties keep the first
fn find_placement<'p>(
    candidates: &[(f32, &'p ImagePlacement)],
    center_y: f32,
    tolerance: f32,
) -> Option<&'p ImagePlacement> {
    let mut best = None;
    let mut min_distance = f32::INFINITY;
    for &(center, placement) in candidates {
        let distance = (center - center_y).abs();
        if distance < min_distance && distance < tolerance {
            min_distance = distance;
            best = Some(placement);
        }
    }
    best
}

struct Linearizer<'r, S: ?Sized, K: ?Sized> {
    source: &'r S,
    sink: &'r mut K,
    options: &'r LinearizeOptions,
    /// Image blocks seen so far in this document; ids are `pdfimg<N>`
    images_seen: u32,
    result: ExtractionResult,
}

impl<S, K> Linearizer<'_, S, K>
where
    S: DocumentSource + ?Sized,
    K: ImageSink + ?Sized,
{
    fn page(&mut self, layout: &PageLayout) {
        let mut blocks: Vec<&ContentBlock> = layout.blocks.iter().collect();
        blocks.sort_by(|a, b| a.bbox().y0.total_cmp(&b.bbox().y0));

        let candidates = placement_candidates(&layout.placements, self.options.matching);

        for block in blocks {
            match block {
                ContentBlock::Text { lines, .. } => {
                    for line in lines {
                        self.result.text_with_images.push_str(&line.text());
                        self.result.text_with_images.push('\n');
                    }
                }
                ContentBlock::Image { bbox } => {
                    let placement = find_placement(&candidates, bbox.center_y(), self.options.tolerance);
                    let marker = self.image(layout.page_number, bbox, placement);
                    self.result.text_with_images.push_str(&marker);
                }
            }
        }
    }

    /// Handle one image block and return the marker to emit
    fn image(&mut self, page: u32, bbox: &BBox, placement: Option<&ImagePlacement>) -> String {
        self.images_seen += 1;
        let id = format!("pdfimg{}", self.images_seen);

        let Some(xref) = placement.and_then(|p| p.xref) else {
            log::debug!("{} on page {} has no matching placement", id, page);
            return format!("\n[FIGURE:{}:no_xref]\n", id);
        };

        match self.export(&id, xref, page, bbox) {
            Ok(image) => {
                self.result.images.push(image);
                format!("\n[FIGURE:{}]\n", id)
            }
            Err(e) => {
                log::warn!("Failed to extract image {}: {}", id, e);
                format!("\n[FIGURE:{}:extraction_failed]\n", id)
            }
        }
    }

    fn export(&mut self, id: &str, xref: Xref, page: u32, bbox: &BBox) -> Result<ExtractedImage, PdfError> {
        let payload = self.source.extract_image(xref)?;
        let ext = payload.ext.as_deref().unwrap_or("png");
        let filename = format!("{}.{}", id, ext);
        self.sink.write_image(&filename, &payload.data)?;

        Ok(ExtractedImage {
            id: id.to_string(),
            filename,
            page,
            bbox: bbox.to_array(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ImagePayload;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockSource {
        pages: Vec<Result<PageLayout, String>>,
        payloads: HashMap<Xref, ImagePayload>,
    }

    impl DocumentSource for MockSource {
        fn page_count(&self) -> u32 {
            self.pages.len() as u32
        }

        fn page_layout(&self, page_number: u32) -> Result<PageLayout, PdfError> {
            match &self.pages[page_number as usize - 1] {
                Ok(layout) => Ok(layout.clone()),
                Err(msg) => Err(PdfError::Parse(msg.clone())),
            }
        }

        fn extract_image(&self, xref: Xref) -> Result<ImagePayload, PdfError> {
            self.payloads
                .get(&xref)
                .cloned()
                .ok_or_else(|| PdfError::ImageExtract(format!("no payload for {}", xref)))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        files: HashMap<String, Vec<u8>>,
    }

    impl ImageSink for MemorySink {
        fn write_image(&mut self, filename: &str, data: &[u8]) -> Result<(), PdfError> {
            self.files.insert(filename.to_string(), data.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    impl ImageSink for FailingSink {
        fn write_image(&mut self, _filename: &str, _data: &[u8]) -> Result<(), PdfError> {
            Err(PdfError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    fn text_block(top: f32, lines: &[&str]) -> ContentBlock {
        ContentBlock::text_from_lines(BBox::new(0.0, top, 100.0, top + 10.0), lines)
    }

    fn image_block(top: f32, height: f32) -> ContentBlock {
        ContentBlock::Image {
            bbox: BBox::new(0.0, top, 100.0, top + height),
        }
    }

    fn placement(top: f32, height: f32, xref: Option<Xref>) -> ImagePlacement {
        ImagePlacement {
            bbox: BBox::new(0.0, top, 100.0, top + height),
            xref,
        }
    }

    fn page(page_number: u32, blocks: Vec<ContentBlock>, placements: Vec<ImagePlacement>) -> PageLayout {
        PageLayout {
            page_number,
            blocks,
            placements,
        }
    }

    fn png(bytes: &[u8]) -> ImagePayload {
        ImagePayload {
            data: bytes.to_vec(),
            ext: Some("png".into()),
        }
    }

    fn run(source: &MockSource) -> (ExtractionResult, MemorySink) {
        let mut sink = MemorySink::default();
        let result = linearize(source, &mut sink, &LinearizeOptions::default());
        (result, sink)
    }

    #[test]
    fn test_image_above_text_comes_first() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(
            1,
            vec![text_block(10.0, &["Caption"]), image_block(5.0, 2.0)],
            vec![placement(5.0, 2.0, Some(Xref(7, 0)))],
        )));
        source.payloads.insert(Xref(7, 0), png(b"img"));

        let (result, sink) = run(&source);
        assert_eq!(result.text_with_images, "\n[FIGURE:pdfimg1]\nCaption\n");
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].id, "pdfimg1");
        assert_eq!(result.images[0].filename, "pdfimg1.png");
        assert_eq!(result.images[0].page, 1);
        assert_eq!(result.images[0].bbox, [0.0, 5.0, 100.0, 7.0]);
        assert_eq!(sink.files.get("pdfimg1.png").map(Vec::as_slice), Some(&b"img"[..]));
    }

    #[test]
    fn test_no_placement_within_tolerance() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(
            1,
            vec![image_block(100.0, 20.0), image_block(400.0, 20.0)],
            // Exactly 50 away from the first block: outside the exclusive tolerance
            vec![placement(150.0, 20.0, Some(Xref(1, 0))), placement(400.0, 20.0, Some(Xref(2, 0)))],
        )));
        source.payloads.insert(Xref(2, 0), png(b"second"));

        let (result, _) = run(&source);
        assert_eq!(
            result.text_with_images,
            "\n[FIGURE:pdfimg1:no_xref]\n\n[FIGURE:pdfimg2]\n"
        );
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].id, "pdfimg2");
    }

    #[test]
    fn test_placement_without_xref() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(
            1,
            vec![image_block(0.0, 10.0)],
            vec![placement(0.0, 10.0, None)],
        )));
        let (result, _) = run(&source);
        assert_eq!(result.text_with_images, "\n[FIGURE:pdfimg1:no_xref]\n");
        assert!(result.images.is_empty());
    }

    #[test]
    fn test_extraction_failure_continues() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(
            1,
            vec![image_block(0.0, 10.0), text_block(50.0, &["after"]), image_block(100.0, 10.0)],
            vec![placement(0.0, 10.0, Some(Xref(1, 0))), placement(100.0, 10.0, Some(Xref(2, 0)))],
        )));
        source.payloads.insert(Xref(2, 0), png(b"ok"));

        let (result, sink) = run(&source);
        assert_eq!(
            result.text_with_images,
            "\n[FIGURE:pdfimg1:extraction_failed]\nafter\n\n[FIGURE:pdfimg2]\n"
        );
        assert_eq!(result.images.len(), 1);
        assert!(sink.files.contains_key("pdfimg2.png"));
        assert!(!sink.files.contains_key("pdfimg1.png"));
    }

    #[test]
    fn test_sink_failure_marks_extraction_failed() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(
            1,
            vec![image_block(0.0, 10.0)],
            vec![placement(0.0, 10.0, Some(Xref(1, 0)))],
        )));
        source.payloads.insert(Xref(1, 0), png(b"x"));

        let result = linearize(&source, &mut FailingSink, &LinearizeOptions::default());
        assert_eq!(result.text_with_images, "\n[FIGURE:pdfimg1:extraction_failed]\n");
        assert!(result.images.is_empty());
    }

    #[test]
    fn test_extension_defaults_to_png() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(
            1,
            vec![image_block(0.0, 10.0)],
            vec![placement(0.0, 10.0, Some(Xref(3, 0)))],
        )));
        source.payloads.insert(
            Xref(3, 0),
            ImagePayload {
                data: vec![1],
                ext: None,
            },
        );
        let (result, sink) = run(&source);
        assert_eq!(result.images[0].filename, "pdfimg1.png");
        assert!(sink.files.contains_key("pdfimg1.png"));

        let mut jpeg_source = MockSource::default();
        jpeg_source.pages = source.pages.clone();
        jpeg_source.payloads.insert(
            Xref(3, 0),
            ImagePayload {
                data: vec![1],
                ext: Some("jpeg".into()),
            },
        );
        let (result, _) = run(&jpeg_source);
        assert_eq!(result.images[0].filename, "pdfimg1.jpeg");
    }

    #[test]
    fn test_pages_separated_by_blank_line() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(1, vec![text_block(0.0, &["A"])], vec![])));
        source.pages.push(Ok(page(2, vec![text_block(0.0, &["B"])], vec![])));
        let (result, _) = run(&source);
        assert_eq!(result.text_with_images, "A\n\n\nB\n");
    }

    #[test]
    fn test_unreadable_page_keeps_separator() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(1, vec![text_block(0.0, &["A"])], vec![])));
        source.pages.push(Err("bad content stream".into()));
        source.pages.push(Ok(page(3, vec![text_block(0.0, &["C"])], vec![])));
        let (result, _) = run(&source);
        assert_eq!(result.text_with_images, "A\n\n\n\n\nC\n");
    }

    #[test]
    fn test_image_ids_continue_across_pages() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(1, vec![image_block(0.0, 10.0)], vec![])));
        source.pages.push(Ok(page(
            2,
            vec![image_block(0.0, 10.0)],
            vec![placement(0.0, 10.0, Some(Xref(9, 0)))],
        )));
        source.payloads.insert(Xref(9, 0), png(b"p2"));
        let (result, _) = run(&source);
        assert_eq!(
            result.text_with_images,
            "\n[FIGURE:pdfimg1:no_xref]\n\n\n\n[FIGURE:pdfimg2]\n"
        );
        assert_eq!(result.images[0].page, 2);
    }

    #[test]
    fn test_equal_tops_keep_block_order() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(
            1,
            vec![
                text_block(20.0, &["second"]),
                text_block(10.0, &["first"]),
                text_block(20.0, &["third"]),
            ],
            vec![],
        )));
        let (result, _) = run(&source);
        assert_eq!(result.text_with_images, "first\nsecond\nthird\n");
    }

    #[test]
    fn test_text_is_not_trimmed() {
        let mut source = MockSource::default();
        source.pages.push(Ok(page(1, vec![text_block(0.0, &["  indented  ", ""])], vec![])));
        let (result, _) = run(&source);
        assert_eq!(result.text_with_images, "  indented  \n\n");
    }

    #[test]
    fn test_center_keyed_collision_last_wins() {
        let placements = vec![
            placement(0.0, 10.0, Some(Xref(1, 0))),
            placement(0.0, 10.0, Some(Xref(2, 0))),
        ];
        let keyed = placement_candidates(&placements, PlacementMatching::CenterKeyed);
        assert_eq!(keyed.len(), 1);
        let found = find_placement(&keyed, 5.0, 50.0).unwrap();
        assert_eq!(found.xref, Some(Xref(2, 0)));

        let all = placement_candidates(&placements, PlacementMatching::Nearest);
        assert_eq!(all.len(), 2);
        let found = find_placement(&all, 5.0, 50.0).unwrap();
        assert_eq!(found.xref, Some(Xref(1, 0)));
    }

    #[test]
    fn test_nearest_placement_wins() {
        let placements = vec![
            placement(0.0, 10.0, Some(Xref(1, 0))),
            placement(20.0, 10.0, Some(Xref(2, 0))),
        ];
        let candidates = placement_candidates(&placements, PlacementMatching::Nearest);
        let found = find_placement(&candidates, 22.0, 50.0).unwrap();
        assert_eq!(found.xref, Some(Xref(2, 0)));
    }
}
