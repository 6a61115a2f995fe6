//! Page layout extraction from PDF using lopdf
//!
//! This module walks page content streams and recovers:
//! - Text blocks (one per `BT`/`ET` text object, split into lines by baseline)
//! - Image blocks for every image drawn with `Do` or inline with `BI`
//! - Placements tying each image XObject to its object id, so the payload
//!   can be fetched later with [`DocumentSource::extract_image`]

use crate::layout::{
    BBox, ContentBlock, DocumentSource, ImagePayload, ImagePlacement, PageLayout, TextLine,
    TextSpan, Xref,
};
use crate::PdfError;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;
use std::path::Path;

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Letter size, used when no MediaBox can be found
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Spans whose baselines differ by less than this share a line
const BASELINE_TOLERANCE: f32 = 3.0;

/// `TJ` offsets at or below this (thousandths of an em) read as a word gap
const TJ_SPACE_THRESHOLD: f32 = -200.0;

/// Average glyph advance as a fraction of the font size
const GLYPH_WIDTH_RATIO: f32 = 0.5;

const MAX_FORM_DEPTH: usize = 8;
const MAX_PARENT_DEPTH: usize = 32;

/// [`DocumentSource`] backed by a loaded `lopdf::Document`
///
/// The document is owned by the source and released when it is dropped.
pub struct LopdfSource {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl LopdfSource {
    /// Load a PDF file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PdfError> {
        let doc = Document::load(path)?;
        Self::checked(doc)
    }

    /// Load a PDF from a memory buffer
    pub fn open_mem(buffer: &[u8]) -> Result<Self, PdfError> {
        let doc = Document::load_mem(buffer)?;
        Self::checked(doc)
    }

    /// lopdf decrypts empty-password documents on load; anything still
    /// encrypted afterwards is unreadable
    fn checked(doc: Document) -> Result<Self, PdfError> {
        if doc.is_encrypted() {
            return Err(PdfError::Encrypted);
        }
        if doc.catalog().is_err() {
            return Err(PdfError::InvalidStructure);
        }
        Ok(Self::from_document(doc))
    }

    pub fn from_document(doc: Document) -> Self {
        let pages = doc.get_pages().into_values().collect();
        Self { doc, pages }
    }

    fn page_id(&self, page_number: u32) -> Result<ObjectId, PdfError> {
        page_number
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
            .copied()
            .ok_or(PdfError::PageOutOfRange(page_number, self.pages.len() as u32))
    }
}

impl DocumentSource for LopdfSource {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_layout(&self, page_number: u32) -> Result<PageLayout, PdfError> {
        let page_id = self.page_id(page_number)?;
        let media_box = page_media_box(&self.doc, page_id);
        let resources = inherited(&self.doc, page_id, b"Resources")
            .and_then(|obj| resolve_dict(&self.doc, obj));

        let content = self.doc.get_page_content(page_id)?;

        let mut walker = PageWalker::new(&self.doc, media_box[3]);
        walker.walk(&content, resources, IDENTITY, 0)?;

        log::debug!(
            "page {}: {} blocks, {} image placements",
            page_number,
            walker.blocks.len(),
            walker.placements.len()
        );

        Ok(PageLayout {
            page_number,
            blocks: walker.blocks,
            placements: walker.placements,
        })
    }

    fn extract_image(&self, xref: Xref) -> Result<ImagePayload, PdfError> {
        let stream = self.doc.get_object((xref.0, xref.1))?.as_stream()?;
        image_payload(&self.doc, stream)
    }
}

/// Look up a page attribute, walking up the page tree through `/Parent`
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    for _ in 0..MAX_PARENT_DEPTH {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj).as_dict().ok()
}

fn page_media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let Some(array) = inherited(doc, page_id, b"MediaBox")
        .map(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
    else {
        return DEFAULT_MEDIA_BOX;
    };

    let values: Vec<f32> = array.iter().filter_map(get_number).collect();
    if values.len() < 4 {
        return DEFAULT_MEDIA_BOX;
    }
    [
        values[0].min(values[2]),
        values[1].min(values[3]),
        values[0].max(values[2]),
        values[1].max(values[3]),
    ]
}

/// Multiply two 2D transformation matrices
/// Matrix format: [a, b, c, d, e, f] representing:
/// | a  b  0 |
/// | c  d  0 |
/// | e  f  1 |
fn multiply_matrices(m1: &[f32; 6], m2: &[f32; 6]) -> [f32; 6] {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

fn translation(tx: f32, ty: f32) -> [f32; 6] {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// Read six operands (or array items) as a matrix
fn matrix_from(objects: &[Object]) -> Option<[f32; 6]> {
    if objects.len() < 6 {
        return None;
    }
    let mut m = IDENTITY;
    for (slot, obj) in m.iter_mut().zip(objects) {
        *slot = get_number(obj)?;
    }
    Some(m)
}

/// Helper to get f32 from Object
fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Compute effective font size from base size and text rendering matrix
fn effective_font_size(base_size: f32, matrix: &[f32; 6]) -> f32 {
    let scale_x = (matrix[0].powi(2) + matrix[1].powi(2)).sqrt();
    let scale_y = (matrix[2].powi(2) + matrix[3].powi(2)).sqrt();
    base_size * scale_x.max(scale_y)
}

/// Decode a string operand with the font's encoding, falling back to
/// UTF-16BE (with BOM) and then Latin-1
fn decode_string(doc: &Document, font: Option<&Dictionary>, bytes: &[u8]) -> String {
    if let Some(font_dict) = font {
        if let Ok(encoding) = font_dict.get_font_encoding(doc) {
            if let Ok(text) = Document::decode_text(&encoding, bytes) {
                return text;
            }
        }
    }

    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        return String::from_utf16_lossy(&utf16);
    }

    bytes.iter().map(|&b| b as char).collect()
}

/// Text state carried across operators of one content stream
struct TextState<'a> {
    font: String,
    font_dict: Option<&'a Dictionary>,
    font_size: f32,
    leading: Option<f32>,
    text_matrix: [f32; 6],
    line_matrix: [f32; 6],
}

impl TextState<'_> {
    fn new() -> Self {
        Self {
            font: String::new(),
            font_dict: None,
            font_size: 12.0,
            leading: None,
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply_matrices(&translation(tx, ty), &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.leading.unwrap_or(self.font_size * 1.2);
        self.move_line(0.0, -leading);
    }
}

/// Lines accumulated for the text object currently open
#[derive(Default)]
struct TextBlockBuilder {
    lines: Vec<TextLine>,
    last_baseline: Option<f32>,
}

impl TextBlockBuilder {
    fn push_span(&mut self, span: TextSpan, bbox: BBox, baseline: f32) {
        let same_line = self
            .last_baseline
            .is_some_and(|last| (last - baseline).abs() < BASELINE_TOLERANCE);

        match self.lines.last_mut() {
            Some(line) if same_line => {
                line.bbox = line.bbox.union(&bbox);
                line.spans.push(span);
            }
            _ => {
                self.lines.push(TextLine {
                    spans: vec![span],
                    bbox,
                });
                self.last_baseline = Some(baseline);
            }
        }
    }

    fn finish(self) -> Option<ContentBlock> {
        let mut lines = self.lines.into_iter();
        let first = lines.next()?;
        let mut bbox = first.bbox;
        let mut all = vec![first];
        for line in lines {
            bbox = bbox.union(&line.bbox);
            all.push(line);
        }
        Some(ContentBlock::Text { bbox, lines: all })
    }
}

/// Walks one page's content (and the forms it draws) into blocks
struct PageWalker<'a> {
    doc: &'a Document,
    /// Top edge of the MediaBox, used to flip y to a top-left origin
    page_top: f32,
    blocks: Vec<ContentBlock>,
    placements: Vec<ImagePlacement>,
}

impl<'a> PageWalker<'a> {
    fn new(doc: &'a Document, page_top: f32) -> Self {
        Self {
            doc,
            page_top,
            blocks: Vec::new(),
            placements: Vec::new(),
        }
    }

    fn walk(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        base_ctm: [f32; 6],
        depth: usize,
    ) -> Result<(), PdfError> {
        let content = Content::decode(content)?;

        let mut ctm = base_ctm;
        let mut ctm_stack: Vec<[f32; 6]> = Vec::new();
        let mut state = TextState::new();
        let mut block: Option<TextBlockBuilder> = None;

        for op in &content.operations {
            let operands = op.operands.as_slice();
            match op.operator.as_str() {
                "q" => ctm_stack.push(ctm),
                "Q" => {
                    if let Some(saved) = ctm_stack.pop() {
                        ctm = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_from(operands) {
                        ctm = multiply_matrices(&m, &ctm);
                    }
                }
                "BT" => {
                    state.text_matrix = IDENTITY;
                    state.line_matrix = IDENTITY;
                    if let Some(done) = block.take().and_then(TextBlockBuilder::finish) {
                        self.blocks.push(done);
                    }
                    block = Some(TextBlockBuilder::default());
                }
                "ET" => {
                    if let Some(done) = block.take().and_then(TextBlockBuilder::finish) {
                        self.blocks.push(done);
                    }
                }
                "Tf" => {
                    if let [name, size, ..] = operands {
                        if let Ok(name) = name.as_name() {
                            state.font = String::from_utf8_lossy(name).to_string();
                            state.font_dict = self.font_dict(resources, name);
                        }
                        if let Some(size) = get_number(size) {
                            state.font_size = size;
                        }
                    }
                }
                "TL" => state.leading = operands.first().and_then(get_number),
                "Td" | "TD" => {
                    if let [tx, ty, ..] = operands {
                        let tx = get_number(tx).unwrap_or(0.0);
                        let ty = get_number(ty).unwrap_or(0.0);
                        if op.operator == "TD" {
                            state.leading = Some(-ty);
                        }
                        state.move_line(tx, ty);
                    }
                }
                "Tm" => {
                    if let Some(m) = matrix_from(operands) {
                        state.text_matrix = m;
                        state.line_matrix = m;
                    }
                }
                "T*" => state.next_line(),
                "Tj" => {
                    if let (Some(b), Some(Object::String(bytes, _))) = (block.as_mut(), operands.first()) {
                        let text = decode_string(self.doc, state.font_dict, bytes);
                        self.show_text(b, &mut state, &ctm, text);
                    }
                }
                "'" | "\"" => {
                    state.next_line();
                    if let (Some(b), Some(Object::String(bytes, _))) = (block.as_mut(), operands.last()) {
                        let text = decode_string(self.doc, state.font_dict, bytes);
                        self.show_text(b, &mut state, &ctm, text);
                    }
                }
                "TJ" => {
                    if let (Some(b), Some(Ok(array))) =
                        (block.as_mut(), operands.first().map(Object::as_array))
                    {
                        let text = self.decode_tj_array(&state, array);
                        self.show_text(b, &mut state, &ctm, text);
                    }
                }
                "Do" => {
                    if let Some(Ok(name)) = operands.first().map(Object::as_name) {
                        self.draw_xobject(name, resources, &ctm, depth);
                    }
                }
                "BI" => {
                    // Inline images carry no object id, so they never get a placement
                    let bbox = self.image_bbox(&ctm);
                    self.blocks.push(ContentBlock::Image { bbox });
                }
                _ => {}
            }
        }

        if let Some(done) = block.and_then(TextBlockBuilder::finish) {
            self.blocks.push(done);
        }

        Ok(())
    }

    fn font_dict(&self, resources: Option<&'a Dictionary>, name: &[u8]) -> Option<&'a Dictionary> {
        let doc = self.doc;
        let fonts = resolve_dict(doc, resources?.get(b"Font").ok()?)?;
        resolve_dict(doc, fonts.get(name).ok()?)
    }

    fn decode_tj_array(&self, state: &TextState<'a>, array: &[Object]) -> String {
        let mut text = String::new();
        for item in array {
            match item {
                Object::String(bytes, _) => {
                    text.push_str(&decode_string(self.doc, state.font_dict, bytes));
                }
                other => {
                    let gap = get_number(other).is_some_and(|n| n <= TJ_SPACE_THRESHOLD);
                    if gap && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
            }
        }
        text
    }

    fn show_text(
        &self,
        block: &mut TextBlockBuilder,
        state: &mut TextState<'a>,
        ctm: &[f32; 6],
        text: String,
    ) {
        if text.is_empty() {
            return;
        }

        let rendering = multiply_matrices(&state.text_matrix, ctm);
        let size = effective_font_size(state.font_size, &rendering);
        let (x, y) = (rendering[4], rendering[5]);
        let baseline = self.page_top - y;

        let glyphs = text.chars().count() as f32;
        let width = glyphs * size * GLYPH_WIDTH_RATIO;
        let bbox = BBox::new(x, baseline - size, x + width, baseline + size * 0.2);

        // Advance in unscaled text space so the next span starts after this one
        let advance = glyphs * state.font_size * GLYPH_WIDTH_RATIO;
        state.text_matrix = multiply_matrices(&translation(advance, 0.0), &state.text_matrix);

        let span = TextSpan {
            text,
            font: state.font.clone(),
            font_size: size,
        };
        block.push_span(span, bbox, baseline);
    }

    fn draw_xobject(
        &mut self,
        name: &[u8],
        resources: Option<&'a Dictionary>,
        ctm: &[f32; 6],
        depth: usize,
    ) {
        let doc = self.doc;
        let Some(xobjects) = resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|obj| resolve_dict(doc, obj))
        else {
            log::debug!("no XObject resources for /{}", String::from_utf8_lossy(name));
            return;
        };

        let (xref, stream) = match xobjects.get(name) {
            Ok(Object::Reference(id)) => match doc.get_object(*id).and_then(|o| o.as_stream()) {
                Ok(stream) => (Some(Xref(id.0, id.1)), stream),
                Err(e) => {
                    log::debug!("XObject {:?} is not a stream: {}", id, e);
                    return;
                }
            },
            Ok(Object::Stream(stream)) => (None, stream),
            _ => return,
        };

        match stream.dict.get(b"Subtype").and_then(|s| s.as_name()) {
            Ok(b"Image") => {
                let bbox = self.image_bbox(ctm);
                self.blocks.push(ContentBlock::Image { bbox });
                self.placements.push(ImagePlacement { bbox, xref });
            }
            Ok(b"Form") => {
                if depth >= MAX_FORM_DEPTH {
                    log::warn!("form XObjects nested deeper than {}, skipping", MAX_FORM_DEPTH);
                    return;
                }
                let matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|m| m.as_array().ok())
                    .and_then(|m| matrix_from(m))
                    .unwrap_or(IDENTITY);
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|obj| resolve_dict(doc, obj))
                    .or(resources);
                let content = match stream_content(stream) {
                    Ok(content) => content,
                    Err(e) => {
                        log::warn!("unreadable form XObject: {}", e);
                        return;
                    }
                };
                let form_ctm = multiply_matrices(&matrix, ctm);
                if let Err(e) = self.walk(&content, form_resources, form_ctm, depth + 1) {
                    log::warn!("failed to walk form XObject: {}", e);
                }
            }
            _ => {}
        }
    }

    /// Images are drawn into the unit square mapped through the CTM
    fn image_bbox(&self, ctm: &[f32; 6]) -> BBox {
        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
        let mut x_min = f32::INFINITY;
        let mut x_max = f32::NEG_INFINITY;
        let mut y_min = f32::INFINITY;
        let mut y_max = f32::NEG_INFINITY;
        for (u, v) in corners {
            let x = ctm[0] * u + ctm[2] * v + ctm[4];
            let y = ctm[1] * u + ctm[3] * v + ctm[5];
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
        BBox::new(x_min, self.page_top - y_max, x_max, self.page_top - y_min)
    }
}

/// Stream bytes with filters applied
fn stream_content(stream: &Stream) -> Result<Vec<u8>, PdfError> {
    if stream.dict.get(b"Filter").is_ok() {
        Ok(stream.decompressed_content()?)
    } else {
        Ok(stream.content.clone())
    }
}

fn stream_filters(stream: &Stream) -> Vec<String> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![String::from_utf8_lossy(name).to_string()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok())
            .map(|name| String::from_utf8_lossy(name).to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Turn an image XObject into file bytes and an extension
///
/// Encoded formats are passed through as stored; raw samples are
/// re-encoded as PNG.
fn image_payload(doc: &Document, stream: &Stream) -> Result<ImagePayload, PdfError> {
    let filters = stream_filters(stream);

    let passthrough = match filters.as_slice() {
        [only] if only == "DCTDecode" => Some("jpeg"),
        [only] if only == "JPXDecode" => Some("jpx"),
        [only] if only == "JBIG2Decode" => Some("jb2"),
        _ => None,
    };
    if let Some(ext) = passthrough {
        return Ok(ImagePayload {
            data: stream.content.clone(),
            ext: Some(ext.to_string()),
        });
    }

    if let Some(unsupported) = filters.iter().find(|f| {
        matches!(
            f.as_str(),
            "DCTDecode" | "JPXDecode" | "JBIG2Decode" | "CCITTFaxDecode"
        )
    }) {
        return Err(PdfError::ImageExtract(format!(
            "unsupported image filter chain ending in {}",
            unsupported
        )));
    }

    let samples = stream_content(stream)?;
    encode_png(doc, &stream.dict, samples)
}

fn dict_u32(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .ok()
        .and_then(|v| v.as_i64().ok())
        .and_then(|v| u32::try_from(v).ok())
}

/// Number of color components for an image color space
fn color_components(doc: &Document, color_space: &Object) -> Option<usize> {
    match resolve(doc, color_space) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(3),
            b"DeviceCMYK" | b"CMYK" => Some(4),
            _ => None,
        },
        Object::Array(items) => {
            let family = items.first()?.as_name().ok()?;
            match family {
                b"ICCBased" => {
                    let profile = resolve(doc, items.get(1)?).as_stream().ok()?;
                    dict_u32(&profile.dict, b"N").map(|n| n as usize)
                }
                b"CalGray" => Some(1),
                b"CalRGB" => Some(3),
                _ => None,
            }
        }
        _ => None,
    }
}

fn encode_png(doc: &Document, dict: &Dictionary, samples: Vec<u8>) -> Result<ImagePayload, PdfError> {
    let width = dict_u32(dict, b"Width")
        .ok_or_else(|| PdfError::ImageExtract("image has no /Width".to_string()))?;
    let height = dict_u32(dict, b"Height")
        .ok_or_else(|| PdfError::ImageExtract("image has no /Height".to_string()))?;
    let bits = dict_u32(dict, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Err(PdfError::ImageExtract(format!(
            "{} bits per component is not supported",
            bits
        )));
    }

    let components = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|cs| color_components(doc, cs))
        .ok_or_else(|| PdfError::ImageExtract("unsupported image color space".to_string()))?;

    let expected = width as usize * height as usize * components;
    if samples.len() < expected {
        return Err(PdfError::ImageExtract(format!(
            "image data too short: {} bytes, expected {}",
            samples.len(),
            expected
        )));
    }
    let samples = &samples[..expected];

    let image = match components {
        1 => GrayImage::from_raw(width, height, samples.to_vec()).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, samples.to_vec()).map(DynamicImage::ImageRgb8),
        4 => RgbImage::from_raw(width, height, cmyk_to_rgb(samples)).map(DynamicImage::ImageRgb8),
        n => {
            return Err(PdfError::ImageExtract(format!(
                "{} color components are not supported",
                n
            )))
        }
    }
    .ok_or_else(|| PdfError::ImageExtract("image buffer size mismatch".to_string()))?;

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| PdfError::ImageExtract(e.to_string()))?;

    Ok(ImagePayload {
        data: out.into_inner(),
        ext: Some("png".to_string()),
    })
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(4)
        .flat_map(|px| {
            let k = 255 - px[3] as u16;
            let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
            [channel(px[0]), channel(px[1]), channel(px[2])]
        })
        .collect()
}
