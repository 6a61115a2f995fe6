//! Figure-aware PDF text extraction with structure annotation
//!
//! This crate provides:
//! - Page layout recovery from PDF content streams using lopdf
//! - Linearization of text and image blocks into one reading-order stream,
//!   with `[FIGURE:<id>]` markers and the image payloads written to disk
//! - Inline annotation of formula lines and table regions for a downstream
//!   rewriting stage

pub mod extractor;
pub mod formulas;
pub mod layout;
pub mod linearize;
pub mod output;
pub mod tables;

pub use extractor::LopdfSource;
pub use formulas::mark_formulas;
pub use layout::{BBox, ContentBlock, DocumentSource, ImagePayload, ImagePlacement, PageLayout, Xref};
pub use linearize::{linearize, LinearizeOptions, PlacementMatching};
pub use output::{DirSink, ExtractedImage, ExtractionResult, ImageSink};
pub use tables::{detect_table_structure, TableOptions};

use std::path::{Path, PathBuf};

/// Options for the whole extraction pipeline
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub linearize: LinearizeOptions,
    pub tables: TableOptions,
    /// Wrap math-dense lines in `[FORMULA: … :END_FORMULA]`
    pub mark_formulas: bool,
    /// Wrap table regions in `[TABLE_START]` … `[TABLE_END]`
    pub detect_tables: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            linearize: LinearizeOptions::default(),
            tables: TableOptions::default(),
            mark_formulas: true,
            detect_tables: true,
        }
    }
}

/// Apply formula marking, then table detection, to linearized text
pub fn annotate_text(text: &str, options: &ExtractOptions) -> String {
    let text = if options.mark_formulas {
        mark_formulas(text)
    } else {
        text.to_string()
    };

    if options.detect_tables {
        detect_table_structure(&text, &options.tables)
    } else {
        text
    }
}

/// Run the pipeline over any document source
///
/// Linearizes every page, writing image payloads to `sink`, then annotates
/// the resulting text. The image manifest is left as linearization
/// produced it.
pub fn process_source<S, K>(source: &S, sink: &mut K, options: &ExtractOptions) -> ExtractionResult
where
    S: DocumentSource + ?Sized,
    K: ImageSink + ?Sized,
{
    let mut result = linearize(source, sink, &options.linearize);
    result.text_with_images = annotate_text(&result.text_with_images, options);
    result
}

/// Extract a PDF file with default options
///
/// Images are written to `output_dir` as `<id>.<ext>`; the directory is
/// created with its parents if needed.
pub fn process_pdf<P, Q>(path: P, output_dir: Q) -> Result<ExtractionResult, PdfError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    process_pdf_with_options(path, output_dir, &ExtractOptions::default())
}

/// Extract a PDF file
pub fn process_pdf_with_options<P, Q>(
    path: P,
    output_dir: Q,
    options: &ExtractOptions,
) -> Result<ExtractionResult, PdfError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let start = std::time::Instant::now();
    let path = path.as_ref();

    if !path.exists() {
        return Err(PdfError::NotFound(path.to_path_buf()));
    }

    let mut sink = DirSink::create(output_dir)?;
    let source = LopdfSource::open(path)?;
    let result = process_source(&source, &mut sink, options);

    log::info!(
        "{}: {} pages, {} images in {}ms",
        path.display(),
        source.page_count(),
        result.images.len(),
        start.elapsed().as_millis()
    );

    Ok(result)
}

/// Extract a PDF from a memory buffer
pub fn process_pdf_mem<Q: AsRef<Path>>(
    buffer: &[u8],
    output_dir: Q,
    options: &ExtractOptions,
) -> Result<ExtractionResult, PdfError> {
    let mut sink = DirSink::create(output_dir)?;
    let source = LopdfSource::open_mem(buffer)?;
    Ok(process_source(&source, &mut sink, options))
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("PDF parsing error: {0}")]
    Parse(String),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("Invalid PDF structure")]
    InvalidStructure,
    #[error("Image extraction error: {0}")]
    ImageExtract(String),
    #[error("Page {0} out of range (document has {1} pages)")]
    PageOutOfRange(u32, u32),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<lopdf::Error> for PdfError {
    fn from(e: lopdf::Error) -> Self {
        PdfError::Parse(e.to_string())
    }
}
