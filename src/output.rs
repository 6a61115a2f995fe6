//! Extraction result, JSON serialization, and image sinks

use crate::PdfError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// An image payload written to the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedImage {
    /// `pdfimg<N>`, numbered per document starting at 1
    pub id: String,
    pub filename: String,
    /// 1-based page number
    pub page: u32,
    pub bbox: [f32; 4],
}

/// The annotated text plus the manifest of extracted images
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub text_with_images: String,
    pub images: Vec<ExtractedImage>,
}

impl ExtractionResult {
    pub fn to_json(&self) -> Result<String, PdfError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, PdfError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Destination for extracted image payloads
pub trait ImageSink {
    fn write_image(&mut self, filename: &str, data: &[u8]) -> Result<(), PdfError>;
}

/// Writes payloads as files under a directory
#[derive(Debug, Clone)]
pub struct DirSink {
    dir: PathBuf,
}

impl DirSink {
    /// Create the sink, creating `dir` and its parents if absent
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, PdfError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl ImageSink for DirSink {
    fn write_image(&mut self, filename: &str, data: &[u8]) -> Result<(), PdfError> {
        fs::write(self.dir.join(filename), data)?;
        Ok(())
    }
}
