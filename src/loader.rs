//! Source document loading.
//!
//! PDFs are extracted page by page in page order; every other file is read
//! as UTF-8 text and treated as a single page.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Raw text of the reference document, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Document {
    pub source: PathBuf,
    pages: Vec<String>,
    text: String,
}

impl Document {
    /// Joins pages with a single newline; no page markers are inserted.
    pub fn from_pages(source: impl Into<PathBuf>, pages: Vec<String>) -> Result<Self> {
        let source = source.into();
        let text = pages.join("\n");
        if text.trim().is_empty() {
            return Err(Error::Load(format!(
                "{} contains no extractable text",
                source.display()
            )));
        }
        Ok(Self { source, pages, text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Load the document at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::Load(format!("{} does not exist or is not a file", path.display())));
    }

    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    let pages = if is_pdf {
        load_pdf_pages(path)?
    } else {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Load(format!("failed to read {}: {e}", path.display())))?;
        vec![content]
    };

    let document = Document::from_pages(path, pages)?;
    info!(
        "Loaded {} ({} pages, {} chars)",
        path.display(),
        document.page_count(),
        document.text().chars().count()
    );
    Ok(document)
}

fn load_pdf_pages(path: &Path) -> Result<Vec<String>> {
    let pdf = lopdf::Document::load(path)
        .map_err(|e| Error::Load(format!("failed to parse PDF {}: {e}", path.display())))?;

    let mut pages = Vec::new();
    // get_pages is keyed by page number, so iteration is already in reading order
    for page_number in pdf.get_pages().keys() {
        match pdf.extract_text(&[*page_number]) {
            Ok(text) => pages.push(text),
            Err(e) => warn!("Skipping page {page_number} of {}: {e}", path.display()),
        }
    }

    if pages.is_empty() {
        return Err(Error::Load(format!("no readable pages in {}", path.display())));
    }
    Ok(pages)
}
