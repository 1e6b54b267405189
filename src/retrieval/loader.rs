//! Regulation document loader.
//!
//! Walks the regulations directory and reads every document that matches
//! the configured extensions and size limit. PDF files are reduced to their
//! text layer; everything else is read as UTF-8 text.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Configuration for loading regulation documents.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// File extensions to include (e.g., ["md", "txt", "pdf"])
    pub extensions: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string(), "txt".to_string(), "pdf".to_string()],
            max_file_size: 5 * 1024 * 1024,
        }
    }
}

impl From<&crate::config::RetrievalConfig> for LoaderConfig {
    fn from(config: &crate::config::RetrievalConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            max_file_size: config.max_file_size,
        }
    }
}

/// A regulation file found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRegulation {
    /// Path relative to the regulations directory
    pub path: String,
    /// File size in bytes
    pub size: u64,
}

/// A loaded regulation document.
#[derive(Debug, Clone)]
pub struct RegulationSource {
    /// Path relative to the regulations directory
    pub path: String,
    pub content: String,
}

/// Loader for the regulations directory.
pub struct RegulationLoader {
    root: PathBuf,
    config: LoaderConfig,
}

/// Read a document as text, extracting the text layer of PDFs.
fn read_document(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if !is_pdf {
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    // The PDF parser panics on some malformed files instead of returning an error.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(anyhow!("Failed to extract text from {}: {}", path.display(), e)),
        Err(_) => Err(anyhow!("PDF parser crashed on {}", path.display())),
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

impl RegulationLoader {
    pub fn new(root: PathBuf, config: LoaderConfig) -> Self {
        Self { root, config }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the regulations directory if it does not exist.
    ///
    /// Returns `true` if the directory already existed.
    pub fn ensure_dir(&self) -> Result<bool> {
        if self.root.is_dir() {
            return Ok(true);
        }

        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        warn!(
            "Created empty regulations directory {}. Add .md, .txt or .pdf regulation files to it.",
            self.root.display()
        );
        Ok(false)
    }

    /// Check if a file matches the extension and size criteria.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            return false;
        }

        match fs::metadata(path) {
            Ok(metadata) => metadata.len() <= self.config.max_file_size,
            Err(_) => false,
        }
    }

    /// Scan for matching regulation files, sorted by path.
    pub fn scan(&self) -> Result<Vec<ScannedRegulation>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !self.matches(path) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let rel_path = path.strip_prefix(&self.root).unwrap_or(path);
            files.push(ScannedRegulation {
                path: rel_path.to_string_lossy().to_string(),
                size,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Read all matching documents. Unreadable or empty files are skipped.
    pub fn load(&self) -> Result<Vec<RegulationSource>> {
        let scanned = self.scan()?;
        let mut sources = Vec::with_capacity(scanned.len());

        for file in scanned {
            let full_path = self.root.join(&file.path);
            match read_document(&full_path) {
                Ok(content) if content.trim().is_empty() => {
                    debug!("Skipping empty document {}", file.path);
                }
                Ok(content) => {
                    debug!("Loaded {} ({} bytes)", file.path, file.size);
                    sources.push(RegulationSource {
                        path: file.path,
                        content,
                    });
                }
                Err(e) => {
                    warn!("Skipping {}: {:#}", file.path, e);
                }
            }
        }

        info!(
            "Loaded {} regulation documents from {}",
            sources.len(),
            self.root.display()
        );
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("internal")).unwrap();
        fs::create_dir(root.join(".cache")).unwrap();
        fs::write(root.join("b_hot_work.md"), "Hot work rules").unwrap();
        fs::write(root.join("internal").join("a_confined.TXT"), "Confined space").unwrap();
        fs::write(root.join("minutes.docx"), "PK").unwrap();
        fs::write(root.join(".cache").join("hidden.md"), "hidden").unwrap();

        let loader = RegulationLoader::new(root.to_path_buf(), LoaderConfig::default());
        let files = loader.scan().unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.replace('\\', "/")).collect();

        assert_eq!(paths, vec!["b_hot_work.md", "internal/a_confined.TXT"]);
    }

    #[test]
    fn test_load_skips_empty_and_oversized() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("empty.md"), "   \n").unwrap();
        fs::write(root.join("big.md"), "x".repeat(64)).unwrap();
        fs::write(root.join("ok.md"), "Lockout/tagout required").unwrap();

        let loader = RegulationLoader::new(
            root.to_path_buf(),
            LoaderConfig {
                extensions: vec!["md".to_string()],
                max_file_size: 32,
            },
        );
        let sources = loader.load().unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].path, "ok.md");
    }

    /// A one-page PDF with `text` drawn in Helvetica.
    fn single_page_pdf(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
                .to_string(),
            format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
        ];

        let mut pdf = String::from("%PDF-1.4\n");
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
        }

        let xref_at = pdf.len();
        pdf.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
        for offset in offsets {
            pdf.push_str(&format!("{:010} 00000 n \n", offset));
        }
        pdf.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        ));
        pdf.into_bytes()
    }

    #[test]
    fn test_load_extracts_pdf_text() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("lockout.pdf"), single_page_pdf("Lockout before maintenance")).unwrap();
        fs::write(root.join("hot_work.md"), "Gas test before hot work").unwrap();

        let loader = RegulationLoader::new(root.to_path_buf(), LoaderConfig::default());
        let sources = loader.load().unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].path, "lockout.pdf");
        assert!(sources[1].content.contains("Lockout"));
    }

    #[test]
    fn test_load_skips_broken_pdf() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("broken.pdf"), "%PDF-1.4\nnot really a pdf").unwrap();
        fs::write(root.join("ok.txt"), "Permit required").unwrap();

        let loader = RegulationLoader::new(root.to_path_buf(), LoaderConfig::default());
        let sources = loader.load().unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].path, "ok.txt");
    }

    #[test]
    fn test_ensure_dir_creates_missing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        let loader = RegulationLoader::new(root.clone(), LoaderConfig::default());

        assert!(!loader.ensure_dir().unwrap());
        assert!(root.is_dir());
        assert!(loader.ensure_dir().unwrap());
        assert!(loader.load().unwrap().is_empty());
    }

    #[test]
    fn test_bundled_fixtures_load() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/regulations");
        let loader = RegulationLoader::new(root, LoaderConfig::default());
        let sources = loader.load().unwrap();

        assert!(sources.len() >= 3);
        assert!(sources.iter().all(|s| !s.content.trim().is_empty()));
    }
}
