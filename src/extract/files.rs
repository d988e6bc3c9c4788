//! Text extraction from uploaded documents and the upload store itself.

use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "docx", "txt", "md"];

lazy_static! {
    static ref DOCX_PARAGRAPH: Regex = Regex::new(r"(?s)<w:p[ >].*?</w:p>").unwrap();
    static ref DOCX_TEXT_RUN: Regex = Regex::new(r"<w:t[^>]*>([^<]*)</w:t>").unwrap();
}

fn extension(path: &Path) -> Option<String> {
    path.extension()?.to_str().map(str::to_ascii_lowercase)
}

/// MIME type for a supported document, `None` for anything else.
pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    match extension(path)?.as_str() {
        "pdf" => Some("application/pdf"),
        "txt" | "md" => Some("text/plain"),
        "docx" => {
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        _ => None,
    }
}

/// Extract readable text from a document on disk.
///
/// Unsupported extensions yield `None` without error; extraction failures
/// are logged and also yield `None`.
pub fn extract_text(path: &Path) -> Option<String> {
    match extension(path)?.as_str() {
        "pdf" => read_pdf(path),
        "docx" => read_docx(path),
        "txt" | "md" => read_text(path),
        _ => None,
    }
}

fn read_pdf(path: &Path) -> Option<String> {
    let document = lopdf::Document::load(path)
        .map_err(|err| warn!("failed to open pdf {}: {err}", path.display()))
        .ok()?;

    let mut pages = Vec::new();
    for (number, _) in document.get_pages() {
        match document.extract_text(&[number]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text.trim().to_string()),
            Ok(_) => {} // blank page
            Err(err) => warn!("failed to read pdf page {number} of {}: {err}", path.display()),
        }
    }
    Some(pages.join("\n\n"))
}

fn read_docx(path: &Path) -> Option<String> {
    let file = fs::File::open(path)
        .map_err(|err| warn!("failed to open docx {}: {err}", path.display()))
        .ok()?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| warn!("failed to read docx archive {}: {err}", path.display()))
        .ok()?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|err| warn!("docx {} has no document part: {err}", path.display()))
        .ok()?
        .read_to_string(&mut xml)
        .ok()?;

    let mut paragraphs = Vec::new();
    for paragraph in DOCX_PARAGRAPH.find_iter(&xml) {
        let text: String = DOCX_TEXT_RUN
            .captures_iter(paragraph.as_str())
            .map(|run| run[1].to_string())
            .collect();
        let text = decode_xml_entities(text.trim());
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }
    Some(paragraphs.join("\n\n"))
}

fn read_text(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .map_err(|err| warn!("failed to read {}: {err}", path.display()))
        .ok()
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Sanitize an uploaded filename for safe storage: basename only, spaces to
/// underscores, anything but alphanumerics and `-_.` dropped.
pub fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    let kept: String = base
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();

    if kept.is_empty() {
        "unnamed_file".to_string()
    } else {
        kept
    }
}

/// Local storage for uploaded files.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) an upload directory. A `.gitkeep` marker is
    /// kept so the directory survives in version control.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let gitkeep = root.join(".gitkeep");
        if !gitkeep.exists() {
            fs::write(&gitkeep, "")?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if the filename carries a supported (or explicitly allowed)
    /// extension.
    pub fn is_allowed_extension(filename: &str, allowed: Option<&[&str]>) -> bool {
        let allowed = allowed.unwrap_or(&SUPPORTED_EXTENSIONS);
        extension(Path::new(filename))
            .map(|ext| allowed.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Store uploaded bytes under a sanitized name, suffixing a counter when
    /// the name is taken. Returns the path and size written.
    pub fn save(&self, filename: &str, data: &[u8]) -> std::io::Result<(PathBuf, u64)> {
        let safe = sanitize_filename(filename);
        let mut path = self.root.join(&safe);

        let mut counter = 1;
        while path.exists() {
            let stem = Path::new(&safe)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("file");
            let candidate = match Path::new(&safe).extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{stem}_{counter}.{ext}"),
                None => format!("{stem}_{counter}"),
            };
            path = self.root.join(candidate);
            counter += 1;
        }

        fs::write(&path, data)?;
        let size = fs::metadata(&path)?.len();
        Ok((path, size))
    }

    /// Delete a stored file. Returns whether anything was removed.
    pub fn remove(&self, path: &Path) -> bool {
        if path.is_file() {
            if let Err(err) = fs::remove_file(path) {
                warn!("failed to delete {}: {err}", path.display());
                return false;
            }
            return true;
        }
        false
    }

    /// Delete stored files older than `max_age`, sparing the `.gitkeep`
    /// marker. Returns how many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("failed to list {}: {err}", self.root.display());
                return 0;
            }
        };

        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()) == Some(".gitkeep") {
                continue;
            }
            if !path.is_file() {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .map(|age| age > max_age)
                .unwrap_or(false);
            if expired && self.remove(&path) {
                deleted += 1;
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("my report.pdf"), "my_report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("we?ird*na:me.md"), "weirdname.md");
        assert_eq!(sanitize_filename("///"), "unnamed_file");
    }

    #[test]
    fn test_allowed_extensions() {
        assert!(FileStore::is_allowed_extension("paper.PDF", None));
        assert!(FileStore::is_allowed_extension("notes.md", None));
        assert!(!FileStore::is_allowed_extension("binary.exe", None));
        assert!(!FileStore::is_allowed_extension("no_extension", None));
        assert!(FileStore::is_allowed_extension(
            "data.csv",
            Some(&["csv"])
        ));
    }

    #[test]
    fn test_save_deduplicates_names() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let (first, size) = store.save("notes.txt", b"one").unwrap();
        assert_eq!(size, 3);
        let (second, _) = store.save("notes.txt", b"two").unwrap();
        let (third, _) = store.save("notes.txt", b"three").unwrap();

        assert_eq!(first.file_name().unwrap(), "notes.txt");
        assert_eq!(second.file_name().unwrap(), "notes_1.txt");
        assert_eq!(third.file_name().unwrap(), "notes_2.txt");
    }

    #[test]
    fn test_cleanup_spares_gitkeep() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.save("old.txt", b"stale").unwrap();

        let deleted = store.cleanup_older_than(Duration::ZERO);
        assert_eq!(deleted, 1);
        assert!(dir.path().join(".gitkeep").exists());
    }

    #[test]
    fn test_extract_text_plain_and_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("readme.md");
        fs::write(&path, "# hello\nworld").unwrap();

        assert_eq!(extract_text(&path), Some("# hello\nworld".to_string()));
        assert_eq!(extract_text(&dir.path().join("image.png")), None);
        assert_eq!(extract_text(Path::new("no_extension")), None);
    }

    #[test]
    fn test_docx_paragraph_extraction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.docx");

        let xml = r#"<?xml version="1.0"?><w:document><w:body>
            <w:p><w:r><w:t>First </w:t></w:r><w:r><w:t>paragraph</w:t></w:r></w:p>
            <w:p></w:p>
            <w:p><w:r><w:t xml:space="preserve">Second &amp; last</w:t></w:r></w:p>
            </w:body></w:document>"#;

        let file = fs::File::create(&path).unwrap();
        let mut archive = zip::ZipWriter::new(file);
        archive
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut archive, xml.as_bytes()).unwrap();
        archive.finish().unwrap();

        assert_eq!(
            extract_text(&path),
            Some("First paragraph\n\nSecond & last".to_string())
        );
    }
}
