use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::SourceError;

pub trait ByteSource: Send + Sync {
    fn get_bytes(&self, source_ref: &str) -> Result<Vec<u8>, SourceError>;
}

#[derive(Debug, Clone, Default)]
pub struct FileSystemSource {
    root: Option<PathBuf>,
}

impl FileSystemSource {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    fn resolve(&self, source_ref: &str) -> PathBuf {
        let path = Path::new(source_ref);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ByteSource for FileSystemSource {
    fn get_bytes(&self, source_ref: &str) -> Result<Vec<u8>, SourceError> {
        let path = self.resolve(source_ref);
        fs::read(&path).map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                SourceError::NotFound(path.display().to_string())
            } else {
                SourceError::Io {
                    reference: path.display().to_string(),
                    source: error,
                }
            }
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MediaKind {
    Pdf,
    Image,
    Other,
}

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
];

const OTHER_EXTENSIONS: &[(&str, &str)] = &[
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("avi", "video/x-msvideo"),
    ("txt", "text/plain"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
];

pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
}

pub fn infer_media_type(filename: &str) -> String {
    let Some(extension) = file_extension(filename) else {
        return "application/octet-stream".to_string();
    };
    if extension == "pdf" {
        return "application/pdf".to_string();
    }

    IMAGE_EXTENSIONS
        .iter()
        .chain(OTHER_EXTENSIONS.iter())
        .find(|(candidate, _)| *candidate == extension)
        .map(|(_, media_type)| media_type.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

pub fn media_kind(media_type: &str, filename: &str, bytes: &[u8]) -> MediaKind {
    if media_type.eq_ignore_ascii_case("application/pdf") || looks_like_pdf(bytes) {
        return MediaKind::Pdf;
    }

    let media_type = media_type.to_ascii_lowercase();
    let declared_image = IMAGE_EXTENSIONS
        .iter()
        .any(|(_, candidate)| *candidate == media_type);
    let named_image = file_extension(filename)
        .map(|extension| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|(candidate, _)| *candidate == extension)
        })
        .unwrap_or(false);

    if declared_image || (media_type == "application/octet-stream" && named_image) {
        MediaKind::Image
    } else {
        MediaKind::Other
    }
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(5).any(|window| window == b"%PDF-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported_as_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FileSystemSource::new(Some(dir.path().to_path_buf()));
        let error = source.get_bytes("missing.pdf").expect_err("missing");
        assert!(matches!(error, SourceError::NotFound(_)));
    }

    #[test]
    fn relative_refs_resolve_against_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("atto.pdf"), b"%PDF-1.7").expect("write");
        let source = FileSystemSource::new(Some(dir.path().to_path_buf()));
        assert_eq!(source.get_bytes("atto.pdf").expect("bytes"), b"%PDF-1.7");
    }

    #[test]
    fn media_type_is_inferred_from_extension() {
        assert_eq!(infer_media_type("verbale.PDF"), "application/pdf");
        assert_eq!(infer_media_type("foto.jpeg"), "image/jpeg");
        assert_eq!(infer_media_type("audio.mp3"), "audio/mpeg");
        assert_eq!(infer_media_type("senza_estensione"), "application/octet-stream");
    }

    #[test]
    fn pdf_magic_wins_over_declared_type() {
        assert_eq!(
            media_kind("application/octet-stream", "scan.bin", b"%PDF-1.4\n"),
            MediaKind::Pdf
        );
        assert_eq!(media_kind("image/png", "scan.png", b"\x89PNG"), MediaKind::Image);
        assert_eq!(
            media_kind("application/octet-stream", "scan.tif", b"II*\0"),
            MediaKind::Image
        );
        assert_eq!(media_kind("audio/mpeg", "call.mp3", b"ID3"), MediaKind::Other);
    }
}
