//! Upload and output directories.
//!
//! Files are keyed by their sanitized filename only. An upload and its
//! generated image share the same name in two sibling directories, and a
//! repeat upload under the same name replaces both.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use unicode_normalization::UnicodeNormalization;

/// Formats the upload route accepts. Must stay in sync with the `image`
/// features enabled in Cargo.toml.
pub const ACCEPTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::WebP,
];

#[cfg(windows)]
const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which of the two directories a file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Upload,
    Output,
}

/// A stored file read back for raw serving.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl ImageStore {
    /// Create both directories if needed and return a handle to them.
    pub fn open(
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let store = Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        };
        for dir in [&store.upload_dir, &store.output_dir] {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        tracing::debug!(
            uploads = %store.upload_dir.display(),
            outputs = %store.output_dir.display(),
            "Storage directories ready"
        );
        Ok(store)
    }

    pub fn dir(&self, kind: StoreKind) -> &Path {
        match kind {
            StoreKind::Upload => &self.upload_dir,
            StoreKind::Output => &self.output_dir,
        }
    }

    /// `name` must already be sanitized.
    pub fn upload_path(&self, name: &str) -> PathBuf {
        self.upload_dir.join(name)
    }

    /// `name` must already be sanitized.
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    /// Write an upload, replacing any previous file of the same name.
    pub fn save_upload(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.upload_path(name);
        std::fs::write(&path, bytes).map_err(|e| StorageError::io(&path, e))?;
        Ok(path)
    }

    pub fn load_upload(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.upload_path(name);
        std::fs::read(&path).map_err(|e| StorageError::io(&path, e))
    }

    /// Copy an upload verbatim into the output directory.
    pub fn copy_to_output(&self, name: &str) -> Result<PathBuf, StorageError> {
        let src = self.upload_path(name);
        let dst = self.output_path(name);
        std::fs::copy(&src, &dst).map_err(|e| StorageError::io(&dst, e))?;
        Ok(dst)
    }

    /// Read a stored file for serving. `Ok(None)` when there is no such file.
    ///
    /// Only names that are already in sanitized form can resolve, so a request
    /// can never reach outside the two directories.
    pub async fn read(
        &self,
        kind: StoreKind,
        name: &str,
    ) -> Result<Option<StoredFile>, StorageError> {
        match sanitize_filename(name) {
            Some(safe) if safe == name => {}
            _ => return Ok(None),
        }

        let path = self.dir(kind).join(name);
        if !path.is_file() {
            return Ok(None);
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(StoredFile {
                bytes,
                content_type: mime_guess::from_path(&path)
                    .first_or_octet_stream()
                    .to_string(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }
}

/// Reduce a client-supplied filename to a safe flat name.
///
/// Follows werkzeug's `secure_filename`: the name is NFKD-decomposed and
/// non-ASCII characters are dropped,
/// path separators become spaces, whitespace runs become `_`, anything outside
/// `[A-Za-z0-9_.-]` is removed and leading/trailing `.`/`_` are stripped.
/// Returns `None` when nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let spaced: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if is_path_separator(c) { ' ' } else { c })
        .collect();

    let joined = spaced
        .split(is_split_whitespace)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return None;
    }

    #[cfg(windows)]
    {
        let stem = trimmed.split('.').next().unwrap_or_default().to_ascii_uppercase();
        if WINDOWS_DEVICE_NAMES.contains(&stem.as_str()) {
            return Some(format!("_{trimmed}"));
        }
    }

    Some(trimmed.to_string())
}

fn is_path_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

// ASCII characters Python's `str.split()` treats as whitespace.
fn is_split_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0b' | '\x0c' | '\r' | '\x1c'..='\x1f')
}

/// Sniff the image format from magic bytes, limited to [`ACCEPTED_FORMATS`].
pub fn detect_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .filter(|format| ACCEPTED_FORMATS.contains(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Filename sanitization ------------------------------------------------

    #[test]
    fn sanitize_path_traversal() {
        assert_eq!(
            sanitize_filename("../../../etc/passwd").as_deref(),
            Some("etc_passwd")
        );
    }

    #[test]
    fn sanitize_spaces_become_underscores() {
        assert_eq!(
            sanitize_filename("My cool  sketch.png").as_deref(),
            Some("My_cool_sketch.png")
        );
    }

    #[test]
    fn sanitize_special_chars_removed() {
        assert_eq!(
            sanitize_filename("face (1)!.jpg").as_deref(),
            Some("face_1.jpg")
        );
    }

    #[test]
    fn sanitize_non_ascii_dropped() {
        assert_eq!(sanitize_filename("日本.png").as_deref(), Some("png"));
        assert_eq!(sanitize_filename("skétch.png").as_deref(), Some("sketch.png"));
        assert_eq!(sanitize_filename("ﬁnal ①.png").as_deref(), Some("final_1.png"));
    }

    #[test]
    fn sanitize_strips_leading_dots_and_underscores() {
        assert_eq!(sanitize_filename("._hidden.png").as_deref(), Some("hidden.png"));
        assert_eq!(sanitize_filename("__init__").as_deref(), Some("init"));
    }

    #[test]
    fn sanitize_preserves_valid_name() {
        assert_eq!(sanitize_filename("sketch.png").as_deref(), Some("sketch.png"));
        assert_eq!(sanitize_filename("face-2024_v2.jpg").as_deref(), Some("face-2024_v2.jpg"));
    }

    #[test]
    fn sanitize_nothing_left() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("///"), None);
        assert_eq!(sanitize_filename("???"), None);
    }

    #[test]
    fn sanitize_null_bytes() {
        assert_eq!(sanitize_filename("file\0name.jpg").as_deref(), Some("filename.jpg"));
    }

    #[cfg(not(windows))]
    #[test]
    fn sanitize_backslash_is_dropped_on_unix() {
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\face.jpg").as_deref(),
            Some("CUsersmeface.jpg")
        );
    }

    // -- Format detection -----------------------------------------------------

    #[test]
    fn detect_png_and_jpeg() {
        assert_eq!(
            detect_image_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            detect_image_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
            Some(ImageFormat::Jpeg)
        );
    }

    #[test]
    fn detect_rejects_non_images() {
        assert_eq!(detect_image_format(b"%PDF-1.4 some content"), None);
        assert_eq!(detect_image_format(b"hello"), None);
        assert_eq!(detect_image_format(&[]), None);
    }

    #[test]
    fn detect_rejects_formats_not_compiled_in() {
        // TIFF little-endian magic
        assert_eq!(detect_image_format(&[0x49, 0x49, 0x2A, 0x00, 0, 0, 0, 0]), None);
    }

    // -- Store ----------------------------------------------------------------

    #[test]
    fn open_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::open(tmp.path().join("in"), tmp.path().join("out")).unwrap();
        assert!(store.dir(StoreKind::Upload).is_dir());
        assert!(store.dir(StoreKind::Output).is_dir());

        // Idempotent
        ImageStore::open(tmp.path().join("in"), tmp.path().join("out")).unwrap();
    }

    #[test]
    fn save_then_copy_is_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::open(tmp.path().join("in"), tmp.path().join("out")).unwrap();

        store.save_upload("a.png", b"first").unwrap();
        let out = store.copy_to_output("a.png").unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"first");
    }

    #[test]
    fn save_overwrites_same_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::open(tmp.path().join("in"), tmp.path().join("out")).unwrap();

        store.save_upload("a.png", b"first").unwrap();
        store.save_upload("a.png", b"second").unwrap();
        assert_eq!(std::fs::read(store.upload_path("a.png")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn read_returns_bytes_and_content_type() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::open(tmp.path().join("in"), tmp.path().join("out")).unwrap();
        store.save_upload("face.png", b"png-bytes").unwrap();

        let file = store.read(StoreKind::Upload, "face.png").await.unwrap().unwrap();
        assert_eq!(file.bytes, b"png-bytes");
        assert_eq!(file.content_type, "image/png");

        // Not in the output directory yet
        assert!(store.read(StoreKind::Output, "face.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_refuses_unsanitized_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::open(tmp.path().join("in"), tmp.path().join("out")).unwrap();
        std::fs::write(tmp.path().join("secret.txt"), b"nope").unwrap();

        assert!(store
            .read(StoreKind::Upload, "../secret.txt")
            .await
            .unwrap()
            .is_none());
        assert!(store.read(StoreKind::Upload, "missing.png").await.unwrap().is_none());
    }
}
