//! Image normalisation: any inbound image reference → `(media type, base64)`.
//!
//! VLM APIs accept images as base64 strings embedded in the request body, so
//! this stage never decodes to pixels. It only settles on one canonical
//! payload and a media type the oracle can announce alongside it.

use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fallback when the media type cannot be inferred.
pub const OCTET_STREAM: &str = "application/octet-stream";

static RE_DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^data:(?P<mime>[^;,]+);base64,(?P<b64>.*)$").unwrap());

/// An image reference as handed to the pipeline.
#[derive(Debug, Clone)]
pub enum ImageRef {
    /// Raw image bytes, with the content type the store declared (if any).
    Bytes {
        bytes: Vec<u8>,
        media_type: Option<String>,
    },
    /// Base64 text, bare or wrapped in a `data:<mime>;base64,` envelope.
    Base64(String),
    /// A local image file.
    Path(PathBuf),
}

/// Canonical image payload ready for the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub media_type: String,
    /// Standard-alphabet base64 payload, no envelope, no surrounding whitespace.
    pub data: String,
}

impl EncodedImage {
    /// Decode the payload back to bytes.
    pub fn decode(&self) -> Result<Vec<u8>, IngestError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| IngestError::InvalidImageInput {
                key: "<inline>".to_string(),
                reason: format!("malformed base64: {e}"),
            })
    }

    /// Wrap the payload for an `edgequake_llm` chat message.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.media_type.as_str())
    }
}

/// Map a key or file name to a media type by its extension.
pub fn media_type_for_key(key: &str) -> &'static str {
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("heic") | Some("heif") => "image/heic",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => OCTET_STREAM,
    }
}

/// Split a possibly `data:`-wrapped base64 string into `(mime?, payload)`.
///
/// Unwrapped input is returned trimmed with no mime.
pub fn split_data_uri(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim();
    match RE_DATA_URI.captures(trimmed) {
        Some(caps) => {
            let mime = caps.name("mime").map(|m| m.as_str().trim());
            let b64 = caps.name("b64").map(|m| m.as_str().trim()).unwrap_or("");
            (mime, b64)
        }
        None => (None, trimmed),
    }
}

/// Normalise an image reference into an [`EncodedImage`].
///
/// `key` is the storage key (or file name) used for media-type inference and
/// error reporting. A declared media type always wins over the extension.
///
/// # Errors
/// [`IngestError::InvalidImageInput`] when the reference carries no data or
/// the file cannot be read.
pub fn normalize(image: ImageRef, key: &str) -> Result<EncodedImage, IngestError> {
    let invalid = |reason: String| IngestError::InvalidImageInput {
        key: key.to_string(),
        reason,
    };

    let encoded: EncodedImage = match image {
        ImageRef::Bytes { bytes, media_type } => {
            if bytes.is_empty() {
                return Err(invalid("empty image body".into()));
            }
            let media_type = media_type
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| media_type_for_key(key).to_string());
            EncodedImage {
                media_type,
                data: STANDARD.encode(&bytes),
            }
        }
        ImageRef::Base64(text) => {
            let (mime, payload) = split_data_uri(&text);
            if payload.trim().is_empty() {
                let reason = match mime {
                    Some(m) => format!("data URI ({m}) carries no payload"),
                    None => "empty base64 payload".to_string(),
                };
                return Err(invalid(reason));
            }
            EncodedImage {
                media_type: mime
                    .map(|m| m.to_ascii_lowercase())
                    .unwrap_or_else(|| media_type_for_key(key).to_string()),
                data: payload.split_whitespace().collect(),
            }
        }
        ImageRef::Path(path) => {
            let bytes = std::fs::read(&path)
                .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
            let name = path.to_string_lossy().into_owned();
            return normalize(
                ImageRef::Bytes {
                    bytes,
                    media_type: Some(media_type_for_key(&name).to_string()),
                },
                key,
            );
        }
    };

    debug!(
        "Normalised '{}' → {} ({} bytes base64)",
        key,
        encoded.media_type,
        encoded.data.len()
    );
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn extension_table() {
        assert_eq!(media_type_for_key("a/b/c.PNG"), "image/png");
        assert_eq!(media_type_for_key("x.jpg"), "image/jpeg");
        assert_eq!(media_type_for_key("x.jpeg"), "image/jpeg");
        assert_eq!(media_type_for_key("x.webp"), "image/webp");
        assert_eq!(media_type_for_key("x.heif"), "image/heic");
        assert_eq!(media_type_for_key("x.pdf"), "application/pdf");
        assert_eq!(media_type_for_key("x.tiff"), OCTET_STREAM);
        assert_eq!(media_type_for_key("noext"), OCTET_STREAM);
    }

    #[test]
    fn bytes_are_base64_encoded() {
        let img = normalize(
            ImageRef::Bytes {
                bytes: vec![0xFF, 0xD8, 0xFF],
                media_type: None,
            },
            "receipts/img/alice/r.jpg",
        )
        .unwrap();
        assert_eq!(img.media_type, "image/jpeg");
        assert_eq!(img.decode().unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn declared_type_wins_over_extension() {
        let img = normalize(
            ImageRef::Bytes {
                bytes: b"png".to_vec(),
                media_type: Some("image/png".into()),
            },
            "r.jpg",
        )
        .unwrap();
        assert_eq!(img.media_type, "image/png");
    }

    #[test]
    fn data_uri_envelope_is_case_insensitive() {
        let img = normalize(
            ImageRef::Base64("  DATA:image/webp;BASE64,aGVsbG8=\n".into()),
            "upload.txt",
        )
        .unwrap();
        assert_eq!(img.media_type, "image/webp");
        assert_eq!(img.data, "aGVsbG8=");
    }

    #[test]
    fn bare_base64_uses_key_extension() {
        let img = normalize(ImageRef::Base64("aGVsbG8=\n".into()), "r/u/bob/x.png").unwrap();
        assert_eq!(img.media_type, "image/png");
        assert_eq!(img.data, "aGVsbG8=");
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let err = normalize(
            ImageRef::Bytes {
                bytes: vec![],
                media_type: None,
            },
            "k.jpg",
        )
        .unwrap_err();
        assert_eq!(err.tag(), "invalid_image_input");

        let err = normalize(ImageRef::Base64("   ".into()), "k.jpg").unwrap_err();
        assert_eq!(err.tag(), "invalid_image_input");
    }

    #[test]
    fn data_uri_without_payload_is_rejected() {
        for text in [
            "data:image/png;base64,",
            "data:image/png;base64,  \n\t",
            "DATA:image/jpeg;BASE64,",
        ] {
            let err = normalize(ImageRef::Base64(text.into()), "k.jpg").unwrap_err();
            assert_eq!(err.tag(), "invalid_image_input", "input {text:?}");
        }
    }

    #[test]
    fn malformed_base64_fails_only_on_decode() {
        let img = normalize(ImageRef::Base64("not*base64!".into()), "k.jpg").unwrap();
        assert!(matches!(
            img.decode(),
            Err(IngestError::InvalidImageInput { .. })
        ));
    }

    #[test]
    fn path_reference_reads_file() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(b"\x89PNG").unwrap();
        let img = normalize(ImageRef::Path(tmp.path().to_path_buf()), "local").unwrap();
        assert_eq!(img.media_type, "image/png");
        assert_eq!(img.decode().unwrap(), b"\x89PNG");
    }

    #[test]
    fn missing_path_is_invalid_input() {
        let err = normalize(ImageRef::Path("/definitely/not/here.jpg".into()), "k").unwrap_err();
        assert_eq!(err.tag(), "invalid_image_input");
    }
}
