use crate::message::ImageAttachment;
use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::fs;
use std::path::Path;

/// Largest image accepted for attachment.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Detects the image type from its leading bytes.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Reads an image file and encodes it for attaching to the next user message.
pub fn load_image(path: &Path) -> Result<ImageAttachment> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read image '{}'", path.display()))?;
    if bytes.len() > MAX_IMAGE_BYTES {
        bail!(
            "Image '{}' is too large ({} bytes, limit {MAX_IMAGE_BYTES})",
            path.display(),
            bytes.len()
        );
    }
    let Some(mime_type) = sniff_mime_type(&bytes) else {
        bail!(
            "'{}' is not a supported image (png, jpeg, gif or webp)",
            path.display()
        );
    };
    Ok(ImageAttachment {
        mime_type: mime_type.to_string(),
        data: STANDARD.encode(&bytes),
        source: path.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;

    #[test]
    fn test_sniffs_known_formats() {
        assert_eq!(sniff_mime_type(b"\x89PNG\r\n\x1a\nrest"), Some("image/png"));
        assert_eq!(sniff_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime_type(b"GIF89a..."), Some("image/gif"));
        assert_eq!(sniff_mime_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime_type(b"plain text"), None);
    }

    #[test]
    fn test_load_image() {
        let tmp_dir = Builder::new().prefix("test-image-").tempdir().unwrap();
        let path = tmp_dir.path().join("dot.png");
        fs::write(&path, b"\x89PNG\r\n\x1a\n").unwrap();

        let image = load_image(&path).unwrap();

        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "iVBORw0KGgo=");
        assert!(image.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_rejects_non_images() {
        let tmp_dir = Builder::new().prefix("test-image-").tempdir().unwrap();
        let path = tmp_dir.path().join("notes.txt");
        fs::write(&path, "hello").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(err.to_string().contains("not a supported image"));
        assert!(load_image(&tmp_dir.path().join("missing.png")).is_err());
    }
}
