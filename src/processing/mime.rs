/// Content-type detection port. The store workflow sniffs the uploaded bytes
/// before anything is scheduled; extension-based guessing is not enough since
/// uploads arrive without trustworthy filenames.
pub trait MimeTypeDetector: Send + Sync {
    /// `bytes` is the head of the file, 16 bytes are sufficient for all
    /// supported formats.
    fn detect(&self, bytes: &[u8]) -> Option<&'static str>;
}

/// Magic-byte detector for the image formats the engine can serve.
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicByteDetector;

impl MimeTypeDetector for MagicByteDetector {
    fn detect(&self, bytes: &[u8]) -> Option<&'static str> {
        if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
            Some("image/jpeg")
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
            Some("image/png")
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some("image/gif")
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some("image/webp")
        } else if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && &bytes[8..12] == b"avif" {
            Some("image/avif")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_formats() {
        let detector = MagicByteDetector;
        assert_eq!(
            detector.detect(&[0xff, 0xd8, 0xff, 0xe0, 0x00]),
            Some("image/jpeg")
        );
        assert_eq!(
            detector.detect(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00]),
            Some("image/png")
        );
        assert_eq!(detector.detect(b"GIF89a..."), Some("image/gif"));
        assert_eq!(detector.detect(b"RIFF\x10\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(detector.detect(b"\x00\x00\x00 ftypavifmore"), Some("image/avif"));
        assert_eq!(detector.detect(b"plain text"), None);
        assert_eq!(detector.detect(&[]), None);
    }
}
