use crate::config::UploadConfig;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file provided")]
    MissingFile,
    #[error("Unable to determine file type")]
    MissingContentType,
    #[error("Unsupported file type: {0}")]
    UnsupportedContentType(String),
    #[error("Unsupported file extension: .{0}")]
    UnsupportedExtension(String),
    #[error("Empty file provided")]
    EmptyFile,
    #[error("File too large: limit is {limit} bytes")]
    FileTooLarge { limit: usize },
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),
}

/// Metadata of one upload, as declared by the client.
#[derive(Debug, Clone, Copy)]
pub struct UploadMeta<'a> {
    pub content_type: Option<&'a str>,
    pub filename: &'a str,
    pub size: usize,
}

/// Accepts or rejects an upload from its metadata alone. Image bytes are never
/// inspected here; the decoder is the authoritative format check.
pub fn validate_upload(
    meta: &UploadMeta<'_>,
    limits: &UploadConfig,
) -> Result<(), ValidationError> {
    if meta.filename.trim().is_empty() {
        return Err(ValidationError::MissingFile);
    }

    let content_type = meta
        .content_type
        .map(media_type_essence)
        .filter(|essence| !essence.is_empty())
        .ok_or(ValidationError::MissingContentType)?;

    if !limits
        .allowed_content_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&content_type))
    {
        return Err(ValidationError::UnsupportedContentType(content_type));
    }

    if let Some(extension) = Path::new(meta.filename)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        if !limits
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
        {
            return Err(ValidationError::UnsupportedExtension(
                extension.to_ascii_lowercase(),
            ));
        }
    }

    if meta.size == 0 {
        return Err(ValidationError::EmptyFile);
    }

    if meta.size > limits.max_file_size {
        return Err(ValidationError::FileTooLarge {
            limit: limits.max_file_size,
        });
    }

    Ok(())
}

fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> UploadConfig {
        UploadConfig {
            max_file_size: 1024,
            ..UploadConfig::default()
        }
    }

    fn meta<'a>(content_type: Option<&'a str>, filename: &'a str, size: usize) -> UploadMeta<'a> {
        UploadMeta {
            content_type,
            filename,
            size,
        }
    }

    #[test]
    fn test_accepts_supported_upload() {
        for content_type in ["image/jpeg", "image/png", "image/tiff", "image/bmp"] {
            assert_eq!(
                validate_upload(&meta(Some(content_type), "scan.png", 10), &limits()),
                Ok(())
            );
        }
    }

    #[test]
    fn test_content_type_parameters_and_case_are_ignored() {
        let upload = meta(Some("Image/PNG; charset=binary"), "scan.png", 10);
        let result = validate_upload(&upload, &limits());
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_rejects_missing_or_unknown_content_type() {
        assert_eq!(
            validate_upload(&meta(None, "scan.png", 10), &limits()),
            Err(ValidationError::MissingContentType)
        );
        assert_eq!(
            validate_upload(&meta(Some("text/plain"), "scan.png", 10), &limits()),
            Err(ValidationError::UnsupportedContentType("text/plain".into()))
        );
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        assert_eq!(
            validate_upload(&meta(Some("image/png"), "notes.TXT", 10), &limits()),
            Err(ValidationError::UnsupportedExtension("txt".into()))
        );
        assert_eq!(
            validate_upload(&meta(Some("image/png"), "scan", 10), &limits()),
            Ok(())
        );
    }

    #[test]
    fn test_rejects_empty_and_oversized_files() {
        assert_eq!(
            validate_upload(&meta(Some("image/png"), "scan.png", 0), &limits()),
            Err(ValidationError::EmptyFile)
        );
        assert_eq!(
            validate_upload(&meta(Some("image/png"), "scan.png", 1024), &limits()),
            Ok(())
        );
        assert_eq!(
            validate_upload(&meta(Some("image/png"), "scan.png", 1025), &limits()),
            Err(ValidationError::FileTooLarge { limit: 1024 })
        );
    }

    #[test]
    fn test_missing_file_differs_from_empty_file() {
        let missing = meta(Some("image/png"), "", 10);
        let empty = meta(Some("image/png"), "scan.png", 0);
        let missing = validate_upload(&missing, &limits()).unwrap_err();
        let empty = validate_upload(&empty, &limits()).unwrap_err();
        assert_ne!(missing.to_string(), empty.to_string());
    }
}
