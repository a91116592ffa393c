use base64::Engine;
use image::ImageFormat;

/// Image encodings accepted for both uploads and remote results.
pub const ALLOWED_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Detect the encoding from magic bytes and check it is one we accept.
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageValidationError> {
    if bytes.is_empty() {
        return Err(ImageValidationError::Empty);
    }

    let format = image::guess_format(bytes)
        .map_err(|e| ImageValidationError::UnsupportedFormat(e.to_string()))?;

    if !ALLOWED_FORMATS.contains(&format) {
        return Err(ImageValidationError::UnsupportedFormat(format!(
            "{:?} (allowed: JPEG, PNG, WEBP)",
            format
        )));
    }

    Ok(format)
}

/// Detect the format and fully decode the image to prove it is well formed.
pub fn validate_image(bytes: &[u8]) -> Result<ImageFormat, ImageValidationError> {
    let format = detect_format(bytes)?;
    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageValidationError::Corrupt(e.to_string()))?;
    Ok(format)
}

pub fn mime_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        _ => "image/png",
    }
}

pub fn file_extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::WebP => "webp",
        _ => "png",
    }
}

/// Encode bytes as `data:<mime>;base64,<payload>`.
pub fn to_data_url(bytes: &[u8], format: ImageFormat) -> String {
    format!(
        "data:{};base64,{}",
        mime_type(format),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Decode a base64 data URL into its bytes and declared MIME type.
pub fn decode_data_url(data_url: &str) -> Result<(Vec<u8>, String), ImageValidationError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| ImageValidationError::MalformedDataUrl("missing data: prefix".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageValidationError::MalformedDataUrl("missing payload".to_string()))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_string();
    if !parts.any(|p| p.trim() == "base64") {
        return Err(ImageValidationError::MalformedDataUrl(
            "only base64 data URLs are supported".to_string(),
        ));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ImageValidationError::MalformedDataUrl(e.to_string()))?;

    Ok((bytes, mime))
}

#[derive(Debug, thiserror::Error)]
pub enum ImageValidationError {
    #[error("Image payload is empty")]
    Empty,

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid image file: {0}")]
    Corrupt(String),

    #[error("Malformed data URL: {0}")]
    MalformedDataUrl(String),
}
