use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::path::Path;

pub const NO_FILE_MESSAGE: &str = "No file provided or invalid file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn file_too_large(max_size: usize) -> ValidationError {
    ValidationError {
        code: "FILE_TOO_LARGE",
        message: format!("File too large. Maximum size is {} bytes", max_size),
    }
}

/// Validates upload size against the configured maximum
pub fn validate_file_size(size: usize, max_size: usize) -> Result<(), ValidationError> {
    if size > max_size {
        return Err(file_too_large(max_size));
    }
    Ok(())
}

/// Accepts only files whose extension matches `expected` (ASCII case-insensitive)
pub fn validate_extension(filename: &str, expected: &str) -> Result<(), ValidationError> {
    let matches = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(expected));

    if !matches {
        return Err(ValidationError {
            code: "UNSUPPORTED_FILE_TYPE",
            message: format!("Only .{} files are supported", expected),
        });
    }
    Ok(())
}

/// Reduces a client-supplied filename to its last path component and strips
/// characters that are unsafe in paths or headers
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    // Browsers on Windows may send the full client path
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(ValidationError {
            code: "INVALID_FILENAME",
            message: NO_FILE_MESSAGE.to_string(),
        });
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::debug!("Stripped path components from upload name: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';' => '_',
            c => c,
        })
        .collect();

    // Limit length safely for UTF-8
    if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        return Ok(sanitized[..end].to_string());
    }

    Ok(sanitized)
}

/// Builds a `Content-Disposition` value with an ASCII fallback and an RFC 5987
/// encoded `filename*` for non-ASCII names
pub fn attachment_disposition(filename: &str) -> String {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .collect::<String>();
    let fallback_filename = if ascii_filename.is_empty() {
        "file"
    } else {
        &ascii_filename
    };

    let encoded_filename = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    )
}

/// Content type for a converted output, keyed by extension
pub fn content_type_for(extension: &str) -> mime::Mime {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => mime::APPLICATION_PDF,
        "html" | "htm" => mime::TEXT_HTML_UTF_8,
        "txt" => mime::TEXT_PLAIN_UTF_8,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "svg" => mime::IMAGE_SVG,
        "zip" => "application/zip"
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM),
        "odt" => "application/vnd.oasis.opendocument.text"
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM),
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM),
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
