/// Known MIME types and the file extension their blobs are stored under.
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("application/pdf", "pdf"),
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/css", "css"),
    ("application/javascript", "js"),
    ("text/javascript", "js"),
    ("application/json", "json"),
    ("application/xml", "xml"),
    ("text/xml", "xml"),
    ("application/zip", "zip"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("video/mp4", "mp4"),
    ("video/x-msvideo", "avi"),
    ("video/quicktime", "mov"),
    ("audio/mpeg", "mp3"),
    ("audio/wav", "wav"),
    ("audio/ogg", "ogg"),
];

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 16;

/// Resolve the storage extension for a declared MIME type.
///
/// Unknown types fall back to their subtype (parameters stripped) when it is
/// a short alphanumeric token, otherwise to `bin`.
pub fn extension_for_mime(mime: &str) -> String {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if let Some((_, ext)) = EXTENSIONS.iter().find(|(m, _)| *m == essence) {
        return (*ext).to_owned();
    }
    match essence.split_once('/') {
        Some((_, subtype))
            if !subtype.is_empty()
                && subtype.len() <= MAX_EXTENSION_LEN
                && subtype.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            subtype.to_owned()
        }
        _ => FALLBACK_EXTENSION.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types() {
        assert_eq!(extension_for_mime("text/plain"), "txt");
        assert_eq!(extension_for_mime("text/plain; charset=utf-8"), "txt");
        assert_eq!(extension_for_mime("IMAGE/JPEG"), "jpg");
        assert_eq!(
            extension_for_mime(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            "xlsx"
        );
    }

    #[test]
    fn unknown_types_use_safe_subtype() {
        assert_eq!(extension_for_mime("image/avif"), "avif");
        assert_eq!(extension_for_mime("application/x-tar"), "bin");
        assert_eq!(extension_for_mime("text/../../x"), "bin");
    }

    #[test]
    fn garbage_falls_back_to_bin() {
        assert_eq!(extension_for_mime("application/octet-stream"), "bin");
        assert_eq!(extension_for_mime("nonsense"), "bin");
        assert_eq!(extension_for_mime(""), "bin");
    }
}
