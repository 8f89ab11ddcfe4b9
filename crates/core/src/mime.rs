//! Extension-based content type lookup.

/// Content type used when the extension is unknown.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

const TABLE: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("txt", "text/plain"),
    ("log", "text/plain"),
    ("md", "text/markdown"),
    ("xml", "application/xml"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("map", "application/json"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tgz", "application/gzip"),
    ("wasm", "application/wasm"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
];

/// Content type for a path, by extension.
pub fn lookup(path: &str) -> &'static str {
    let base = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = base.rsplit_once('.') else {
        return DEFAULT_CONTENT_TYPE;
    };
    let ext = ext.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, ct)| *ct)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Strip parameters such as `; charset=utf-8`.
pub fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

/// Whether `content_type` matches one of `patterns` (exact or `type/*`).
pub fn matches_any(content_type: &str, patterns: &[String]) -> bool {
    let ct = essence(content_type).to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        match pattern.strip_suffix("/*") {
            Some(prefix) => ct.split('/').next() == Some(prefix),
            None => pattern == ct,
        }
    })
}

/// Whether a type should be rendered in the browser rather than downloaded.
pub fn is_inline(content_type: &str) -> bool {
    let ct = essence(content_type).to_ascii_lowercase();
    matches!(
        ct.as_str(),
        "text/html" | "application/json" | "application/pdf" | "text/plain"
    ) || ["text/", "image/", "video/", "audio/"]
        .iter()
        .any(|prefix| ct.starts_with(prefix))
}
