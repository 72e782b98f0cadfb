//! Helpers for uploaded images: `data:` URL parsing, extension choice and filename
//! sanitising. Shared by the server upload route and the GitHub publisher.

/// The pieces of a `data:{mime};base64,{payload}` URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime_type: &'a str,
    pub base64: &'a str,
}

pub fn parse_data_url(raw: &str) -> Option<DataUrl<'_>> {
    let rest = raw.strip_prefix("data:")?;
    let (mime_type, base64) = rest.split_once(";base64,")?;
    if mime_type.is_empty() || mime_type.contains(';') || base64.is_empty() {
        return None;
    }
    Some(DataUrl { mime_type, base64 })
}

/// File extension for an image mime type; `bin` for anything unrecognised.
pub fn ext_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// Collapse every run of characters outside `[A-Za-z0-9_-]` (plus `.` when
/// `keep_dot`) into one `_`, then keep at most `max_chars`. Empty results become
/// `image`.
pub fn sanitize_name(raw: &str, keep_dot: bool, max_chars: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.chars() {
        let allowed =
            c.is_ascii_alphanumeric() || c == '_' || c == '-' || (keep_dot && c == '.');
        if allowed {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let out: String = out.chars().take(max_chars).collect();
    if out.is_empty() {
        "image".to_string()
    } else {
        out
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Base name for a file stored by the server: directory and extension dropped,
/// sanitised, at most 50 characters.
pub fn server_upload_base(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, _) = split_extension(name);
    sanitize_name(stem, false, 50)
}

/// Base name for a file committed to GitHub: sanitised keeping dots, at most 40
/// characters, trailing alphanumeric extension removed.
pub fn github_upload_base(filename: &str) -> String {
    let safe = sanitize_name(filename, true, 40);
    match split_extension(&safe) {
        (stem, Some(ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            stem.to_string()
        }
        _ => safe,
    }
}

/// `{millis}_{hex}_{base}.{ext}`
pub fn unique_upload_name(millis: i64, hex: &str, base: &str, ext: &str) -> String {
    format!("{millis}_{hex}_{base}.{ext}")
}
