//! Storage for images posted as base64 `data:` URLs.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;

use store::{ids, media};

use crate::database::DbError;

pub const UPLOADS_URL: &str = "/assets/uploads";

const INVALID_IMAGE: &str = "Invalid image data (expected DataURL base64)";

/// Decode `data_url` into `dir` under a unique name and return its public URL.
/// `mime_type` overrides the type embedded in the URL when non-empty.
pub async fn save_image(
    dir: &Path,
    filename: &str,
    data_url: &str,
    mime_type: &str,
) -> Result<String, DbError> {
    let parsed =
        media::parse_data_url(data_url).ok_or_else(|| DbError::Invalid(INVALID_IMAGE.into()))?;
    let bytes = STANDARD
        .decode(parsed.base64.trim())
        .map_err(|_| DbError::Invalid(INVALID_IMAGE.into()))?;

    let mime = if mime_type.trim().is_empty() {
        parsed.mime_type
    } else {
        mime_type
    };
    let unique = media::unique_upload_name(
        Utc::now().timestamp_millis(),
        &ids::random_hex(4),
        &media::server_upload_base(filename),
        media::ext_for_mime(mime),
    );

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(&unique), &bytes).await?;
    tracing::info!(file = %unique, size = bytes.len(), "image stored");
    Ok(format!("{UPLOADS_URL}/{unique}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_image() {
        let dir = tempfile::tempdir().unwrap();
        let url = save_image(
            dir.path(),
            "cover shot.jpeg",
            "data:image/jpeg;base64,/9j/4AAQ",
            "",
        )
        .await
        .unwrap();

        let name = url.strip_prefix("/assets/uploads/").unwrap();
        assert!(name.ends_with("_cover_shot.jpg"));
        let written = std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(written, STANDARD.decode("/9j/4AAQ").unwrap());
    }

    #[tokio::test]
    async fn test_explicit_mime_wins() {
        let dir = tempfile::tempdir().unwrap();
        let url = save_image(dir.path(), "x", "data:image/png;base64,AAAA", "image/webp")
            .await
            .unwrap();
        assert!(url.ends_with("_x.webp"));
    }

    #[tokio::test]
    async fn test_rejects_non_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_image(dir.path(), "x.png", "https://example.com/x.png", "")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_IMAGE);
    }
}
