//! Upload validation and storage.

use std::fs;
use std::path::{Path, PathBuf};

use actix_multipart::Multipart;
use futures_util::TryStreamExt;
use unicode_normalization::UnicodeNormalization;

use crate::error::PredictError;

/// A file field pulled out of the multipart form.
#[derive(Debug)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// True when the suffix after the last dot is one of `allowed`, ignoring case.
pub fn allowed_file(filename: &str, allowed: &[String]) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext))
        }
        None => false,
    }
}

/// Reduce a client-supplied filename to something safe to join onto the
/// upload directory: accents are folded to ASCII (NFKD), path separators
/// become `_`, only ASCII alphanumerics and `._-` survive, and leading/trailing
/// dots and underscores are stripped.
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Name the upload is stored under. Falls back to `upload.<ext>` when
/// sanitization leaves nothing usable.
pub fn stored_name(filename: &str) -> String {
    let name = secure_filename(filename);
    if name.is_empty() || !name.contains('.') {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, e)| secure_filename(e).to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "bin".to_string());
        format!("upload.{}", ext)
    } else {
        name
    }
}

/// Write the upload into `dir`. Existing files with the same name are
/// overwritten.
pub fn save_upload(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Pull the `file` field out of a multipart body.
///
/// Returns `Ok(None)` when the form has no such field or the body is not a
/// readable multipart stream. Other fields are drained and ignored.
pub async fn read_file_field(
    mut payload: Multipart,
    limit: usize,
) -> Result<Option<Upload>, PredictError> {
    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => {
                log::warn!("Unreadable multipart body: {}", e);
                return Ok(None);
            }
        };

        let disposition = field.content_disposition();
        if disposition.get_name() != Some("file") {
            while let Ok(Some(_)) = field.try_next().await {}
            continue;
        }
        let filename = disposition.get_filename().unwrap_or_default().to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| PredictError::Decode(e.to_string()))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(PredictError::TooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(Some(Upload { filename, bytes }));
    }
}
