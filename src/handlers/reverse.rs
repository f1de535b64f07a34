//! # Reverse Endpoint
//!
//! `POST /reverse/` plays an uploaded recording backwards without involving a room,
//! using the same codec the game applies to every upload. Handy for checking what a
//! recording will sound like to the next player.
//!
//! ## Request:
//! Multipart form data with the recording in a field named `file`, the field the
//! web client's recorder posts.
//!
//! ## Response:
//! The reversed bytes with the content type of the detected input format
//! (`audio/wav`, `audio/webm`, ...). Raw PCM comes back as `application/octet-stream`.

use crate::{
    audio::AudioFormat,
    error::{AppError, AppResult},
    state::AppState,
};
use actix_multipart::{Field, Multipart};
use actix_web::{http::header, web, HttpResponse};
use futures_util::stream::StreamExt;
use tracing::debug;

/// Uploads larger than this are refused before decoding.
const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

const UPLOAD_FIELD: &str = "file";

pub async fn reverse_audio(state: web::Data<AppState>, mut payload: Multipart) -> AppResult<HttpResponse> {
    let mut audio_data: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let field_name = field
            .content_disposition()
            .and_then(|disposition| disposition.get_name())
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > MAX_FILE_SIZE {
                return Err(AppError::ValidationError(format!(
                    "File too large (max: {} bytes)",
                    MAX_FILE_SIZE
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if field_name == UPLOAD_FIELD {
            audio_data = Some(bytes);
        }
    }

    let audio = audio_data.ok_or_else(|| AppError::ValidationError("No audio file provided".to_string()))?;

    let format = AudioFormat::sniff(&audio);
    let codec = state.codec.clone();
    let (reversed, ext) = web::block(move || {
        let ext = codec.extension(&audio);
        codec.reverse(&audio).map(|reversed| (reversed, ext))
    })
    .await
    .map_err(|e| AppError::Internal(format!("Reverse task failed: {}", e)))?
    .map_err(|e| AppError::ValidationError(e.to_string()))?;

    debug!(bytes = reversed.len(), format = ext, "reversed uploaded recording");

    Ok(HttpResponse::Ok()
        .content_type(format.content_type())
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"reversed.{}\"", ext),
        ))
        .body(reversed))
}
