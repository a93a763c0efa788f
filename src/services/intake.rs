//! Turns request payloads into validated [`ImageInput`]s.

use base64::Engine;
use std::path::PathBuf;

use crate::error::TriageError;
use crate::models::api::ImagePayload;
use crate::models::image::ImageInput;

#[derive(Debug, Clone, Copy)]
pub struct IntakeLimits {
    pub max_image_bytes: usize,
    pub max_batch_size: usize,
}

pub async fn decode_batch(
    payloads: &[ImagePayload],
    limits: IntakeLimits,
) -> Result<Vec<ImageInput>, TriageError> {
    if payloads.is_empty() {
        return Err(TriageError::Validation("At least one image is required".to_string()));
    }
    if payloads.len() > limits.max_batch_size {
        return Err(TriageError::Validation(format!(
            "Batch of {} images exceeds the limit of {}",
            payloads.len(),
            limits.max_batch_size
        )));
    }

    let mut inputs = Vec::with_capacity(payloads.len());
    for (index, payload) in payloads.iter().enumerate() {
        let input = decode_image(payload, limits)
            .await
            .map_err(|e| match e {
                TriageError::Validation(message) => {
                    TriageError::Validation(format!("image {index}: {message}"))
                }
                other => other,
            })?;
        inputs.push(input);
    }
    Ok(inputs)
}

/// Decode one payload. Exactly one of `image_base64` and `image_path` must be set.
pub async fn decode_image(
    payload: &ImagePayload,
    limits: IntakeLimits,
) -> Result<ImageInput, TriageError> {
    match (&payload.image_base64, &payload.image_path) {
        (Some(encoded), None) => {
            let bytes = decode_base64(encoded)?;
            check_size(bytes.len(), limits)?;
            image::guess_format(&bytes).map_err(|_| {
                TriageError::Validation("Unsupported image format".to_string())
            })?;
            Ok(ImageInput::from_bytes(bytes, payload.filename.clone()))
        }
        (None, Some(path)) => {
            let path = PathBuf::from(path);
            let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
                TriageError::Validation(format!("Cannot read {}: {e}", path.display()))
            })?;
            if !metadata.is_file() {
                return Err(TriageError::Validation(format!(
                    "{} is not a file",
                    path.display()
                )));
            }
            check_size(metadata.len() as usize, limits)?;

            let mut input = ImageInput::from_path(path);
            if payload.filename.is_some() {
                input.filename = payload.filename.clone();
            }
            Ok(input)
        }
        (Some(_), Some(_)) => Err(TriageError::Validation(
            "Provide either image_base64 or image_path, not both".to_string(),
        )),
        (None, None) => Err(TriageError::Validation(
            "Either image_base64 or image_path is required".to_string(),
        )),
    }
}

/// Accepts plain base64 or a `data:<mime>;base64,` URL.
fn decode_base64(encoded: &str) -> Result<Vec<u8>, TriageError> {
    let data = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| TriageError::Validation(format!("Invalid base64 image data: {e}")))
}

fn check_size(len: usize, limits: IntakeLimits) -> Result<(), TriageError> {
    if len == 0 {
        return Err(TriageError::Validation("Image is empty".to_string()));
    }
    if len > limits.max_image_bytes {
        return Err(TriageError::Validation(format!(
            "Image of {len} bytes exceeds the limit of {} bytes",
            limits.max_image_bytes
        )));
    }
    Ok(())
}
