//! Body codec. JSON only; other media types are refused up front.

use crate::error::{AppError, DecodeError};
use crate::value::Payload;
use axum::body::Bytes;
use serde_json::Value;
use thiserror::Error;

pub const JSON: &str = "application/json";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("could not satisfy the request Accept header: {0}")]
    NotAcceptable(String),
    #[error("could not serialize response: {0}")]
    Serialize(String),
}

impl From<EncodeError> for AppError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::NotAcceptable(accept) => AppError::NotAcceptable(accept),
            EncodeError::Serialize(msg) => AppError::Internal(msg),
        }
    }
}

fn is_json_media(media: &str) -> bool {
    let media = media.trim().to_ascii_lowercase();
    media == JSON || (media.starts_with("application/") && media.ends_with("+json"))
}

fn media_type(header: &str) -> &str {
    header.split(';').next().unwrap_or_default().trim()
}

/// Empty body -> empty payload. A content type is required once there is a body.
pub fn decode(body: &[u8], content_type: Option<&str>) -> Result<Payload, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::new());
    }
    let media = content_type.map(media_type).unwrap_or_default();
    if !is_json_media(media) {
        let shown = if media.is_empty() { "none" } else { media };
        return Err(DecodeError::UnsupportedMediaType(shown.to_string()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::NotAnObject),
        Err(e) => Err(DecodeError::Malformed(e.to_string())),
    }
}

/// Decide the response media type before any work is done.
/// `format` (`?format=json`) overrides `Accept`.
pub fn negotiate(accept: Option<&str>, format: Option<&str>) -> Result<&'static str, EncodeError> {
    if let Some(format) = format {
        return if format.eq_ignore_ascii_case("json") {
            Ok(JSON)
        } else {
            Err(EncodeError::NotAcceptable(format!("format={}", format)))
        };
    }
    let Some(accept) = accept.map(str::trim).filter(|a| !a.is_empty()) else {
        return Ok(JSON);
    };
    let acceptable = accept.split(',').map(media_type).any(|m| {
        let m = m.to_ascii_lowercase();
        m == "*/*" || m == "application/*" || is_json_media(&m)
    });
    if acceptable {
        Ok(JSON)
    } else {
        Err(EncodeError::NotAcceptable(accept.to_string()))
    }
}

pub fn encode(representation: &Value, accept: Option<&str>, format: Option<&str>) -> Result<(Bytes, &'static str), EncodeError> {
    let content_type = negotiate(accept, format)?;
    let bytes = serde_json::to_vec(representation).map_err(|e| EncodeError::Serialize(e.to_string()))?;
    Ok((Bytes::from(bytes), content_type))
}
