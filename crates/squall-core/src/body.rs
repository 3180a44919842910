//! Request body decoding
//!
//! Reads the payload stream under a size ceiling and decodes it according
//! to the declared content type. Key/value results reject the reserved
//! keys that enable prototype-pollution-style attacks downstream.

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Body;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::request::BoxError;

/// Top-level keys rejected in any decoded key/value mapping
const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// A decoded request payload
#[derive(Debug, Clone)]
pub enum DecodedBody {
    /// `application/json`
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded`
    Form(HashMap<String, String>),
    /// `text/plain`
    Text(String),
    /// Multipart, binary, or undeclared payloads, passed through untouched
    Raw(Bytes),
}

impl DecodedBody {
    /// The JSON value, if this body decoded as JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            DecodedBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The form map, if this body decoded as a form.
    pub fn as_form(&self) -> Option<&HashMap<String, String>> {
        match self {
            DecodedBody::Form(map) => Some(map),
            _ => None,
        }
    }

    /// The text, if this body decoded as plain text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DecodedBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The raw bytes, if this body passed through undecoded.
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            DecodedBody::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Read and decode a request payload.
///
/// Fails with `PayloadTooLarge` as soon as cumulative bytes exceed `limit`
/// (dropping the stream aborts the rest of the upload), `UnsupportedMediaType`
/// for a declared type the engine does not decode, and `MalformedBody` for
/// parse failures or forbidden keys.
pub async fn decode<B>(body: B, content_type: Option<&str>, limit: usize) -> Result<DecodedBody>
where
    B: Body<Data = Bytes, Error = BoxError> + Unpin,
{
    let raw = read_limited(body, limit).await?;

    match content_type {
        None => Ok(DecodedBody::Raw(raw)),
        Some(ct) if ct.contains("application/json") => {
            let value: serde_json::Value =
                serde_json::from_slice(&raw).map_err(|e| Error::MalformedBody(e.to_string()))?;
            if let Some(object) = value.as_object() {
                reject_reserved(object.keys().map(String::as_str))?;
            }
            Ok(DecodedBody::Json(value))
        }
        Some(ct) if ct.contains("application/x-www-form-urlencoded") => {
            let map: HashMap<String, String> =
                form_urlencoded::parse(&raw).into_owned().collect();
            reject_reserved(map.keys().map(String::as_str))?;
            Ok(DecodedBody::Form(map))
        }
        Some(ct) if ct.contains("text/plain") => {
            let text = String::from_utf8(raw.to_vec())
                .map_err(|e| Error::MalformedBody(e.to_string()))?;
            Ok(DecodedBody::Text(text))
        }
        Some(ct) if ct.starts_with("multipart/") || ct.contains("application/octet-stream") => {
            Ok(DecodedBody::Raw(raw))
        }
        Some(ct) => Err(Error::UnsupportedMediaType(ct.to_string())),
    }
}

/// Accumulate body frames, failing the moment the ceiling is crossed.
async fn read_limited<B>(mut body: B, limit: usize) -> Result<Bytes>
where
    B: Body<Data = Bytes, Error = BoxError> + Unpin,
{
    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| Error::Io(e.to_string()))?;
        if let Ok(chunk) = frame.into_data() {
            if buf.len() + chunk.len() > limit {
                return Err(Error::PayloadTooLarge {
                    size: buf.len() + chunk.len(),
                    limit,
                });
            }
            buf.extend_from_slice(&chunk);
        }
    }
    Ok(buf.freeze())
}

fn reject_reserved<'a>(mut keys: impl Iterator<Item = &'a str>) -> Result<()> {
    match keys.find(|key| RESERVED_KEYS.contains(key)) {
        Some(key) => Err(Error::MalformedBody(format!("forbidden key: {key}"))),
        None => Ok(()),
    }
}
