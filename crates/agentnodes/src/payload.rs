//! Binary payloads handed to ingestion nodes: base64 strings, `data:` URLs, byte arrays,
//! or objects wrapping one of those with a file name and MIME type.

use agentcore::{NodeError, Value};
use base64::Engine;

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
}

impl Payload {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self, fallback_mime: &str) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type.as_deref().unwrap_or(fallback_mime),
            self.to_base64()
        )
    }
}

pub fn decode_payload(value: &Value) -> Result<Payload, NodeError> {
    match value {
        Value::String(text) => decode_text(text),
        Value::Array(items) => Ok(Payload {
            bytes: bytes_from_array(items)?,
            mime_type: None,
            filename: None,
        }),
        Value::Object(map) => {
            let inner = ["data", "content", "base64", "bytes"]
                .iter()
                .find_map(|key| map.get(*key))
                .ok_or_else(|| {
                    NodeError::InvalidInputType {
                        field: "payload".into(),
                        expected: "object with data/content".into(),
                        actual: "object".into(),
                    }
                })?;
            let mut payload = decode_payload(inner)?;
            let text = |keys: &[&str]| {
                keys.iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str))
                    .map(str::to_string)
            };
            if let Some(mime) = text(&["mimeType", "mime_type", "type", "contentType"]) {
                payload.mime_type = Some(mime);
            }
            if let Some(name) = text(&["filename", "fileName", "name"]) {
                payload.filename = Some(name);
            }
            Ok(payload)
        }
        other => Err(NodeError::InvalidInputType {
            field: "payload".into(),
            expected: "base64 string, data URL or byte array".into(),
            actual: agentcore::value::kind_label(other).into(),
        }),
    }
}

fn decode_text(text: &str) -> Result<Payload, NodeError> {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("data:") {
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| NodeError::ExecutionFailed("Malformed data URL".into()))?;
        let mime = header.split(';').next().filter(|m| !m.is_empty());
        let bytes = if header.ends_with(";base64") {
            decode_base64(data)?
        } else {
            data.as_bytes().to_vec()
        };
        return Ok(Payload {
            bytes,
            mime_type: mime.map(str::to_string),
            filename: None,
        });
    }
    Ok(Payload {
        bytes: decode_base64(trimmed)?,
        mime_type: None,
        filename: None,
    })
}

fn decode_base64(data: &str) -> Result<Vec<u8>, NodeError> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(cleaned.as_bytes()))
        .map_err(|e| NodeError::ExecutionFailed(format!("Invalid base64 payload: {}", e)))
}

fn bytes_from_array(items: &[Value]) -> Result<Vec<u8>, NodeError> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .filter(|b| *b <= u8::MAX as u64)
                .map(|b| b as u8)
                .ok_or_else(|| NodeError::ExecutionFailed("Byte arrays must hold values 0-255".into()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_data_urls_and_wrapped_objects() {
        let payload = decode_payload(&json!("data:text/plain;base64,aGVsbG8=")).unwrap();
        assert_eq!(payload.bytes, b"hello");
        assert_eq!(payload.mime_type.as_deref(), Some("text/plain"));

        let wrapped = decode_payload(&json!({"data": "aGVsbG8=", "filename": "a.txt"})).unwrap();
        assert_eq!(wrapped.bytes, b"hello");
        assert_eq!(wrapped.filename.as_deref(), Some("a.txt"));

        let bytes = decode_payload(&json!([104, 105])).unwrap();
        assert_eq!(bytes.bytes, b"hi");
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_payload(&json!("not base64 !!")).is_err());
        assert!(decode_payload(&json!([300])).is_err());
        assert!(decode_payload(&json!(12)).is_err());
    }
}
