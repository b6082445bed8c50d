//! Ingestion nodes: PDF, audio transcription, images and generic file uploads.
//!
//! Each accepts the payload shapes understood by [`decode_payload`] and produces
//! `{content | text, metadata}`.

use crate::config::NodeDefaults;
use crate::payload::{decode_payload, Payload};
use agentcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use agentruntime::{NodeFactory, NodeMetadata, PortDefinition};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map};
use std::time::Duration;

fn read_payload(ctx: &NodeContext, names: &[&str]) -> Result<Payload, NodeError> {
    let value = ctx
        .primary_input(names)
        .or_else(|| names.iter().find_map(|name| ctx.config.get(*name)))
        .filter(|v| !v.is_null())
        .ok_or_else(|| NodeError::MissingInput(names.first().copied().unwrap_or("file").to_string()))?;
    decode_payload(value)
}

fn invalid_pattern(e: regex::Error) -> NodeError {
    NodeError::ExecutionFailed(format!("Invalid pattern: {}", e))
}

// --- PDF -------------------------------------------------------------------

const PDF_FIELDS: &[(&str, &str)] = &[
    ("Title", "title"),
    ("Author", "author"),
    ("Subject", "subject"),
    ("Creator", "creator"),
    ("Producer", "producer"),
    ("Keywords", "keywords"),
];

/// Document info string for `field`, literal `(..)` or hex `<..>` form, else "Unknown".
fn pdf_info_field(raw: &str, field: &str) -> Result<String, NodeError> {
    for pattern in [format!(r"/{}\s*\(([^)]+)\)", field), format!(r"/{}\s*<([^>]+)>", field)] {
        let re = Regex::new(&pattern).map_err(invalid_pattern)?;
        if let Some(found) = re.captures(raw).and_then(|c| c.get(1)) {
            return Ok(found.as_str().trim().to_string());
        }
    }
    Ok("Unknown".to_string())
}

fn unescape_pdf_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Text shown by `Tj`/`TJ` operators in uncompressed content streams.
fn pdf_text(raw: &str) -> Result<String, NodeError> {
    let show = Regex::new(r"\(((?:[^()\\]|\\.)*)\)\s*Tj|\[((?:[^\]\\]|\\.)*)\]\s*TJ").map_err(invalid_pattern)?;
    let literal = Regex::new(r"\(((?:[^()\\]|\\.)*)\)").map_err(invalid_pattern)?;
    let line_break = Regex::new(r"\bT\*|\bET\b").map_err(invalid_pattern)?;

    let mut text = String::new();
    let mut cursor = 0;
    for caps in show.captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        if line_break.is_match(&raw[cursor..whole.start()]) && !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        cursor = whole.end();

        if let Some(single) = caps.get(1) {
            text.push_str(&unescape_pdf_string(single.as_str()));
        } else if let Some(array) = caps.get(2) {
            for part in literal.captures_iter(array.as_str()) {
                if let Some(piece) = part.get(1) {
                    text.push_str(&unescape_pdf_string(piece.as_str()));
                }
            }
        }
    }
    Ok(text.trim().to_string())
}

fn pdf_page_count(raw: &str) -> Result<usize, NodeError> {
    let page = Regex::new(r"/Type\s*/Page(?:[^s]|$)").map_err(invalid_pattern)?;
    Ok(page.find_iter(raw).count())
}

/// Extracts text and document info from a PDF.
pub struct PdfInputNode;

#[async_trait]
impl Node for PdfInputNode {
    fn node_type(&self) -> &str {
        "pdf-input"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let payload = read_payload(&ctx, &["pdf", "file", "data", "input"])?;
        if !payload.bytes.starts_with(b"%PDF") {
            return Err(NodeError::InvalidInputType {
                field: "pdf".into(),
                expected: "PDF document".into(),
                actual: "data without a %PDF header".into(),
            });
        }

        let raw = String::from_utf8_lossy(&payload.bytes);
        let content = pdf_text(&raw)?;
        let encrypted = raw.contains("/Encrypt");
        if encrypted {
            ctx.log.warn("PDF is encrypted; extracted text may be incomplete");
        }

        let mut metadata = Map::new();
        for (field, key) in PDF_FIELDS {
            metadata.insert(key.to_string(), Value::String(pdf_info_field(&raw, field)?));
        }
        metadata.insert("pageCount".into(), json!(pdf_page_count(&raw)?));
        metadata.insert("wordCount".into(), json!(content.split_whitespace().count()));
        metadata.insert("isEncrypted".into(), json!(encrypted));
        metadata.insert("size".into(), json!(payload.size()));
        metadata.insert("filename".into(), json!(payload.filename));

        ctx.log.info(format!("Extracted {} characters from PDF", content.len()));
        Ok(NodeOutput::value(json!({ "content": content, "metadata": metadata })))
    }
}

// --- Audio -----------------------------------------------------------------

/// Transcribes audio through an OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct WhisperTranscriptionNode {
    client: reqwest::Client,
    defaults: NodeDefaults,
}

impl WhisperTranscriptionNode {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self {
            client: reqwest::Client::new(),
            defaults,
        }
    }
}

#[async_trait]
impl Node for WhisperTranscriptionNode {
    fn node_type(&self) -> &str {
        "whisper-transcription"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let payload = read_payload(&ctx, &["audio", "file", "data", "input"])?;
        let model = ctx.config_str("model").unwrap_or("whisper-1").to_string();
        let language = ctx.config_str("language").map(str::to_string);
        let filename = payload.filename.clone().unwrap_or_else(|| "audio.webm".to_string());

        let mut metadata = json!({
            "model": model,
            "language": language,
            "size": payload.size(),
            "filename": filename,
        });

        let api_key = ctx
            .config_str("apiKey")
            .map(str::to_string)
            .or_else(|| self.defaults.llm_api_key.clone());
        let Some(api_key) = api_key else {
            ctx.log.warn("No API key configured; returning a placeholder transcription");
            metadata["placeholder"] = json!(true);
            return Ok(NodeOutput::value(json!({
                "text": format!("[placeholder] transcription of {} ({} bytes)", filename, payload.size()),
                "metadata": metadata,
            })));
        };

        let base_url = ctx
            .config_str("apiBaseUrl")
            .unwrap_or(&self.defaults.llm_base_url)
            .trim_end_matches('/')
            .to_string();
        let timeout_ms = ctx.config_u64("timeout").unwrap_or(self.defaults.http_timeout_ms);

        let mut part = reqwest::multipart::Part::bytes(payload.bytes).file_name(filename.clone());
        if let Some(mime) = payload.mime_type.as_deref() {
            part = part
                .mime_str(mime)
                .map_err(|e| NodeError::Configuration(format!("Invalid MIME type '{}': {}", mime, e)))?;
        }
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model.clone())
            .text("response_format", "json");
        if let Some(language) = language {
            form = form.text("language", language);
        }
        if let Some(prompt) = ctx.config_str("prompt") {
            form = form.text("prompt", prompt.to_string());
        }

        ctx.log.info(format!("Transcribing {} with {}", filename, model));
        let response = self
            .client
            .post(format!("{}/audio/transcriptions", base_url))
            .bearer_auth(api_key)
            .timeout(Duration::from_millis(timeout_ms))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NodeError::Timeout { timeout_ms, retry_count: 0 }
                } else {
                    NodeError::Network { message: e.to_string(), retry_count: 0 }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| NodeError::Network {
            message: e.to_string(),
            retry_count: 0,
        })?;
        if !status.is_success() {
            return Err(NodeError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
                retry_count: 0,
            });
        }

        let text = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("text").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Ok(NodeOutput::value(json!({ "text": text.trim(), "metadata": metadata })))
    }
}

// --- Images ----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
    Unknown,
}

impl ImageFormat {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            ImageFormat::Png
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageFormat::Jpeg
        } else if bytes.starts_with(b"GIF8") {
            ImageFormat::Gif
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            ImageFormat::Webp
        } else if bytes.starts_with(b"BM") {
            ImageFormat::Bmp
        } else {
            ImageFormat::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Unknown => "unknown",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Unknown => "application/octet-stream",
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Bmp => "image/bmp",
        }
    }

    /// Width and height read from the header, where the format keeps them at a fixed offset.
    pub fn dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        match self {
            ImageFormat::Png if bytes.len() >= 24 => Some((
                u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
                u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            )),
            ImageFormat::Gif if bytes.len() >= 10 => Some((
                u16::from_le_bytes([bytes[6], bytes[7]]) as u32,
                u16::from_le_bytes([bytes[8], bytes[9]]) as u32,
            )),
            _ => None,
        }
    }
}

/// Normalizes an image payload into a data URL with format metadata.
pub struct ImageInputNode;

#[async_trait]
impl Node for ImageInputNode {
    fn node_type(&self) -> &str {
        "image-input"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let payload = read_payload(&ctx, &["image", "file", "data", "input"])?;
        let format = ImageFormat::detect(&payload.bytes);
        if format == ImageFormat::Unknown {
            ctx.log.warn("Could not detect image format from file header");
        }
        let mime = payload
            .mime_type
            .clone()
            .filter(|_| format == ImageFormat::Unknown)
            .unwrap_or_else(|| format.mime_type().to_string());
        let dimensions = format.dimensions(&payload.bytes);

        Ok(NodeOutput::value(json!({
            "content": format!("data:{};base64,{}", mime, payload.to_base64()),
            "metadata": {
                "format": format.name(),
                "mimeType": mime,
                "width": dimensions.map(|(w, _)| w),
                "height": dimensions.map(|(_, h)| h),
                "size": payload.size(),
                "filename": payload.filename,
            }
        })))
    }
}

// --- Generic files -----------------------------------------------------------

fn is_textual(mime: Option<&str>) -> bool {
    mime.is_some_and(|m| {
        m.starts_with("text/") || m.contains("json") || m.contains("xml") || m.contains("csv")
    })
}

/// Passes an uploaded file on as UTF-8 text when possible, otherwise as base64.
pub struct FileUploadNode;

#[async_trait]
impl Node for FileUploadNode {
    fn node_type(&self) -> &str {
        "file-upload"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let payload = read_payload(&ctx, &["file", "data", "input"])?;
        let wanted = ctx.config_str("outputFormat").unwrap_or("auto");

        let (content, encoding) = match (wanted, String::from_utf8(payload.bytes.clone())) {
            ("base64", _) => (payload.to_base64(), "base64"),
            ("text", Ok(text)) => (text, "utf8"),
            ("text", Err(_)) => {
                return Err(NodeError::InvalidInputType {
                    field: "file".into(),
                    expected: "UTF-8 text".into(),
                    actual: "binary data".into(),
                })
            }
            (_, Ok(text)) if is_textual(payload.mime_type.as_deref()) || !text.contains('\0') => (text, "utf8"),
            _ => (payload.to_base64(), "base64"),
        };

        Ok(NodeOutput::value(json!({
            "content": content,
            "metadata": {
                "filename": payload.filename,
                "mimeType": payload.mime_type,
                "size": payload.size(),
                "encoding": encoding,
                "uploadedAt": chrono::Utc::now().to_rfc3339(),
            }
        })))
    }
}

// --- Factories ---------------------------------------------------------------

pub struct PdfInputNodeFactory;

impl NodeFactory for PdfInputNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(PdfInputNode))
    }

    fn node_type(&self) -> &str {
        "pdf-input"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Extract text and document info from a PDF".to_string(),
            category: "ingest".to_string(),
            inputs: vec![PortDefinition::new("pdf", "PDF as base64, data URL or bytes").required()],
            outputs: vec![
                PortDefinition::new("content", "Extracted text"),
                PortDefinition::new("metadata", "Title, author, page count, ..."),
            ],
        }
    }
}

pub struct WhisperTranscriptionNodeFactory {
    defaults: NodeDefaults,
}

impl WhisperTranscriptionNodeFactory {
    pub fn new(defaults: NodeDefaults) -> Self {
        Self { defaults }
    }
}

impl NodeFactory for WhisperTranscriptionNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(WhisperTranscriptionNode::new(self.defaults.clone())))
    }

    fn node_type(&self) -> &str {
        "whisper-transcription"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Speech to text via an OpenAI-compatible transcription API".to_string(),
            category: "ingest".to_string(),
            inputs: vec![PortDefinition::new("audio", "Audio as base64, data URL or bytes").required()],
            outputs: vec![
                PortDefinition::new("text", "Transcription"),
                PortDefinition::new("metadata", "Model, language and size"),
            ],
        }
    }
}

pub struct ImageInputNodeFactory;

impl NodeFactory for ImageInputNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ImageInputNode))
    }

    fn node_type(&self) -> &str {
        "image-input"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Normalize an image into a data URL".to_string(),
            category: "ingest".to_string(),
            inputs: vec![PortDefinition::new("image", "Image as base64, data URL or bytes").required()],
            outputs: vec![
                PortDefinition::new("content", "Data URL"),
                PortDefinition::new("metadata", "Format, dimensions and size"),
            ],
        }
    }
}

pub struct FileUploadNodeFactory;

impl NodeFactory for FileUploadNodeFactory {
    fn create(&self, _config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(FileUploadNode))
    }

    fn node_type(&self) -> &str {
        "file-upload"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Read an uploaded file as text or base64".to_string(),
            category: "ingest".to_string(),
            inputs: vec![PortDefinition::new("file", "File payload").required()],
            outputs: vec![
                PortDefinition::new("content", "Text or base64 content"),
                PortDefinition::new("metadata", "Name, type and size"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_info_falls_back_to_unknown() {
        let raw = "<< /Title (Quarterly Report) /Author <4A6F> >>";
        assert_eq!(pdf_info_field(raw, "Title").unwrap(), "Quarterly Report");
        assert_eq!(pdf_info_field(raw, "Author").unwrap(), "4A6F");
        assert_eq!(pdf_info_field(raw, "Subject").unwrap(), "Unknown");
    }

    #[test]
    fn pdf_text_reads_show_operators() {
        let raw = "BT (Hello\\) world) Tj T* [(Sec) -20 (ond)] TJ ET";
        assert_eq!(pdf_text(raw).unwrap(), "Hello) world\nSecond");
    }

    #[test]
    fn pages_are_counted_without_the_pages_tree() {
        let raw = "<< /Type /Pages /Count 2 >> << /Type /Page >> << /Type/Page >>";
        assert_eq!(pdf_page_count(raw).unwrap(), 2);
    }

    #[test]
    fn png_dimensions_come_from_ihdr() {
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&640u32.to_be_bytes());
        png.extend_from_slice(&480u32.to_be_bytes());
        let format = ImageFormat::detect(&png);
        assert_eq!(format, ImageFormat::Png);
        assert_eq!(format.dimensions(&png), Some((640, 480)));
    }
}
