use agentcore::{Node, NodeContext, NodeError};
use agentnodes::{FileUploadNode, ImageInputNode, NodeDefaults, PdfInputNode, WhisperTranscriptionNode};
use base64::Engine;
use mockito::{Matcher, Server};
use serde_json::json;

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

const SAMPLE_PDF: &str = "%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R /Contents 4 0 R >> endobj\n\
4 0 obj << /Length 60 >> stream\n\
BT /F1 12 Tf (Quarterly results) Tj T* (are strong) Tj ET\n\
endstream endobj\n\
5 0 obj << /Title (Q3 Report) /Author (Finance Team) >> endobj\n\
%%EOF";

#[tokio::test]
async fn test_pdf_text_and_metadata() {
    let ctx = NodeContext::detached("pdf").with_input(
        "pdf",
        json!({"data": encode(SAMPLE_PDF.as_bytes()), "filename": "q3.pdf"}),
    );
    let output = PdfInputNode.execute(ctx).await.unwrap();

    assert_eq!(output.value["content"], json!("Quarterly results\nare strong"));
    let metadata = &output.value["metadata"];
    assert_eq!(metadata["title"], json!("Q3 Report"));
    assert_eq!(metadata["author"], json!("Finance Team"));
    assert_eq!(metadata["subject"], json!("Unknown"));
    assert_eq!(metadata["pageCount"], json!(1));
    assert_eq!(metadata["wordCount"], json!(4));
    assert_eq!(metadata["isEncrypted"], json!(false));
    assert_eq!(metadata["filename"], json!("q3.pdf"));
}

#[tokio::test]
async fn test_pdf_rejects_other_documents() {
    let ctx = NodeContext::detached("pdf").with_input("pdf", encode(b"hello world"));
    let err = PdfInputNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidInputType { .. }));
}

#[tokio::test]
async fn test_missing_payload_is_reported() {
    let err = PdfInputNode.execute(NodeContext::detached("pdf")).await.unwrap_err();
    assert!(matches!(err, NodeError::MissingInput(_)));
}

#[tokio::test]
async fn test_transcription_placeholder_without_key() {
    let node = WhisperTranscriptionNode::new(NodeDefaults::default());
    let ctx = NodeContext::detached("whisper").with_input("audio", encode(b"RIFF0000WAVE"));
    let output = node.execute(ctx).await.unwrap();

    assert_eq!(output.value["metadata"]["placeholder"], json!(true));
    assert_eq!(output.value["metadata"]["size"], json!(12));
    assert!(output.value["text"].as_str().unwrap().starts_with("[placeholder]"));
}

#[tokio::test]
async fn test_transcription_posts_multipart_audio() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/audio/transcriptions")
        .match_header("authorization", "Bearer test-key")
        .match_header("content-type", Matcher::Regex("multipart/form-data".into()))
        .match_body(Matcher::Regex("whisper-1".into()))
        .with_status(200)
        .with_body(r#"{"text": " hello world "}"#)
        .create_async()
        .await;

    let node = WhisperTranscriptionNode::new(NodeDefaults {
        llm_base_url: server.url(),
        llm_api_key: Some("test-key".into()),
        ..NodeDefaults::default()
    });
    let ctx = NodeContext::detached("whisper").with_input(
        "audio",
        json!({"data": encode(b"fake audio"), "filename": "clip.mp3", "mimeType": "audio/mpeg"}),
    );
    let output = node.execute(ctx).await.unwrap();

    assert_eq!(output.value["text"], json!("hello world"));
    assert_eq!(output.value["metadata"]["filename"], json!("clip.mp3"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_image_input_detects_gif_dimensions() {
    let mut gif = b"GIF89a".to_vec();
    gif.extend_from_slice(&320u16.to_le_bytes());
    gif.extend_from_slice(&200u16.to_le_bytes());
    gif.extend_from_slice(&[0, 0, 0]);

    let ctx = NodeContext::detached("img").with_input("image", encode(&gif));
    let output = ImageInputNode.execute(ctx).await.unwrap();

    let metadata = &output.value["metadata"];
    assert_eq!(metadata["format"], json!("gif"));
    assert_eq!(metadata["mimeType"], json!("image/gif"));
    assert_eq!(metadata["width"], json!(320));
    assert_eq!(metadata["height"], json!(200));
    assert!(output.value["content"]
        .as_str()
        .unwrap()
        .starts_with("data:image/gif;base64,"));
}

#[tokio::test]
async fn test_file_upload_text_and_binary() {
    let ctx = NodeContext::detached("file").with_input(
        "file",
        json!({"data": encode(b"name,age\nada,36"), "filename": "people.csv", "mimeType": "text/csv"}),
    );
    let output = FileUploadNode.execute(ctx).await.unwrap();
    assert_eq!(output.value["content"], json!("name,age\nada,36"));
    assert_eq!(output.value["metadata"]["encoding"], json!("utf8"));
    assert_eq!(output.value["metadata"]["size"], json!(15));

    let ctx = NodeContext::detached("file").with_input("file", json!([0, 159, 146, 150]));
    let output = FileUploadNode.execute(ctx).await.unwrap();
    assert_eq!(output.value["metadata"]["encoding"], json!("base64"));
    assert_eq!(output.value["content"], json!(encode(&[0, 159, 146, 150])));
}
