//! The HTTP endpoints the client uses besides the channel: media upload and
//! nearby-device discovery. All calls are single-shot, with no retry.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use reqwest::header::COOKIE;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use url::Url;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::{MessageRecord, NearbyDevice};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CSRF_HEADER: &str = "X-CSRFToken";

#[derive(Deserialize)]
struct UploadResponse {
    message: MessageRecord,
}

#[derive(Deserialize)]
struct HeartbeatResponse {
    #[serde(default)]
    devices: Vec<NearbyDevice>,
}

#[derive(Deserialize)]
struct QrResponse {
    qr_image: String,
}

/// Connect QR code, as the data url the server sent and as PNG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrCode {
    pub data_url: String,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    cookie: Option<String>,
    csrf_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: config.server_url.clone(),
            cookie: config.session_cookie.clone(),
            csrf_token: config.csrf_token.clone(),
        })
    }

    /// Upload one media file into the conversation. The server answers with
    /// the message record it created.
    pub async fn upload_media(
        &self,
        conversation_id: &str,
        path: &Path,
    ) -> Result<MessageRecord, ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime_for(path))?;
        let form = Form::new().part("media", part);

        let url = self.base.join(&format!("/chat/{conversation_id}/upload/"))?;
        let mut request = self.authorized(self.http.post(url)).multipart(form);
        if let Some(token) = &self.csrf_token {
            request = request.header(CSRF_HEADER, token);
        }
        info!("uploading {file_name} ({size} bytes) to conversation {conversation_id}");
        let response = checked(request.send().await?).await?;
        let body: UploadResponse = response.json().await?;
        Ok(body.message)
    }

    /// Heartbeat the discovery service and list devices active nearby.
    pub async fn nearby_devices(&self) -> Result<Vec<NearbyDevice>, ApiError> {
        let url = self.base.join("/discovery/heartbeat/")?;
        let response = checked(self.authorized(self.http.get(url)).send().await?).await?;
        let body: HeartbeatResponse = response.json().await?;
        debug!("{} nearby devices", body.devices.len());
        Ok(body.devices)
    }

    pub async fn connect_qr(&self) -> Result<QrCode, ApiError> {
        let url = self.base.join("/discovery/qr/")?;
        let response = checked(self.authorized(self.http.get(url)).send().await?).await?;
        let body: QrResponse = response.json().await?;
        let png = decode_data_url(&body.qr_image)?;
        Ok(QrCode {
            data_url: body.qr_image,
            png,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }
}

async fn checked(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

/// Decode a `data:<mime>;base64,<payload>` url.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, ApiError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| ApiError::Body("qr_image is not a data url".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ApiError::Body("data url has no payload".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(ApiError::Body(format!("unsupported data url encoding: {meta}")));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| ApiError::Body(format!("base64 decode error: {e}")))
}

/// The server picks the message kind from the part's content type.
fn mime_for(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Answer one HTTP request with `status` and a JSON `body`. The handle
    /// yields the raw request, lowercased.
    async fn serve_once(status: &'static str, body: String) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_lowercase()
        });
        (Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap(), server)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                return request;
            }
            request.extend_from_slice(&chunk[..read]);
            let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
            let body = &request[end + 4..];
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok());
            let complete = match length {
                Some(length) => body.len() >= length,
                None if head.contains("transfer-encoding: chunked") => body.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if complete {
                return request;
            }
        }
    }

    fn client(base: &Url) -> ApiClient {
        let base = base.to_string();
        let config = ClientConfig::from_lookup(|key| match key {
            "NEXUS_SERVER_URL" => Some(base.clone()),
            "NEXUS_USERNAME" => Some("alice".to_string()),
            "NEXUS_CONVERSATION_ID" => Some("12".to_string()),
            "NEXUS_SESSION_COOKIE" => Some("sessionid=abc".to_string()),
            "NEXUS_CSRF_TOKEN" => Some("tok123".to_string()),
            _ => None,
        })
        .unwrap();
        ApiClient::new(&config).unwrap()
    }

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn upload_posts_multipart_media_with_credentials() {
        let record = serde_json::json!({
            "message": {
                "id": 77,
                "sender": "alice",
                "content": "",
                "message_type": "image",
                "media_url": "/media/chat_media/cat.png",
                "timestamp": "2024-01-01T00:00:00Z",
            }
        });
        let (base, server) = serve_once("201 Created", record.to_string()).await;
        let path = temp_file("cat.png", b"\x89PNG\r\n\x1a\n");

        let message = client(&base).upload_media("12", &path).await.unwrap();
        let request = server.await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(message.id, 77);
        assert_eq!(message.message_type, crate::models::MessageKind::Image);
        assert!(request.starts_with("post /chat/12/upload/ http/1.1\r\n"));
        assert!(request.contains("x-csrftoken: tok123\r\n"));
        assert!(request.contains("cookie: sessionid=abc\r\n"));
        assert!(request.contains("content-type: multipart/form-data; boundary="));
        assert!(request.contains("name=\"media\""));
        assert!(request.contains("cat.png\""));
        assert!(request.contains("content-type: image/png"));
    }

    #[tokio::test]
    async fn upload_rejection_is_a_status_error() {
        let (base, server) =
            serve_once("400 Bad Request", r#"{"error":"No file provided"}"#.to_string()).await;
        let path = temp_file("empty.txt", b"");

        let result = client(&base).upload_media("12", &path).await;
        server.await.unwrap();
        std::fs::remove_file(&path).ok();

        match result {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert!(body.contains("No file provided"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_of_missing_file_never_hits_the_network() {
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let result = client(&base)
            .upload_media("12", Path::new("/nonexistent/nexus/cat.png"))
            .await;
        assert!(matches!(result, Err(ApiError::File(_))));
    }

    #[tokio::test]
    async fn heartbeat_lists_nearby_devices() {
        let body = r#"{"devices":[{"user_id":4,"username":"Dana","avatar":null,"ip":"10.0.0.8","device_name":null}]}"#;
        let (base, server) = serve_once("200 OK", body.to_string()).await;

        let devices = client(&base).nearby_devices().await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("get /discovery/heartbeat/ http/1.1\r\n"));
        assert!(request.contains("cookie: sessionid=abc\r\n"));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].username, "Dana");
        assert_eq!(devices[0].label(), "Generic Device • 10.0.0.8");
    }

    #[tokio::test]
    async fn qr_endpoint_is_decoded_to_png() {
        let body = r#"{"qr_image":"data:image/png;base64,iVBORw0KGgo="}"#;
        let (base, server) = serve_once("200 OK", body.to_string()).await;

        let qr = client(&base).connect_qr().await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("get /discovery/qr/ http/1.1\r\n"));
        assert_eq!(qr.png, b"\x89PNG\r\n\x1a\n");
        assert!(qr.data_url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn decodes_png_data_url() {
        let png = decode_data_url("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(png, b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn rejects_other_urls() {
        assert!(decode_data_url("https://example.org/qr.png").is_err());
        assert!(decode_data_url("data:image/png;base64").is_err());
        assert!(decode_data_url("data:text/plain,hello").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn picks_mime_from_extension() {
        assert_eq!(mime_for(Path::new("/tmp/Cat.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("clip.mp4")), "video/mp4");
        for (file, family) in [
            ("clip.mkv", "video/"),
            ("movie.avi", "video/"),
            ("scan.tiff", "image/"),
            ("logo.svg", "image/"),
            ("track.flac", "audio/"),
            ("note.m4a", "audio/"),
        ] {
            assert!(mime_for(Path::new(file)).starts_with(family), "{file}");
        }
        assert_eq!(mime_for(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn parses_heartbeat_body() {
        let body: HeartbeatResponse = serde_json::from_str(
            r#"{"devices":[{"user_id":4,"username":"Dana","avatar":"/static/img/default-avatar.svg","ip":"10.0.0.8","device_name":"Firefox"}]}"#,
        )
        .unwrap();
        assert_eq!(body.devices.len(), 1);
        assert_eq!(body.devices[0].label(), "Firefox • 10.0.0.8");
    }
}
