//! JSON-over-HTTP clients for the remote services
//!
//! All services exchange images as data URLs inside JSON bodies:
//!
//! ```text
//! POST <removal_url>                 {"name", "image"}             -> {"image"} | {"mask"}
//! POST <compositing_url>/shadow      {"name", "image"}             -> {"image"}
//! POST <compositing_url>/enhance     {"name", "image", "guidance"} -> {"image"?}
//! POST <library_url>/images          {"image", "metadata"}         -> {"id"}
//! ```
//!
//! Any non-2xx status, transport error, timeout or unexpected body is a
//! `ServiceFailure` for the calling item.

use crate::config::ServiceConfig;
use crate::error::{Result, StudioError};
use crate::remote::{
    BackgroundRemover, GenerativeCompositor, LibraryMetadata, LibraryStore, RemovalOutput,
};
use crate::types::InlineImage;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Shared plumbing: one pooled client, a base URL and optional bearer token
#[derive(Debug, Clone)]
struct ServiceClient {
    service: &'static str,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ServiceClient {
    fn new(service: &'static str, base_url: &str, config: &ServiceConfig) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            StudioError::invalid_config(format!("invalid {} URL '{}': {}", service, base_url, e))
        })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StudioError::network_error(service, &e))?;

        Ok(Self {
            service,
            client,
            base_url,
            api_key: config.resolved_api_key(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path);
        log::debug!("POST {} ({})", url, self.service);

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StudioError::network_error(self.service, &e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_default();
            return Err(StudioError::service(
                self.service,
                if detail.is_empty() {
                    format!("HTTP {} from {}", status, url)
                } else {
                    format!("HTTP {} from {}: {}", status, url, detail)
                },
            ));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| StudioError::network_error(self.service, &e))
    }

    fn decode_image(&self, data_url: &str) -> Result<InlineImage> {
        InlineImage::from_data_url(data_url).map_err(|e| {
            StudioError::service(self.service, format!("malformed image payload: {}", e))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    name: &'a str,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageResponse {
    image: Option<String>,
    mask: Option<String>,
}

#[derive(Debug, Serialize)]
struct StoreRequest<'a> {
    image: String,
    metadata: &'a LibraryMetadata,
}

#[derive(Debug, Deserialize)]
struct StoreResponse {
    id: String,
}

/// Remote background-removal service
#[derive(Debug, Clone)]
pub struct HttpBackgroundRemover {
    inner: ServiceClient,
}

impl HttpBackgroundRemover {
    /// # Errors
    /// - `InvalidConfig` if the URL does not parse
    /// - `ServiceFailure` if the HTTP client cannot be created
    pub fn new(url: &str, config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            inner: ServiceClient::new("background-removal", url, config)?,
        })
    }

    fn interpret(&self, response: ImageResponse) -> Result<RemovalOutput> {
        match (response.image, response.mask) {
            (Some(image), _) => Ok(RemovalOutput::Cutout(self.inner.decode_image(&image)?)),
            (None, Some(mask)) => Ok(RemovalOutput::Mask(self.inner.decode_image(&mask)?)),
            (None, None) => Err(StudioError::service(
                self.inner.service,
                "response carried neither an image nor a mask",
            )),
        }
    }
}

#[async_trait]
impl BackgroundRemover for HttpBackgroundRemover {
    fn name(&self) -> &str {
        self.inner.service
    }

    async fn remove_background(&self, item: &str, image: &InlineImage) -> Result<RemovalOutput> {
        let request = ImageRequest {
            name: item,
            image: image.to_data_url(),
            guidance: None,
        };
        let response: ImageResponse = self.inner.post_json("", &request).await?;
        self.interpret(response)
    }
}

/// Remote generative compositing and enhancement service
#[derive(Debug, Clone)]
pub struct HttpGenerativeCompositor {
    inner: ServiceClient,
}

impl HttpGenerativeCompositor {
    /// # Errors
    /// - `InvalidConfig` if the URL does not parse
    /// - `ServiceFailure` if the HTTP client cannot be created
    pub fn new(url: &str, config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            inner: ServiceClient::new("generative-compositing", url, config)?,
        })
    }
}

#[async_trait]
impl GenerativeCompositor for HttpGenerativeCompositor {
    fn name(&self) -> &str {
        self.inner.service
    }

    async fn render_shadow(&self, item: &str, cutout: &InlineImage) -> Result<InlineImage> {
        let request = ImageRequest {
            name: item,
            image: cutout.to_data_url(),
            guidance: None,
        };
        let response: ImageResponse = self.inner.post_json("shadow", &request).await?;
        let image = response.image.ok_or_else(|| {
            StudioError::service(self.inner.service, "shadow response carried no image")
        })?;
        self.inner.decode_image(&image)
    }

    async fn enhance(
        &self,
        item: &str,
        composite: &InlineImage,
        guidance: &InlineImage,
    ) -> Result<Option<InlineImage>> {
        let request = ImageRequest {
            name: item,
            image: composite.to_data_url(),
            guidance: Some(guidance.to_data_url()),
        };
        let response: ImageResponse = self.inner.post_json("enhance", &request).await?;
        response
            .image
            .map(|image| self.inner.decode_image(&image))
            .transpose()
    }
}

/// Remote persisted-library backend
#[derive(Debug, Clone)]
pub struct HttpLibraryStore {
    inner: ServiceClient,
}

impl HttpLibraryStore {
    /// # Errors
    /// - `InvalidConfig` if the URL does not parse
    /// - `ServiceFailure` if the HTTP client cannot be created
    pub fn new(url: &str, config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            inner: ServiceClient::new("library", url, config)?,
        })
    }
}

#[async_trait]
impl LibraryStore for HttpLibraryStore {
    fn name(&self) -> &str {
        self.inner.service
    }

    async fn store(&self, image: &InlineImage, metadata: &LibraryMetadata) -> Result<String> {
        let request = StoreRequest {
            image: image.to_data_url(),
            metadata,
        };
        let response: StoreResponse = self.inner.post_json("images", &request).await?;
        Ok(response.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dimensions, PixelBuffer};

    fn config() -> ServiceConfig {
        ServiceConfig {
            timeout_secs: 2,
            ..ServiceConfig::default()
        }
    }

    fn png_url() -> String {
        InlineImage::png(&PixelBuffer::solid(1, 1, [1, 2, 3, 4]))
            .unwrap()
            .to_data_url()
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = HttpBackgroundRemover::new("not a url", &config()).unwrap_err();
        assert!(matches!(err, StudioError::InvalidConfig(_)));
    }

    #[test]
    fn test_endpoint_joining() {
        let client = ServiceClient::new("library", "https://api.example.com/v1/", &config()).unwrap();
        assert_eq!(client.endpoint(""), "https://api.example.com/v1");
        assert_eq!(client.endpoint("/images"), "https://api.example.com/v1/images");
    }

    #[test]
    fn test_removal_response_interpretation() {
        let remover = HttpBackgroundRemover::new("https://removal.example.com", &config()).unwrap();

        let cutout = remover
            .interpret(ImageResponse {
                image: Some(png_url()),
                mask: None,
            })
            .unwrap();
        assert!(matches!(cutout, RemovalOutput::Cutout(_)));

        let mask = remover
            .interpret(ImageResponse {
                image: None,
                mask: Some(png_url()),
            })
            .unwrap();
        assert!(matches!(mask, RemovalOutput::Mask(_)));

        let empty = remover.interpret(ImageResponse::default()).unwrap_err();
        assert!(matches!(empty, StudioError::ServiceFailure { .. }));

        let malformed = remover
            .interpret(ImageResponse {
                image: Some("data:image/png,nope".to_string()),
                mask: None,
            })
            .unwrap_err();
        assert!(matches!(malformed, StudioError::ServiceFailure { .. }));
    }

    #[test]
    fn test_enhance_request_omits_missing_guidance() {
        let body = serde_json::to_value(ImageRequest {
            name: "a.jpg",
            image: "data:image/png;base64,AA==".to_string(),
            guidance: None,
        })
        .unwrap();
        assert!(body.get("guidance").is_none());
        assert_eq!(body["name"], "a.jpg");
    }

    /// Serve a single HTTP exchange and hand back the raw request text
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    fn request_body(raw: &str) -> serde_json::Value {
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_removal_mask_arrives_over_http() {
        let mask = PixelBuffer::solid(3, 2, [255, 255, 255, 128]);
        let body = serde_json::json!({ "mask": InlineImage::png(&mask).unwrap().to_data_url() });
        let (url, server) = serve_once("200 OK", body.to_string()).await;

        let remover = HttpBackgroundRemover::new(
            &url,
            &ServiceConfig {
                api_key: Some("secret".to_string()),
                ..config()
            },
        )
        .unwrap();
        let photo = InlineImage::png(&PixelBuffer::solid(3, 2, [10, 20, 30, 255])).unwrap();
        let output = remover.remove_background("shoe.png", &photo).await.unwrap();

        match output {
            RemovalOutput::Mask(image) => {
                let decoded = image.decode().unwrap();
                assert_eq!(decoded.dimensions(), mask.dimensions());
                assert_eq!(decoded.pixel(2, 1), Some([255, 255, 255, 128]));
            }
            RemovalOutput::Cutout(_) => panic!("expected a mask"),
        }

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST / "));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer secret"));
        let sent = request_body(&raw);
        assert_eq!(sent["name"], "shoe.png");
        assert_eq!(sent["image"], photo.to_data_url());
        assert!(sent.get("guidance").is_none());
    }

    #[tokio::test]
    async fn test_enhance_sends_guidance_and_accepts_empty_reply() {
        let (url, server) = serve_once("200 OK", "{}".to_string()).await;
        let compositor = HttpGenerativeCompositor::new(&url, &config()).unwrap();
        let composite = InlineImage::png(&PixelBuffer::solid(2, 2, [1, 1, 1, 255])).unwrap();
        let guidance = InlineImage::png(&PixelBuffer::solid(2, 2, [0, 0, 0, 0])).unwrap();

        let enhanced = compositor.enhance("a.png", &composite, &guidance).await.unwrap();
        assert!(enhanced.is_none());

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /enhance "));
        assert_eq!(request_body(&raw)["guidance"], guidance.to_data_url());
    }

    #[tokio::test]
    async fn test_library_store_returns_assigned_id() {
        let (url, server) = serve_once("201 Created", r#"{"id":"lib-42"}"#.to_string()).await;
        let store = HttpLibraryStore::new(&url, &config()).unwrap();
        let image = InlineImage::png(&PixelBuffer::solid(4, 4, [9, 9, 9, 255])).unwrap();
        let metadata = LibraryMetadata::describe("a.png", &image, Dimensions::new(4, 4), "session");

        let id = store.store(&image, &metadata).await.unwrap();
        assert_eq!(id, "lib-42");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /images "));
        let sent = request_body(&raw);
        assert_eq!(sent["metadata"]["name"], "a.png");
        assert_eq!(sent["metadata"]["session_id"], "session");
    }

    #[tokio::test]
    async fn test_error_status_carries_service_detail() {
        let (url, server) =
            serve_once("429 Too Many Requests", r#"{"error":"quota exhausted"}"#.to_string()).await;
        let remover = HttpBackgroundRemover::new(&url, &config()).unwrap();
        let photo = InlineImage::png(&PixelBuffer::solid(1, 1, [0, 0, 0, 255])).unwrap();

        let err = remover.remove_background("a.png", &photo).await.unwrap_err();
        match err {
            StudioError::ServiceFailure { service, message } => {
                assert_eq!(service, "background-removal");
                assert!(message.contains("429"));
                assert!(message.contains("quota exhausted"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_service_is_service_failure() {
        let remover = HttpBackgroundRemover::new("http://127.0.0.1:9", &config()).unwrap();
        let image = InlineImage::png(&PixelBuffer::solid(1, 1, [0, 0, 0, 255])).unwrap();
        let err = remover.remove_background("a.png", &image).await.unwrap_err();
        match err {
            StudioError::ServiceFailure { service, .. } => assert_eq!(service, "background-removal"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
