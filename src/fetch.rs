use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, LOCATION};
use url::Url;

use crate::config::FetchConfig;
use crate::error::PreviewError;
use crate::validate::{UrlValidator, ValidatedUrl};

// ── Fetched document ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FetchedDocument {
    pub final_url: Url,
    pub content_type: String,
    pub byte_length: usize,
    pub body: Vec<u8>,
}

impl FetchedDocument {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ── Fetcher ──────────────────────────────────────────────────────────────────

pub struct PageFetcher {
    client: reqwest::Client,
    validator: UrlValidator,
    config: FetchConfig,
}

impl PageFetcher {
    pub fn new(config: FetchConfig, validator: UrlValidator) -> Result<Self, PreviewError> {
        let client = Self::client_builder(&config)?
            .build()
            .map_err(|e| PreviewError::FetchFailed(e.to_string()))?;
        Ok(Self::with_client(client, validator, config))
    }

    pub(crate) fn with_client(
        client: reqwest::Client,
        validator: UrlValidator,
        config: FetchConfig,
    ) -> Self {
        Self {
            client,
            validator,
            config,
        }
    }

    /// Redirects are never followed by the client itself; `fetch` walks them
    /// so each hop can be counted and checked.
    pub(crate) fn client_builder(
        config: &FetchConfig,
    ) -> Result<reqwest::ClientBuilder, PreviewError> {
        let header = |value: &str| {
            HeaderValue::from_str(value).map_err(|e| PreviewError::FetchFailed(e.to_string()))
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, header(&config.accept)?);
        headers.insert(ACCEPT_LANGUAGE, header(&config.accept_language)?);

        Ok(reqwest::ClientBuilder::new()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .default_headers(headers))
    }

    /// GET the page, bounded by one overall deadline that covers redirects and
    /// the body read.
    pub async fn fetch(&self, url: &ValidatedUrl) -> Result<FetchedDocument, PreviewError> {
        match tokio::time::timeout(self.config.timeout, self.fetch_within_deadline(url)).await {
            Ok(result) => result,
            Err(_) => Err(PreviewError::FetchFailed(format!(
                "timeout of {}ms exceeded",
                self.config.timeout.as_millis()
            ))),
        }
    }

    async fn fetch_within_deadline(
        &self,
        url: &ValidatedUrl,
    ) -> Result<FetchedDocument, PreviewError> {
        let mut current = url.as_url().clone();
        let mut hops = 0usize;

        let mut response = loop {
            let response = self.client.get(current.clone()).send().await?;
            if !response.status().is_redirection() {
                break response;
            }
            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                break response;
            };

            hops += 1;
            if hops > self.config.max_redirects {
                return Err(PreviewError::FetchFailed(
                    "Maximum number of redirects exceeded".to_string(),
                ));
            }

            let next = current.join(location).map_err(|e| {
                PreviewError::FetchFailed(format!("Invalid redirect location: {}", e))
            })?;
            tracing::debug!(from = %current, to = %next, hop = hops, "following redirect");

            current = if self.config.revalidate_redirects {
                self.validator.validate_url(next).await?.into_url()
            } else {
                next
            };
        };

        let status = response.status();
        if !status.is_success() {
            return Err(PreviewError::FetchFailed(format!(
                "Request failed with status code {}",
                status.as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_html_content_type(&content_type) {
            return Err(PreviewError::WrongContentType);
        }

        let limit = self.config.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(PreviewError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(PreviewError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedDocument {
            final_url: current,
            content_type,
            byte_length: body.len(),
            body,
        })
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml+xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_SIZE;
    use crate::validate::tests::validator;
    use axum::{
        body::Body,
        extract::Path,
        response::{Html, IntoResponse, Redirect},
        routing::get,
        Json, Router,
    };
    use std::net::SocketAddr;
    use std::time::Duration;

    const PAGE: &str = "<html><head><title>Fixture</title></head><body></body></html>";

    /// Chunked HTML body of `len` bytes, sent without a Content-Length header.
    fn streamed_html(len: usize) -> impl IntoResponse {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = (0..len)
            .step_by(64 * 1024)
            .map(|start| Ok(vec![b'a'; (len - start).min(64 * 1024)]))
            .collect();
        (
            [(CONTENT_TYPE, "text/html")],
            Body::from_stream(futures::stream::iter(chunks)),
        )
    }

    async fn spawn_fixture() -> SocketAddr {
        let app = Router::new()
            .route("/page", get(|| async { Html(PAGE) }))
            .route(
                "/json",
                get(|| async { Json(serde_json::json!({"title": "nope"})) }),
            )
            .route(
                "/exact",
                get(|| async { ([(CONTENT_TYPE, "text/html")], vec![b'a'; MAX_SIZE]) }),
            )
            .route(
                "/over",
                get(|| async { ([(CONTENT_TYPE, "text/html")], vec![b'a'; MAX_SIZE + 1]) }),
            )
            .route("/stream-exact", get(|| async { streamed_html(MAX_SIZE) }))
            .route("/stream-over", get(|| async { streamed_html(MAX_SIZE + 1) }))
            .route(
                "/r/:n",
                get(|Path(n): Path<u32>| async move {
                    if n == 0 {
                        Redirect::temporary("/page")
                    } else {
                        Redirect::temporary(&format!("/r/{}", n - 1))
                    }
                }),
            )
            .route(
                "/to-internal",
                get(|| async { Redirect::temporary("/internal-hop") }),
            )
            .route(
                "/internal-hop",
                get(|| async { Redirect::temporary("http://internal.test/page") }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Html(PAGE)
                }),
            )
            .route(
                "/missing",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, Html("gone")) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fetcher(addr: SocketAddr, config: FetchConfig) -> PageFetcher {
        let client = PageFetcher::client_builder(&config)
            .unwrap()
            .resolve("fixture.test", addr)
            .resolve("internal.test", addr)
            .build()
            .unwrap();
        let validator = validator(&[
            ("fixture.test", &["93.184.216.34"]),
            ("internal.test", &["10.0.0.7"]),
        ]);
        PageFetcher::with_client(client, validator, config)
    }

    async fn target(fetcher: &PageFetcher, addr: SocketAddr, path: &str) -> ValidatedUrl {
        fetcher
            .validator
            .validate(&format!("http://fixture.test:{}{}", addr.port(), path))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fetches_html_page() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());
        let url = target(&fetcher, addr, "/page").await;

        let doc = fetcher.fetch(&url).await.unwrap();
        assert!(doc.content_type.starts_with("text/html"));
        assert_eq!(doc.byte_length, PAGE.len());
        assert_eq!(doc.text(), PAGE);
        assert_eq!(doc.final_url.path(), "/page");
    }

    #[tokio::test]
    async fn json_content_type_is_rejected() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());
        let url = target(&fetcher, addr, "/json").await;

        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(PreviewError::WrongContentType)
        ));
    }

    #[tokio::test]
    async fn body_of_exactly_max_size_is_accepted() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());
        let url = target(&fetcher, addr, "/exact").await;

        let doc = fetcher.fetch(&url).await.unwrap();
        assert_eq!(doc.byte_length, MAX_SIZE);
    }

    #[tokio::test]
    async fn body_over_max_size_is_too_large() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());
        let url = target(&fetcher, addr, "/over").await;

        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(PreviewError::TooLarge { limit }) if limit == MAX_SIZE
        ));
    }

    #[tokio::test]
    async fn streamed_body_without_length_is_capped() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());

        let url = target(&fetcher, addr, "/stream-exact").await;
        let doc = fetcher.fetch(&url).await.unwrap();
        assert_eq!(doc.byte_length, MAX_SIZE);

        let url = target(&fetcher, addr, "/stream-over").await;
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(PreviewError::TooLarge { limit }) if limit == MAX_SIZE
        ));
    }

    #[tokio::test]
    async fn follows_up_to_three_redirects() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());

        let url = target(&fetcher, addr, "/r/2").await;
        let doc = fetcher.fetch(&url).await.unwrap();
        assert_eq!(doc.final_url.path(), "/page");

        let url = target(&fetcher, addr, "/r/3").await;
        match fetcher.fetch(&url).await {
            Err(PreviewError::FetchFailed(msg)) => assert!(msg.contains("redirects")),
            other => panic!("expected redirect failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn redirect_into_private_network_is_blocked() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());
        let url = target(&fetcher, addr, "/to-internal").await;

        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(PreviewError::UnsafeUrl)
        ));
    }

    #[tokio::test]
    async fn redirect_revalidation_can_be_disabled() {
        let addr = spawn_fixture().await;
        let config = FetchConfig {
            revalidate_redirects: false,
            ..FetchConfig::default()
        };
        let fetcher = fetcher(addr, config);
        let url = target(&fetcher, addr, "/to-internal").await;

        let doc = fetcher.fetch(&url).await.unwrap();
        assert_eq!(doc.final_url.host_str(), Some("internal.test"));
    }

    #[tokio::test]
    async fn slow_target_times_out() {
        let addr = spawn_fixture().await;
        let config = FetchConfig {
            timeout: Duration::from_millis(200),
            ..FetchConfig::default()
        };
        let fetcher = fetcher(addr, config);
        let url = target(&fetcher, addr, "/slow").await;

        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(PreviewError::FetchFailed(_))
        ));
    }

    #[tokio::test]
    async fn upstream_error_status_fails() {
        let addr = spawn_fixture().await;
        let fetcher = fetcher(addr, FetchConfig::default());
        let url = target(&fetcher, addr, "/missing").await;

        match fetcher.fetch(&url).await {
            Err(PreviewError::FetchFailed(msg)) => assert!(msg.contains("404")),
            other => panic!("expected status failure, got {:?}", other),
        }
    }

    #[test]
    fn html_indicators() {
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("Text/HTML"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(!is_html_content_type("application/json"));
        assert!(!is_html_content_type(""));
    }
}
