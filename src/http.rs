use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::FetchError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";
/// Page fetches follow at most one redirect.
const MAX_REDIRECTS: usize = 1;

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct Page {
    /// URL after redirect-following.
    pub final_url: String,
    pub body: String,
}

/// Source of raw page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError>;
}

/// Shared outbound client: one connection pool, fixed timeout, browser UA.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { client })
    }

    /// GET `url` with `query` and decode the JSON body into `T`.
    ///
    /// Non-2xx statuses map onto [`FetchError`]; a body that does not match
    /// `T` is reported as malformed for `source_name`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_name: &'static str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let resp = self.client.get(url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            debug!("{} returned HTTP {}", source_name, status);
            return Err(FetchError::from_status(status));
        }
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::malformed(source_name, e.to_string()))
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch_page(&self, url: &str) -> Result<Page, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status));
        }
        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        debug!("Fetched {} ({} bytes)", final_url, body.len());
        Ok(Page { final_url, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            status,
            body.len()
        );
        for (k, v) in headers {
            out.push_str(&format!("{}: {}\r\n", k, v));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    fn redirect(to: &str) -> String {
        response("301 Moved Permanently", &[("Location", to)], "")
    }

    /// Serve canned responses by request path on a local port; unknown paths get 404.
    async fn serve(routes: Vec<(&'static str, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    while read < buf.len() {
                        let n = sock.read(&mut buf[read..]).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        read += n;
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).into_owned();
                    let target = request.split_whitespace().nth(1).unwrap_or("/");
                    let path = target.split('?').next().unwrap_or("/");
                    let reply = routes
                        .iter()
                        .find(|(p, _)| *p == path)
                        .map(|(_, r)| r.clone())
                        .unwrap_or_else(|| response("404 Not Found", &[], "missing"));
                    let _ = sock.write_all(reply.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn follows_one_redirect() {
        let base = serve(vec![
            ("/old", redirect("/new")),
            ("/new", response("200 OK", &[("Content-Type", "text/html")], "<p>moved</p>")),
        ])
        .await;
        let page = client().fetch_page(&format!("{}/old", base)).await.unwrap();
        assert_eq!(page.final_url, format!("{}/new", base));
        assert_eq!(page.body, "<p>moved</p>");
    }

    #[tokio::test]
    async fn second_redirect_is_an_error() {
        let base = serve(vec![
            ("/a", redirect("/b")),
            ("/b", redirect("/c")),
            ("/c", response("200 OK", &[], "end")),
        ])
        .await;
        assert!(client().fetch_page(&format!("{}/a", base)).await.is_err());
    }

    #[tokio::test]
    async fn statuses_map_to_fetch_errors() {
        let base = serve(vec![
            ("/busy", response("503 Service Unavailable", &[], "")),
            ("/slow-down", response("429 Too Many Requests", &[], "")),
        ])
        .await;
        let http = client();
        assert!(matches!(
            http.fetch_page(&format!("{}/busy", base)).await,
            Err(FetchError::Server { status: 503 })
        ));
        assert!(matches!(
            http.fetch_page(&format!("{}/slow-down", base)).await,
            Err(FetchError::RateLimited)
        ));
        assert!(matches!(
            http.fetch_page(&format!("{}/gone", base)).await,
            Err(FetchError::Client { status: 404 })
        ));
    }

    #[derive(Debug, Deserialize)]
    struct Payload {
        value: u32,
    }

    #[tokio::test]
    async fn get_json_decodes_or_reports_malformed() {
        let base = serve(vec![
            ("/ok", response("200 OK", &[("Content-Type", "application/json")], r#"{"value":3}"#)),
            ("/odd", response("200 OK", &[("Content-Type", "application/json")], r#"{"other":true}"#)),
        ])
        .await;
        let http = client();
        let ok: Payload = http
            .get_json("test", &format!("{}/ok", base), &[("q", "x".to_string())])
            .await
            .unwrap();
        assert_eq!(ok.value, 3);

        let odd = http
            .get_json::<Payload>("test", &format!("{}/odd", base), &[])
            .await;
        assert!(matches!(odd, Err(FetchError::Malformed { source_name: "test", .. })));
    }
}
