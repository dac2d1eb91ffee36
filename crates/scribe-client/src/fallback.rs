use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use scribe_core::errors::ClientError;
use scribe_core::ids::ChapterId;
use scribe_core::progress::SessionResult;

#[derive(Serialize)]
struct FallbackRequest<'a> {
    topic: &'a str,
    specialty: &'a str,
    max_sources: u32,
}

#[derive(Deserialize)]
struct FallbackReply {
    success: bool,
    #[serde(default)]
    chapter_id: Option<String>,
    #[serde(default)]
    chapter: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// One-shot blocking exchange against the synthesis endpoint, used when the
/// live transport is unavailable. Never retries; bounded by the request
/// timeout.
pub struct FallbackClient {
    http: reqwest::Client,
    url: Url,
}

impl FallbackClient {
    pub fn new(url: Url, request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Fallback(format!("http client init failed: {e}")))?;
        Ok(Self { http, url })
    }

    pub async fn request(
        &self,
        topic: &str,
        specialty: &str,
        max_sources: u32,
    ) -> Result<SessionResult, ClientError> {
        tracing::debug!(url = %self.url, topic, "fallback synthesis request");
        let response = self
            .http
            .post(self.url.clone())
            .json(&FallbackRequest {
                topic,
                specialty,
                max_sources,
            })
            .send()
            .await
            .map_err(|e| ClientError::Fallback(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status.as_u16(), body));
        }

        let reply: FallbackReply = response
            .json()
            .await
            .map_err(|e| ClientError::Fallback(format!("invalid reply: {e}")))?;
        parse_reply(reply)
    }
}

fn parse_reply(reply: FallbackReply) -> Result<SessionResult, ClientError> {
    if !reply.success {
        return Err(ClientError::Fallback(
            reply
                .error
                .unwrap_or_else(|| "synthesis request failed".into()),
        ));
    }

    let chapter_id = reply
        .chapter_id
        .ok_or_else(|| ClientError::Fallback("reply missing chapter_id".into()))?;
    let title = reply
        .chapter
        .as_ref()
        .and_then(|c| c.get("title"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| ClientError::Fallback("reply missing chapter title".into()))?
        .to_string();

    Ok(SessionResult {
        chapter_id: ChapterId::from_raw(chapter_id),
        title,
        content: reply.chapter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn reply_from(raw: &str) -> FallbackReply {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn parse_success_reply() {
        let reply = reply_from(
            r#"{"success":true,"chapter_id":"c2","chapter":{"title":"T","sections":[1,2]}}"#,
        );
        let result = parse_reply(reply).unwrap();
        assert_eq!(result.chapter_id.as_str(), "c2");
        assert_eq!(result.title, "T");
        assert!(result.content.unwrap().get("sections").is_some());
    }

    #[test]
    fn parse_failure_reply_carries_server_message() {
        let reply = reply_from(r#"{"success":false,"error":"rate limited"}"#);
        let err = parse_reply(reply).unwrap_err();
        assert!(matches!(err, ClientError::Fallback(msg) if msg == "rate limited"));
    }

    #[test]
    fn parse_failure_reply_without_message() {
        let reply = reply_from(r#"{"success":false}"#);
        let err = parse_reply(reply).unwrap_err();
        assert!(matches!(err, ClientError::Fallback(msg) if msg == "synthesis request failed"));
    }

    #[test]
    fn parse_success_reply_missing_fields() {
        let reply = reply_from(r#"{"success":true}"#);
        assert!(parse_reply(reply).is_err());

        let reply = reply_from(r#"{"success":true,"chapter_id":"c1","chapter":{}}"#);
        assert!(parse_reply(reply).is_err());
    }

    /// Serve exactly one canned HTTP response on a local port.
    async fn one_shot_http(status_line: &'static str, body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // Read headers, then the content-length body.
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        Url::parse(&format!("http://127.0.0.1:{port}/api/synthesize")).unwrap()
    }

    #[tokio::test]
    async fn request_round_trip_success() {
        let url = one_shot_http(
            "HTTP/1.1 200 OK",
            r#"{"success":true,"chapter_id":"c2","chapter":{"title":"T"}}"#,
        )
        .await;
        let client = FallbackClient::new(url, Duration::from_secs(5)).unwrap();

        let result = client.request("Glioblastoma", "tumor", 15).await.unwrap();
        assert_eq!(result.chapter_id.as_str(), "c2");
        assert_eq!(result.title, "T");
    }

    #[tokio::test]
    async fn request_surfaces_server_reported_failure() {
        let url = one_shot_http("HTTP/1.1 200 OK", r#"{"success":false,"error":"rate limited"}"#)
            .await;
        let client = FallbackClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.request("Glioblastoma", "tumor", 15).await.unwrap_err();
        assert!(matches!(err, ClientError::Fallback(msg) if msg == "rate limited"));
    }

    #[tokio::test]
    async fn request_classifies_http_errors() {
        let url = one_shot_http("HTTP/1.1 503 Service Unavailable", "overloaded").await;
        let client = FallbackClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.request("Glioblastoma", "tumor", 15).await.unwrap_err();
        assert!(matches!(err, ClientError::Fallback(msg) if msg.contains("server error 503")));
    }

    #[tokio::test]
    async fn request_fails_on_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{port}/api/synthesize")).unwrap();
        let client = FallbackClient::new(url, Duration::from_secs(5)).unwrap();

        let err = client.request("Glioblastoma", "tumor", 15).await.unwrap_err();
        assert!(matches!(err, ClientError::Fallback(msg) if msg.starts_with("request failed")));
    }
}
