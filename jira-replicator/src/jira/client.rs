//! HTTP client for the Jira backup endpoints.
//!
//! - `POST /rest/backup/1/export/runbackup` starts an export
//! - `GET /rest/backup/1/export/lastTaskId` + `getProgress` report its status
//! - `GET /plugins/servlet/<result>` downloads the finished archive

use crate::config::{HttpConfig, JiraConfig};
use crate::jira::{ProgressResponse, RejectionResponse};
use crate::rate_limit::RateLimitCondition;
use crate::source::{ArchiveReader, BackupSource, BackupState, BackupStatus};
use crate::transfer::progress::format_bytes;
use crate::transfer::progress_stream::{ProgressCallback, ProgressStream};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::{ReplicatorError, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("jira-replicator/", env!("CARGO_PKG_VERSION"));

/// Interval between download progress log lines
const DOWNLOAD_LOG_INTERVAL: Duration = Duration::from_secs(30);

pub struct JiraClient {
    base_url: Url,
    http: reqwest::Client,
    username: String,
    password: String,
    include_attachments: bool,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl JiraClient {
    pub fn new(jira: &JiraConfig, http: &HttpConfig) -> Result<Self> {
        let base_url = Url::parse(&jira.url).map_err(|e| {
            ReplicatorError::Config(format!("Unable to parse Jira URL {}: {}", jira.url, e))
        })?;

        // No client-wide timeout: it would also cap archive downloads.
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(http.timeout())
            .build()?;

        Ok(Self {
            base_url,
            http: client,
            username: jira.username.clone(),
            password: jira.password.clone(),
            include_attachments: jira.include_attachments,
            timeout: http.timeout(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ReplicatorError::Config(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Map a download locator onto `/plugins/servlet/...`, keeping its query.
    pub fn download_url(&self, locator: &str) -> Result<Url> {
        let (path, query) = match locator.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (locator, None),
        };
        let mut url = self.endpoint(&format!("/plugins/servlet/{}", path.trim_start_matches('/')))?;
        url.set_query(query.filter(|q| !q.is_empty()));
        Ok(url)
    }

    fn cache_buster(&self) -> String {
        self.clock.now().timestamp().to_string()
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = request
            .basic_auth(&self.username, Some(&self.password))
            .build()?;
        let method = request.method().clone();
        let url = request.url().clone();

        let started = Instant::now();
        let response = self.http.execute(request).await?;

        debug!(
            %method,
            url = %url.path(),
            status = response.status().as_u16(),
            content_length = ?response.content_length(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Jira request"
        );
        Ok(response)
    }

    async fn last_task_id(&self) -> Result<String> {
        let url = self.endpoint("/rest/backup/1/export/lastTaskId")?;
        let response = self
            .send(
                self.http
                    .get(url)
                    .query(&[("_", self.cache_buster())])
                    .header(ACCEPT, "application/json")
                    .timeout(self.timeout),
            )
            .await
            .map_err(|e| ReplicatorError::StatusQuery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ReplicatorError::StatusQuery(response.status().to_string()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ReplicatorError::StatusQuery(e.to_string()))?;
        Ok(body.trim().trim_matches('"').to_string())
    }
}

#[async_trait]
impl BackupSource for JiraClient {
    async fn trigger(&self) -> Result<()> {
        let url = self.endpoint("/rest/backup/1/export/runbackup")?;
        let response = self
            .send(
                self.http
                    .post(url)
                    .header(ACCEPT, "application/json")
                    .json(&serde_json::json!({ "cbAttachments": self.include_attachments }))
                    .timeout(self.timeout),
            )
            .await?;

        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED {
            let body = response.text().await.unwrap_or_default();
            let advisory = serde_json::from_str::<RejectionResponse>(&body)
                .map(|r| r.error)
                .unwrap_or(body);
            return Err(ReplicatorError::RateLimited(RateLimitCondition::from_advisory(
                &advisory,
                self.clock.now(),
            )));
        }

        if status.is_client_error() || status.is_server_error() {
            let content = response.text().await.unwrap_or_default();
            return Err(ReplicatorError::Trigger(format!("{}: {}", status, content.trim())));
        }

        info!("Backup requested");
        Ok(())
    }

    async fn status(&self) -> Result<BackupStatus> {
        let task_id = self.last_task_id().await?;

        let url = self.endpoint("/rest/backup/1/export/getProgress")?;
        let response = self
            .send(
                self.http
                    .get(url)
                    .query(&[("taskId", task_id), ("_", self.cache_buster())])
                    .header(ACCEPT, "application/json")
                    .timeout(self.timeout),
            )
            .await
            .map_err(|e| ReplicatorError::StatusQuery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ReplicatorError::StatusQuery(response.status().to_string()));
        }

        let progress: ProgressResponse = response
            .json()
            .await
            .map_err(|e| ReplicatorError::StatusQuery(e.to_string()))?;

        Ok(BackupStatus {
            state: BackupState::parse(&progress.status),
            progress: progress.progress,
            download_locator: progress.result.filter(|r| !r.is_empty()),
        })
    }

    async fn open_stream(&self, locator: &str) -> Result<(ArchiveReader, u64)> {
        let url = self.download_url(locator)?;
        let response = self
            .send(self.http.get(url))
            .await
            .map_err(|e| ReplicatorError::Transfer(format!("Unable to get backup: {}", e)))?;

        if !response.status().is_success() {
            return Err(ReplicatorError::Transfer(format!(
                "Unable to get backup: {}",
                response.status()
            )));
        }

        let total = response.content_length().unwrap_or(0);
        let callback: ProgressCallback = Arc::new(move |bytes| {
            info!(
                downloaded = %format_bytes(bytes),
                total = %format_bytes(total),
                "Downloading backup"
            );
        });

        let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let stream = ProgressStream::with_interval(body, callback, DOWNLOAD_LOG_INTERVAL);
        Ok((Box::new(StreamReader::new(stream)), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, min, sec).unwrap()
    }

    /// Answer one connection per canned `(status, body)` pair, recording each raw request.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (url, requests)
    }

    /// Read headers plus a `content-length` body.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn local_client(url: String, now: DateTime<Utc>) -> JiraClient {
        let jira = JiraConfig {
            url,
            username: "admin".into(),
            password: "secret".into(),
            include_attachments: true,
        };
        JiraClient::new(&jira, &HttpConfig::default())
            .unwrap()
            .with_clock(Arc::new(FixedClock(now)))
    }

    fn client() -> JiraClient {
        let jira = JiraConfig {
            url: "https://example.atlassian.net".into(),
            username: "admin".into(),
            password: "secret".into(),
            include_attachments: true,
        };
        JiraClient::new(&jira, &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_url() {
        let jira = JiraConfig {
            url: "::not a url".into(),
            ..Default::default()
        };
        let err = JiraClient::new(&jira, &HttpConfig::default()).err().unwrap();
        assert!(matches!(err, ReplicatorError::Config(_)));
    }

    #[test]
    fn test_download_url_keeps_query() {
        let url = client().download_url("export/download/?fileId=10042").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.atlassian.net/plugins/servlet/export/download/?fileId=10042"
        );
    }

    #[test]
    fn test_download_url_without_query() {
        let url = client().download_url("/export/download/file.zip").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.atlassian.net/plugins/servlet/export/download/file.zip"
        );
        assert!(url.query().is_none());
    }

    #[tokio::test]
    async fn test_trigger_accepted() {
        let (url, requests) = serve(vec![(200, r#"{"taskId":"10042"}"#)]).await;

        local_client(url, at(10, 15, 20)).trigger().await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /rest/backup/1/export/runbackup "));
        assert!(requests[0].contains(r#""cbAttachments":true"#));
        // admin:secret
        assert!(requests[0].contains("Basic YWRtaW46c2VjcmV0"));
    }

    #[tokio::test]
    async fn test_trigger_412_is_rate_limited() {
        let body = r#"{"error":"Backup frequency is limited. You can not make another backup right now. Approximate time till next allowed backup: 10h 25m"}"#;
        let (url, _) = serve(vec![(412, body)]).await;

        let err = local_client(url, at(10, 15, 20)).trigger().await.unwrap_err();

        match err {
            ReplicatorError::RateLimited(condition) => {
                assert_eq!(condition.retry_at(), at(20, 41, 0));
            }
            other => panic!("expected a rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trigger_412_with_plain_body() {
        let (url, _) = serve(vec![(412, "Approximate time till next allowed backup: 1h 30m")]).await;

        let err = local_client(url, at(10, 15, 20)).trigger().await.unwrap_err();

        match err {
            ReplicatorError::RateLimited(condition) => {
                assert_eq!(condition.retry_at(), at(11, 46, 0));
            }
            other => panic!("expected a rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trigger_412_without_duration_retries_now() {
        let (url, _) = serve(vec![(412, r#"{"error":"try later"}"#)]).await;

        let err = local_client(url, at(10, 15, 20)).trigger().await.unwrap_err();

        match err {
            ReplicatorError::RateLimited(condition) => {
                assert_eq!(condition.retry_at(), at(10, 15, 20));
            }
            other => panic!("expected a rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trigger_other_client_error_is_trigger_failure() {
        let (url, _) = serve(vec![(401, r#"{"message":"Unauthorized"}"#)]).await;

        let err = local_client(url, at(10, 15, 20)).trigger().await.unwrap_err();

        assert!(matches!(err, ReplicatorError::Trigger(_)));
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[tokio::test]
    async fn test_status_reads_last_task_progress() {
        let (url, requests) = serve(vec![
            (200, r#""10042""#),
            (
                200,
                r#"{"status":"Success","progress":100,"result":"export/download/?fileId=7"}"#,
            ),
        ])
        .await;

        let status = local_client(url, at(10, 15, 20)).status().await.unwrap();

        assert_eq!(status.state, BackupState::Ready);
        assert_eq!(status.progress, 100);
        assert_eq!(status.download_locator.as_deref(), Some("export/download/?fileId=7"));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /rest/backup/1/export/lastTaskId?_="));
        assert!(requests[1].starts_with("GET /rest/backup/1/export/getProgress?taskId=10042&_="));
    }

    #[tokio::test]
    async fn test_status_in_progress_has_no_locator() {
        let (url, _) = serve(vec![
            (200, "10042"),
            (200, r#"{"status":"InProgress","progress":35,"result":""}"#),
        ])
        .await;

        let status = local_client(url, at(10, 15, 20)).status().await.unwrap();

        assert_eq!(status.state, BackupState::InProgress);
        assert!(status.download_locator.is_none());
    }

    #[tokio::test]
    async fn test_status_http_error_is_status_query_failure() {
        let (url, _) = serve(vec![(503, "")]).await;

        let err = local_client(url, at(10, 15, 20)).status().await.unwrap_err();

        assert!(matches!(err, ReplicatorError::StatusQuery(_)));
    }

    #[test]
    fn test_progress_response_parsing() {
        let body = r#"{"status":"Success","progress":100,"result":"export/download/?fileId=1"}"#;
        let parsed: ProgressResponse = serde_json::from_str(body).unwrap();
        assert_eq!(BackupState::parse(&parsed.status), BackupState::Ready);
        assert_eq!(parsed.result.as_deref(), Some("export/download/?fileId=1"));

        let in_progress: ProgressResponse =
            serde_json::from_str(r#"{"status":"InProgress","progress":35}"#).unwrap();
        assert_eq!(in_progress.progress, 35);
        assert!(in_progress.result.is_none());
    }
}
