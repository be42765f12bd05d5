//! Minimal async Gmail REST client.
//!
//! Covers exactly what mailbox syncing needs: listing message ids by
//! query, fetching full messages, and managing push-notification watches.
//! Rate limiting gets one bounded retry; everything else surfaces as a
//! status error for the caller to log and count.

use std::time::Duration;

use tracing::debug;

pub mod types;

use types::{GmailMessage, ListMessagesResponse, WatchRequest, WatchResponse, GMAIL_API_BASE};

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub api_base: String,
    pub request_timeout: Duration,
    pub retry_wait: Duration,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base: GMAIL_API_BASE.to_string(),
            request_timeout: Duration::from_secs(20),
            retry_wait: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GmailApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gmail api returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("gmail api rate limited")]
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    config: GmailConfig,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Result<Self, GmailApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// List message stubs matching `query`, capped at `max_results`. The
    /// response's nextPageToken is ignored on purpose; anything past the
    /// first page stays unread and falls into the next sync window.
    pub async fn list_messages(
        &self,
        access_token: &str,
        mailbox: &str,
        query: &str,
        max_results: u32,
    ) -> Result<ListMessagesResponse, GmailApiError> {
        let request = self
            .http
            .get(self.user_url(mailbox, "messages"))
            .query(&[("q", query), ("maxResults", &max_results.to_string())])
            .bearer_auth(access_token);
        let response = self.execute(request).await?;
        Ok(response.json().await?)
    }

    pub async fn get_message(
        &self,
        access_token: &str,
        mailbox: &str,
        message_id: &str,
    ) -> Result<GmailMessage, GmailApiError> {
        let request = self
            .http
            .get(self.user_url(
                mailbox,
                &format!("messages/{}", urlencoding::encode(message_id)),
            ))
            .query(&[("format", "full")])
            .bearer_auth(access_token);
        let response = self.execute(request).await?;
        Ok(response.json().await?)
    }

    pub async fn watch(
        &self,
        access_token: &str,
        mailbox: &str,
        watch: &WatchRequest,
    ) -> Result<WatchResponse, GmailApiError> {
        let request = self
            .http
            .post(self.user_url(mailbox, "watch"))
            .json(watch)
            .bearer_auth(access_token);
        let response = self.execute(request).await?;
        Ok(response.json().await?)
    }

    pub async fn stop_watch(&self, access_token: &str, mailbox: &str) -> Result<(), GmailApiError> {
        let request = self
            .http
            .post(self.user_url(mailbox, "stop"))
            .bearer_auth(access_token);
        self.execute(request).await?;
        Ok(())
    }

    fn user_url(&self, mailbox: &str, suffix: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.config.api_base,
            urlencoding::encode(mailbox),
            suffix
        )
    }

    /// Send the request, retrying exactly once after a short wait when the
    /// API answers 429. A still-throttled retry gives up with RateLimited.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GmailApiError> {
        let retry = request.try_clone();
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let Some(retry) = retry else {
                return Err(GmailApiError::RateLimited);
            };
            debug!("gmail api throttled, retrying in {:?}", self.config.retry_wait);
            tokio::time::sleep(self.config.retry_wait).await;
            let response = retry.send().await?;
            return check_status(response).await;
        }
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GmailApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GmailApiError::RateLimited);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GmailApiError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_client(api_base: String) -> GmailClient {
        GmailClient::new(GmailConfig {
            api_base,
            request_timeout: Duration::from_secs(5),
            retry_wait: Duration::from_millis(10),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn list_messages_sends_query_and_parses() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/support%40acme.com/messages")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "is:unread after:1714650000".into()),
                Matcher::UrlEncoded("maxResults".into(), "100".into()),
            ]))
            .match_header("authorization", "Bearer token-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"messages": [{"id": "msg-1", "threadId": "thread-1"}], "resultSizeEstimate": 1}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = test_client(server.url());
        let listed = client
            .list_messages("token-1", "support@acme.com", "is:unread after:1714650000", 100)
            .await
            .expect("list");

        assert_eq!(listed.messages.len(), 1);
        assert_eq!(listed.messages[0].id, "msg-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_message_requests_full_format() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/support%40acme.com/messages/msg-1")
            .match_query(Matcher::UrlEncoded("format".into(), "full".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "msg-1", "threadId": "thread-1", "internalDate": "1714650000000"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(server.url());
        let message = client
            .get_message("token-1", "support@acme.com", "msg-1")
            .await
            .expect("get");

        assert_eq!(message.thread_id, "thread-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn throttled_request_retries_once_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/support%40acme.com/messages/msg-1")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("slow down")
            .expect(2)
            .create_async()
            .await;

        let client = test_client(server.url());
        let err = client
            .get_message("token-1", "support@acme.com", "msg-1")
            .await
            .expect_err("throttled");

        assert!(matches!(err, GmailApiError::RateLimited));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_errors_surface_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/support%40acme.com/messages")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = test_client(server.url());
        let err = client
            .list_messages("token-1", "support@acme.com", "is:unread", 100)
            .await
            .expect_err("forbidden");

        match err {
            GmailApiError::Status { status, body } => {
                assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn watch_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let watch_mock = server
            .mock("POST", "/users/support%40acme.com/watch")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "topicName": "projects/helpdeck/topics/gmail",
                "labelIds": ["INBOX"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"historyId": "5001", "expiration": "1714736400000"}"#)
            .expect(1)
            .create_async()
            .await;
        let stop_mock = server
            .mock("POST", "/users/support%40acme.com/stop")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(server.url());
        let response = client
            .watch(
                "token-1",
                "support@acme.com",
                &WatchRequest {
                    topic_name: "projects/helpdeck/topics/gmail".to_string(),
                    label_ids: vec!["INBOX".to_string()],
                    label_filter_behavior: None,
                },
            )
            .await
            .expect("watch");
        assert_eq!(response.history_id_value(), Some(5001));
        assert!(response.expires_at().is_some());

        client
            .stop_watch("token-1", "support@acme.com")
            .await
            .expect("stop");

        watch_mock.assert_async().await;
        stop_mock.assert_async().await;
    }
}
