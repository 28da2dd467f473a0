//! Notification collaborator: posts the preview link on the pull request.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{RelayError, Result};

/// JSON payload of an issue comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentBody {
    pub body: String,
}

impl CommentBody {
    pub fn preview_link(preview_url: &str) -> Self {
        Self {
            body: format!("View this PR on {}", preview_url),
        }
    }
}

/// Where the comment goes: issue `pr_number` of repository `repo_slug`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentTarget {
    pub repo_slug: String,
    pub pr_number: u64,
}

/// Status and body of the comment API response, whatever the status was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyResponse {
    pub status: u16,
    pub body: String,
}

impl NotifyResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the comment once. Only transport failures are errors; any HTTP
    /// status is returned to the caller.
    async fn post_comment(&self, target: &CommentTarget, comment: &CommentBody)
    -> Result<NotifyResponse>;
}

/// Posts comments through the GitHub REST API.
#[derive(Clone)]
pub struct GitHubNotifier {
    client: Client,
    api_base: String,
    token: String,
}

impl GitHubNotifier {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn comments_url(&self, target: &CommentTarget) -> String {
        format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_base, target.repo_slug, target.pr_number
        )
    }
}

#[async_trait]
impl Notifier for GitHubNotifier {
    async fn post_comment(
        &self,
        target: &CommentTarget,
        comment: &CommentBody,
    ) -> Result<NotifyResponse> {
        let url = self.comments_url(target);
        info!("Posting comment to {}", url);
        debug!("Comment body: {:?}", comment.body);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/vnd.github+json")
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(USER_AGENT, concat!("preview_relay/", env!("CARGO_PKG_VERSION")))
            .json(comment)
            .send()
            .await
            .map_err(|e| RelayError::Notification(format!("POST {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            RelayError::Notification(format!("reading response from {} failed: {}", url, e))
        })?;

        Ok(NotifyResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> CommentTarget {
        CommentTarget {
            repo_slug: "org/site".to_string(),
            pr_number: 7,
        }
    }

    #[test]
    fn preview_comment_serializes_to_the_expected_payload() {
        let comment = CommentBody::preview_link("https://abc123.example.com");
        assert_eq!(
            serde_json::to_value(&comment).unwrap(),
            json!({"body": "View this PR on https://abc123.example.com"})
        );
    }

    #[test]
    fn comments_url_tolerates_trailing_slash_on_base() {
        let notifier = GitHubNotifier::new("https://api.github.com/", "t");
        assert_eq!(
            notifier.comments_url(&target()),
            "https://api.github.com/repos/org/site/issues/7/comments"
        );
    }

    #[tokio::test]
    async fn posts_comment_with_token_and_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/org/site/issues/7/comments"))
            .and(header("authorization", "token s3cret"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"body": "View this PR on https://abc123.example.com"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = GitHubNotifier::new(server.uri(), "s3cret");
        let response = notifier
            .post_comment(
                &target(),
                &CommentBody::preview_link("https://abc123.example.com"),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn rejected_comment_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("Validation Failed"))
            .mount(&server)
            .await;

        let notifier = GitHubNotifier::new(server.uri(), "s3cret");
        let response = notifier
            .post_comment(&target(), &CommentBody::preview_link("https://x.example.com"))
            .await
            .unwrap();

        assert_eq!(response.status, 422);
        assert!(!response.is_success());
        assert_eq!(response.body, "Validation Failed");
    }

    #[tokio::test]
    async fn unreachable_api_is_a_notification_error() {
        // nothing listens on port 1
        let notifier = GitHubNotifier::new("http://127.0.0.1:1", "s3cret");
        let err = notifier
            .post_comment(&target(), &CommentBody::preview_link("https://x.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Notification(_)));
    }
}
