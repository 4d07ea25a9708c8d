use std::time::Duration;

use medchat_common::Message;
use serde::Deserialize;

use crate::error::ClientError;

#[derive(Debug, Deserialize)]
struct HistoryPage {
    messages: Vec<Message>,
}

/// REST pulls used to reconcile after a reconnect.
#[derive(Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HistoryClient {
    /// Every request fails with a timeout error after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Unread messages addressed to `user_id`, oldest first.
    pub async fn unread(&self, user_id: &str) -> Result<Vec<Message>, ClientError> {
        self.messages(&[("recipientId", user_id), ("unreadOnly", "true")])
            .await
    }

    /// The conversation between two users, oldest first.
    pub async fn conversation(
        &self,
        user_id: &str,
        with_user_id: &str,
    ) -> Result<Vec<Message>, ClientError> {
        self.messages(&[("userId", user_id), ("withUserId", with_user_id)])
            .await
    }

    async fn messages(&self, query: &[(&str, &str)]) -> Result<Vec<Message>, ClientError> {
        let page: HistoryPage = self
            .http
            .get(self.endpoint("/api/messages"))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.messages)
    }
}
