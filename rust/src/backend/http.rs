// REST client for the conversation API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{
    BackendError, ChatBackend, CompletedJobDto, ConversationSummaryDto,
    CreateConversationRequest, CreateConversationResponse, MessageDto, SendMessageRequest,
    SendMessageResponse, UnreadCountDto,
};

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::InvalidPayload(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_authed<T: DeserializeOwned>(
        &self,
        path: &str,
        auth_token: &str,
    ) -> Result<T, BackendError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(auth_token)
            .send()
            .await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            code: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::InvalidPayload(e.to_string()))
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn create_conversation(
        &self,
        req: CreateConversationRequest,
    ) -> Result<CreateConversationResponse, BackendError> {
        let resp = self
            .client
            .post(self.url("/conversations"))
            .json(&req)
            .send()
            .await?;
        decode(resp).await
    }

    async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, BackendError> {
        let url = self.url(&format!("/conversations/{}/messages", req.conversation_id));
        let resp = self.client.post(url).json(&req).send().await?;
        decode(resp).await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageDto>, BackendError> {
        let url = self.url(&format!("/conversations/{conversation_id}/messages"));
        let resp = self.client.get(url).send().await?;
        decode(resp).await
    }

    async fn list_conversations(
        &self,
        auth_token: &str,
    ) -> Result<Vec<ConversationSummaryDto>, BackendError> {
        self.get_authed("/conversations", auth_token).await
    }

    async fn unread_summary(&self, auth_token: &str) -> Result<Vec<UnreadCountDto>, BackendError> {
        self.get_authed("/conversations/unread", auth_token).await
    }

    async fn completed_jobs(&self, auth_token: &str) -> Result<Vec<CompletedJobDto>, BackendError> {
        self.get_authed("/jobs/completed", auth_token).await
    }
}
