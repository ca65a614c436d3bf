//! 检索服务客户端（RAG）
//!
//! `RetrievalService` 抽象数据源发现与查询；`HttpRetrievalClient` 通过 HTTP 调用外部检索服务。
//! 任何失败统一为 `RetrievalError::Unavailable`，空答案是合法响应。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{Message, UserIdentity};

/// 用户可查询的数据源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 答案引用的来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Citation>,
    /// 每个来源的相关度
    #[serde(default)]
    pub scores: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("retrieval service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn discover_data_sources(&self, user: &UserIdentity) -> Result<Vec<DataSource>, RetrievalError>;

    async fn query(
        &self,
        user: &UserIdentity,
        data_source: &str,
        messages: &[Message],
    ) -> Result<RetrievalResponse, RetrievalError>;
}

#[derive(Serialize)]
struct QueryBody<'a> {
    user_id: &'a str,
    data_source: &'a str,
    messages: &'a [Message],
}

/// HTTP 检索客户端
pub struct HttpRetrievalClient {
    client: Client,
    base_url: String,
}

impl HttpRetrievalClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, RetrievalError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Unavailable(format!("HTTP {status}: {text}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("invalid response: {e}")))
    }
}

#[async_trait]
impl RetrievalService for HttpRetrievalClient {
    async fn discover_data_sources(&self, user: &UserIdentity) -> Result<Vec<DataSource>, RetrievalError> {
        let response = self
            .client
            .get(format!("{}/data_sources", self.base_url))
            .query(&[("user_id", user.id.as_str())])
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        Self::decode(response).await
    }

    async fn query(
        &self,
        user: &UserIdentity,
        data_source: &str,
        messages: &[Message],
    ) -> Result<RetrievalResponse, RetrievalError> {
        let body = QueryBody {
            user_id: &user.id,
            data_source,
            messages,
        };
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        let result: RetrievalResponse = Self::decode(response).await?;
        tracing::debug!(
            data_source = %data_source,
            sources = result.sources.len(),
            "Retrieval query finished"
        );
        Ok(result)
    }
}
