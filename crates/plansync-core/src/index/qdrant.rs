//! [`VectorIndex`] backed by the Qdrant REST API.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    IndexError, PlanPayload, ScoredPlanRef, VectorIndex, check_dimension, check_plan_vector,
};
use crate::config::VectorIndexConfig;
use crate::model::{EMBEDDING_DIM, Plan};

/// Qdrant only accepts integer or UUID point ids.
pub fn point_id(plan_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, plan_id.as_bytes())
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn new(config: &VectorIndexConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("plansync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .context("failed to build HTTP client for Qdrant")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn collection_url(&self, suffix: &str) -> String {
        self.url(&format!("/collections/{}{suffix}", self.collection))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, IndexError> {
        let request = match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        };
        request.send().await.map_err(transport_error)
    }

    async fn expect_success(response: Response) -> Result<Response, IndexError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IndexError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn transport_error(e: reqwest::Error) -> IndexError {
    if e.is_connect() || e.is_timeout() {
        IndexError::Unavailable(e.to_string())
    } else {
        IndexError::Transport(anyhow!(e).context("Qdrant request failed"))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self
            .send(self.client.get(self.collection_url("")))
            .await?;
        if response.status() == StatusCode::OK {
            debug!(collection = %self.collection, "collection exists");
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            Self::expect_success(response).await?;
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": EMBEDDING_DIM, "distance": "Cosine" }
        });
        let response = self
            .send(self.client.put(self.collection_url("")).json(&body))
            .await?;
        Self::expect_success(response).await?;
        info!(collection = %self.collection, "created vector collection");
        Ok(())
    }

    async fn store_plan_embeddings(&self, plan: &Plan) -> Result<(), IndexError> {
        check_plan_vector(plan)?;

        let payload = serde_json::to_value(PlanPayload::from_plan(plan))
            .context("failed to encode point payload")?;
        let body = json!({
            "points": [{
                "id": point_id(&plan.id).to_string(),
                "vector": plan.embeddings,
                "payload": payload,
            }]
        });
        let response = self
            .send(
                self.client
                    .put(self.collection_url("/points?wait=true"))
                    .json(&body),
            )
            .await?;
        Self::expect_success(response).await?;
        debug!(plan_id = %plan.id, collection = %self.collection, "indexed plan embeddings");
        Ok(())
    }

    async fn search_similar_plans(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPlanRef>, IndexError> {
        check_dimension(vector)?;

        let body = json!({ "vector": vector, "limit": limit, "with_payload": true });
        let response = self
            .send(
                self.client
                    .post(self.collection_url("/points/search"))
                    .json(&body),
            )
            .await?;
        let response = Self::expect_success(response).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .context("failed to decode Qdrant search response")?;

        let mut hits = Vec::with_capacity(parsed.result.len());
        for hit in parsed.result {
            let Some(payload) = hit.payload else {
                continue;
            };
            let payload: PlanPayload =
                serde_json::from_value(payload).context("unexpected point payload")?;
            hits.push(ScoredPlanRef {
                plan_id: payload.plan_id.clone(),
                score: hit.score,
                payload,
            });
        }
        Ok(hits)
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        let response = self.send(self.client.get(self.url("/healthz"))).await?;
        Self::expect_success(response).await?;
        Ok(())
    }
}
