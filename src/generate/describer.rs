//! LLM-backed product description generator.

use super::cleanup::{clean_html, extract_json_object};
use super::community::CommunitySearch;
use super::prompts::{
    ProductKind, RESEARCH_SYSTEM, WRITER_SYSTEM, fallback_description, research_prompt,
    writer_prompt,
};
use super::Generator;
use crate::client::LlmClient;
use crate::models::{Config, GenerationError, ModelSpec, ProductRecord};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Research, then write, then clean.
pub struct ProductDescriber {
    client: LlmClient,
    research: ModelSpec,
    writer: ModelSpec,
    community: Option<CommunitySearch>,
    keywords: Vec<String>,
    store_url: String,
    fallback_on_error: bool,
}

impl ProductDescriber {
    pub fn new(config: &Config, client: LlmClient) -> Result<Self, GenerationError> {
        let community = if config.community.enabled {
            Some(CommunitySearch::new(config.community.clone())?)
        } else {
            None
        };

        Ok(Self {
            client,
            research: config.research.clone(),
            writer: config.writer.clone(),
            community,
            keywords: config.community.keywords.clone(),
            store_url: config.output.store_url.clone(),
            fallback_on_error: config.batch.fallback_on_error,
        })
    }

    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    async fn community_data(&self, product: &ProductRecord, kind: ProductKind) -> Map<String, Value> {
        let mut data = Map::new();
        if let (ProductKind::Fragrance, Some(search)) = (kind, &self.community) {
            let quotes = search.quotes_for(&product.display_name, &product.vendor).await;
            data.insert("reddit".to_string(), Value::from(quotes));
        }
        data
    }

    /// Research facts as a JSON object. Failures degrade to an empty object.
    async fn research(&self, product: &ProductRecord, kind: ProductKind) -> Map<String, Value> {
        let prompt = research_prompt(product, kind);
        match self
            .client
            .complete_with_system(&self.research, RESEARCH_SYSTEM, &prompt)
            .await
        {
            Ok(response) => {
                let data = extract_json_object(&response.content);
                debug!(
                    key = %product.key,
                    fields = data.len(),
                    cost_usd = response.cost_usd,
                    "Research complete"
                );
                data
            }
            Err(e) => {
                warn!(key = %product.key, error = %e, "Research failed, continuing without it");
                Map::new()
            }
        }
    }

    async fn write(
        &self,
        product: &ProductRecord,
        kind: ProductKind,
        research: &Map<String, Value>,
        community: &Map<String, Value>,
    ) -> Result<String, GenerationError> {
        let prompt = writer_prompt(product, kind, research, community, &self.store_url);
        let response = self
            .client
            .complete_with_system(&self.writer, WRITER_SYSTEM, &prompt)
            .await?;
        let content = clean_html(&response.content);
        if content.is_empty() {
            return Err(GenerationError::EmptyContent);
        }
        Ok(content)
    }
}

impl Generator for ProductDescriber {
    async fn generate(&self, product: &ProductRecord) -> Result<String, GenerationError> {
        let kind = ProductKind::classify(product, &self.keywords);
        let community = self.community_data(product, kind).await;
        let research = self.research(product, kind).await;

        match self.write(product, kind, &research, &community).await {
            Ok(content) => {
                info!(
                    key = %product.key,
                    kind = ?kind,
                    chars = content.len(),
                    "Description generated"
                );
                Ok(content)
            }
            Err(e) if self.fallback_on_error => {
                warn!(key = %product.key, error = %e, "Writer failed, using fallback description");
                Ok(fallback_description(product, &self.store_url))
            }
            Err(e) => Err(e),
        }
    }

    fn cost_usd(&self) -> f64 {
        self.client.total_cost_usd()
    }
}
