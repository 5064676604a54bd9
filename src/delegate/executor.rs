//! Agent execution with memory integration and follow-up expansion
//!
//! An initial call is preceded by a semantic memory search (injected as
//! `memory_context`) and followed by a store-back of the exchange. If the
//! agent declares a follow-up-queries field, each query is executed
//! sequentially with the initial output as context, and a final synthesis
//! call produces a consolidated report. Follow-up expansion does not
//! re-enter itself.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::agent::{Agent, AgentResponse};
use crate::error::Result;
use crate::llm::{LlmClient, PromptKwargs};
use crate::memory::SemanticMemory;

/// Executes one agent call, with memory and follow-up handling
pub struct AgentExecutor {
    client: Arc<LlmClient>,
    memory: Option<Arc<SemanticMemory>>,
}

impl AgentExecutor {
    pub fn new(client: Arc<LlmClient>, memory: Option<Arc<SemanticMemory>>) -> Self {
        AgentExecutor { client, memory }
    }

    /// Execute the agent for a query. `process_follow_ups` is false on
    /// recursive entry, bounding the expansion to one level.
    pub fn execute(
        &self,
        user_query: String,
        agent: Arc<Agent>,
        prompt_kwargs: PromptKwargs,
        process_follow_ups: bool,
    ) -> BoxFuture<'_, Result<AgentResponse>> {
        async move {
            let mut kwargs = prompt_kwargs;

            // Memory context is always set, empty when unavailable
            let hits = match &self.memory {
                Some(memory) => memory.retrieve_relevant(&user_query).await,
                None => Vec::new(),
            };
            let context = self
                .memory
                .as_ref()
                .map(|memory| memory.format_context(&hits))
                .unwrap_or_default();
            kwargs.insert("memory_context".to_string(), Value::String(context));

            info!("Executing agent '{}'", agent.name);
            let initial = self
                .client
                .fcall::<AgentResponse>(&user_query, &agent.prompt, agent.tools.as_deref(), &kwargs)
                .await?;

            if let Some(memory) = &self.memory {
                memory
                    .store_interaction(
                        &user_query,
                        &initial.response,
                        &agent.name,
                        json!({"has_memory_context": !hits.is_empty()}),
                    )
                    .await;
            }

            let follow_ups = agent
                .follow_up_key
                .as_deref()
                .map(|key| initial.follow_up_queries(key))
                .unwrap_or_default();

            if !process_follow_ups || follow_ups.is_empty() {
                return Ok(initial);
            }

            debug!("Processing {} follow-up queries", follow_ups.len());
            let mut responses = vec![initial.clone()];
            for query in follow_ups {
                info!("Executing follow-up query: {}", query);
                let follow_up = self
                    .execute(
                        format!(
                            "Context: {}\n\nFollow-up query: {}",
                            initial.response, query
                        ),
                        agent.clone(),
                        kwargs.clone(),
                        false,
                    )
                    .await?;
                responses.push(follow_up);
            }

            let combined_context = combine_responses(&responses);
            let synthesis_query = format!(
                "Generate a detailed technical report based on the following context, \
                 analyzing from multiple angles with in-depth technical details, \
                 methodologies, and insights:\n\n{}\n\nThe original user query is: {}",
                combined_context, user_query
            );

            let combined = self
                .client
                .fcall::<AgentResponse>(
                    &synthesis_query,
                    &agent.prompt,
                    agent.tools.as_deref(),
                    &kwargs,
                )
                .await?;

            if let Some(memory) = &self.memory {
                memory
                    .store_interaction(
                        &format!("Combined analysis: {}", user_query),
                        &combined.response,
                        &format!("{}_combined", agent.name),
                        json!({
                            "is_combined_response": true,
                            "num_sub_responses": responses.len(),
                        }),
                    )
                    .await;
            }

            Ok(combined)
        }
        .boxed()
    }
}

/// Merge responses into a single JSON context for the synthesis call
fn combine_responses(responses: &[AgentResponse]) -> String {
    let mut combined = serde_json::Map::new();
    for (index, response) in responses.iter().enumerate() {
        let value = serde_json::to_value(response).unwrap_or(Value::Null);
        combined.insert(format!("response_{index}"), value);
    }
    Value::Object(combined).to_string()
}
