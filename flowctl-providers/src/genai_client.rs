//! [`ProviderClient`] backed by the `genai` crate, the only place in this
//! workspace that touches a concrete provider transcript format
//! (`spec.md` §4.3 "Provider abstraction").

use async_trait::async_trait;
use flowctl_core::model::ToolDescriptor;
use genai::{
    chat::{ChatMessage, ChatOptions, ChatRequest, ChatRole, MessageContent, Tool as GenAiTool, ToolCall as GenAiToolCall},
    resolver::{AuthData, AuthResolver, Endpoint, ServiceTargetResolver},
    Client, ModelIden, ServiceTarget,
};
use serde_json::Value;

use crate::{
    client::ProviderClient,
    error::{ProviderError, Result},
    types::{CompletionRequest, CompletionResponse, Message, Role, ToolCall},
};

pub struct GenAiProvider {
    name: String,
    client: Client,
}

impl GenAiProvider {
    /// `api_key`/`api_endpoint` have already been environment-expanded by
    /// [`flowctl_core::config::ProviderConfig::expanded`] before reaching here.
    /// When given, both override `genai`'s own ambient env-var discovery via
    /// its resolver hooks; when absent, the client falls back to that
    /// discovery exactly as before.
    pub fn new(name: impl Into<String>, api_key: Option<String>, api_endpoint: Option<String>) -> Self {
        let mut builder = Client::builder();

        if let Some(api_key) = api_key {
            let auth_resolver = AuthResolver::from_resolver_fn(
                move |_model_iden: ModelIden| Ok(Some(AuthData::from_single(api_key.clone()))),
            );
            builder = builder.with_auth_resolver(auth_resolver);
        }

        if let Some(api_endpoint) = api_endpoint {
            let target_resolver = ServiceTargetResolver::from_resolver_fn(
                move |service_target: ServiceTarget| {
                    Ok(ServiceTarget {
                        endpoint: Endpoint::from_owned(api_endpoint.clone()),
                        ..service_target
                    })
                },
            );
            builder = builder.with_service_target_resolver(target_resolver);
        }

        Self {
            name: name.into(),
            client: builder.build(),
        }
    }
}

#[async_trait]
impl ProviderClient for GenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let chat_req = to_chat_request(&request);

        let mut options = ChatOptions::default();
        if let Some(temperature) = request.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        let response = self
            .client
            .exec_chat(&request.model, chat_req, Some(&options))
            .await
            .map_err(ProviderError::from)?;

        let content = response.content_text_as_str().unwrap_or_default().to_string();
        let tool_calls = response
            .tool_calls()
            .into_iter()
            .flatten()
            .map(from_genai_tool_call)
            .collect();

        Ok(CompletionResponse { content, tool_calls })
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .embed("text-embedding-3-small", input, None)
            .await
            .map_err(ProviderError::from)?;
        Ok(response.first_embedding().unwrap_or_default().to_vec())
    }
}

fn to_chat_request(request: &CompletionRequest) -> ChatRequest {
    let messages = request.messages.iter().map(to_genai_message).collect();
    let mut chat_req = ChatRequest::new(messages);
    if !request.tools.is_empty() {
        chat_req = chat_req.with_tools(request.tools.iter().map(to_genai_tool).collect());
    }
    chat_req
}

fn to_genai_message(message: &Message) -> ChatMessage {
    match message.role {
        Role::System => ChatMessage::system(message.content.clone()),
        Role::User => ChatMessage::user(message.content.clone()),
        Role::Assistant => ChatMessage::assistant(message.content.clone()),
        Role::Tool => ChatMessage {
            role: ChatRole::Tool,
            content: MessageContent::from_text(message.content.clone()),
            options: None,
        },
    }
}

fn to_genai_tool(descriptor: &ToolDescriptor) -> GenAiTool {
    GenAiTool::new(descriptor.function.name.clone())
        .with_description(descriptor.function.description.clone())
        .with_schema(descriptor.function.parameters.clone())
}

fn from_genai_tool_call(call: GenAiToolCall) -> ToolCall {
    ToolCall {
        id: call.call_id,
        name: call.fn_name,
        arguments: call
            .fn_arguments
            .as_str()
            .and_then(|s| serde_json::from_str::<Value>(s).ok())
            .unwrap_or(call.fn_arguments),
    }
}
