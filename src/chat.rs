use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::conversation::ConversationStore;
use crate::llm::{LlmClient, Message, Usage};
use crate::persona::PersonaStore;
use crate::prompt::PromptComposer;

#[derive(Debug)]
pub struct ChatReply {
    pub content: String,
    pub conversation_id: Uuid,
    pub usage: Option<Usage>,
}

/// Ties persona, prompt composition, the LLM and conversation history together.
pub struct ChatService {
    llm: Arc<dyn LlmClient>,
    personas: Arc<PersonaStore>,
    composer: Arc<PromptComposer>,
    conversations: ConversationStore,
}

impl ChatService {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        personas: Arc<PersonaStore>,
        composer: Arc<PromptComposer>,
        conversations: ConversationStore,
    ) -> Self {
        Self {
            llm,
            personas,
            composer,
            conversations,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// `history` is the client-held transcript ending with the new user turn.
    /// Client-sent system messages are dropped; the composed persona prompt
    /// is the only system message.
    pub async fn send(
        &self,
        history: Vec<Message>,
        model: Option<&str>,
        conversation_id: Option<Uuid>,
    ) -> Result<ChatReply> {
        let Some(user_msg) = history.iter().rev().find(|m| m.role == "user").cloned() else {
            anyhow::bail!("Messages must include a user message");
        };

        let persona = self.personas.get();
        let system = self.composer.compose(persona.as_ref()).await;

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system));
        messages.extend(
            history
                .into_iter()
                .filter(|m| matches!(m.role.as_str(), "user" | "assistant")),
        );

        tracing::info!("Sending {} messages to LLM", messages.len());
        let response = self.llm.chat(messages, model).await?;

        let reply = Message::assistant(&response.content);
        let conversation_id = self
            .conversations
            .record_exchange(conversation_id, &user_msg, &reply)?;

        Ok(ChatReply {
            content: response.content,
            conversation_id,
            usage: response.usage,
        })
    }
}
