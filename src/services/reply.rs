use async_trait::async_trait;

use crate::models::chat::ChatSession;

/// Produces the assistant reply for an inbound message.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, session: &ChatSession, inbound: &str) -> anyhow::Result<String>;
}

/// Acknowledges the inbound text. Stands in until a real responder is wired up.
pub struct EchoReplyGenerator;

#[async_trait]
impl ReplyGenerator for EchoReplyGenerator {
    async fn generate(&self, session: &ChatSession, inbound: &str) -> anyhow::Result<String> {
        Ok(format!(
            "Acknowledged your message: '{}'. (Processed by chatbot {} for chat {})",
            inbound, session.chatbot_id, session.id
        ))
    }
}
