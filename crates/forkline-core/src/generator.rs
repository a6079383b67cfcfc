use anyhow::Result;
use async_trait::async_trait;
use forkline_types::models::{Metadata, Role, SessionId};

/// What a reply generator sees: the session's model settings and the
/// conversation from the forest root down to the message being answered.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub session_id: SessionId,
    pub model_name: String,
    pub model_config: Metadata,
    pub turns: Vec<(Role, String)>,
}

impl GenerationContext {
    pub fn last_user_turn(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|(role, _)| *role == Role::User)
            .map(|(_, content)| content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub token_count: Option<u32>,
}

/// Produces assistant replies. Invoked outside any session lock.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, context: &GenerationContext) -> Result<Reply>;
}

/// Deterministic generator that answers with the last user turn.
#[derive(Debug, Default, Clone)]
pub struct EchoGenerator;

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn generate(&self, context: &GenerationContext) -> Result<Reply> {
        let prompt = context.last_user_turn().unwrap_or_default();
        Ok(Reply {
            content: format!("echo: {}", prompt),
            token_count: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_answers_last_user_turn() {
        let context = GenerationContext {
            session_id: 1,
            model_name: "echo".into(),
            model_config: Metadata::new(),
            turns: vec![
                (Role::User, "first".into()),
                (Role::Assistant, "echo: first".into()),
                (Role::User, "second".into()),
            ],
        };
        let reply = EchoGenerator.generate(&context).await.unwrap();
        assert_eq!(reply.content, "echo: second");
    }
}
