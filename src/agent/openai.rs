use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::Agent;
use crate::session::{Role, Turn};

pub struct OpenAiAgent {
    /// Pre-computed `"Bearer <key>"` header value (avoids `format!` per request).
    cached_auth_header: String,
    model: String,
    temperature: f64,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiAgent {
    pub fn new(api_key: &str, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            cached_auth_header: format!("Bearer {api_key}"),
            model: model.into(),
            temperature,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn build_request(&self, system_context: &str, history: &[Turn], message: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);

        messages.push(Message {
            role: "system",
            content: system_context.to_owned(),
        });
        for turn in history {
            messages.push(Message {
                role: Self::role_str(turn.role),
                content: turn.content.clone(),
            });
        }
        messages.push(Message {
            role: "user",
            content: message.to_owned(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
        }
    }

    fn extract_text(chat_response: &ChatResponse) -> anyhow::Result<String> {
        chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("No response from OpenAI"))
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    async fn generate(
        &self,
        system_context: &str,
        history: &[Turn],
        message: &str,
    ) -> anyhow::Result<String> {
        let request = self.build_request(system_context, history, message);

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", &self.cached_auth_header)
            .json(&request)
            .send()
            .await
            .context("OpenAI request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({status}): {body}");
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("OpenAI response JSON decode failed")?;
        Self::extract_text(&chat_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_with_bearer_header() {
        let agent = OpenAiAgent::new("sk-proj-abc123", "gpt-4.1", 0.7);
        assert_eq!(agent.cached_auth_header, "Bearer sk-proj-abc123");
    }

    #[test]
    fn request_puts_system_first_and_message_last() {
        let agent = OpenAiAgent::new("sk-test", "gpt-4.1", 0.7);
        let history = vec![Turn::user("earlier question"), Turn::assistant("earlier answer")];
        let req = agent.build_request("Use this data: {}", &history, "new question");

        let json = serde_json::to_value(&req).unwrap();
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["role"], "user");
        assert_eq!(messages[3]["content"], "new question");
        assert_eq!(json["model"], "gpt-4.1");
    }

    #[test]
    fn request_with_empty_history_still_has_system_and_user() {
        let agent = OpenAiAgent::new("sk-test", "gpt-4.1", 0.0);
        let req = agent.build_request("context", &[], "hi");
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"role\":\"system\""));
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"temperature\":0.0"));
    }

    #[test]
    fn response_deserializes_single_choice() {
        let json = r#"{"choices":[{"message":{"content":"Hi!"}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(OpenAiAgent::extract_text(&resp).unwrap(), "Hi!");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let json = r#"{"choices":[]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(OpenAiAgent::extract_text(&resp).is_err());
    }

    #[test]
    fn null_content_is_an_error() {
        let json = r#"{"choices":[{"message":{"content":null}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(OpenAiAgent::extract_text(&resp).is_err());
    }

    #[test]
    fn response_with_unicode() {
        let json = r#"{"choices":[{"message":{"content":"こんにちは 🦀"}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(OpenAiAgent::extract_text(&resp).unwrap(), "こんにちは 🦀");
    }
}
