use serde::{Deserialize, Serialize};

/// One typed block of user-authored content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { mime_type: String, data_base64: String },
    Pdf { mime_type: String, data_base64: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } | Self::Pdf { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub name: String,
    pub contents: Vec<ContentBlock>,
}

impl UserMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: ContentBlock) -> Self {
        self.contents.push(content);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// All plain-text blocks, newline-joined.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&SerializedMessage::User(self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub text: String,
}

impl AssistantReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&SerializedMessage::Assistant(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub reply: AssistantReply,
    pub usage: TokenUsage,
}

// Payloads carry their role so stored JSON can be replayed without the row.
#[derive(Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum SerializedMessage<'a> {
    User(&'a UserMessage),
    Assistant(&'a AssistantReply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_joins_only_text_blocks() {
        let message = UserMessage::new("alice")
            .with_content(ContentBlock::text("first"))
            .with_content(ContentBlock::Image {
                mime_type: "image/png".to_string(),
                data_base64: "AAAA".to_string(),
            })
            .with_content(ContentBlock::text("second"));

        assert_eq!(message.text(), "first\nsecond");
    }

    #[test]
    fn user_payload_is_tagged_and_lossless() {
        let message = UserMessage::new("alice")
            .with_content(ContentBlock::text("hi"))
            .with_content(ContentBlock::Pdf {
                mime_type: "application/pdf".to_string(),
                data_base64: "JVBERi0=".to_string(),
            });

        let json = message.to_json().expect("serialize user message");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["role"], "user");
        assert_eq!(value["name"], "alice");
        assert_eq!(value["contents"][1]["type"], "pdf");

        let decoded: UserMessage = serde_json::from_value(value).expect("decode user message");
        assert_eq!(decoded, message);
    }
}
