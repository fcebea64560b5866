use serde::{Deserialize, Serialize};

use crate::media::MediaRef;

pub const CHAT_APOLOGY: &str =
    "Sorry, I ran into a problem answering that. Please try again in a moment.";

pub const CHAT_GREETING: &str =
    "Hi! I'm your design assistant. Ask me about styles, colours or layouts, or attach a photo for feedback.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub attachment: Option<MediaRef>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>, attachment: Option<MediaRef>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            attachment,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
            attachment: None,
        }
    }
}

pub fn can_send(text: &str, attachment: Option<&MediaRef>) -> bool {
    !text.trim().is_empty() || attachment.is_some()
}

#[derive(Debug, Clone, Default)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    transcript: ChatTranscript,
    pending_attachment: Option<MediaRef>,
    sending: bool,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &ChatTranscript {
        &self.transcript
    }

    pub fn pending_attachment(&self) -> Option<&MediaRef> {
        self.pending_attachment.as_ref()
    }

    pub fn attach(&mut self, media: MediaRef) -> bool {
        if !media.is_image() {
            return false;
        }
        self.pending_attachment = Some(media);
        true
    }

    pub fn detach(&mut self) -> Option<MediaRef> {
        self.pending_attachment.take()
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn can_send(&self, text: &str) -> bool {
        !self.sending && can_send(text, self.pending_attachment.as_ref())
    }

    pub fn begin_turn(&mut self, text: &str) -> Option<(Vec<ChatMessage>, ChatMessage)> {
        if !self.can_send(text) {
            return None;
        }
        let history = self.transcript.messages().to_vec();
        let turn = ChatMessage::user(text.trim(), self.pending_attachment.take());
        self.transcript.push(turn.clone());
        self.sending = true;
        Some((history, turn))
    }

    pub fn finish_turn(&mut self, reply: Result<String, String>) -> &ChatMessage {
        self.sending = false;
        let text = match reply {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => CHAT_APOLOGY.to_string(),
        };
        self.transcript.push(ChatMessage::assistant(text));
        &self.transcript.messages[self.transcript.messages.len() - 1]
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
