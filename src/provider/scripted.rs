// src/provider/scripted.rs — Deterministic stand-in for a model provider
//
// Replies are looked up by call sequence number first, then by a substring
// of the prompt, then a fallback. Used for headless runs and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChatRequest, ChatResponse, ModelProvider, TokenUsage};
use crate::infra::errors::SizerError;

/// One scripted outcome for a model call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptedReply {
    Text(String),
    /// Reply only after sleeping, to exercise caller timeouts.
    Delayed { delay_ms: u64, reply: String },
    /// Fail the call. A `retry_after_ms` makes it a rate limit.
    Failure {
        error: String,
        #[serde(default)]
        retry_after_ms: Option<u64>,
    },
}

impl From<&str> for ScriptedReply {
    fn from(s: &str) -> Self {
        ScriptedReply::Text(s.to_string())
    }
}

impl From<String> for ScriptedReply {
    fn from(s: String) -> Self {
        ScriptedReply::Text(s)
    }
}

#[derive(Debug, Deserialize)]
struct PromptRule {
    contains: String,
    reply: ScriptedReply,
}

/// On-disk script format for `ampsizer run --script`.
#[derive(Debug, Default, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    sequence: Vec<ScriptedReply>,
    #[serde(default)]
    by_prompt: Vec<PromptRule>,
    #[serde(default)]
    fallback: Option<ScriptedReply>,
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    by_sequence: BTreeMap<usize, ScriptedReply>,
    by_prompt: Vec<(String, ScriptedReply)>,
    fallback: Option<ScriptedReply>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies for calls 0, 1, 2, ... in order.
    pub fn with_sequence<I, R>(mut self, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        let start = self.by_sequence.len();
        for (i, r) in replies.into_iter().enumerate() {
            self.by_sequence.insert(start + i, r.into());
        }
        self
    }

    /// Reply for one specific call number.
    pub fn on_call(mut self, seq: usize, reply: impl Into<ScriptedReply>) -> Self {
        self.by_sequence.insert(seq, reply.into());
        self
    }

    /// Reply to any prompt containing `needle` (first matching rule wins).
    pub fn on_prompt(mut self, needle: impl Into<String>, reply: impl Into<ScriptedReply>) -> Self {
        self.by_prompt.push((needle.into(), reply.into()));
        self
    }

    pub fn with_fallback(mut self, reply: impl Into<ScriptedReply>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, SizerError> {
        let file: ScriptFile = serde_json::from_str(json)?;
        let mut provider = Self::new().with_sequence(file.sequence);
        for rule in file.by_prompt {
            provider = provider.on_prompt(rule.contains, rule.reply);
        }
        provider.fallback = file.fallback;
        Ok(provider)
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lookup(&self, seq: usize, prompt: &str) -> Option<&ScriptedReply> {
        self.by_sequence
            .get(&seq)
            .or_else(|| {
                self.by_prompt
                    .iter()
                    .find(|(needle, _)| prompt.contains(needle.as_str()))
                    .map(|(_, r)| r)
            })
            .or(self.fallback.as_ref())
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, SizerError> {
        let seq = self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.prompt().to_string();
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.clone());

        let reply = self.lookup(seq, &prompt).cloned().ok_or_else(|| SizerError::Provider {
            provider: "scripted".into(),
            message: format!("no scripted reply for call {seq}"),
            retriable: false,
        })?;

        let content = match reply {
            ScriptedReply::Text(text) => text,
            ScriptedReply::Delayed { delay_ms, reply } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                reply
            }
            ScriptedReply::Failure {
                error,
                retry_after_ms: Some(ms),
            } => {
                tracing::debug!("Scripted rate limit: {}", error);
                return Err(SizerError::RateLimited {
                    provider: "scripted".into(),
                    retry_after_ms: ms,
                });
            }
            ScriptedReply::Failure { error, .. } => {
                return Err(SizerError::Provider {
                    provider: "scripted".into(),
                    message: error,
                    retriable: true,
                })
            }
        };

        Ok(ChatResponse {
            content,
            usage: TokenUsage::default(),
        })
    }
}
