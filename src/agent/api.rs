//! OpenAI-compatible chat agent.
//!
//! Supports any server implementing the OpenAI chat completions API:
//! - Ollama (`http://localhost:11434`)
//! - MLX server (`http://localhost:8080`)
//! - vLLM, llama.cpp server, etc.
//!
//! Responses are read as Server-Sent Events on the consumer thread, one
//! line at a time, and surfaced as [`StreamEvent`]s.

use crate::agent::{AgentMessage, AgentStream, EventStream, StreamEvent, ToolCallInfo};
use crate::config::LlmConfig;
use crate::error::{Result, SpeechError};
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, Lines, Read};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A single message in the conversation history.
#[derive(Debug, Clone)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// Agent backed by an OpenAI-compatible HTTP API.
///
/// Keeps a bounded conversation history shared by every run; the assistant
/// reply is appended when its stream completes.
pub struct ApiAgent {
    config: LlmConfig,
    url: String,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    agent: ureq::Agent,
}

impl ApiAgent {
    pub fn new(config: &LlmConfig) -> Self {
        let trimmed = config.api_url.trim_end_matches('/');
        let base = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
        let url = format!("{base}/v1/chat/completions");

        info!("API agent configured: {url} model={}", config.api_model);

        let history = vec![ChatMessage {
            role: "system",
            content: config.system_prompt.clone(),
        }];

        Self {
            config: config.clone(),
            url,
            history: Arc::new(Mutex::new(history)),
            agent: ureq::agent(),
        }
    }

    /// Number of messages in history, system prompt included.
    pub fn history_len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Drop everything but the system prompt.
    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.truncate(1);
        }
    }
}

impl AgentStream for ApiAgent {
    fn run(&self, prompt: &str) -> Result<EventStream> {
        let messages: Vec<serde_json::Value> = {
            let mut history = self
                .history
                .lock()
                .map_err(|e| SpeechError::Agent(format!("history lock poisoned: {e}")))?;
            history.push(ChatMessage {
                role: "user",
                content: prompt.to_owned(),
            });
            trim_history(&mut history, self.config.max_history_messages);
            history
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "role": m.role,
                        "content": m.content,
                    })
                })
                .collect()
        };

        let body = serde_json::json!({
            "model": self.config.api_model,
            "messages": messages,
            "stream": true,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        let body_str = serde_json::to_string(&body)
            .map_err(|e| SpeechError::Agent(format!("JSON serialization failed: {e}")))?;

        info!("API generating response to: {prompt}");
        let mut req = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .set("Accept", "text/event-stream");
        if !self.config.api_key.is_empty() {
            let auth = format!("Bearer {}", self.config.api_key);
            req = req.set("Authorization", &auth);
        }

        let response = req.send_string(&body_str).map_err(|e| match e {
            ureq::Error::Status(code, resp) => {
                let detail = resp.into_string().unwrap_or_default();
                SpeechError::Agent(format!("API returned {code}: {detail}"))
            }
            other => SpeechError::Agent(format!("API request failed: {other}")),
        })?;

        Ok(Box::new(SseEvents {
            lines: BufReader::new(response.into_reader()).lines(),
            parser: ChunkParser::default(),
            pending: VecDeque::from([StreamEvent::Started]),
            prompt: prompt.to_owned(),
            history: Arc::clone(&self.history),
            max_history: self.config.max_history_messages,
            started: Instant::now(),
            finished: false,
        }))
    }
}

fn trim_history(history: &mut Vec<ChatMessage>, max: usize) {
    if max == 0 {
        return;
    }
    if history.len() > 1 + max {
        let drain_end = history.len().saturating_sub(max);
        if drain_end > 1 {
            history.drain(1..drain_end);
        }
    }
}

/// Iterator over one streamed response.
struct SseEvents {
    lines: Lines<BufReader<Box<dyn Read + Send + Sync + 'static>>>,
    parser: ChunkParser,
    pending: VecDeque<StreamEvent>,
    prompt: String,
    history: Arc<Mutex<Vec<ChatMessage>>>,
    max_history: usize,
    started: Instant,
    finished: bool,
}

impl SseEvents {
    fn finish(&mut self) {
        self.finished = true;
        self.pending.extend(self.parser.finish_tool_calls());
        let text = self.parser.text.trim().to_owned();

        if !text.is_empty()
            && let Ok(mut history) = self.history.lock()
        {
            history.push(ChatMessage {
                role: "assistant",
                content: text.clone(),
            });
            trim_history(&mut history, self.max_history);
        }

        info!(
            "API generated {} chunk(s) in {:.1}s",
            self.parser.chunks,
            self.started.elapsed().as_secs_f64()
        );
        self.pending.push_back(StreamEvent::Completed(vec![
            AgentMessage::user(self.prompt.clone()),
            AgentMessage::assistant(text),
        ]));
    }
}

impl Iterator for SseEvents {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            match self.lines.next() {
                None => self.finish(),
                Some(Err(e)) => {
                    warn!("response stream read error: {e}");
                    self.finish();
                }
                Some(Ok(line)) => match sse_data(&line) {
                    None => {}
                    Some("[DONE]") => self.finish(),
                    Some(data) => {
                        let (events, done) = self.parser.parse(data);
                        self.pending.extend(events);
                        if done {
                            self.finish();
                        }
                    }
                },
            }
        }
    }
}

/// Payload of an SSE `data:` line; `None` for blank lines, comments and
/// other fields.
fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}

/// Turns chat-completion chunks into stream events.
#[derive(Debug, Default)]
struct ChunkParser {
    /// Response text so far, without reasoning blocks.
    text: String,
    in_think_block: bool,
    /// Tool calls in progress, keyed by their stream index.
    tool_calls: BTreeMap<u64, ToolCallInfo>,
    chunks: usize,
}

impl ChunkParser {
    /// Parse one `data:` payload. Returns the events it produced and whether
    /// the model signalled the end of the response.
    fn parse(&mut self, data: &str) -> (Vec<StreamEvent>, bool) {
        let chunk: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable stream chunk ({e}): {data}");
                return (vec![StreamEvent::Unknown(data.to_owned())], false);
            }
        };
        self.chunks += 1;

        let choice = &chunk["choices"][0];
        let delta = &choice["delta"];
        let mut events = Vec::new();

        if let Some(content) = delta["content"].as_str()
            && let Some(text) = self.filter_reasoning(content)
        {
            self.text.push_str(&text);
            events.push(StreamEvent::ResponseDelta(text));
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or(0);
                let entry = self.tool_calls.entry(index).or_default();
                let is_new = entry.id.is_empty() && entry.name.is_empty();
                if let Some(id) = call["id"].as_str() {
                    entry.id = id.to_owned();
                }
                if let Some(name) = call["function"]["name"].as_str() {
                    entry.name.push_str(name);
                }
                if let Some(args) = call["function"]["arguments"].as_str() {
                    entry.arguments.push_str(args);
                }
                if is_new {
                    events.push(StreamEvent::ToolCallStarted(entry.clone()));
                }
            }
        }

        let done = match choice["finish_reason"].as_str() {
            Some("tool_calls") => {
                events.extend(self.finish_tool_calls());
                false
            }
            Some(_) => true,
            None => false,
        };
        if choice.is_null() && delta.is_null() && events.is_empty() {
            events.push(StreamEvent::Unknown(data.to_owned()));
        }
        (events, done)
    }

    /// `<think>...</think>` blocks (some models output reasoning) are not
    /// part of the response.
    fn filter_reasoning(&mut self, content: &str) -> Option<String> {
        const OPEN: &str = "<think>";
        const CLOSE: &str = "</think>";

        let mut kept = String::new();
        let mut rest = content;
        while !rest.is_empty() {
            if self.in_think_block {
                let Some(end) = rest.find(CLOSE) else { break };
                self.in_think_block = false;
                rest = rest[end + CLOSE.len()..].trim_start();
            } else if let Some(start) = rest.find(OPEN) {
                kept.push_str(&rest[..start]);
                self.in_think_block = true;
                rest = &rest[start + OPEN.len()..];
            } else {
                kept.push_str(rest);
                break;
            }
        }
        (!kept.is_empty()).then_some(kept)
    }

    fn finish_tool_calls(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(StreamEvent::ToolCallCompleted)
            .collect()
    }
}
