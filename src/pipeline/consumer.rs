//! Turns one request's agent event stream into display updates and
//! queued sentences.

use crate::agent::{
    AgentMessage, EventStream, Role, StreamEvent, extract_citations, format_references,
};
use crate::config::PipelineConfig;
use crate::runtime::{Notifier, PipelineEvent};
use crate::text::{flush, sanitize, segment};
use crate::tts::TtsQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Consumer state for a single in-flight request.
///
/// The response buffer is append-only and the cursor only moves forward, so
/// every character of the response is offered to the segmenter exactly once
/// however the deltas are split.
pub struct ResponseStreamConsumer {
    message_id: String,
    buffer: String,
    cursor: usize,
    queue: TtsQueue,
    utterance: u64,
    muted: Arc<AtomicBool>,
    notifier: Notifier,
    filler: Option<String>,
    speak: bool,
    completed: bool,
    spoken: usize,
}

impl ResponseStreamConsumer {
    pub fn new(
        message_id: impl Into<String>,
        queue: TtsQueue,
        notifier: Notifier,
        config: &PipelineConfig,
        muted: Arc<AtomicBool>,
    ) -> Self {
        let utterance = queue.begin_utterance();
        Self {
            message_id: message_id.into(),
            buffer: String::new(),
            cursor: 0,
            queue,
            utterance,
            muted,
            notifier,
            filler: Some(config.tool_call_filler.trim())
                .filter(|f| !f.is_empty())
                .map(str::to_owned),
            speak: config.speak_responses,
            completed: false,
            spoken: 0,
        }
    }

    /// Drain `events` to the end. Returns the final display text.
    pub fn run(mut self, events: EventStream) -> String {
        for event in events {
            if let Some(text) = self.handle(event) {
                return text;
            }
        }
        debug!(message_id = %self.message_id, "stream ended without completion");
        self.complete(&[])
    }

    /// Handle one event. Returns the final display text once the request
    /// has completed.
    pub fn handle(&mut self, event: StreamEvent) -> Option<String> {
        if self.completed {
            debug!("ignoring event after completion: {event:?}");
            return None;
        }
        match event {
            StreamEvent::Started => {
                self.buffer.clear();
                self.cursor = 0;
                info!(message_id = %self.message_id, "response started");
            }
            StreamEvent::ResponseDelta(text) => self.push_delta(&text),
            StreamEvent::ToolCallStarted(info) => {
                info!(tool = %info.name, "tool call started");
                self.notifier.emit(PipelineEvent::ToolCall {
                    id: info.id,
                    name: info.name,
                });
                if let Some(filler) = self.filler.clone() {
                    self.speak_sentence(&filler);
                }
            }
            StreamEvent::ToolCallCompleted(info) => {
                info!(tool = %info.name, "tool call completed");
                self.notifier.emit(PipelineEvent::ToolResult {
                    id: info.id,
                    name: info.name,
                    output_text: info.result,
                });
            }
            StreamEvent::MemoryUpdating => {
                self.notifier.emit(PipelineEvent::MemoryUpdating {
                    message_id: self.message_id.clone(),
                });
            }
            StreamEvent::Completed(messages) => return Some(self.complete(&messages)),
            StreamEvent::Unknown(raw) => debug!("ignoring unknown stream event: {raw}"),
        }
        None
    }

    fn push_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);
        self.notifier.emit(PipelineEvent::TextDelta {
            message_id: self.message_id.clone(),
            text: text.to_owned(),
        });

        let out = segment(&self.buffer, self.cursor);
        self.cursor = out.consumed;
        for sentence in out.sentences {
            self.speak_sentence(&sentence);
        }
    }

    fn complete(&mut self, messages: &[AgentMessage]) -> String {
        self.completed = true;

        // An agent that does not stream deltas delivers its whole answer here.
        if self.buffer.trim().is_empty()
            && let Some(answer) = messages.iter().rev().find(|m| m.role == Role::Assistant)
        {
            self.push_delta(&answer.content);
        }

        if let Some(rest) = flush(&self.buffer, self.cursor) {
            self.speak_sentence(&rest);
        }
        self.cursor = self.buffer.len();

        let mut text = self.buffer.trim().to_owned();
        let references = format_references(&extract_citations(messages));
        if !references.is_empty() {
            text.push_str("\n\n");
            text.push_str(&references);
        }

        info!(
            message_id = %self.message_id,
            "response complete, {} sentence(s) queued",
            self.spoken
        );
        self.notifier.emit(PipelineEvent::MessageComplete {
            message_id: self.message_id.clone(),
            text: text.clone(),
        });
        text
    }

    fn speak_sentence(&mut self, sentence: &str) {
        if !self.speak || self.muted.load(Ordering::SeqCst) {
            return;
        }
        let spoken = sanitize(sentence);
        if spoken.is_empty() {
            return;
        }
        match self.queue.enqueue(spoken, self.utterance) {
            Ok(Some(_)) => self.spoken += 1,
            Ok(None) => {}
            Err(e) => {
                warn!("failed to queue sentence: {e}");
                self.notifier.error(e.to_string());
            }
        }
    }
}
