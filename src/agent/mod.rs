//! The language-model agent as seen by the pipeline: a source of
//! [`StreamEvent`]s for one prompt.
//!
//! The pipeline never calls the model directly. It asks an [`AgentStream`]
//! to run a prompt and consumes the resulting events in arrival order.

pub mod api;
pub mod citations;

use crate::error::Result;

pub use api::ApiAgent;
pub use citations::{Citation, extract_citations, format_references};

/// Who wrote a message in the final transcript of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A role-tagged message carried by [`StreamEvent::Completed`].
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMessage {
    pub role: Role,
    pub content: String,
    /// Name of the tool that produced a [`Role::Tool`] message.
    pub tool_name: Option<String>,
}

impl AgentMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(name.into()),
        }
    }
}

/// A tool invocation reported by the agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments; may be empty when the call has just started.
    pub arguments: String,
    /// Tool output, when the agent reports it on completion.
    pub result: Option<String>,
}

/// One event from a streamed agent response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The run has started.
    Started,
    /// A fragment of the response text.
    ResponseDelta(String),
    ToolCallStarted(ToolCallInfo),
    ToolCallCompleted(ToolCallInfo),
    /// The agent is updating its long-term memory.
    MemoryUpdating,
    /// The run finished; carries the request's messages in order.
    Completed(Vec<AgentMessage>),
    /// An event this pipeline does not understand, kept raw for logging.
    Unknown(String),
}

/// Events for one request, pulled by the consumer thread.
pub type EventStream = Box<dyn Iterator<Item = StreamEvent> + Send>;

/// A streaming agent.
pub trait AgentStream: Send + Sync {
    /// Start answering `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Agent`](crate::SpeechError::Agent) if the run
    /// cannot be started.
    fn run(&self, prompt: &str) -> Result<EventStream>;
}
