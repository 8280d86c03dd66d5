//! The unit of work accepted by the router
//!
//! A [`RouterRequest`] carries the prompt, optional context and file
//! inputs, and an effective deadline. Every downstream call inherits the
//! deadline through the request's cancellation token.

use crate::error::{RouteError, RouteResult};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Caller-supplied hint about the kind of task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskHint {
    Coding,
    Debugging,
    Analysis,
    Generation,
    #[default]
    General,
}

impl TaskHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Debugging => "debugging",
            Self::Analysis => "analysis",
            Self::Generation => "generation",
            Self::General => "general",
        }
    }
}

/// A routed request
#[derive(Debug, Clone)]
pub struct RouterRequest {
    /// The user's prompt
    pub prompt: String,
    /// Optional additional context, appended after the prompt
    pub context: Option<String>,
    /// Optional task classification hint
    pub task_hint: TaskHint,
    /// Optional ordered list of paths or directories to analyze
    pub file_inputs: Vec<String>,
    /// Explicit endpoint name, bypassing candidate selection
    pub force_endpoint: Option<String>,
    /// Caller override for the response-token budget
    pub max_tokens_override: Option<u32>,
    /// Absolute wall-clock cut-off for the whole request
    pub deadline: Instant,
}

impl RouterRequest {
    /// Build a request with the effective deadline
    /// `min(explicit, now + max_request_duration)`.
    pub fn new(prompt: impl Into<String>, max_request_duration: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            task_hint: TaskHint::General,
            file_inputs: Vec::new(),
            force_endpoint: None,
            max_tokens_override: None,
            deadline: Instant::now() + max_request_duration,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_task_hint(mut self, hint: TaskHint) -> Self {
        self.task_hint = hint;
        self
    }

    pub fn with_force_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.force_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_file_inputs(mut self, inputs: Vec<String>) -> Self {
        self.file_inputs = inputs;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = self.deadline.min(deadline);
        self
    }

    /// Prompt plus context, the text every analysis stage sees.
    pub fn full_text(&self) -> String {
        match &self.context {
            Some(ctx) if !ctx.is_empty() => format!("{}\n{}", self.prompt, ctx),
            _ => self.prompt.clone(),
        }
    }

    /// Validate caller-supplied constraints.
    pub fn validate(&self) -> RouteResult<()> {
        if self.prompt.trim().is_empty() {
            return Err(RouteError::InvalidRequest(
                "prompt cannot be empty or contain only whitespace".to_string(),
            ));
        }
        Ok(())
    }

    /// Time remaining before the deadline, zero if already past.
    pub fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Token count estimated as `ceil(bytes / 4)`.
///
/// Crude, but stable: the chunker, prompt assembler, and router all agree
/// on the same estimate, which is what the budget arithmetic needs.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}
