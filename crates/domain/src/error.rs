use std::time::Duration;

/// Shared error type used across all `ic-*` crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Provider returned a non-200 response or broke the SSE stream.
    /// Fatal for the current turn: terminates the run.
    #[error("upstream provider {provider}: {message}")]
    Upstream { provider: String, message: String },

    /// Tool-call arguments failed schema validation. Recoverable — the
    /// caller surfaces a pedagogical error payload as the tool output
    /// instead of failing the run.
    #[error("validation: {0}")]
    Validation(String),

    /// A platform tool handler itself raised. Carries the structured
    /// payload shape submitted back as the tool output.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// The consumer did not submit a tool output within `max_wait`.
    /// Terminates the orchestration loop.
    #[error("consumer tool timed out after {0:?}")]
    ConsumerTimeout(Duration),

    /// The run transitioned to `cancelled` mid-stream. Abort silently.
    #[error("run cancelled")]
    CancellationRequested,

    /// Malformed JSON in the accumulated stream. Treated as "no tool
    /// call" by the caller — never terminates the run on its own.
    #[error("parsing: {0}")]
    Parsing(String),

    #[error("cache: {0}")]
    Cache(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error, if raised mid-run, should terminate the run
    /// rather than be recovered by the model's next turn.
    ///
    /// Per the error taxonomy: only `Upstream` and `ConsumerTimeout`
    /// terminate the run. Everything else is recoverable.
    pub fn terminates_run(&self) -> bool {
        matches!(self, Error::Upstream { .. } | Error::ConsumerTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
