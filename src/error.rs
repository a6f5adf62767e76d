#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    /// The language model could not produce usable questions.
    /// The generator recovers from this itself, callers only see it in logs.
    #[error("question generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("unreadable source: {0}")]
    UnreadableSource(String),

    #[error("cannot {operation} while the session is {state}")]
    InvalidSessionState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("history store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = QuizError> = std::result::Result<T, E>;
