use crate::parser::EntryPoint;
use thiserror::Error;

/// The only failure a parse can produce.
///
/// Lexical errors, grammar violations and context violations (a construct that
/// the entry point or the flags do not admit) all surface as a `SyntaxError`
/// carrying the offending text and the entry point it was parsed under.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse {entry_point} expression '{expression}': {message}{}", position_suffix(.position))]
pub struct SyntaxError {
    pub expression: String,
    pub entry_point: EntryPoint,
    pub message: String,
    pub position: Option<usize>,
}

impl SyntaxError {
    pub fn new<E, M>(expression: E, entry_point: EntryPoint, message: M, position: Option<usize>) -> Self
    where
        E: Into<String>,
        M: Into<String>,
    {
        Self {
            expression: expression.into(),
            entry_point,
            message: message.into(),
            position,
        }
    }

    /// An error raised outside of a running parse, e.g. by a macro that
    /// rejects its arguments. The parser fills in text and entry point.
    pub fn detached<M: Into<String>>(message: M) -> Self {
        Self::new(String::new(), EntryPoint::Simple, message, None)
    }

    pub(crate) fn attach(mut self, expression: &str, entry_point: EntryPoint, position: usize) -> Self {
        if self.expression.is_empty() {
            self.expression = expression.to_string();
            self.entry_point = entry_point;
            if self.position.is_none() {
                self.position = Some(position);
            }
        }
        self
    }
}

fn position_suffix(position: &Option<usize>) -> String {
    match position {
        Some(pos) => format!(" at position {}", pos),
        None => String::new(),
    }
}

/// Failure while loading a [`crate::config::FactoryConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid value for {variable}: {value}")]
    Env { variable: &'static str, value: String },
}
