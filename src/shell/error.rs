use thiserror::Error;

/// Failures raised while normalising or splitting a line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("line does not fit in {max} bytes")]
    Overflow { max: usize },
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("too many tokens (max {0})")]
    TooManyTokens(usize),
    #[error("empty pattern")]
    EmptyPattern,
}

/// Anything that aborts the construction of a command line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("syntax error: expected a word after '{0}'")]
    MissingOperand(String),
    #[error("{path}: {source}")]
    Open { path: String, source: nix::Error },
    #[error("pipe: {0}")]
    Pipe(nix::Error),
    #[error("too many commands (max {0})")]
    TooManyCommands(usize),
    #[error("too many arguments (max {0})")]
    TooManyArguments(usize),
    #[error("too many open descriptors (max {0})")]
    TooManyDescriptors(usize),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("fork: {0}")]
    Fork(nix::Error),
    #[error("waitpid: {0}")]
    Wait(nix::Error),
    #[error("argument contains a NUL byte: {0:?}")]
    NulByte(String),
}

#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("{0}: not a builtin")]
    Unknown(String),
    #[error("{0}")]
    Usage(String),
    #[error("{0}: {1}")]
    Io(String, std::io::Error),
}
