use thiserror::Error;

/// Every error the command layer can produce. Variants other than `Protocol`
/// and `Io` are rendered back to the client as a RESP simple error; `Protocol`
/// closes the connection instead, and `Io` only ever escapes as a task-local
/// `Result::Err` that ends a connection or aborts an RDB load.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("wrong number of arguments for '{0}' command")]
    WrongArgCount(&'static str),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("{0}")]
    InvalidStreamId(&'static str),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Can't execute '{0}': only (SUBSCRIBE | UNSUBSCRIBE | PSUBSCRIBE | PUNSUBSCRIBE | PING | QUIT | RESET) are allowed in this context")]
    SubscriberContext(String),

    #[error("EXEC without MULTI")]
    NotInMulti,

    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("MULTI calls can not be nested")]
    AlreadyInMulti,

    #[error("Unsupported KEYS pattern; only '*' is implemented")]
    UnsupportedPattern,

    #[error("unsupported CONFIG subcommand or parameter")]
    UnsupportedConfig,

    #[error("{0} is not allowed in transactions")]
    NotAllowedInTransaction(&'static str),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RedisError {
    /// True if this error should terminate the connection rather than being
    /// written back as a RESP simple error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RedisError::Protocol(_) | RedisError::Io(_))
    }

    /// Render the client-visible RESP simple-error message body (without the
    /// leading `-` and trailing CRLF, which the caller adds).
    pub fn to_resp_message(&self) -> String {
        match self {
            RedisError::WrongType => self.to_string(),
            other => format!("ERR {other}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, RedisError>;
