use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("osu! api request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport closed")]
    TransportClosed,

    #[error("user not found")]
    UnknownUser,

    #[error("no new results for lobby {0}")]
    ResultsUnavailable(i64),

    #[error("malformed payload")]
    MalformedPayload
}
