#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("connection error: {0}")]
    Connection(#[from] ws_listener::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("webhook error: {0}")]
    Webhook(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ListenerResult<T> = Result<T, ListenerError>;
