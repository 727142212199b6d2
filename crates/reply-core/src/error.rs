use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("config unavailable: {0}")]
    ConfigUnavailable(String),
    #[error("config save failed: {0}")]
    ConfigSaveFailed(String),
    #[error("admin authentication failed")]
    AdminAuthFailed,
    #[error("malformed inbound update: {0}")]
    MalformedInboundUpdate(String),
    #[error("media send failed: {0}")]
    MediaSendFailed(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}
