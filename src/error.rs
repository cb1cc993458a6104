use thiserror::Error;

/// Errors raised by the raffle roster and its persistence layer.
#[derive(Debug, Error)]
pub enum RaffleError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("The name '{0}' is already registered by another participant")]
    DuplicateName(String),
    #[error("User {0} is already registered")]
    AlreadyRegistered(u64),
    #[error("User {0} is blacklisted and cannot register")]
    Blacklisted(u64),
    #[error("User {0} is not registered")]
    NotRegistered(u64),
    #[error("Registrations are closed")]
    RegistrationsClosed,
    #[error("No hashtag has been configured yet, contact an administrator")]
    HashtagNotConfigured,
    #[error("Wrong hashtag, the correct one is '{0}'")]
    WrongHashtag(String),
    #[error("The hashtag is locked and cannot be changed")]
    HashtagLocked,
    #[error("No registration channel has been configured, contact an administrator")]
    ChannelNotConfigured,
    #[error("Quantity must be greater than zero")]
    InvalidQuantity,
    #[error("Failed to persist document: {0}")]
    Persistence(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RaffleError {
    /// Whether this error was caused by the caller's input rather than the bot itself.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            RaffleError::Persistence(_)
                | RaffleError::Io(_)
                | RaffleError::Json(_)
                | RaffleError::Database(_)
        )
    }
}
