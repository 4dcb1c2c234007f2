use crate::store::StoreError;
use poise::serenity_prelude::UserId;
use thiserror::Error;

/// Errors raised by the anti-raid guard and its registry
#[derive(Debug, Error)]
pub enum RaidError {
    #[error("<@{0}> is already a marked raider")]
    AlreadyFlagged(UserId),

    #[error("Can not find <@{0}> within the raid cell")]
    NotFlagged(UserId),

    #[error("{name} must be at least 1, got {value}")]
    InvalidSetting { name: &'static str, value: u64 },

    #[error("This server has not set up an anti-raid system yet")]
    NotConfigured,

    #[error("This server already has an anti-raid system")]
    AlreadyConfigured,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RaidResult<T> = Result<T, RaidError>;
