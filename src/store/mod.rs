//! Document-style persistence for bot records
//!
//! Every record kind lives in its own [`Collection`], persisted as one YAML
//! file under the data directory. Lookups go through a [`Filter`] that matches
//! on the handful of keys the bot actually queries by.

mod collection;
mod error;
mod records;

pub use collection::{Collection, Filter, Record};
pub use error::{StoreError, StoreResult};
pub use records::{
    MuteRecord, MuteRoleRecord, NoticeChannelRecord, RaidConfigRecord, ReminderRecord,
    TempBanRecord,
};
