pub mod antiraid;
pub mod commands;
pub mod config;
pub mod data;
pub mod duration;
pub mod handlers;
pub mod logging;
pub mod platform;
pub mod scheduler;
pub mod store;

pub const BOT_NAME: &str = "mangopi";
pub const COMMAND_TARGET: &str = "mangopi::command";
pub const ERROR_TARGET: &str = "mangopi::error";
pub const EVENT_TARGET: &str = "mangopi::handlers";
pub const CONSOLE_TARGET: &str = "mangopi";
pub const TIMER_TARGET: &str = "mangopi::timer";
pub const RAID_TARGET: &str = "mangopi::raid";

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub use config::BotConfig;
pub use data::{Data, DataInner};
