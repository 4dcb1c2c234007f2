//! Chat commands
//!
//! Every command resolves its guild, talks to one service from [`Data`] and
//! answers with an embed built from a [`Notice`].

pub mod anti_raid;
pub mod general;
pub mod mute;
pub mod reminder;
pub mod temp_ban;

use crate::platform::Notice;
use crate::{Context, Data, Error};
use poise::CreateReply;
use poise::serenity_prelude::{CreateEmbed, GuildId};

/// Entries shown on one page of a list command
pub const PAGE_SIZE: usize = 10;

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        general::ping(),
        mute::mute(),
        mute::unmute(),
        mute::mute_role(),
        mute::mute_list(),
        temp_ban::temp_ban(),
        temp_ban::unban(),
        temp_ban::temp_ban_list(),
        reminder::remind_me(),
        reminder::reminders(),
        anti_raid::anti_raid(),
    ]
}

/// Guild the command runs in
fn guild_id(ctx: Context<'_>) -> Result<GuildId, Error> {
    ctx.guild_id().ok_or_else(|| "Must be used in a server".into())
}

async fn reply(ctx: Context<'_>, notice: &Notice) -> Result<(), Error> {
    ctx.send(CreateReply::default().embed(CreateEmbed::from(notice)))
        .await?;
    Ok(())
}

/// Slice bounds and page count for 1-based `page`, `None` if it is out of range
fn page_bounds(len: usize, page: usize) -> Option<(usize, usize, usize)> {
    let total = len.div_ceil(PAGE_SIZE).max(1);
    if page == 0 || page > total {
        return None;
    }
    let start = (page - 1) * PAGE_SIZE;
    Some((start, len.min(start + PAGE_SIZE), total))
}
