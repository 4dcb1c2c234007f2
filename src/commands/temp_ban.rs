use super::{guild_id, page_bounds, reply};
use crate::duration::{display_time, parse_offset};
use crate::platform::Notice;
use crate::scheduler::TempBanOutcome;
use crate::store::TempBanRecord;
use crate::{Context, Error};
use poise::serenity_prelude::{self as serenity, Mentionable, UserId};

const NEW_COLOUR: u32 = 0xe74c3c;
const UPDATED_COLOUR: u32 = 0xff9f43;
const LIST_COLOUR: u32 = 0xeb4d4b;
const MAX_REASON_LEN: usize = 1000;

fn temp_ban_notice(user_id: UserId, outcome: TempBanOutcome, reason: &str) -> Option<Notice> {
    let (title, colour, end) = match outcome {
        TempBanOutcome::Banned { end } => ("New Temporary Ban Timer", NEW_COLOUR, end),
        TempBanOutcome::Extended { end } => ("Updated Temporary Ban Timer", UPDATED_COLOUR, end),
        TempBanOutcome::Lifted => return None,
    };
    Some(
        Notice::new(title, colour)
            .field("User", user_id.mention().to_string(), true)
            .field("Until", display_time(end), true)
            .field("Reason", reason, false)
            .timestamp(end),
    )
}

fn temp_ban_list_notice(bans: &[TempBanRecord], page: usize) -> Option<Notice> {
    let (start, end, total) = page_bounds(bans.len(), page)?;
    let mut notice =
        Notice::new("Temporary Ban List", LIST_COLOUR).footer(format!("Page {page} / {total}"));
    for ban in &bans[start..end] {
        notice = notice.field(
            format!("User ID: {}", ban.user_id),
            format!("<@{}> until {}", ban.user_id, display_time(ban.end)),
            false,
        );
    }
    Some(notice)
}

/// Ban a user for a duration such as `7d`, or shift a running ban with `-1d`
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("tban"),
    required_permissions = "BAN_MEMBERS"
)]
pub async fn temp_ban(
    ctx: Context<'_>,
    #[description = "User to ban"] user: serenity::User,
    #[description = "Duration, e.g. 3d, 1w or -12h"] duration: String,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let reason = reason.unwrap_or_else(|| "No reason".to_string());
    if reason.chars().count() > MAX_REASON_LEN {
        ctx.say("Too long of a ban reason... Try keep it under 1000 letters...")
            .await?;
        return Ok(());
    }

    let offset = parse_offset(&duration)?;
    let outcome = ctx
        .data()
        .temp_bans
        .temp_ban(ctx.id(), guild_id, user.id, offset, &reason)
        .await?;

    match temp_ban_notice(user.id, outcome, &reason) {
        Some(notice) => reply(ctx, &notice).await,
        None => {
            ctx.say("User unbanned after time re-calculation").await?;
            Ok(())
        }
    }
}

/// Lift a ban, dropping its timer if it was temporary
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let reason = reason.unwrap_or_else(|| "Not specified".to_string());
    let had_timer = ctx.data().temp_bans.unban(guild_id, user.id, &reason).await?;
    let message = if had_timer {
        format!("Unbanned {} and stopped their ban timer", user.id.mention())
    } else {
        format!("Unbanned {}", user.id.mention())
    };
    ctx.say(message).await?;
    Ok(())
}

/// List the temporary bans of this server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("tbl"),
    required_permissions = "BAN_MEMBERS"
)]
pub async fn temp_ban_list(
    ctx: Context<'_>,
    #[description = "Page number"] page: Option<u32>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let bans = ctx.data().temp_bans.list(guild_id);
    if bans.is_empty() {
        ctx.say("No temporary bans in place").await?;
        return Ok(());
    }
    match temp_ban_list_notice(&bans, page.map_or(1, |page| page as usize)) {
        Some(notice) => reply(ctx, &notice).await,
        None => {
            ctx.say("Page number out of range").await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_command_definitions() {
        let cmd = temp_ban();
        assert_eq!(cmd.name, "temp_ban");
        assert_eq!(cmd.aliases, vec!["tban".to_string()]);
        assert_eq!(cmd.required_permissions, serenity::Permissions::BAN_MEMBERS);
        assert!(unban().guild_only);
    }

    #[test]
    fn test_temp_ban_notice() {
        let end = Utc::now() + Duration::days(3);
        let banned = temp_ban_notice(UserId::new(5), TempBanOutcome::Banned { end }, "raid").unwrap();
        assert_eq!(banned.title, "New Temporary Ban Timer");
        assert_eq!(banned.colour, NEW_COLOUR);
        assert_eq!(banned.timestamp, Some(end));

        let extended =
            temp_ban_notice(UserId::new(5), TempBanOutcome::Extended { end }, "raid").unwrap();
        assert_eq!(extended.colour, UPDATED_COLOUR);
        assert!(temp_ban_notice(UserId::new(5), TempBanOutcome::Lifted, "raid").is_none());
    }

    #[test]
    fn test_temp_ban_list_notice() {
        let bans = vec![TempBanRecord {
            id: 1,
            guild_id: 1,
            user_id: 77,
            end: Utc::now(),
            reason: "spam".to_string(),
        }];
        let notice = temp_ban_list_notice(&bans, 1).unwrap();
        assert_eq!(notice.fields.len(), 1);
        assert!(notice.fields[0].value.starts_with("<@77> until "));
        assert!(temp_ban_list_notice(&bans, 2).is_none());
    }
}
