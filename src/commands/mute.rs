use super::{guild_id, page_bounds, reply};
use crate::duration::{display_time, parse_offset};
use crate::platform::Notice;
use crate::scheduler::MuteOutcome;
use crate::store::MuteRecord;
use crate::{Context, Error};
use poise::serenity_prelude::{self as serenity, Mentionable, UserId};

const MUTE_COLOUR: u32 = 0x95afc0;
const LIST_COLOUR: u32 = 0x58b19f;
const MAX_REASON_LEN: usize = 400;

/// Reply for a finished mute request, `None` when the mute was lifted instead
fn mute_notice(user_id: UserId, outcome: MuteOutcome, reason: &str) -> Option<Notice> {
    let (title, label, end) = match outcome {
        MuteOutcome::Muted { end } => ("🔇 Muted", "Duration", end),
        MuteOutcome::Extended { end } => ("🔇 Mute Time Changed", "Duration Changed To", end),
        MuteOutcome::Lifted => return None,
    };
    Some(
        Notice::new(title, MUTE_COLOUR)
            .field("Member", user_id.mention().to_string(), true)
            .field(label, display_time(end), false)
            .field("Reason", reason, false),
    )
}

fn mute_list_notice(mutes: &[MuteRecord], page: usize) -> Option<Notice> {
    let (start, end, total) = page_bounds(mutes.len(), page)?;
    let mut notice = Notice::new("Timed Mute List", LIST_COLOUR).footer(format!("Page {page} / {total}"));
    for mute in &mutes[start..end] {
        notice = notice.field(
            format!("User ID: {}", mute.user_id),
            format!(
                "<@{}> until {}\n{}",
                mute.user_id,
                display_time(mute.end),
                mute.reason
            ),
            false,
        );
    }
    Some(notice)
}

/// Mute a member for a duration such as `1h30m`, or shift a running mute with `-10m`
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Duration, e.g. 30m, 1d12h or -10m"] duration: String,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let reason = reason.unwrap_or_else(|| "Not specified".to_string());

    if user.id == ctx.author().id || user.id == ctx.framework().bot_id {
        ctx.say("😅").await?;
        return Ok(());
    }
    if reason.chars().count() > MAX_REASON_LEN {
        ctx.say("Too long of a mute reason... Try keep it under 400 letters...")
            .await?;
        return Ok(());
    }

    let offset = parse_offset(&duration)?;
    let mutes = &ctx.data().mutes;
    let outcome = mutes.mute(guild_id, user.id, offset, &reason).await?;
    if !user.bot {
        let guild_name = ctx.guild().map(|guild| guild.name.clone()).unwrap_or_default();
        mutes.tell(user.id, &guild_name, outcome, &reason).await;
    }

    match mute_notice(user.id, outcome, &reason) {
        Some(notice) => reply(ctx, &notice).await,
        None => {
            ctx.say("User un-muted after time re-calculation").await?;
            Ok(())
        }
    }
}

/// Remove the mute role from a member and stop their mute timer
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "MANAGE_ROLES")]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let reason = reason.unwrap_or_else(|| "Not specified".to_string());
    let outcome = ctx.data().mutes.unmute(guild_id, user.id, &reason).await?;
    ctx.say(outcome.to_string()).await?;
    Ok(())
}

/// Show the mute role of this server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("mr"),
    subcommands("mute_role_set"),
    required_permissions = "MANAGE_ROLES"
)]
pub async fn mute_role(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let message = match ctx.data().mutes.role(guild_id) {
        Some(role_id) => format!("Current mute role is: {}", role_id.mention()),
        None => "Mute role not setup in the server. Set it with `mute_role set <role>`".to_string(),
    };
    ctx.say(message).await?;
    Ok(())
}

/// Set the mute role, moving muted members over to it
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "set",
    required_permissions = "MANAGE_ROLES"
)]
pub async fn mute_role_set(
    ctx: Context<'_>,
    #[description = "New mute role"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let previous = ctx.data().mutes.set_role(guild_id, role.id).await?;
    let message = match previous {
        Some(old) if old == role.id => format!("{} already is the mute role", role.id.mention()),
        Some(old) => format!(
            "Mute role changed from {} to {}",
            old.mention(),
            role.id.mention()
        ),
        None => format!("Mute role set to {}", role.id.mention()),
    };
    ctx.say(message).await?;
    Ok(())
}

/// List the timed mutes of this server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("ml"),
    required_permissions = "MANAGE_ROLES"
)]
pub async fn mute_list(
    ctx: Context<'_>,
    #[description = "Page number"] page: Option<u32>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let mutes = ctx.data().mutes.list(guild_id);
    if mutes.is_empty() {
        ctx.say("Mute list is empty").await?;
        return Ok(());
    }
    match mute_list_notice(&mutes, page.map_or(1, |page| page as usize)) {
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
        let cmd = mute();
        assert_eq!(cmd.name, "mute");
        assert!(cmd.guild_only);
        assert_eq!(cmd.required_permissions, serenity::Permissions::MANAGE_ROLES);

        let group = mute_role();
        assert_eq!(group.subcommands.len(), 1);
        assert_eq!(group.subcommands[0].name, "set");
        assert_eq!(group.aliases, vec!["mr".to_string()]);
    }

    #[test]
    fn test_mute_notice() {
        let end = Utc::now() + Duration::hours(1);
        let notice = mute_notice(UserId::new(7), MuteOutcome::Muted { end }, "spam").unwrap();
        assert_eq!(notice.title, "🔇 Muted");
        assert_eq!(notice.fields[0].value, "<@7>");
        assert_eq!(notice.fields[2].value, "spam");

        let notice = mute_notice(UserId::new(7), MuteOutcome::Extended { end }, "spam").unwrap();
        assert_eq!(notice.fields[1].name, "Duration Changed To");

        assert!(mute_notice(UserId::new(7), MuteOutcome::Lifted, "spam").is_none());
    }

    #[test]
    fn test_mute_list_pages() {
        let mutes: Vec<MuteRecord> = (0..12)
            .map(|user_id| MuteRecord {
                guild_id: 1,
                user_id,
                end: Utc::now(),
                reason: "flood".to_string(),
            })
            .collect();

        let first = mute_list_notice(&mutes, 1).unwrap();
        assert_eq!(first.fields.len(), 10);
        assert_eq!(first.footer.as_deref(), Some("Page 1 / 2"));
        assert_eq!(mute_list_notice(&mutes, 2).unwrap().fields.len(), 2);
        assert!(mute_list_notice(&mutes, 3).is_none());
    }
}
