use super::{guild_id, reply};
use crate::antiraid::{MassActionReport, RaidPhase, RaidStatus};
use crate::platform::Notice;
use crate::{Context, Error};
use poise::serenity_prelude::{self as serenity, Mentionable};

const HELP_COLOUR: u32 = 0xf368e0;
const STATUS_COLOUR: u32 = 0xe056fd;
const RELEASE_COLOUR: u32 = 0x4cd137;
const REMOVAL_COLOUR: u32 = 0xff4757;

const SUBCOMMANDS: [(&str, &str); 15] = [
    ("create <role>", "Create the anti-raid system with the given raider role"),
    ("clear [release]", "Turn off raid mode, optionally freeing every marked raider"),
    ("raid [indefinite]", "Turn on raid mode and move recent joins into the raid cell"),
    ("kick [stop]", "Kick everyone in the raid cell, optionally ending raid mode"),
    ("ban [stop]", "Ban everyone in the raid cell, by default also ending raid mode"),
    ("status [page]", "Show the raid cell and the watch list"),
    ("mark <member>", "Put a member into the raid cell"),
    ("unmark <member>", "Take a member out of the raid cell"),
    ("toggle", "Switch the anti-raid system on or off"),
    ("threshold <joins>", "Joins within the interval needed to trigger raid mode"),
    ("interval <seconds>", "How long a new member stays on the watch list"),
    ("timeout <seconds>", "Quiet time after which raid mode lifts itself"),
    ("role <role>", "Change the raider role"),
    ("notify [channel]", "Send raid alerts to a channel"),
    ("unnotify [channel]", "Stop sending raid alerts to a channel"),
];

fn help_notice(prefix: &str) -> Notice {
    SUBCOMMANDS.iter().fold(
        Notice::new("`Anti Raid` Commands", HELP_COLOUR),
        |notice, (usage, help)| notice.field(format!("{prefix}anti_raid {usage}"), *help, false),
    )
}

fn status_notice(status: &RaidStatus, page: usize) -> Notice {
    let banner = match status.phase {
        RaidPhase::Calm => "🧘 Clear",
        RaidPhase::Timed | RaidPhase::Indefinite => "⚠ RAID!",
    };
    let settings = &status.settings;
    let mut notice = Notice::new(format!("AntiRaid Status {banner}"), STATUS_COLOUR)
        .field("Mode", status.phase.to_string(), true)
        .field("Raider Role", settings.raider_role.mention().to_string(), true)
        .field(
            "Trigger",
            format!(
                "{} joins within {} seconds",
                settings.threshold,
                settings.hold_interval.as_secs()
            ),
            true,
        )
        .field(
            "Raid Timeout",
            format!("{} seconds", settings.quiet_timeout.as_secs()),
            true,
        );

    let index = page.saturating_sub(1);
    if let Some(cell) = status.flagged.get(index).filter(|cell| !cell.is_empty()) {
        notice = notice.field(format!("Raid Cell {page}"), cell.as_str(), false);
    }
    if let Some(cell) = status.holding.get(index).filter(|cell| !cell.is_empty()) {
        notice = notice.field(format!("Watch List {page}"), cell.as_str(), false);
    }
    notice
}

/// One notice per mention page, numbered from 1
fn page_notices(title: &str, colour: u32, pages: &[String]) -> Vec<Notice> {
    pages
        .iter()
        .enumerate()
        .map(|(index, page)| {
            Notice::new(format!("{title} {}", index + 1), colour).description(page.as_str())
        })
        .collect()
}

async fn reply_pages(ctx: Context<'_>, notices: &[Notice]) -> Result<(), Error> {
    if notices.is_empty() {
        ctx.say("The raid cell is empty").await?;
    }
    for notice in notices {
        reply(ctx, notice).await?;
    }
    Ok(())
}

async fn report_mass_action(
    ctx: Context<'_>,
    title: &str,
    report: &MassActionReport,
) -> Result<(), Error> {
    reply_pages(ctx, &page_notices(title, REMOVAL_COLOUR, &report.pages)).await?;
    if !report.skipped.is_empty() {
        let skipped: Vec<String> = report
            .skipped
            .iter()
            .map(|user_id| user_id.mention().to_string())
            .collect();
        ctx.say(format!("Could not act on: {}", skipped.join(", ")))
            .await?;
    }
    Ok(())
}

/// Anti-raid commands, lists the subcommands when called alone
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    aliases("ar"),
    subcommands(
        "anti_raid_create",
        "anti_raid_clear",
        "anti_raid_raid",
        "anti_raid_ban",
        "anti_raid_kick",
        "anti_raid_status",
        "anti_raid_mark",
        "anti_raid_unmark",
        "anti_raid_toggle",
        "anti_raid_threshold",
        "anti_raid_interval",
        "anti_raid_timeout",
        "anti_raid_role",
        "anti_raid_notify",
        "anti_raid_unnotify"
    ),
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid(ctx: Context<'_>) -> Result<(), Error> {
    reply(ctx, &help_notice(ctx.prefix())).await
}

/// Create the anti-raid system with the given raider role
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "create",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_create(
    ctx: Context<'_>,
    #[description = "Role given to suspected raiders"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    ctx.data().anti_raid.create(guild_id, role.id).await?;
    ctx.say(format!(
        "👍 Anti-raid created with raider role {}",
        role.id.mention()
    ))
    .await?;
    Ok(())
}

/// Turn off raid mode, optionally freeing every marked raider
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "clear",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_clear(
    ctx: Context<'_>,
    #[description = "Also release the raid cell (default no)"] release: Option<bool>,
) -> Result<(), Error> {
    let guard = ctx.data().anti_raid.guard(guild_id(ctx)?)?;
    let release = release.unwrap_or(false);
    let pages = guard.clear(release).await;
    if release {
        reply_pages(ctx, &page_notices("Free marked raiders", RELEASE_COLOUR, &pages)).await
    } else {
        ctx.say("✔ Raid mode off").await?;
        Ok(())
    }
}

/// Turn on raid mode and move recent joins into the raid cell
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "raid",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_raid(
    ctx: Context<'_>,
    #[description = "Stay on until cleared by hand (default yes)"] indefinite: Option<bool>,
) -> Result<(), Error> {
    let guard = ctx.data().anti_raid.guard(guild_id(ctx)?)?;
    let flagged = guard.trigger(indefinite.unwrap_or(true)).await;
    ctx.say(format!("🏃 Raid mode on, {flagged} member(s) moved to the raid cell"))
        .await?;
    Ok(())
}

/// Ban everyone in the raid cell
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "ban",
    required_permissions = "BAN_MEMBERS"
)]
pub async fn anti_raid_ban(
    ctx: Context<'_>,
    #[description = "Also end raid mode (default yes)"] stop: Option<bool>,
) -> Result<(), Error> {
    let guard = ctx.data().anti_raid.guard(guild_id(ctx)?)?;
    let report = guard.ban_all(stop.unwrap_or(true)).await;
    report_mass_action(ctx, "All Banned Raiders", &report).await
}

/// Kick everyone in the raid cell
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "kick",
    required_permissions = "KICK_MEMBERS"
)]
pub async fn anti_raid_kick(
    ctx: Context<'_>,
    #[description = "Also end raid mode (default no)"] stop: Option<bool>,
) -> Result<(), Error> {
    let guard = ctx.data().anti_raid.guard(guild_id(ctx)?)?;
    let report = guard.kick_all(stop.unwrap_or(false)).await;
    report_mass_action(ctx, "All Kicked Raiders", &report).await
}

/// Show the raid cell and the watch list
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "status",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_status(
    ctx: Context<'_>,
    #[description = "Page number"] page: Option<u32>,
) -> Result<(), Error> {
    let guard = ctx.data().anti_raid.guard(guild_id(ctx)?)?;
    let status = guard.status();
    if !status.settings.enabled {
        ctx.say("Anti Raid system is not online").await?;
        return Ok(());
    }
    reply(ctx, &status_notice(&status, page.map_or(1, |page| page as usize))).await
}

/// Put a member into the raid cell
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "mark",
    aliases("+"),
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_mark(
    ctx: Context<'_>,
    #[description = "Member to mark"] user: serenity::User,
) -> Result<(), Error> {
    let guard = ctx.data().anti_raid.guard(guild_id(ctx)?)?;
    guard.mark(user.id).await?;
    ctx.say(format!("👍 {} marked as raider", user.id.mention()))
        .await?;
    Ok(())
}

/// Take a member out of the raid cell
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "unmark",
    aliases("-"),
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_unmark(
    ctx: Context<'_>,
    #[description = "Member to unmark"] user: serenity::User,
) -> Result<(), Error> {
    let guard = ctx.data().anti_raid.guard(guild_id(ctx)?)?;
    guard.unmark(user.id).await?;
    ctx.say(format!("👍 {} released from the raid cell", user.id.mention()))
        .await?;
    Ok(())
}

/// Switch the anti-raid system on or off
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "toggle",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_toggle(ctx: Context<'_>) -> Result<(), Error> {
    let enabled = ctx.data().anti_raid.toggle(guild_id(ctx)?).await?;
    let message = if enabled {
        "Anti-Raid now enabled"
    } else {
        "Anti-Raid now disabled"
    };
    ctx.say(message).await?;
    Ok(())
}

/// Set how many joins within the interval trigger raid mode
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "threshold",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_threshold(
    ctx: Context<'_>,
    #[description = "Number of joins"] joins: u32,
) -> Result<(), Error> {
    ctx.data()
        .anti_raid
        .set_threshold(guild_id(ctx)?, joins as usize)
        .await?;
    ctx.say(format!("Raid mode now triggers at {joins} joins"))
        .await?;
    Ok(())
}

/// Set how long a new member stays on the watch list
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "interval",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_interval(
    ctx: Context<'_>,
    #[description = "Seconds"] seconds: u32,
) -> Result<(), Error> {
    ctx.data()
        .anti_raid
        .set_hold_interval(guild_id(ctx)?, u64::from(seconds))
        .await?;
    ctx.say(format!("Watch list interval set to {seconds} seconds"))
        .await?;
    Ok(())
}

/// Set the quiet time after which raid mode lifts itself
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "timeout",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_timeout(
    ctx: Context<'_>,
    #[description = "Seconds"] seconds: u32,
) -> Result<(), Error> {
    ctx.data()
        .anti_raid
        .set_quiet_timeout(guild_id(ctx)?, u64::from(seconds))
        .await?;
    ctx.say(format!("Raid timeout set to {seconds} seconds"))
        .await?;
    Ok(())
}

/// Change the raider role, moving marked raiders over
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "role",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_role(
    ctx: Context<'_>,
    #[description = "New raider role"] role: serenity::Role,
) -> Result<(), Error> {
    ctx.data()
        .anti_raid
        .set_raider_role(guild_id(ctx)?, role.id)
        .await?;
    ctx.say(format!("Raider role changed to {}", role.id.mention()))
        .await?;
    Ok(())
}

/// Send raid alerts to a channel (default this one)
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "notify",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_notify(
    ctx: Context<'_>,
    #[description = "Channel for raid alerts"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = channel.map_or_else(|| ctx.channel_id(), |channel| channel.id);
    let added = ctx
        .data()
        .anti_raid
        .notify(guild_id(ctx)?, channel_id)
        .await?;
    let message = if added {
        format!("Raid alerts will be sent to {}", channel_id.mention())
    } else {
        format!("{} already receives raid alerts", channel_id.mention())
    };
    ctx.say(message).await?;
    Ok(())
}

/// Stop sending raid alerts to a channel (default this one)
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    rename = "unnotify",
    required_permissions = "BAN_MEMBERS | KICK_MEMBERS"
)]
pub async fn anti_raid_unnotify(
    ctx: Context<'_>,
    #[description = "Channel to stop alerting"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let channel_id = channel.map_or_else(|| ctx.channel_id(), |channel| channel.id);
    let removed = ctx.data().anti_raid.unnotify(channel_id).await?;
    let message = if removed {
        format!("{} no longer receives raid alerts", channel_id.mention())
    } else {
        format!("{} was not receiving raid alerts", channel_id.mention())
    };
    ctx.say(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antiraid::RaidSettings;
    use poise::serenity_prelude::RoleId;
    use std::time::Duration;

    fn status(phase: RaidPhase, flagged: Vec<String>, holding: Vec<String>) -> RaidStatus {
        RaidStatus {
            phase,
            settings: RaidSettings {
                enabled: true,
                threshold: 3,
                hold_interval: Duration::from_secs(5),
                quiet_timeout: Duration::from_secs(60),
                raider_role: RoleId::new(50),
            },
            flagged,
            holding,
        }
    }

    #[test]
    fn test_group_definition() {
        let group = anti_raid();
        assert_eq!(group.name, "anti_raid");
        assert_eq!(group.aliases, vec!["ar".to_string()]);
        assert_eq!(group.subcommands.len(), SUBCOMMANDS.len());

        let names: Vec<&str> = group.subcommands.iter().map(|cmd| cmd.name.as_str()).collect();
        for (usage, _) in SUBCOMMANDS {
            let name = usage.split(' ').next().unwrap_or_default();
            assert!(names.contains(&name), "missing {name}");
        }
    }

    #[test]
    fn test_help_notice_uses_prefix() {
        let notice = help_notice("!");
        assert_eq!(notice.fields.len(), SUBCOMMANDS.len());
        assert_eq!(notice.fields[0].name, "!anti_raid create <role>");
    }

    #[test]
    fn test_status_notice() {
        let calm = status_notice(&status(RaidPhase::Calm, Vec::new(), Vec::new()), 1);
        assert_eq!(calm.title, "AntiRaid Status 🧘 Clear");
        assert_eq!(calm.fields.len(), 4);
        assert_eq!(calm.fields[1].value, "<@&50>");

        let raid = status(
            RaidPhase::Timed,
            vec!["1. \t<@1>\n".to_string(), "21. \t<@21>\n".to_string()],
            vec!["1. \t<@9>\n".to_string()],
        );
        let first = status_notice(&raid, 1);
        assert_eq!(first.title, "AntiRaid Status ⚠ RAID!");
        assert_eq!(first.fields[4].name, "Raid Cell 1");
        assert_eq!(first.fields[5].name, "Watch List 1");

        let second = status_notice(&raid, 2);
        assert_eq!(second.fields.len(), 5);
        assert_eq!(second.fields[4].value, "21. \t<@21>\n");
    }

    #[test]
    fn test_page_notices() {
        let pages = vec!["a".to_string(), "b".to_string()];
        let notices = page_notices("All Banned Raiders", REMOVAL_COLOUR, &pages);
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[1].title, "All Banned Raiders 2");
        assert_eq!(notices[1].description.as_deref(), Some("b"));
    }
}
