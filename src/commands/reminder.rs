use super::reply;
use crate::duration::{apply_offset, display_time};
use crate::platform::Notice;
use crate::scheduler::MAX_REMINDERS_PER_USER;
use crate::store::ReminderRecord;
use crate::{Context, Error};
use chrono::Utc;

const LIST_COLOUR: u32 = 0x8c7ae6;
const MAX_DETAILS_LEN: usize = 500;

/// Why a reminder text is refused, if it is
fn check_details(details: &str) -> Option<&'static str> {
    if details.trim().is_empty() {
        Some("Please input remind detail.")
    } else if details.chars().count() > MAX_DETAILS_LEN {
        Some("Too long of a reminder... Try keep it under 500 words...")
    } else {
        None
    }
}

fn reminder_list_notice(reminders: &[ReminderRecord]) -> Notice {
    reminders
        .iter()
        .enumerate()
        .fold(Notice::new("Upcoming Reminders", LIST_COLOUR), |notice, (index, reminder)| {
            notice.field(
                format!("Reminder {} - ID: __{}__", index + 1, reminder.id),
                format!("{}\n**{}**", display_time(reminder.end), reminder.details),
                false,
            )
        })
}

/// Get a direct message after a duration such as `2h` (max 10 reminders)
#[poise::command(prefix_command, slash_command, aliases("remindme"))]
pub async fn remind_me(
    ctx: Context<'_>,
    #[description = "When to remind you, e.g. 30m or 1d2h"] duration: String,
    #[description = "What to remind you about"]
    #[rest]
    details: Option<String>,
) -> Result<(), Error> {
    let details = details.unwrap_or_default();
    if let Some(problem) = check_details(&details) {
        ctx.say(problem).await?;
        return Ok(());
    }

    let end = apply_offset(Utc::now(), &duration)?;
    let reminders = &ctx.data().reminders;
    let user_id = ctx.author().id;
    if reminders.count(user_id) >= MAX_REMINDERS_PER_USER {
        ctx.say("Max 10 reminder~").await?;
        return Ok(());
    }

    reminders.add(ctx.id(), user_id, end, &details).await?;
    ctx.say(format!("👌 I will remind you on {}", display_time(end)))
        .await?;
    Ok(())
}

/// List your upcoming reminders
#[poise::command(
    prefix_command,
    slash_command,
    aliases("reminder"),
    subcommands("reminders_remove")
)]
pub async fn reminders(ctx: Context<'_>) -> Result<(), Error> {
    let reminders = ctx.data().reminders.list(ctx.author().id);
    if reminders.is_empty() {
        ctx.say("No reminder in place!").await?;
        return Ok(());
    }
    reply(ctx, &reminder_list_notice(&reminders)).await
}

/// Remove one of your reminders by its ID
#[poise::command(prefix_command, slash_command, rename = "remove")]
pub async fn reminders_remove(
    ctx: Context<'_>,
    #[description = "Reminder ID"] reminder_id: String,
) -> Result<(), Error> {
    let Ok(id) = reminder_id.trim().parse::<u64>() else {
        ctx.say("Can not find the reminder").await?;
        return Ok(());
    };
    ctx.data().reminders.remove(ctx.author().id, id).await?;
    ctx.say("👌 Reminder removed").await?;
    Ok(())
}
