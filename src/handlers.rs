use crate::antiraid::JoinedMember;
use crate::platform::ChannelKind;
use crate::{Data, EVENT_TARGET};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, ChannelType, Context, EventHandler, GuildChannel, GuildId,
    GuildMemberUpdateEvent, Member, Ready, Role, RoleId, User,
};
use tracing::{debug, info, warn};

pub struct Handler;

/// Shared data, once the framework setup has stored it
async fn shared_data(ctx: &Context) -> Option<Data> {
    let data = ctx.data.read().await.get::<Data>().cloned();
    if data.is_none() {
        debug!(target: EVENT_TARGET, "Event received before setup finished");
    }
    data
}

/// Join time of a member, falling back to now when the gateway omits it
fn joined_at(member: &Member) -> DateTime<Utc> {
    member
        .joined_at
        .and_then(|timestamp| DateTime::from_timestamp(timestamp.unix_timestamp(), 0))
        .unwrap_or_else(Utc::now)
}

/// Text-like channels lose messaging, everything else loses voice
fn channel_kind(kind: ChannelType) -> ChannelKind {
    match kind {
        ChannelType::Text | ChannelType::News | ChannelType::Forum => ChannelKind::Text,
        _ => ChannelKind::Voice,
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        let guild_id = new_member.guild_id;
        let user_id = new_member.user.id;

        let member = JoinedMember::new(user_id, joined_at(&new_member));
        if let Some(outcome) = data.anti_raid.on_member_join(guild_id, member).await {
            debug!(target: EVENT_TARGET, %guild_id, %user_id, ?outcome, "Join checked by anti-raid");
        }
        data.mutes.on_member_join(guild_id, user_id).await;
    }

    async fn guild_ban_addition(&self, ctx: Context, guild_id: GuildId, banned_user: User) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        if data.mutes.cancel(guild_id, banned_user.id).await {
            info!(target: EVENT_TARGET, %guild_id, user_id = %banned_user.id, "Muted member banned, mute timer dropped");
        }
    }

    async fn guild_ban_removal(&self, ctx: Context, guild_id: GuildId, unbanned_user: User) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        data.temp_bans.on_unbanned(guild_id, unbanned_user.id).await;
    }

    async fn guild_member_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        data.mutes
            .on_member_roles_changed(event.guild_id, event.user.id, &event.roles)
            .await;
    }

    async fn channel_create(&self, ctx: Context, channel: GuildChannel) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        data.mutes
            .on_channel_created(channel.guild_id, channel.id, channel_kind(channel.kind))
            .await;
    }

    async fn guild_role_delete(
        &self,
        ctx: Context,
        guild_id: GuildId,
        removed_role_id: RoleId,
        _removed_role_data_if_available: Option<Role>,
    ) {
        let Some(data) = shared_data(&ctx).await else {
            return;
        };
        data.mutes.on_role_deleted(guild_id, removed_role_id).await;
    }
}
