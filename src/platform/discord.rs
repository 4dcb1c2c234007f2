//! [`Platform`] implementation backed by serenity's HTTP client and cache

use super::{ActionOutcome, ChannelKind, Notice, Platform, Presence};
use poise::serenity_prelude::{
    self as serenity, Cache, ChannelId, CreateMessage, GuildId, Http, PermissionOverwrite,
    PermissionOverwriteType, Permissions, RoleId, UserId,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest page the member listing endpoint returns
const MEMBER_PAGE_SIZE: u64 = 1000;

/// Discord access through serenity
#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl SerenityPlatform {
    #[must_use]
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }
}

/// Map a serenity error onto the narrow outcome type
fn classify(error: &serenity::Error) -> ActionOutcome {
    if let serenity::Error::Http(http_error) = error {
        match http_error.status_code().map(|status| status.as_u16()) {
            Some(403) => return ActionOutcome::PermissionDenied,
            Some(404) => return ActionOutcome::TargetUnreachable,
            _ => {}
        }
    }
    ActionOutcome::Failed(error.to_string())
}

fn outcome<T>(action: &str, result: serenity::Result<T>) -> ActionOutcome {
    match result {
        Ok(_) => ActionOutcome::Success,
        Err(e) => {
            let outcome = classify(&e);
            debug!(action, error = %e, outcome = %outcome, "Platform action did not succeed");
            outcome
        }
    }
}

/// Presence after a failed lookup, only a 404 means the target is gone
fn lookup_failed(lookup: &str, error: &serenity::Error) -> Presence {
    match classify(error) {
        ActionOutcome::TargetUnreachable => Presence::Gone,
        outcome => {
            warn!(lookup, error = %error, "Platform lookup failed");
            Presence::Unknown(outcome.to_string())
        }
    }
}

fn presence(found: bool) -> Presence {
    if found {
        Presence::Present
    } else {
        Presence::Gone
    }
}

/// Cursor for the next member page, `None` once a short page ends the listing
fn next_page_after(page_len: usize, last: Option<UserId>) -> Option<u64> {
    last.filter(|_| page_len as u64 >= MEMBER_PAGE_SIZE)
        .map(UserId::get)
}

fn denied_permissions(kind: ChannelKind) -> Permissions {
    match kind {
        ChannelKind::Text => Permissions::SEND_MESSAGES | Permissions::ADD_REACTIONS,
        ChannelKind::Voice => {
            Permissions::SPEAK | Permissions::CONNECT | Permissions::USE_VAD
        }
    }
}

impl SerenityPlatform {
    /// Role holders from the member listing, page by page
    async fn fetch_members_with_role(&self, guild_id: GuildId, role_id: RoleId) -> Vec<UserId> {
        let mut holders = Vec::new();
        let mut after = None;
        loop {
            let page = match self
                .http
                .get_guild_members(guild_id, Some(MEMBER_PAGE_SIZE), after)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(%guild_id, error = %e, "Failed to list guild members");
                    break;
                }
            };
            holders.extend(
                page.iter()
                    .filter(|member| member.roles.contains(&role_id))
                    .map(|member| member.user.id),
            );
            let last = page.last().map(|member| member.user.id);
            match next_page_after(page.len(), last) {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }
        holders
    }
}

#[async_trait::async_trait]
impl Platform for SerenityPlatform {
    async fn guild_presence(&self, guild_id: GuildId) -> Presence {
        let cached = self.cache.guild(guild_id).is_some();
        if cached {
            return Presence::Present;
        }
        match self.http.get_guild(guild_id).await {
            Ok(_) => Presence::Present,
            Err(e) => lookup_failed("guild", &e),
        }
    }

    async fn role_presence(&self, guild_id: GuildId, role_id: RoleId) -> Presence {
        let cached = self
            .cache
            .guild(guild_id)
            .map(|guild| guild.roles.contains_key(&role_id));
        if let Some(found) = cached {
            return presence(found);
        }
        match self.http.get_guild(guild_id).await {
            Ok(guild) => presence(guild.roles.contains_key(&role_id)),
            Err(e) => lookup_failed("role", &e),
        }
    }

    async fn member_has_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Option<bool> {
        self.http
            .get_member(guild_id, user_id)
            .await
            .ok()
            .map(|member| member.roles.contains(&role_id))
    }

    /// Read from the cache once every member of the guild is in it, otherwise
    /// from the member listing (the cache is empty right after connecting)
    async fn members_with_role(&self, guild_id: GuildId, role_id: RoleId) -> Vec<UserId> {
        let cached: Option<Vec<UserId>> = self
            .cache
            .guild(guild_id)
            .filter(|guild| guild.members.len() as u64 >= guild.member_count)
            .map(|guild| {
                guild
                    .members
                    .values()
                    .filter(|member| member.roles.contains(&role_id))
                    .map(|member| member.user.id)
                    .collect()
            });
        match cached {
            Some(holders) => holders,
            None => self.fetch_members_with_role(guild_id, role_id).await,
        }
    }

    async fn user_presence(&self, user_id: UserId) -> Presence {
        let cached = self.cache.user(user_id).is_some();
        if cached {
            return Presence::Present;
        }
        match self.http.get_user(user_id).await {
            Ok(_) => Presence::Present,
            Err(e) => lookup_failed("user", &e),
        }
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ActionOutcome {
        outcome(
            "add_role",
            self.http
                .add_member_role(guild_id, user_id, role_id, Some(reason))
                .await,
        )
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ActionOutcome {
        outcome(
            "remove_role",
            self.http
                .remove_member_role(guild_id, user_id, role_id, Some(reason))
                .await,
        )
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionOutcome {
        outcome(
            "ban",
            self.http.ban_user(guild_id, user_id, 0, Some(reason)).await,
        )
    }

    async fn unban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionOutcome {
        outcome(
            "unban",
            self.http.remove_ban(guild_id, user_id, Some(reason)).await,
        )
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionOutcome {
        outcome(
            "kick",
            self.http.kick_member(guild_id, user_id, Some(reason)).await,
        )
    }

    async fn direct_message(&self, user_id: UserId, notice: &Notice) -> ActionOutcome {
        let message = CreateMessage::new().embed(notice.into());
        outcome(
            "direct_message",
            user_id.direct_message(&*self.http, message).await,
        )
    }

    async fn send_notice(&self, channel_id: ChannelId, notice: &Notice) -> ActionOutcome {
        let message = CreateMessage::new().embed(notice.into());
        outcome(
            "send_notice",
            channel_id.send_message(&*self.http, message).await,
        )
    }

    async fn deny_in_channel(
        &self,
        channel_id: ChannelId,
        role_id: RoleId,
        kind: ChannelKind,
    ) -> ActionOutcome {
        let overwrite = PermissionOverwrite {
            allow: Permissions::empty(),
            deny: denied_permissions(kind),
            kind: PermissionOverwriteType::Role(role_id),
        };
        outcome(
            "deny_in_channel",
            channel_id.create_permission(&*self.http, overwrite).await,
        )
    }
}
