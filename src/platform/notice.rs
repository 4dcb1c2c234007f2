//! Platform-neutral embed description

use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;

/// A single embed field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Content of an embed sent to a channel or a user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notice {
    pub title: String,
    pub description: Option<String>,
    pub colour: u32,
    pub fields: Vec<NoticeField>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Notice {
    pub fn new(title: impl Into<String>, colour: u32) -> Self {
        Self {
            title: title.into(),
            colour,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(NoticeField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    #[must_use]
    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl From<&Notice> for serenity::CreateEmbed {
    fn from(notice: &Notice) -> Self {
        let mut embed = Self::new().title(&notice.title).colour(notice.colour);
        if let Some(description) = &notice.description {
            embed = embed.description(description);
        }
        for field in &notice.fields {
            embed = embed.field(&field.name, &field.value, field.inline);
        }
        if let Some(footer) = &notice.footer {
            embed = embed.footer(serenity::CreateEmbedFooter::new(footer));
        }
        if let Some(timestamp) = notice.timestamp {
            embed = embed.timestamp(serenity::Timestamp::from(timestamp));
        }
        embed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let notice = Notice::new("Reminder", 0x00ff_fa65)
            .description("water the plants")
            .field("Mention", "<@1>", true)
            .footer("late reminder due to downtime");

        assert_eq!(notice.title, "Reminder");
        assert_eq!(notice.description.as_deref(), Some("water the plants"));
        assert_eq!(notice.fields.len(), 1);
        assert!(notice.fields[0].inline);
        assert_eq!(
            notice.footer.as_deref(),
            Some("late reminder due to downtime")
        );
        assert!(notice.timestamp.is_none());
    }
}
