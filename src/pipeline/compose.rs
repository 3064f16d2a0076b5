//! Message composition for both delivery channels.
//!
//! Notifications: one message per event and eligible subscriber, dated by the event.
//! Newsletters: one digest per eligible subscriber, dated by its latest event.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Channel, Recipient, Watermark};
use crate::pipeline::eligibility::{UserSettingsCache, screen};
use crate::pipeline::resolve::{ResolvedBatch, ResolvedEvent};
use crate::services::{Digest, MailMessage, RenderContext, RenderedMail, Renderer, UserDirectory};

/// A rendered message waiting for the dedup guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub recipient_id: String,
    /// `created` of the latest event the message covers
    pub event_date: DateTime<Utc>,
    pub mail: MailMessage,
}

impl OutgoingMessage {
    fn new(
        recipient: &Recipient,
        address: &str,
        event_date: DateTime<Utc>,
        rendered: RenderedMail,
    ) -> Self {
        Self {
            recipient_id: recipient.id.clone(),
            event_date,
            mail: MailMessage {
                recipients: vec![address.to_string()],
                subject: rendered.subject,
                text: rendered.text,
                html: rendered.html,
            },
        }
    }
}

/// Shared inputs of composition.
pub struct Composer<'a> {
    pub context: &'a RenderContext,
    pub renderer: &'a dyn Renderer,
    pub directory: &'a dyn UserDirectory,
    /// Deliveries already made on the channel
    pub delivered: &'a Watermark,
}

impl Composer<'_> {
    pub async fn compose(
        &self,
        channel: Channel,
        batch: &ResolvedBatch,
        settings: &mut UserSettingsCache,
    ) -> Result<Vec<OutgoingMessage>> {
        match channel {
            Channel::Notifications => self.notifications(batch, settings).await,
            Channel::Newsletters => self.newsletters(batch, settings).await,
        }
    }

    /// Locale of an eligible recipient, from the settings cached by `screen`.
    async fn locale(
        &self,
        recipient: &Recipient,
        settings: &mut UserSettingsCache,
    ) -> Result<Option<String>> {
        Ok(settings
            .get(self.directory, &recipient.username)
            .await?
            .locale)
    }

    async fn notifications(
        &self,
        batch: &ResolvedBatch,
        settings: &mut UserSettingsCache,
    ) -> Result<Vec<OutgoingMessage>> {
        let mut messages = Vec::new();

        for event in &batch.events {
            log::debug!(
                "{}: {} subscriber(s)",
                event.event,
                event.recipients().len()
            );
            for recipient_id in event.recipients() {
                let recipient = batch.users.get(recipient_id);
                let verdict = screen(
                    Channel::Notifications,
                    recipient,
                    event.author_id(),
                    settings,
                    self.directory,
                )
                .await?;
                if let Some(reason) = verdict {
                    log::debug!("Skipping {} for {}: {}", event.event, recipient_id, reason);
                    continue;
                }
                let Some((recipient, address)) =
                    recipient.and_then(|r| r.address().map(|a| (r, a)))
                else {
                    continue;
                };

                let locale = self.locale(recipient, settings).await?;
                let rendered = self.renderer.render_notification(
                    self.context,
                    event,
                    recipient,
                    locale.as_deref(),
                )?;
                messages.push(OutgoingMessage::new(
                    recipient,
                    address,
                    event.created(),
                    rendered,
                ));
            }
        }

        Ok(messages)
    }

    async fn newsletters(
        &self,
        batch: &ResolvedBatch,
        settings: &mut UserSettingsCache,
    ) -> Result<Vec<OutgoingMessage>> {
        let mut by_recipient: BTreeMap<&str, Vec<&ResolvedEvent>> = BTreeMap::new();
        for event in &batch.events {
            for recipient_id in event.recipients() {
                by_recipient.entry(recipient_id).or_default().push(event);
            }
        }

        let mut messages = Vec::new();
        for (recipient_id, events) in by_recipient {
            let recipient = batch.users.get(recipient_id);
            let verdict = screen(
                Channel::Newsletters,
                recipient,
                None,
                settings,
                self.directory,
            )
            .await?;
            if let Some(reason) = verdict {
                log::debug!("No newsletter for {}: {}", recipient_id, reason);
                continue;
            }
            let Some((recipient, address)) = recipient.and_then(|r| r.address().map(|a| (r, a)))
            else {
                continue;
            };

            // Own activity and events already delivered are left out of the digest
            let events: Vec<ResolvedEvent> = events
                .into_iter()
                .filter(|e| e.author_id() != Some(recipient_id))
                .filter(|e| !self.delivered.covers(recipient_id, e.created()))
                .cloned()
                .collect();
            let Some(event_date) = events.iter().map(|e| e.created()).max() else {
                log::debug!("No newsletter for {}: nothing new", recipient_id);
                continue;
            };

            let digest = Digest::build(&events);
            let locale = self.locale(recipient, settings).await?;
            let rendered = self.renderer.render_newsletter(
                self.context,
                &digest,
                recipient,
                locale.as_deref(),
            )?;
            messages.push(OutgoingMessage::new(recipient, address, event_date, rendered));
        }

        if messages.is_empty() {
            log::debug!("No newsletters to send");
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, Event, EventKind, UserSettings};
    use crate::services::TextRenderer;
    use crate::testing::{FakeDirectory, at, recipient, shared_interpretation, user_ref};

    fn batch(events: Vec<ResolvedEvent>, users: &[Recipient]) -> ResolvedBatch {
        ResolvedBatch {
            events,
            users: users.iter().map(|u| (u.id.clone(), u.clone())).collect(),
            missing: 0,
        }
    }

    fn insert(id: &str, author: &str, subscribers: &[&str], day: u32) -> ResolvedEvent {
        ResolvedEvent {
            event: Event::interpretation(EventKind::Insert, id, at(day, 0)),
            interpretation: shared_interpretation(id, author, subscribers),
            comment: None,
        }
    }

    fn comment(id: &str, author: &str, subscribers: &[&str], day: u32) -> ResolvedEvent {
        let mut interpretation = shared_interpretation(id, "owner", subscribers);
        let mut comment = Comment::new(format!("{id}-c"), "reply", at(day, 0));
        comment.user = Some(user_ref(author));
        interpretation.comments.push(comment.clone());
        ResolvedEvent {
            event: Event::comment(EventKind::Insert, id, &comment.id, at(day, 0)),
            interpretation,
            comment: Some(comment),
        }
    }

    async fn compose(
        channel: Channel,
        batch: &ResolvedBatch,
        directory: &FakeDirectory,
    ) -> Vec<OutgoingMessage> {
        compose_after(channel, batch, directory, &Watermark::default()).await
    }

    async fn compose_after(
        channel: Channel,
        batch: &ResolvedBatch,
        directory: &FakeDirectory,
        delivered: &Watermark,
    ) -> Vec<OutgoingMessage> {
        let context = RenderContext::new("https://dhis.example.org");
        let renderer = TextRenderer::default();
        let composer = Composer {
            context: &context,
            renderer: &renderer,
            directory,
            delivered,
        };
        composer
            .compose(channel, batch, &mut UserSettingsCache::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_notification_per_event_and_recipient() {
        let users = [
            recipient("u1", "ana@example.org"),
            recipient("u2", "bea@example.org"),
        ];
        let batch = batch(
            vec![
                insert("I1", "u3", &["u1", "u2"], 2),
                comment("I2", "u1", &["u1", "u2"], 3),
            ],
            &users,
        );

        let messages = compose(Channel::Notifications, &batch, &FakeDirectory::default()).await;
        let summary: Vec<_> = messages
            .iter()
            .map(|m| (m.recipient_id.as_str(), m.event_date))
            .collect();
        // u1 wrote the comment and gets no message about it
        assert_eq!(summary, vec![("u1", at(2, 0)), ("u2", at(2, 0)), ("u2", at(3, 0))]);
        assert_eq!(messages[0].mail.recipients, vec!["ana@example.org"]);
    }

    #[tokio::test]
    async fn test_notifications_skip_ineligible() {
        let mut opted_out = recipient("u2", "bea@example.org");
        opted_out.no_mention_notifications = true;
        let users = [recipient("u1", "ana@example.org"), opted_out];
        let directory = FakeDirectory::default();
        directory.set_settings(
            "u1",
            UserSettings {
                locale: None,
                email_notifications: true,
            },
        );

        let batch = batch(vec![insert("I1", "u9", &["u1", "u2", "ghost"], 2)], &users);
        let messages = compose(Channel::Notifications, &batch, &directory).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_newsletter_per_recipient() {
        let users = [
            recipient("u1", "ana@example.org"),
            recipient("u2", "bea@example.org"),
        ];
        let batch = batch(
            vec![
                insert("I1", "u3", &["u1", "u2"], 2),
                comment("I2", "u3", &["u1"], 5),
                insert("I3", "u2", &["u2"], 6),
            ],
            &users,
        );

        let messages = compose(Channel::Newsletters, &batch, &FakeDirectory::default()).await;
        assert_eq!(messages.len(), 2);

        assert_eq!(messages[0].recipient_id, "u1");
        assert_eq!(messages[0].event_date, at(5, 0));
        assert!(messages[0].mail.html.is_some());

        // u2's own interpretation on day 6 is left out
        assert_eq!(messages[1].recipient_id, "u2");
        assert_eq!(messages[1].event_date, at(2, 0));
    }

    #[tokio::test]
    async fn test_newsletter_ignores_platform_email_setting() {
        let directory = FakeDirectory::default();
        directory.set_settings(
            "u1",
            UserSettings {
                locale: Some("fr".into()),
                email_notifications: true,
            },
        );
        let batch = batch(
            vec![insert("I1", "u3", &["u1"], 2)],
            &[recipient("u1", "ana@example.org")],
        );

        let messages = compose(Channel::Newsletters, &batch, &directory).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].mail.subject.starts_with("Résumé des interprétations"));
    }

    #[tokio::test]
    async fn test_newsletter_skipped_when_only_own_activity() {
        let batch = batch(
            vec![insert("I1", "u1", &["u1"], 2)],
            &[recipient("u1", "ana@example.org")],
        );
        let messages = compose(Channel::Newsletters, &batch, &FakeDirectory::default()).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_newsletter_leaves_out_delivered_events() {
        let users = [
            recipient("u1", "ana@example.org"),
            recipient("u2", "bea@example.org"),
        ];
        let batch = batch(
            vec![
                insert("I1", "u3", &["u1", "u2"], 10),
                insert("I2", "u3", &["u1"], 12),
            ],
            &users,
        );
        let mut delivered = Watermark::default();
        delivered.record_delivery("u1", at(10, 0));
        delivered.record_delivery("u2", at(10, 0));

        let messages =
            compose_after(Channel::Newsletters, &batch, &FakeDirectory::default(), &delivered)
                .await;

        // u2 has nothing new; u1 only hears about I2
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient_id, "u1");
        assert_eq!(messages[0].event_date, at(12, 0));
        let text = messages[0].mail.text.as_deref().unwrap();
        assert!(text.contains("Text of I2"));
        assert!(!text.contains("Text of I1"));
    }
}
