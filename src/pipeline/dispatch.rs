// src/pipeline/dispatch.rs

//! Message delivery for the notifications and newsletters streams.
//!
//! A run reads the events of its window, resolves and composes messages,
//! then sends those not yet covered by the recipient's watermark. Send
//! failures are counted, never raised.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};

use crate::error::Result;
use crate::models::{Channel, Event, Stream, Watermark};
use crate::pipeline::compose::{Composer, OutgoingMessage};
use crate::pipeline::eligibility::UserSettingsCache;
use crate::pipeline::resolve::resolve_events;
use crate::pipeline::window::DispatchWindow;
use crate::services::{MailTransport, RecordStore, RenderContext, Renderer, UserDirectory};
use crate::storage::{Storage, sort_by_created};
use crate::utils::{Clock, SystemClock};

/// Outcome of a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub stream: Stream,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Events read from the window
    pub events: usize,
    /// Messages composed
    pub messages: usize,
    pub sent: usize,
    /// Messages skipped because the recipient already got them
    pub already_notified: usize,
    pub failed: usize,
    pub success: bool,
}

#[derive(Debug)]
enum Delivery {
    Sent,
    AlreadyNotified,
    Failed,
}

/// Sends messages for one channel and keeps its watermark.
pub struct Dispatcher<'a> {
    storage: &'a dyn Storage,
    records: &'a dyn RecordStore,
    directory: &'a dyn UserDirectory,
    mailer: &'a dyn MailTransport,
    renderer: &'a dyn Renderer,
    clock: &'a dyn Clock,
    context: RenderContext,
    concurrency: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        storage: &'a dyn Storage,
        records: &'a dyn RecordStore,
        directory: &'a dyn UserDirectory,
        mailer: &'a dyn MailTransport,
        renderer: &'a dyn Renderer,
        context: RenderContext,
    ) -> Self {
        Self {
            storage,
            records,
            directory,
            mailer,
            renderer,
            clock: &SystemClock,
            context,
            concurrency: 1,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Maximum concurrent bucket reads and sends.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run(&self, channel: Channel, max_window: Duration) -> Result<DispatchResult> {
        let stream = channel.stream();
        let now = self.clock.now();
        let previous = self
            .storage
            .load_watermark(stream)
            .await?
            .unwrap_or_default();
        let window = DispatchWindow::compute(previous.last_success, now, max_window);
        log::info!(
            "Dispatching {} for [{}, {})",
            channel,
            window.start.to_rfc3339(),
            window.end.to_rfc3339()
        );

        let events = self.collect_events(&window).await;
        let event_count = events.len();
        log::info!("{} events in window", event_count);

        let batch = resolve_events(events, self.records, self.directory).await?;
        if batch.missing > 0 {
            log::debug!("{} events refer to deleted records", batch.missing);
        }

        let context = self.context.clone().with_window(window.start, window.end);
        let composer = Composer {
            context: &context,
            renderer: self.renderer,
            directory: self.directory,
            delivered: &previous,
        };
        let mut settings = UserSettingsCache::new();
        let messages = composer.compose(channel, &batch, &mut settings).await?;

        let deliveries = self.deliver(&messages, &previous).await;

        let mut result = DispatchResult {
            stream,
            start: window.start,
            end: window.end,
            events: event_count,
            messages: messages.len(),
            sent: 0,
            already_notified: 0,
            failed: 0,
            success: false,
        };
        for delivery in &deliveries {
            match delivery {
                Delivery::Sent => result.sent += 1,
                Delivery::AlreadyNotified => result.already_notified += 1,
                Delivery::Failed => result.failed += 1,
            }
        }
        result.success = result.sent + result.already_notified == result.messages;

        let mut watermark = previous;
        record_deliveries(&mut watermark, &messages, &deliveries);
        watermark.advance(if result.success { window.end } else { window.start });
        self.storage.save_watermark(stream, &watermark).await?;

        log::info!(
            "{}: {} messages, {} sent, {} already notified, {} failed",
            channel,
            result.messages,
            result.sent,
            result.already_notified,
            result.failed
        );
        Ok(result)
    }

    /// Window events from every overlapping bucket, sorted by `created`.
    ///
    /// An unreadable bucket counts as empty.
    async fn collect_events(&self, window: &DispatchWindow) -> Vec<Event> {
        let buckets: Vec<Vec<Event>> = stream::iter(window.buckets())
            .map(|bucket| async move {
                match self.storage.read(bucket).await {
                    Ok(events) => events,
                    Err(e) => {
                        log::warn!("Skipping bucket {}: {}", bucket, e);
                        Vec::new()
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut events: Vec<Event> = buckets
            .into_iter()
            .flatten()
            .filter(|event| window.contains(&event.created))
            .collect();
        sort_by_created(&mut events);
        events
    }

    /// Send every message not covered by the watermark, in order.
    async fn deliver(&self, messages: &[OutgoingMessage], watermark: &Watermark) -> Vec<Delivery> {
        stream::iter(messages)
            .map(|message| async move {
                if watermark.covers(&message.recipient_id, message.event_date) {
                    log::debug!(
                        "Already notified {} up to {}",
                        message.recipient_id,
                        message.event_date.to_rfc3339()
                    );
                    return Delivery::AlreadyNotified;
                }
                match self.mailer.send(&message.mail).await {
                    Ok(()) => {
                        log::debug!(
                            "Sent '{}' to {}",
                            message.mail.subject,
                            message.recipient_id
                        );
                        Delivery::Sent
                    }
                    Err(e) => {
                        log::warn!("Failed to send to {}: {}", message.recipient_id, e);
                        Delivery::Failed
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// Raise each recipient's timestamp to its latest delivery before its earliest failure.
fn record_deliveries(
    watermark: &mut Watermark,
    messages: &[OutgoingMessage],
    deliveries: &[Delivery],
) {
    let mut earliest_failure: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for (message, delivery) in messages.iter().zip(deliveries) {
        if matches!(delivery, Delivery::Failed) {
            earliest_failure
                .entry(message.recipient_id.as_str())
                .and_modify(|at| *at = (*at).min(message.event_date))
                .or_insert(message.event_date);
        }
    }

    for (message, delivery) in messages.iter().zip(deliveries) {
        if !matches!(delivery, Delivery::Sent) {
            continue;
        }
        let blocked = earliest_failure
            .get(message.recipient_id.as_str())
            .is_some_and(|failed_at| message.event_date >= *failed_at);
        if !blocked {
            watermark.record_delivery(&message.recipient_id, message.event_date);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BucketKey, EventKind};
    use crate::services::{MailMessage, TextRenderer};
    use crate::storage::{EventStore, MemoryStorage, WatermarkStore};
    use crate::testing::{
        FakeDirectory, FakeMailer, FakeSource, at, recipient, shared_interpretation,
    };
    use crate::utils::FixedClock;
    use chrono::TimeZone;

    struct Harness {
        storage: MemoryStorage,
        source: FakeSource,
        directory: FakeDirectory,
        mailer: FakeMailer,
        renderer: TextRenderer,
    }

    impl Harness {
        fn new() -> Self {
            let directory = FakeDirectory::default();
            directory.add_user(recipient("u1", "ana@example.org"));
            directory.add_user(recipient("u2", "bea@example.org"));
            Self {
                storage: MemoryStorage::new(),
                source: FakeSource::default(),
                directory,
                mailer: FakeMailer::default(),
                renderer: TextRenderer::default(),
            }
        }

        async fn run(
            &self,
            channel: Channel,
            now: DateTime<Utc>,
            max_window: Duration,
        ) -> DispatchResult {
            let clock = FixedClock(now);
            Dispatcher::new(
                &self.storage,
                &self.source,
                &self.directory,
                &self.mailer,
                &self.renderer,
                RenderContext::new("https://dhis.example.org"),
            )
            .with_clock(&clock)
            .run(channel, max_window)
            .await
            .unwrap()
        }

        async fn watermark(&self, stream: Stream) -> Watermark {
            self.storage
                .load_watermark(stream)
                .await
                .unwrap()
                .unwrap_or_default()
        }
    }

    fn feb_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    fn message(recipient: &str, day: u32) -> OutgoingMessage {
        OutgoingMessage {
            recipient_id: recipient.to_string(),
            event_date: at(day, 0),
            mail: MailMessage {
                recipients: vec![format!("{recipient}@example.org")],
                subject: "s".into(),
                text: None,
                html: None,
            },
        }
    }

    #[tokio::test]
    async fn test_second_run_does_not_resend() {
        let harness = Harness::new();
        harness
            .source
            .set_shared(vec![shared_interpretation("P1", "u9", &["u1"])]);
        harness
            .storage
            .append(&[Event::interpretation(EventKind::Insert, "P1", at(15, 0))])
            .await
            .unwrap();

        let first = harness
            .run(Channel::Notifications, feb_first(), Duration::days(31))
            .await;
        assert_eq!(first.start, at(1, 0));
        assert_eq!(first.sent, 1);
        assert!(first.success);

        let watermark = harness.watermark(Stream::Notifications).await;
        assert_eq!(watermark.last_notified("u1"), Some(at(15, 0)));
        assert_eq!(watermark.last_success, Some(feb_first()));

        // Replay the same window
        let mut rewound = watermark.clone();
        rewound.last_success = None;
        harness
            .storage
            .save_watermark(Stream::Notifications, &rewound)
            .await
            .unwrap();

        let second = harness
            .run(Channel::Notifications, feb_first(), Duration::days(31))
            .await;
        assert_eq!(second.messages, 1);
        assert_eq!(second.sent, 0);
        assert_eq!(second.already_notified, 1);
        assert!(second.success);
        assert_eq!(harness.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_window_filters_events() {
        let harness = Harness::new();
        harness
            .source
            .set_shared(vec![
                shared_interpretation("P1", "u9", &["u1"]),
                shared_interpretation("P2", "u9", &["u1"]),
            ]);
        harness
            .storage
            .append(&[
                Event::interpretation(EventKind::Insert, "P1", at(20, 0)),
                Event::interpretation(EventKind::Insert, "P1", at(25, 0)),
                Event::interpretation(EventKind::Insert, "P2", at(30, 0)),
            ])
            .await
            .unwrap();

        let result = harness
            .run(Channel::Notifications, at(30, 0), Duration::days(7))
            .await;
        assert_eq!(result.start, at(23, 0));
        // Day 20 is before the window and P2 sits exactly at its exclusive end
        assert_eq!(result.events, 1);
        assert_eq!(result.sent, 1);
        assert_eq!(harness.source.requested_ids(), vec![vec!["P1".to_string()]]);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_window_and_successes() {
        let harness = Harness::new();
        harness
            .source
            .set_shared(vec![shared_interpretation("P1", "u9", &["u1", "u2"])]);
        harness
            .storage
            .append(&[Event::interpretation(EventKind::Insert, "P1", at(15, 0))])
            .await
            .unwrap();
        harness.mailer.fail_for("bea@example.org");

        let failed = harness
            .run(Channel::Notifications, feb_first(), Duration::days(31))
            .await;
        assert_eq!(failed.sent, 1);
        assert_eq!(failed.failed, 1);
        assert!(!failed.success);

        let watermark = harness.watermark(Stream::Notifications).await;
        assert_eq!(watermark.last_success, Some(failed.start));
        assert_eq!(watermark.last_notified("u1"), Some(at(15, 0)));
        assert_eq!(watermark.last_notified("u2"), None);

        harness.mailer.recover();
        let retry = harness
            .run(Channel::Notifications, feb_first(), Duration::days(31))
            .await;
        assert_eq!(retry.sent, 1);
        assert_eq!(retry.already_notified, 1);
        assert!(retry.success);
        assert_eq!(harness.mailer.sent_to("ana@example.org").len(), 1);
        assert_eq!(harness.mailer.sent_to("bea@example.org").len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_bucket_is_skipped() {
        let harness = Harness::new();
        harness
            .source
            .set_shared(vec![shared_interpretation("P1", "u9", &["u1"])]);
        harness
            .storage
            .append(&[Event::interpretation(EventKind::Insert, "P1", at(31, 0))])
            .await
            .unwrap();
        harness
            .storage
            .make_unreadable(BucketKey::new(2023, 12))
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        let result = harness
            .run(Channel::Newsletters, now, Duration::days(60))
            .await;
        assert_eq!(result.events, 1);
        assert_eq!(result.sent, 1);
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_empty_window_advances() {
        let harness = Harness::new();
        let result = harness
            .run(Channel::Newsletters, feb_first(), Duration::days(7))
            .await;
        assert_eq!(result.messages, 0);
        assert!(result.success);
        assert_eq!(
            harness.watermark(Stream::Newsletters).await.last_success,
            Some(feb_first())
        );
        assert!(harness.source.requested_ids().is_empty());
    }

    #[tokio::test]
    async fn test_newsletter_dated_by_latest_event() {
        let harness = Harness::new();
        harness.source.set_shared(vec![
            shared_interpretation("P1", "u9", &["u1"]),
            shared_interpretation("P2", "u9", &["u1"]),
        ]);
        harness
            .storage
            .append(&[
                Event::interpretation(EventKind::Insert, "P1", at(10, 0)),
                Event::interpretation(EventKind::Insert, "P2", at(12, 0)),
            ])
            .await
            .unwrap();

        let result = harness
            .run(Channel::Newsletters, feb_first(), Duration::days(31))
            .await;
        assert_eq!(result.messages, 1);
        assert_eq!(
            harness.watermark(Stream::Newsletters).await.last_notified("u1"),
            Some(at(12, 0))
        );
        // The notifications stream is untouched
        assert_eq!(harness.watermark(Stream::Notifications).await, Watermark::default());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_fatal() {
        let harness = Harness::new();
        harness.storage.fail_writes(true).unwrap();

        let clock = FixedClock(feb_first());
        let result = Dispatcher::new(
            &harness.storage,
            &harness.source,
            &harness.directory,
            &harness.mailer,
            &harness.renderer,
            RenderContext::new("https://dhis.example.org"),
        )
        .with_clock(&clock)
        .run(Channel::Notifications, Duration::hours(1))
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_failure_blocks_later_successes_of_same_recipient() {
        let messages = vec![
            message("u1", 3),
            message("u1", 5),
            message("u1", 7),
            message("u2", 9),
        ];
        let deliveries = vec![
            Delivery::Sent,
            Delivery::Failed,
            Delivery::Sent,
            Delivery::Sent,
        ];

        let mut watermark = Watermark::default();
        watermark.record_delivery("u2", at(20, 0));
        record_deliveries(&mut watermark, &messages, &deliveries);

        assert_eq!(watermark.last_notified("u1"), Some(at(3, 0)));
        // Never lowered
        assert_eq!(watermark.last_notified("u2"), Some(at(20, 0)));
    }

    #[tokio::test]
    async fn test_newsletter_rerun_sends_only_new_events() {
        let harness = Harness::new();
        harness.source.set_shared(vec![
            shared_interpretation("P1", "u9", &["u1", "u2"]),
            shared_interpretation("P2", "u9", &["u1"]),
        ]);
        harness
            .storage
            .append(&[Event::interpretation(EventKind::Insert, "P1", at(10, 0))])
            .await
            .unwrap();
        harness.mailer.fail_for("bea@example.org");

        let failed = harness
            .run(Channel::Newsletters, feb_first(), Duration::days(31))
            .await;
        assert!(!failed.success);
        let watermark = harness.watermark(Stream::Newsletters).await;
        assert_eq!(watermark.last_notified("u1"), Some(at(10, 0)));
        assert_eq!(watermark.last_success, Some(failed.start));

        harness
            .storage
            .append(&[Event::interpretation(EventKind::Insert, "P2", at(12, 0))])
            .await
            .unwrap();
        harness
            .run(Channel::Newsletters, feb_first(), Duration::days(31))
            .await;

        let to_ana = harness.mailer.sent_to("ana@example.org");
        assert_eq!(to_ana.len(), 2);
        let second = to_ana[1].text.as_deref().unwrap();
        assert!(second.contains("Text of P2"));
        assert!(!second.contains("Text of P1"));
        assert_eq!(
            harness.watermark(Stream::Newsletters).await.last_notified("u1"),
            Some(at(12, 0))
        );
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_keeps_order_and_progress() {
        let harness = Harness::new();
        harness
            .directory
            .add_user(recipient("u3", "cid@example.org"));
        harness.source.set_shared(vec![
            shared_interpretation("P1", "u9", &["u1", "u2", "u3"]),
            shared_interpretation("P2", "u9", &["u1", "u2", "u3"]),
        ]);
        let december = Utc.with_ymd_and_hms(2023, 12, 20, 0, 0, 0).unwrap();
        harness
            .storage
            .append(&[
                Event::interpretation(EventKind::Insert, "P2", at(12, 0)),
                Event::interpretation(EventKind::Insert, "P1", december),
            ])
            .await
            .unwrap();
        harness.mailer.fail_for("bea@example.org");

        let clock = FixedClock(feb_first());
        let result = Dispatcher::new(
            &harness.storage,
            &harness.source,
            &harness.directory,
            &harness.mailer,
            &harness.renderer,
            RenderContext::new("https://dhis.example.org"),
        )
        .with_clock(&clock)
        .with_concurrency(3)
        .run(Channel::Notifications, Duration::days(60))
        .await
        .unwrap();

        assert_eq!(result.events, 2);
        assert_eq!(result.messages, 6);
        assert_eq!(result.sent, 4);
        assert_eq!(result.failed, 2);
        assert!(!result.success);

        // Buckets and sends complete in window order
        let sent: Vec<(String, bool)> = harness
            .mailer
            .sent()
            .iter()
            .map(|m| {
                let text = m.text.as_deref().unwrap_or_default();
                (m.recipients[0].clone(), text.contains("Text of P1"))
            })
            .collect();
        assert_eq!(
            sent,
            vec![
                ("ana@example.org".to_string(), true),
                ("cid@example.org".to_string(), true),
                ("ana@example.org".to_string(), false),
                ("cid@example.org".to_string(), false),
            ]
        );

        let watermark = harness.watermark(Stream::Notifications).await;
        assert_eq!(watermark.last_notified("u1"), Some(at(12, 0)));
        assert_eq!(watermark.last_notified("u2"), None);
        assert_eq!(watermark.last_notified("u3"), Some(at(12, 0)));
        assert_eq!(watermark.last_success, Some(result.start));
    }
}
