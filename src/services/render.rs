//! Message rendering.
//!
//! A `Renderer` turns resolved events into subject and bodies. It only sees
//! what a `RenderContext` exposes: the dispatch window, public links and
//! footer texts.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::locale::{Locales, Translations, fill};
use crate::models::{Config, EventModel, Interpretation, ObjectRef, Recipient};
use crate::pipeline::ResolvedEvent;
use crate::utils::join_path;

const NOTIFICATION_SETTINGS_APP: &str = "api/apps/Notification-Settings/index.html";

/// Everything a template may refer to besides the events themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Base URL of the instance as seen by recipients
    pub public_url: String,
    pub assets_url: Option<String>,
    pub footer_text: String,
    pub privacy_policy_url: Option<String>,
}

impl RenderContext {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            start: DateTime::<Utc>::default(),
            end: DateTime::<Utc>::default(),
            public_url: public_url.into(),
            assets_url: None,
            footer_text: String::new(),
            privacy_policy_url: None,
        }
    }

    /// Links and footer from `[mail]`, falling back to `api.url` for the public URL.
    pub fn from_config(config: &Config) -> Self {
        let public_url = config
            .mail
            .public_url
            .clone()
            .unwrap_or_else(|| config.api.url.clone());
        Self {
            assets_url: config.mail.assets_url.clone(),
            footer_text: config.mail.footer_text.clone(),
            privacy_policy_url: config.mail.privacy_policy_url.clone(),
            ..Self::new(public_url)
        }
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn unsubscribe_url(&self) -> String {
        join_path(&self.public_url, NOTIFICATION_SETTINGS_APP)
    }

    pub fn object_url(&self, object: &ObjectRef) -> String {
        join_path(&self.public_url, &object.kind.object_path(&object.id))
    }

    /// Link to the interpretation inside its object's app.
    pub fn interpretation_url(&self, interpretation: &Interpretation) -> Option<String> {
        let object = interpretation.object.as_ref()?;
        Some(join_path(
            &self.public_url,
            &object.kind.interpretation_path(&object.id, &interpretation.id),
        ))
    }
}

/// Subject and bodies of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// A group of newsletter events.
///
/// Interpretation events are grouped by object, comment events by interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestEntry {
    pub model: EventModel,
    pub object: Option<ObjectRef>,
    /// The commented interpretation, for comment entries
    pub interpretation: Option<Interpretation>,
    /// Sorted by `created`
    pub events: Vec<ResolvedEvent>,
}

impl DigestEntry {
    fn object_name(&self) -> &str {
        self.object.as_ref().map(|o| o.name.as_str()).unwrap_or_default()
    }
}

/// Every event of one newsletter.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    /// Sorted by object name, interpretations before comments
    pub entries: Vec<DigestEntry>,
    pub event_count: usize,
    pub object_count: usize,
}

impl Digest {
    pub fn build(events: &[ResolvedEvent]) -> Self {
        let object_key = |event: &ResolvedEvent| {
            event
                .interpretation
                .object
                .as_ref()
                .map(|o| o.id.clone())
                .unwrap_or_default()
        };

        let mut by_object: BTreeMap<String, Vec<ResolvedEvent>> = BTreeMap::new();
        let mut by_interpretation: BTreeMap<String, Vec<ResolvedEvent>> = BTreeMap::new();
        for event in events {
            match event.model() {
                EventModel::Interpretation => {
                    by_object.entry(object_key(event)).or_default().push(event.clone())
                }
                EventModel::Comment => by_interpretation
                    .entry(event.interpretation.id.clone())
                    .or_default()
                    .push(event.clone()),
            }
        }

        let interpretation_entries = by_object.into_values().map(|mut events| {
            events.sort_by_key(|e| e.created());
            DigestEntry {
                model: EventModel::Interpretation,
                object: events[0].interpretation.object.clone(),
                interpretation: None,
                events,
            }
        });
        let comment_entries = by_interpretation.into_values().map(|mut events| {
            events.sort_by_key(|e| e.created());
            DigestEntry {
                model: EventModel::Comment,
                object: events[0].interpretation.object.clone(),
                interpretation: Some(events[0].interpretation.clone()),
                events,
            }
        });

        let mut entries: Vec<DigestEntry> =
            interpretation_entries.chain(comment_entries).collect();
        // Interpretations before comments of the same object
        entries.sort_by_key(|entry| {
            (entry.object_name().to_string(), entry.model == EventModel::Comment)
        });

        let object_count = events.iter().map(object_key).collect::<BTreeSet<_>>().len();

        Digest {
            entries,
            event_count: events.len(),
            object_count,
        }
    }
}

/// Produces message contents. Rendering is pure.
pub trait Renderer: Send + Sync {
    fn render_notification(
        &self,
        context: &RenderContext,
        event: &ResolvedEvent,
        recipient: &Recipient,
        locale: Option<&str>,
    ) -> Result<RenderedMail>;

    fn render_newsletter(
        &self,
        context: &RenderContext,
        digest: &Digest,
        recipient: &Recipient,
        locale: Option<&str>,
    ) -> Result<RenderedMail>;
}

/// Plain text notifications and text plus HTML newsletters.
#[derive(Debug, Clone)]
pub struct TextRenderer {
    locales: Locales,
}

impl TextRenderer {
    pub fn new(locales: Locales) -> Self {
        Self { locales }
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new(Locales::builtin("en"))
    }
}

fn author_name(event: &ResolvedEvent) -> &str {
    event
        .author()
        .map(|user| user.display_name.as_str())
        .unwrap_or("-")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn date(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

impl Renderer for TextRenderer {
    fn render_notification(
        &self,
        context: &RenderContext,
        event: &ResolvedEvent,
        _recipient: &Recipient,
        locale: Option<&str>,
    ) -> Result<RenderedMail> {
        let i18n = self.locales.get(locale);
        let action = i18n.action(event.kind(), event.model());
        let author = author_name(event);

        let subject = format!("{author} {action}");

        let mut intro = vec![author.to_string()];
        if let Some(user) = event.author() {
            intro.push(format!("({})", user.username));
        }
        intro.push(action.to_string());
        intro.push(format!("{}:", i18n.object_subscribed));

        let mut paragraphs = vec![intro.join(" ")];
        paragraphs.extend(context.interpretation_url(&event.interpretation));
        paragraphs.push(event.text().to_string());
        paragraphs.push(format!(
            "---\n{}: {}",
            i18n.unsubscribe,
            context.unsubscribe_url()
        ));

        Ok(RenderedMail {
            subject,
            text: Some(paragraphs.join("\n\n")),
            html: None,
        })
    }

    fn render_newsletter(
        &self,
        context: &RenderContext,
        digest: &Digest,
        _recipient: &Recipient,
        locale: Option<&str>,
    ) -> Result<RenderedMail> {
        let i18n = self.locales.get(locale);
        let subject = format!("{} ({})", i18n.newsletter_title, date(&context.end));
        let period = fill(
            &i18n.newsletter_period,
            &[("start", &date(&context.start)), ("end", &date(&context.end))],
        );
        let details = fill(
            &i18n.newsletter_details,
            &[
                ("n", &digest.event_count.to_string()),
                ("m", &digest.object_count.to_string()),
            ],
        );

        let mut text = vec![i18n.newsletter_title.clone(), period.clone(), details.clone()];
        let mut html = vec!["<html><body>".to_string()];
        if let Some(assets_url) = &context.assets_url {
            html.push(format!(
                "<img src=\"{}\" alt=\"\" />",
                escape_html(&join_path(assets_url, "resources/logo.png"))
            ));
        }
        html.push(format!("<h1>{}</h1>", escape_html(&i18n.newsletter_title)));
        html.push(format!("<p>{}</p>", escape_html(&period)));
        html.push(format!("<p>{}</p>", escape_html(&details)));

        for entry in &digest.entries {
            render_entry(context, i18n, entry, &mut text, &mut html);
        }

        text.push("---".to_string());
        html.push("<hr />".to_string());
        if !context.footer_text.is_empty() {
            text.push(context.footer_text.clone());
            html.push(format!("<p>{}</p>", escape_html(&context.footer_text)));
        }
        if let Some(url) = &context.privacy_policy_url {
            text.push(format!("{}: {}", i18n.privacy_policy, url));
            html.push(format!(
                "<p><a href=\"{}\">{}</a></p>",
                escape_html(url),
                escape_html(&i18n.privacy_policy)
            ));
        }
        let unsubscribe = context.unsubscribe_url();
        text.push(format!("{}: {}", i18n.unsubscribe, unsubscribe));
        html.push(format!(
            "<p><a href=\"{}\">{}</a></p>",
            escape_html(&unsubscribe),
            escape_html(&i18n.unsubscribe)
        ));
        html.push("</body></html>".to_string());

        Ok(RenderedMail {
            subject,
            text: Some(text.join("\n\n")),
            html: Some(html.join("\n")),
        })
    }
}

fn render_entry(
    context: &RenderContext,
    i18n: &Translations,
    entry: &DigestEntry,
    text: &mut Vec<String>,
    html: &mut Vec<String>,
) {
    let heading = match entry.model {
        EventModel::Interpretation => &i18n.interpretations_heading,
        EventModel::Comment => &i18n.comments_heading,
    };
    let object_url = entry.object.as_ref().map(|o| context.object_url(o));

    text.push(format!("== {} ({}) ==", entry.object_name(), heading));
    html.push(match &object_url {
        Some(url) => format!(
            "<h2><a href=\"{}\">{}</a> <small>{}</small></h2>",
            escape_html(url),
            escape_html(entry.object_name()),
            escape_html(heading)
        ),
        None => format!(
            "<h2>{} <small>{}</small></h2>",
            escape_html(entry.object_name()),
            escape_html(heading)
        ),
    });

    if let Some(interpretation) = &entry.interpretation {
        text.push(format!("> {}", interpretation.text));
        html.push(format!(
            "<blockquote>{}</blockquote>",
            escape_html(&interpretation.text)
        ));
    }

    html.push("<ul>".to_string());
    for event in &entry.events {
        let likes = match entry.model {
            EventModel::Interpretation => i18n.likes(event.interpretation.likes),
            EventModel::Comment => String::new(),
        };
        let link = context.interpretation_url(&event.interpretation);

        let mut line = format!(
            "- {} ({}){}: {}",
            author_name(event),
            date(&event.created()),
            likes,
            event.text()
        );
        if let Some(link) = &link {
            line.push_str(&format!("\n  {link}"));
        }
        text.push(line);

        let author = match &link {
            Some(link) => format!(
                "<a href=\"{}\">{}</a>",
                escape_html(link),
                escape_html(author_name(event))
            ),
            None => escape_html(author_name(event)),
        };
        html.push(format!(
            "<li><b>{}</b> ({}){}: {}</li>",
            author,
            date(&event.created()),
            escape_html(&likes),
            escape_html(event.text())
        ));
    }
    html.push("</ul>".to_string());
}
