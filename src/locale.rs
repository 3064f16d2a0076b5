// src/locale.rs

//! Message strings per language.
//!
//! English and French are built in. Additional languages are read from
//! `{locale}.toml` files in a translations directory; a file overrides the
//! built-in strings of the same locale.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{EventKind, EventModel};

/// Strings used to render messages in one language.
///
/// Templates use `{name}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Translations {
    pub interpretation_insert: String,
    pub interpretation_update: String,
    pub comment_insert: String,
    pub comment_update: String,
    pub object_subscribed: String,
    pub unsubscribe: String,
    pub newsletter_title: String,
    /// `{n}` events, `{m}` objects
    pub newsletter_details: String,
    pub newsletter_period: String,
    pub interpretations_heading: String,
    pub comments_heading: String,
    pub one_like: String,
    /// `{n}` likes
    pub n_likes: String,
    pub privacy_policy: String,
}

impl Default for Translations {
    fn default() -> Self {
        Translations {
            interpretation_insert: "created an interpretation".to_string(),
            interpretation_update: "edited an interpretation".to_string(),
            comment_insert: "commented an interpretation".to_string(),
            comment_update: "edited a comment".to_string(),
            object_subscribed: "in an object you are subscribed to".to_string(),
            unsubscribe: "Manage your notification settings".to_string(),
            newsletter_title: "Interpretations digest".to_string(),
            newsletter_details: "{n} interpretations and comments on {m} favorites".to_string(),
            newsletter_period: "From {start} to {end}".to_string(),
            interpretations_heading: "New interpretations".to_string(),
            comments_heading: "New comments".to_string(),
            one_like: "1 like".to_string(),
            n_likes: "{n} likes".to_string(),
            privacy_policy: "Privacy policy".to_string(),
        }
    }
}

impl Translations {
    fn french() -> Self {
        Translations {
            interpretation_insert: "a créé une interprétation".to_string(),
            interpretation_update: "a modifié une interprétation".to_string(),
            comment_insert: "a commenté une interprétation".to_string(),
            comment_update: "a modifié un commentaire".to_string(),
            object_subscribed: "sur un objet auquel vous êtes abonné".to_string(),
            unsubscribe: "Gérer vos notifications".to_string(),
            newsletter_title: "Résumé des interprétations".to_string(),
            newsletter_details: "{n} interprétations et commentaires sur {m} favoris".to_string(),
            newsletter_period: "Du {start} au {end}".to_string(),
            interpretations_heading: "Nouvelles interprétations".to_string(),
            comments_heading: "Nouveaux commentaires".to_string(),
            one_like: "1 j'aime".to_string(),
            n_likes: "{n} j'aime".to_string(),
            privacy_policy: "Politique de confidentialité".to_string(),
        }
    }

    /// Verb phrase describing an event, e.g. "commented an interpretation".
    pub fn action(&self, kind: EventKind, model: EventModel) -> &str {
        match (model, kind) {
            (EventModel::Interpretation, EventKind::Insert) => &self.interpretation_insert,
            (EventModel::Interpretation, EventKind::Update) => &self.interpretation_update,
            (EventModel::Comment, EventKind::Insert) => &self.comment_insert,
            (EventModel::Comment, EventKind::Update) => &self.comment_update,
        }
    }

    /// Like counter suffix; empty without likes.
    pub fn likes(&self, likes: u32) -> String {
        match likes {
            0 => String::new(),
            1 => format!(" ({})", self.one_like),
            n => format!(" ({})", fill(&self.n_likes, &[("n", &n.to_string())])),
        }
    }
}

/// Replace `{name}` placeholders.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{name}}}"), value)
        })
}

/// Every known language with a fallback.
#[derive(Debug, Clone)]
pub struct Locales {
    default_locale: String,
    translations: HashMap<String, Translations>,
}

impl Locales {
    /// Built-in languages only.
    pub fn builtin(default_locale: impl Into<String>) -> Self {
        let translations = HashMap::from([
            ("en".to_string(), Translations::default()),
            ("fr".to_string(), Translations::french()),
        ]);
        Locales {
            default_locale: default_locale.into(),
            translations,
        }
    }

    /// Built-in languages plus every `{locale}.toml` file in `dir`.
    pub fn load_dir(dir: impl AsRef<Path>, default_locale: impl Into<String>) -> Result<Self> {
        let mut locales = Self::builtin(default_locale);
        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(locale) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            let translations: Translations = toml::from_str(&content)?;
            log::debug!("Loaded translations for '{}' from {}", locale, path.display());
            locales.translations.insert(locale.to_string(), translations);
        }
        Ok(locales)
    }

    /// Load from `dir` with fallback to the built-in languages.
    pub fn load_or_builtin(dir: Option<&Path>, default_locale: &str) -> Self {
        match dir {
            Some(dir) => Self::load_dir(dir, default_locale).unwrap_or_else(|e| {
                log::warn!(
                    "Failed to load translations from {}: {}. Using built-in languages.",
                    dir.display(),
                    e
                );
                Self::builtin(default_locale)
            }),
            None => Self::builtin(default_locale),
        }
    }

    /// Strings for `locale`, trying its language (`pt` for `pt_BR`) and then the default.
    pub fn get(&self, locale: Option<&str>) -> &Translations {
        let language = locale.and_then(|l| l.split(['_', '-']).next());
        locale
            .and_then(|l| self.translations.get(l))
            .or_else(|| language.and_then(|l| self.translations.get(l)))
            .or_else(|| self.translations.get(&self.default_locale))
            .or_else(|| self.translations.get("en"))
            .unwrap_or_else(|| default_translations())
    }
}

fn default_translations() -> &'static Translations {
    static DEFAULT: std::sync::OnceLock<Translations> = std::sync::OnceLock::new();
    DEFAULT.get_or_init(Translations::default)
}
