// src/services/api.rs

//! HTTP client for the DHIS2 web API.
//!
//! Implements both `RecordStore` and `UserDirectory`. Wire types stay private
//! and are converted into the domain models right after decoding.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    ApiConfig, Comment, Interpretation, ObjectKind, ObjectRef, Recipient, UserRef, UserSettings,
    source_time,
};
use crate::services::{RecordStore, UserDirectory};
use crate::utils::api_url;

/// Fields requested by change detection.
const CHANGE_FIELDS: &str = "id,text,likes,lastUpdated,comments[id,text,lastUpdated]";

const USER_FIELDS: &str = "id,displayName,userCredentials[username]";

const RECIPIENT_FIELDS: &str =
    "id,displayName,email,userCredentials[username],attributeValues[value,attribute[code]]";

const ATTR_NO_MENTIONS: &str = "user_noInterpretationMentionNotifications";
const ATTR_NO_NEWSLETTERS: &str = "user_noInterpretationSubcriptionNotifications";

/// Ids per `id:in:[...]` filter, keeping request URLs short.
const IDS_PER_REQUEST: usize = 100;

/// Client for one DHIS2 instance.
pub struct DhisClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for DhisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhisClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl DhisClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("notifier/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// GET an API endpoint and decode its JSON body.
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = api_url(&self.base_url, endpoint)?;
        log::debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::source_fetch(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::source_fetch(endpoint, format!("HTTP {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::source_fetch(endpoint, e))
    }

    async fn interpretations(&self, query: Vec<(&str, String)>) -> Result<Vec<Interpretation>> {
        let page: InterpretationsPage = self.get("interpretations", &query).await?;
        Ok(page
            .interpretations
            .into_iter()
            .map(ApiInterpretation::into_model)
            .collect())
    }
}

/// Fields requested for dispatch-time fetches, including every object kind.
fn detail_fields() -> String {
    let user = format!("user[{USER_FIELDS}]");
    let mut fields = vec![
        "id".to_string(),
        "text".to_string(),
        "type".to_string(),
        "created".to_string(),
        "likes".to_string(),
        "lastUpdated".to_string(),
        user.clone(),
        format!("comments[id,text,lastUpdated,{user}]"),
    ];
    fields.extend(
        ObjectKind::ALL
            .iter()
            .map(|kind| format!("{}[id,name,subscribers]", kind.field())),
    );
    fields.join(",")
}

fn ids_filter(ids: &[String]) -> String {
    format!("id:in:[{}]", ids.join(","))
}

#[async_trait]
impl RecordStore for DhisClient {
    async fn fetch_all(&self) -> Result<Vec<Interpretation>> {
        self.interpretations(vec![
            ("paging", "false".to_string()),
            ("fields", CHANGE_FIELDS.to_string()),
        ])
        .await
    }

    async fn fetch_changed_since(&self, date: NaiveDate) -> Result<Vec<Interpretation>> {
        self.interpretations(vec![
            ("paging", "false".to_string()),
            ("fields", CHANGE_FIELDS.to_string()),
            ("filter", format!("lastUpdated:ge:{}", date.format("%Y-%m-%d"))),
        ])
        .await
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Interpretation>> {
        let fields = detail_fields();
        let mut interpretations = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(IDS_PER_REQUEST) {
            let batch = self
                .interpretations(vec![
                    ("paging", "false".to_string()),
                    ("fields", fields.clone()),
                    ("filter", ids_filter(chunk)),
                ])
                .await?;
            interpretations.extend(batch);
        }
        Ok(interpretations)
    }
}

#[async_trait]
impl UserDirectory for DhisClient {
    async fn fetch_users(&self, ids: &[String]) -> Result<Vec<Recipient>> {
        let mut recipients = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(IDS_PER_REQUEST) {
            let page: UsersPage = self
                .get(
                    "users",
                    &[
                        ("paging", "false".to_string()),
                        ("fields", RECIPIENT_FIELDS.to_string()),
                        ("filter", ids_filter(chunk)),
                    ],
                )
                .await?;
            recipients.extend(page.users.into_iter().map(ApiUser::into_model));
        }
        Ok(recipients)
    }

    async fn fetch_user_settings(&self, username: &str) -> Result<UserSettings> {
        let raw: Value = self
            .get("userSettings", &[("user", username.to_string())])
            .await?;
        Ok(parse_user_settings(&raw))
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct InterpretationsPage {
    #[serde(default)]
    interpretations: Vec<ApiInterpretation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInterpretation {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(deserialize_with = "source_time::deserialize")]
    last_updated: DateTime<Utc>,
    #[serde(default, deserialize_with = "source_time::option::deserialize")]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    likes: u32,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    user: Option<ApiUserRef>,
    #[serde(default)]
    comments: Vec<ApiComment>,
    #[serde(default)]
    map: Option<ApiObject>,
    #[serde(default)]
    report_table: Option<ApiObject>,
    #[serde(default)]
    chart: Option<ApiObject>,
    #[serde(default)]
    event_report: Option<ApiObject>,
    #[serde(default)]
    event_chart: Option<ApiObject>,
}

impl ApiInterpretation {
    fn into_model(mut self) -> Interpretation {
        let object = self.take_object();
        Interpretation {
            id: self.id,
            text: self.text,
            last_updated: self.last_updated,
            subscribers: BTreeSet::new(),
            comments: self.comments.into_iter().map(ApiComment::into_model).collect(),
            created: self.created,
            user: self.user.map(ApiUserRef::into_model),
            object,
            likes: self.likes,
        }
    }

    /// The object stored under the field matching `type`.
    fn take_object(&mut self) -> Option<ObjectRef> {
        let raw = self.kind.as_deref()?;
        let Some(kind) = ObjectKind::from_type(raw) else {
            log::warn!("Interpretation {} has unknown type '{}'", self.id, raw);
            return None;
        };
        let object = match kind {
            ObjectKind::Map => self.map.take(),
            ObjectKind::ReportTable => self.report_table.take(),
            ObjectKind::Chart => self.chart.take(),
            ObjectKind::EventReport => self.event_report.take(),
            ObjectKind::EventChart => self.event_chart.take(),
        }?;
        Some(ObjectRef {
            id: object.id,
            name: object.name,
            kind,
            subscribers: object.subscribers,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiComment {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(deserialize_with = "source_time::deserialize")]
    last_updated: DateTime<Utc>,
    #[serde(default)]
    user: Option<ApiUserRef>,
}

impl ApiComment {
    fn into_model(self) -> Comment {
        Comment {
            id: self.id,
            text: self.text,
            last_updated: self.last_updated,
            user: self.user.map(ApiUserRef::into_model),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUserRef {
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    user_credentials: Option<Credentials>,
}

impl ApiUserRef {
    fn into_model(self) -> UserRef {
        UserRef {
            id: self.id,
            display_name: self.display_name,
            username: self.user_credentials.unwrap_or_default().username,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiObject {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    subscribers: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_credentials: Option<Credentials>,
    #[serde(default)]
    attribute_values: Vec<AttributeValue>,
}

#[derive(Debug, Deserialize)]
struct AttributeValue {
    #[serde(default)]
    value: String,
    attribute: Attribute,
}

#[derive(Debug, Deserialize)]
struct Attribute {
    #[serde(default)]
    code: Option<String>,
}

impl ApiUser {
    fn flag(&self, code: &str) -> bool {
        self.attribute_values
            .iter()
            .any(|av| av.attribute.code.as_deref() == Some(code) && av.value == "true")
    }

    fn into_model(self) -> Recipient {
        let no_mention_notifications = self.flag(ATTR_NO_MENTIONS);
        let no_newsletters = self.flag(ATTR_NO_NEWSLETTERS);
        Recipient {
            id: self.id,
            username: self.user_credentials.unwrap_or_default().username,
            display_name: self.display_name,
            email: self.email,
            no_mention_notifications,
            no_newsletters,
        }
    }
}

/// Settings come back as a flat key/value object; booleans may be strings.
fn parse_user_settings(raw: &Value) -> UserSettings {
    let locale = raw
        .get("keyUiLocale")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let email_notifications = match raw.get("keyMessageEmailNotification") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    };
    UserSettings {
        locale,
        email_notifications,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_detail_fields_cover_every_object_kind() {
        let fields = detail_fields();
        assert!(fields.starts_with("id,text,type,created,likes,lastUpdated,"));
        assert!(fields.contains("user[id,displayName,userCredentials[username]]"));
        for kind in ObjectKind::ALL {
            assert!(fields.contains(&format!("{}[id,name,subscribers]", kind.field())));
        }
    }

    #[test]
    fn test_ids_filter() {
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(ids_filter(&ids), "id:in:[a,b]");
    }

    #[test]
    fn test_detailed_interpretation_maps_object_by_type() {
        let raw = json!({
            "id": "I1",
            "text": "Low coverage",
            "type": "CHART",
            "created": "2024-01-02T08:00:00.000",
            "lastUpdated": "2024-01-03T09:30:00.000",
            "likes": 2,
            "user": {"id": "u1", "displayName": "Ana", "userCredentials": {"username": "ana"}},
            "chart": {"id": "c1", "name": "Coverage", "subscribers": ["u1", "u2"]},
            "map": {"id": "m1", "name": "Ignored", "subscribers": ["u9"]},
            "comments": [{
                "id": "C1",
                "text": "Agreed",
                "lastUpdated": "2024-01-03T10:00:00.000",
                "user": {"id": "u2", "displayName": "Bea"}
            }]
        });

        let interpretation = serde_json::from_value::<ApiInterpretation>(raw)
            .unwrap()
            .into_model();

        assert_eq!(
            interpretation.created,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap())
        );
        assert_eq!(interpretation.likes, 2);
        let author = interpretation.user.as_ref().unwrap();
        assert_eq!(author.username, "ana");

        let object = interpretation.object.as_ref().unwrap();
        assert_eq!(object.kind, ObjectKind::Chart);
        assert_eq!(object.name, "Coverage");
        assert_eq!(
            interpretation.recipients().iter().collect::<Vec<_>>(),
            vec!["u1", "u2"]
        );

        let comment = &interpretation.comments[0];
        assert_eq!(comment.user.as_ref().unwrap().username, "");
        assert_eq!(comment.user.as_ref().unwrap().display_name, "Bea");
    }

    #[test]
    fn test_unknown_type_leaves_object_empty() {
        let raw = json!({
            "id": "I1",
            "type": "DASHBOARD_ITEM",
            "lastUpdated": "2024-01-03T09:30:00.000",
            "chart": {"id": "c1", "name": "Coverage", "subscribers": ["u1"]}
        });
        let interpretation = serde_json::from_value::<ApiInterpretation>(raw)
            .unwrap()
            .into_model();
        assert!(interpretation.object.is_none());
        assert!(interpretation.recipients().is_empty());
    }

    #[test]
    fn test_change_fetch_page() {
        let raw = json!({
            "interpretations": [
                {"id": "I1", "text": "a", "lastUpdated": "2024-01-03T09:30:00.000", "comments": []},
                {"id": "I2", "text": "b", "lastUpdated": "2024-01-04T09:30:00.000"}
            ]
        });
        let page: InterpretationsPage = serde_json::from_value(raw).unwrap();
        let models: Vec<_> = page
            .interpretations
            .into_iter()
            .map(ApiInterpretation::into_model)
            .collect();
        assert_eq!(models.len(), 2);
        assert!(models.iter().all(|i| i.object.is_none() && i.user.is_none()));
    }

    #[test]
    fn test_user_opt_out_attributes() {
        let raw = json!({
            "id": "u1",
            "displayName": "Ana",
            "email": "ana@example.org",
            "userCredentials": {"username": "ana"},
            "attributeValues": [
                {"value": "true", "attribute": {"code": ATTR_NO_NEWSLETTERS}},
                {"value": "false", "attribute": {"code": ATTR_NO_MENTIONS}},
                {"value": "true", "attribute": {}}
            ]
        });
        let recipient = serde_json::from_value::<ApiUser>(raw).unwrap().into_model();
        assert_eq!(recipient.username, "ana");
        assert_eq!(recipient.address(), Some("ana@example.org"));
        assert!(recipient.no_newsletters);
        assert!(!recipient.no_mention_notifications);
    }

    #[test]
    fn test_user_settings_parsing() {
        let settings = parse_user_settings(&json!({
            "keyUiLocale": "fr",
            "keyMessageEmailNotification": true
        }));
        assert_eq!(settings.locale.as_deref(), Some("fr"));
        assert!(settings.email_notifications);

        let settings = parse_user_settings(&json!({
            "keyUiLocale": "",
            "keyMessageEmailNotification": "false"
        }));
        assert_eq!(settings, UserSettings::default());
    }

    #[test]
    fn test_new_client_keeps_credentials_out_of_debug() {
        let config = ApiConfig {
            url: "https://dhis.example.org".into(),
            username: "admin".into(),
            password: "district".into(),
            timeout_secs: 5,
        };
        let client = DhisClient::new(&config).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("district"));
    }
}
