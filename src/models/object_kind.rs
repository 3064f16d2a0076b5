// src/models/object_kind.rs

//! Kinds of objects that can be interpreted, and where they live in the web apps.

use serde::{Deserialize, Serialize};

/// Object type an interpretation refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    Map,
    ReportTable,
    Chart,
    EventReport,
    EventChart,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Map,
        ObjectKind::ReportTable,
        ObjectKind::Chart,
        ObjectKind::EventReport,
        ObjectKind::EventChart,
    ];

    /// Parse the source `type` value.
    pub fn from_type(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == value)
    }

    /// Source `type` value.
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::Map => "MAP",
            ObjectKind::ReportTable => "REPORT_TABLE",
            ObjectKind::Chart => "CHART",
            ObjectKind::EventReport => "EVENT_REPORT",
            ObjectKind::EventChart => "EVENT_CHART",
        }
    }

    /// Interpretation field holding the object.
    pub fn field(&self) -> &'static str {
        match self {
            ObjectKind::Map => "map",
            ObjectKind::ReportTable => "reportTable",
            ObjectKind::Chart => "chart",
            ObjectKind::EventReport => "eventReport",
            ObjectKind::EventChart => "eventChart",
        }
    }

    /// Path of the object inside its web app.
    pub fn object_path(&self, object_id: &str) -> String {
        match self {
            ObjectKind::Map => format!("dhis-web-maps/index.html?id={object_id}"),
            ObjectKind::ReportTable => format!("dhis-web-pivot/index.html?id={object_id}"),
            ObjectKind::Chart => format!("dhis-web-data-visualizer/index.html/#/{object_id}"),
            ObjectKind::EventReport => {
                format!("dhis-web-event-reports/index.html?id={object_id}")
            }
            ObjectKind::EventChart => {
                format!("dhis-web-event-visualizer/index.html?id={object_id}")
            }
        }
    }

    /// Path of one interpretation of the object inside its web app.
    pub fn interpretation_path(&self, object_id: &str, interpretation_id: &str) -> String {
        match self {
            ObjectKind::Chart => format!(
                "dhis-web-data-visualizer/index.html/#/{object_id}/interpretation/{interpretation_id}"
            ),
            _ => format!(
                "{}&interpretationid={interpretation_id}",
                self.object_path(object_id)
            ),
        }
    }
}
