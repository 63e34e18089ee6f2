//! Core data models for the treasury proxy
//!
//! This module contains the record types exchanged with the Treasury open-data
//! catalog, along with the upstream client and retry policy used to fetch them.

pub mod retry;
pub mod upstream;

pub use retry::{retry, RetryPolicy, Transient};
pub use upstream::{PageSource, UpstreamClient, UpstreamError};

use serde::Deserialize;
use serde_json::{Map, Value};

/// One appraised unit from the upstream dataset
///
/// Records are opaque JSON objects. The proxy only ever reads the configured
/// name field (`CONDO_NAME` by default); everything else, such as `OFLEVEL`,
/// `USE_CATG` or `VAL_AMT_P_MET`, is passed through untouched.
pub type Record = Map<String, Value>;

/// A single page of records as returned by `datastore_search`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordPage {
    /// Records in upstream order
    pub records: Vec<Record>,
    /// Size of the (possibly `q`-filtered) upstream result set, if reported
    #[serde(default)]
    pub total: Option<u64>,
}

impl RecordPage {
    /// Number of records on this page
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the page holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reads the string value of `field` from a record, if present
pub fn record_name<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_record_page_deserializes_upstream_result() {
        let page: RecordPage = serde_json::from_value(json!({
            "records": [
                { "CONDO_NAME": "Lumpini Place", "OFLEVEL": "5", "VAL_AMT_P_MET": 52000 }
            ],
            "total": 1,
            "fields": [{ "id": "CONDO_NAME", "type": "text" }]
        }))
        .expect("Failed to deserialize page");

        assert_eq!(page.len(), 1);
        assert_eq!(page.total, Some(1));
        assert_eq!(page.records[0]["VAL_AMT_P_MET"], json!(52000));
    }

    #[test]
    fn test_record_page_total_is_optional() {
        let page: RecordPage =
            serde_json::from_value(json!({ "records": [] })).expect("Failed to deserialize page");

        assert!(page.is_empty());
        assert!(page.total.is_none());
    }

    #[test]
    fn test_record_name_reads_string_fields_only() {
        let named = record(json!({ "CONDO_NAME": "Ideo Mobi" }));
        let numeric = record(json!({ "CONDO_NAME": 42 }));
        let missing = record(json!({ "OFLEVEL": "3" }));

        assert_eq!(record_name(&named, "CONDO_NAME"), Some("Ideo Mobi"));
        assert_eq!(record_name(&numeric, "CONDO_NAME"), None);
        assert_eq!(record_name(&missing, "CONDO_NAME"), None);
    }
}
