//! Connection list filtering and sorting
//!
//! Pure transformations over the reconciled lists: free-text filtering
//! across a fixed field set, exact source-IP filtering, and a stable sort
//! whose column and direction persist across sessions through the
//! preference capability.

use crate::prefs::{self, PreferenceStore, KEY_COLUMN_ORDER, KEY_HIDDEN_COLUMNS, KEY_SORT};
use crate::reconcile::FormattedConnection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Sentinel meaning "no source-IP filter"
pub const ALL_SOURCE_IP: &str = "ALL_SOURCE_IP";

/// Sortable connection columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortColumn {
    Type,
    Process,
    Host,
    Rule,
    Chains,
    Elapsed,
    DownloadSpeed,
    UploadSpeed,
    Download,
    Upload,
    Source,
    DestinationIp,
    SniffHost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Persisted sort choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPreference {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl Default for SortPreference {
    /// Newest connections first
    fn default() -> Self {
        SortPreference {
            column: SortColumn::Elapsed,
            direction: SortDirection::Ascending,
        }
    }
}

fn has_substring(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn matches_keyword(conn: &FormattedConnection, needle: &str) -> bool {
    [
        conn.host.as_str(),
        conn.source_ip.as_str(),
        conn.source_port.as_str(),
        conn.destination_ip.as_str(),
        conn.chains.as_str(),
        conn.rule.as_str(),
        conn.conn_type.as_str(),
        conn.network.as_str(),
        conn.process.as_str(),
    ]
    .iter()
    .any(|field| has_substring(field, needle))
}

/// Filter connections by free-text keyword and source IP
///
/// An empty keyword and the [`ALL_SOURCE_IP`] sentinel are both no-ops; a
/// record passes the keyword filter when any of the display fields
/// contains it, case-insensitively.
pub fn filter_connections(
    conns: &[FormattedConnection],
    keyword: &str,
    source_ip: &str,
) -> Vec<FormattedConnection> {
    let needle = keyword.to_lowercase();
    conns
        .iter()
        .filter(|c| needle.is_empty() || matches_keyword(c, &needle))
        .filter(|c| source_ip == ALL_SOURCE_IP || c.source_ip == source_ip)
        .cloned()
        .collect()
}

fn compare(a: &FormattedConnection, b: &FormattedConnection, column: SortColumn) -> Ordering {
    match column {
        SortColumn::Type => a.conn_type.cmp(&b.conn_type),
        SortColumn::Process => a.process.cmp(&b.process),
        SortColumn::Host => a.host.cmp(&b.host),
        SortColumn::Rule => a.rule.cmp(&b.rule),
        SortColumn::Chains => a.chains.cmp(&b.chains),
        SortColumn::Elapsed => a.elapsed_ms.cmp(&b.elapsed_ms),
        SortColumn::DownloadSpeed => a.download_speed.cmp(&b.download_speed),
        SortColumn::UploadSpeed => a.upload_speed.cmp(&b.upload_speed),
        SortColumn::Download => a.download.cmp(&b.download),
        SortColumn::Upload => a.upload.cmp(&b.upload),
        SortColumn::Source => a.source.cmp(&b.source),
        SortColumn::DestinationIp => a.destination_ip.cmp(&b.destination_ip),
        SortColumn::SniffHost => a.sniff_host.cmp(&b.sniff_host),
    }
}

/// Stable sort by the given column and direction
pub fn sort_connections(conns: &mut [FormattedConnection], pref: &SortPreference) {
    conns.sort_by(|a, b| {
        let ord = compare(a, b, pref.column);
        match pref.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
}

/// Unique source IPs across a list, sorted; feeds the dimension-filter
/// dropdown
pub fn source_ips(conns: &[FormattedConnection]) -> Vec<String> {
    let mut ips: Vec<String> = conns.iter().map(|c| c.source_ip.clone()).collect();
    ips.sort();
    ips.dedup();
    ips
}

/// Column accessors hidden by default
pub fn default_hidden_columns() -> Vec<String> {
    vec!["id".to_string()]
}

/// Filter/sort engine bound to a preference store
///
/// The store is an injected capability, so the engine is testable against
/// an in-memory fake.
pub struct ViewEngine {
    prefs: Arc<dyn PreferenceStore>,
}

impl ViewEngine {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        ViewEngine { prefs }
    }

    /// Filter by keyword and source IP, then apply the persisted sort
    pub fn apply(
        &self,
        conns: &[FormattedConnection],
        keyword: &str,
        source_ip: &str,
    ) -> Vec<FormattedConnection> {
        let mut out = filter_connections(conns, keyword, source_ip);
        sort_connections(&mut out, &self.sort_preference());
        out
    }

    pub fn sort_preference(&self) -> SortPreference {
        prefs::get_or_default(self.prefs.as_ref(), KEY_SORT, SortPreference::default())
    }

    pub fn set_sort_preference(&self, pref: SortPreference) {
        prefs::set_json(self.prefs.as_ref(), KEY_SORT, &pref);
    }

    pub fn hidden_columns(&self) -> Vec<String> {
        prefs::get_or_default(self.prefs.as_ref(), KEY_HIDDEN_COLUMNS, default_hidden_columns())
    }

    pub fn set_hidden_columns(&self, columns: &[String]) {
        prefs::set_json(self.prefs.as_ref(), KEY_HIDDEN_COLUMNS, &columns);
    }

    pub fn column_order(&self) -> Vec<String> {
        prefs::get_or_default(self.prefs.as_ref(), KEY_COLUMN_ORDER, Vec::new())
    }

    pub fn set_column_order(&self, columns: &[String]) {
        prefs::set_json(self.prefs.as_ref(), KEY_COLUMN_ORDER, &columns);
    }

    /// Drop persisted column customizations, restoring defaults
    pub fn reset_columns(&self) {
        self.prefs.remove(KEY_HIDDEN_COLUMNS);
        self.prefs.remove(KEY_COLUMN_ORDER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPrefs;
    use serde_json::json;

    fn conn(id: &str, host: &str, source_ip: &str, download: u64) -> FormattedConnection {
        FormattedConnection {
            id: id.to_string(),
            upload: 0,
            download,
            upload_speed: 0,
            download_speed: 0,
            elapsed_ms: 0,
            chains: "selector -> proxy".to_string(),
            rule: "MATCH".to_string(),
            host: host.to_string(),
            sniff_host: "-".to_string(),
            conn_type: "HTTPS(tcp)".to_string(),
            network: "tcp".to_string(),
            source: source_ip.to_string(),
            source_ip: source_ip.to_string(),
            source_port: "50110".to_string(),
            destination_ip: "1.2.3.4".to_string(),
            destination_port: "443".to_string(),
            process: "firefox".to_string(),
        }
    }

    fn sample() -> Vec<FormattedConnection> {
        vec![
            conn("1", "example.com:443", "10.0.0.2", 300),
            conn("2", "cdn.example.net:443", "10.0.0.3", 100),
            conn("3", "api.other.io:443", "10.0.0.2", 200),
        ]
    }

    #[test]
    fn test_no_filter_is_noop() {
        let list = sample();
        let out = filter_connections(&list, "", ALL_SOURCE_IP);
        assert_eq!(out, list);
    }

    #[test]
    fn test_keyword_any_field_case_insensitive() {
        let list = sample();
        assert_eq!(filter_connections(&list, "EXAMPLE", ALL_SOURCE_IP).len(), 2);
        // matches the process field
        assert_eq!(filter_connections(&list, "firefox", ALL_SOURCE_IP).len(), 3);
        assert!(filter_connections(&list, "nomatch", ALL_SOURCE_IP).is_empty());
    }

    #[test]
    fn test_source_ip_dimension() {
        let list = sample();
        let out = filter_connections(&list, "", "10.0.0.2");
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.source_ip == "10.0.0.2"));
    }

    #[test]
    fn test_combined_filter_is_subset_of_each() {
        let list = sample();
        let combined = filter_connections(&list, "example", "10.0.0.2");
        let by_kw = filter_connections(&list, "example", ALL_SOURCE_IP);
        let by_ip = filter_connections(&list, "", "10.0.0.2");
        for c in &combined {
            assert!(by_kw.contains(c));
            assert!(by_ip.contains(c));
        }
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].id, "1");
    }

    #[test]
    fn test_sort_by_download_descending() {
        let mut list = sample();
        sort_connections(
            &mut list,
            &SortPreference {
                column: SortColumn::Download,
                direction: SortDirection::Descending,
            },
        );
        let ids: Vec<_> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "2"]);
    }

    #[test]
    fn test_source_ips_unique_sorted() {
        assert_eq!(source_ips(&sample()), vec!["10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_engine_default_sort_on_malformed_pref() {
        let prefs = Arc::new(MemoryPrefs::new());
        prefs.set(KEY_SORT, json!({"column": 42}));
        let engine = ViewEngine::new(prefs);
        assert_eq!(engine.sort_preference(), SortPreference::default());
    }

    #[test]
    fn test_engine_persists_sort() {
        let prefs = Arc::new(MemoryPrefs::new());
        let engine = ViewEngine::new(prefs.clone());
        let pref = SortPreference {
            column: SortColumn::Host,
            direction: SortDirection::Ascending,
        };
        engine.set_sort_preference(pref);
        assert_eq!(engine.sort_preference(), pref);

        // a second engine over the same store sees the persisted choice
        let other = ViewEngine::new(prefs);
        assert_eq!(other.sort_preference(), pref);
    }

    #[test]
    fn test_engine_column_defaults_and_reset() {
        let engine = ViewEngine::new(Arc::new(MemoryPrefs::new()));
        assert_eq!(engine.hidden_columns(), vec!["id"]);
        engine.set_hidden_columns(&["id".to_string(), "process".to_string()]);
        assert_eq!(engine.hidden_columns().len(), 2);
        engine.reset_columns();
        assert_eq!(engine.hidden_columns(), vec!["id"]);
        assert!(engine.column_order().is_empty());
    }
}
