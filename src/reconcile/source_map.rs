//! Source-name mapping
//!
//! Users can label raw source IPs ("192.168.1.7" -> "NAS") through an
//! ordered rule table. Rules match either exactly or, when the pattern is
//! written as `/regex`, by regular expression. The first matching rule
//! wins; with no match the raw `ip:port` string is used. Labels are
//! resolved fresh on every reconciliation pass, so edits to the table take
//! effect on the next snapshot.

use crate::prefs::{self, PreferenceStore, KEY_SOURCE_MAP};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One user-entered mapping rule as persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRule {
    /// Pattern: exact IP string, or `/`-prefixed regular expression
    #[serde(default)]
    pub reg: String,
    /// Human label applied on match
    #[serde(default)]
    pub name: String,
}

enum Matcher {
    Exact(String),
    Pattern(Regex),
}

struct CompiledRule {
    matcher: Matcher,
    name: String,
}

/// Compiled rule table, applied in persisted order
#[derive(Default)]
pub struct SourceMap {
    rules: Vec<SourceRule>,
    compiled: Vec<CompiledRule>,
}

impl SourceMap {
    pub fn new(rules: Vec<SourceRule>) -> Self {
        let compiled = rules
            .iter()
            .filter(|r| !r.reg.is_empty() && !r.name.is_empty())
            .filter_map(|r| {
                let matcher = if let Some(pattern) = r.reg.strip_prefix('/') {
                    match Regex::new(pattern) {
                        Ok(re) => Matcher::Pattern(re),
                        Err(e) => {
                            warn!("invalid source map pattern {:?}: {}", r.reg, e);
                            return None;
                        }
                    }
                } else {
                    Matcher::Exact(r.reg.clone())
                };
                Some(CompiledRule {
                    matcher,
                    name: r.name.clone(),
                })
            })
            .collect();
        SourceMap { rules, compiled }
    }

    /// Load the table from persisted preferences; malformed values yield an
    /// empty table
    pub fn load(store: &dyn PreferenceStore) -> Self {
        Self::new(prefs::get_or_default(store, KEY_SOURCE_MAP, Vec::new()))
    }

    /// Persist the current table
    pub fn save(&self, store: &dyn PreferenceStore) {
        prefs::set_json(store, KEY_SOURCE_MAP, &self.rules);
    }

    /// The rules as entered, including ones that failed to compile
    pub fn rules(&self) -> &[SourceRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// Resolve a source IP to its display label
    ///
    /// Returns `name(ip)` for the first matching rule, or `fallback`
    /// (normally `ip:port`) when nothing matches.
    pub fn resolve(&self, source_ip: &str, fallback: &str) -> String {
        for rule in &self.compiled {
            let hit = match &rule.matcher {
                Matcher::Exact(s) => s == source_ip,
                Matcher::Pattern(re) => re.is_match(source_ip),
            };
            if hit {
                return format!("{}({})", rule.name, source_ip);
            }
        }
        fallback.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPrefs;
    use serde_json::json;

    fn rule(reg: &str, name: &str) -> SourceRule {
        SourceRule {
            reg: reg.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_exact_match() {
        let map = SourceMap::new(vec![rule("10.0.0.2", "laptop")]);
        assert_eq!(map.resolve("10.0.0.2", "10.0.0.2:4431"), "laptop(10.0.0.2)");
        assert_eq!(map.resolve("10.0.0.3", "10.0.0.3:4431"), "10.0.0.3:4431");
    }

    #[test]
    fn test_regex_match() {
        let map = SourceMap::new(vec![rule("/^192\\.168\\.", "lan")]);
        assert_eq!(map.resolve("192.168.1.7", "x"), "lan(192.168.1.7)");
        assert_eq!(map.resolve("172.16.0.1", "172.16.0.1:80"), "172.16.0.1:80");
    }

    #[test]
    fn test_first_match_wins() {
        let map = SourceMap::new(vec![
            rule("/^10\\.", "first"),
            rule("10.0.0.2", "second"),
        ]);
        assert_eq!(map.resolve("10.0.0.2", "x"), "first(10.0.0.2)");
    }

    #[test]
    fn test_empty_and_invalid_rules_skipped() {
        let map = SourceMap::new(vec![
            rule("", "ignored"),
            rule("/([", "broken"),
            rule("10.0.0.9", ""),
            rule("10.0.0.9", "ok"),
        ]);
        assert_eq!(map.resolve("10.0.0.9", "x"), "ok(10.0.0.9)");
    }

    #[test]
    fn test_load_malformed_pref_is_empty() {
        let prefs = MemoryPrefs::new();
        prefs.set(KEY_SOURCE_MAP, json!({"not": "a list"}));
        let map = SourceMap::load(&prefs);
        assert!(map.is_empty());
        assert_eq!(map.resolve("1.2.3.4", "1.2.3.4:80"), "1.2.3.4:80");
    }

    #[test]
    fn test_save_roundtrip() {
        let prefs = MemoryPrefs::new();
        let map = SourceMap::new(vec![rule("10.0.0.2", "laptop")]);
        map.save(&prefs);
        let loaded = SourceMap::load(&prefs);
        assert_eq!(loaded.rules(), map.rules());
    }
}
