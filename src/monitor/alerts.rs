//! Alert construction and dispatch
//!
//! One alert per monitor run, grouped by source. Channel transports are
//! external collaborators: the webhook channel posts the JSON summary,
//! the email channel renders the message and hands it off. Delivery
//! failures are logged, never fatal to the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Delivery targets from the monitor config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AlertChannels {
    pub email: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

/// One retained match, ready for rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertItem {
    pub title: String,
    pub url: String,
    pub date: String,
    pub snippet: String,
    pub matched_keyword: String,
    pub relevance_score: u8,
    pub source_display_name: String,
}

/// A source that failed during the run, surfaced so absence of matches is
/// never mistaken for absence of problems
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSource {
    pub source_display_name: String,
    pub error_kind: String,
}

/// The alert for one monitor run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub monitor_name: String,
    pub created_at: DateTime<Utc>,
    pub item_count: usize,
    /// source display name -> items, sorted by source
    pub groups: BTreeMap<String, Vec<AlertItem>>,
    #[serde(default)]
    pub failed_sources: Vec<FailedSource>,
}

impl Alert {
    pub fn new(
        monitor_name: &str,
        items: Vec<AlertItem>,
        failed_sources: Vec<FailedSource>,
    ) -> Self {
        let mut groups: BTreeMap<String, Vec<AlertItem>> = BTreeMap::new();
        let item_count = items.len();
        for item in items {
            groups
                .entry(item.source_display_name.clone())
                .or_default()
                .push(item);
        }
        Self {
            monitor_name: monitor_name.to_string(),
            created_at: Utc::now(),
            item_count,
            groups,
            failed_sources,
        }
    }

    /// `<monitor_name> — <N> new matches`
    pub fn subject(&self) -> String {
        format!("{} — {} new matches", self.monitor_name, self.item_count)
    }

    /// Channel-agnostic text body, grouped by source
    pub fn render_text(&self) -> String {
        let mut out = format!("{}\n\n", self.subject());
        for (source, items) in &self.groups {
            out.push_str(&format!("## {}\n", source));
            for item in items {
                out.push_str(&format!(
                    "- {} ({})\n  {} | keyword: {} | relevance {}/10\n",
                    item.title,
                    if item.url.is_empty() { "no url" } else { &item.url },
                    if item.date.is_empty() { "undated" } else { &item.date },
                    item.matched_keyword,
                    item.relevance_score
                ));
                if !item.snippet.is_empty() {
                    out.push_str(&format!("  {}\n", item.snippet));
                }
            }
            out.push('\n');
        }
        if !self.failed_sources.is_empty() {
            out.push_str("Sources that failed this run:\n");
            for failed in &self.failed_sources {
                out.push_str(&format!(
                    "- {} ({})\n",
                    failed.source_display_name, failed.error_kind
                ));
            }
        }
        out
    }

    /// Write the alert record under `alerts_dir/<monitor>/<ts>.json`
    pub fn write_record(&self, alerts_dir: &Path) -> std::io::Result<PathBuf> {
        let dir = alerts_dir.join(&self.monitor_name);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.created_at.format("%Y%m%d_%H%M%S")));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Fan the alert out to the configured channels
    pub async fn dispatch(&self, channels: &AlertChannels) {
        if !channels.email.is_empty() {
            // Mail transport is an external collaborator; render and hand off
            log::info!(
                "[Alerts] Email to {:?}: {}\n{}",
                channels.email,
                self.subject(),
                self.render_text()
            );
        }
        if let Some(ref webhook) = channels.webhook {
            match reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
            {
                Ok(client) => {
                    if let Err(e) = client.post(webhook).json(self).send().await {
                        log::error!("[Alerts] Webhook delivery failed: {}", e);
                    }
                }
                Err(e) => log::error!("[Alerts] Webhook client build failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &str, title: &str) -> AlertItem {
        AlertItem {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            date: "2026-07-01".to_string(),
            snippet: "matched text".to_string(),
            matched_keyword: "alpha".to_string(),
            relevance_score: 8,
            source_display_name: source.to_string(),
        }
    }

    #[test]
    fn test_subject_format() {
        let alert = Alert::new("sap-watch", vec![item("A", "one"), item("B", "two")], Vec::new());
        assert_eq!(alert.subject(), "sap-watch — 2 new matches");
    }

    #[test]
    fn test_render_groups_by_source() {
        let alert = Alert::new(
            "watch",
            vec![item("Reddit", "r1"), item("DVIDS", "d1"), item("Reddit", "r2")],
            vec![FailedSource {
                source_display_name: "SAM.gov Opportunities".to_string(),
                error_kind: "rate_limited".to_string(),
            }],
        );
        let text = alert.render_text();
        let dvids_pos = text.find("## DVIDS").unwrap();
        let reddit_pos = text.find("## Reddit").unwrap();
        assert!(dvids_pos < reddit_pos);
        assert!(text.contains("relevance 8/10"));
        assert!(text.contains("SAM.gov Opportunities (rate_limited)"));
    }

    #[test]
    fn test_write_record() {
        let dir = tempfile::tempdir().unwrap();
        let alert = Alert::new("watch", vec![item("A", "one")], Vec::new());
        let path = alert.write_record(dir.path()).unwrap();
        assert!(path.exists());
        let content = std::fs::read_to_string(path).unwrap();
        let parsed: Alert = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.item_count, 1);
    }
}
