//! Discord export archive integration
//!
//! Searches a local directory of exported Discord messages (one JSONL file
//! per channel export). The only non-HTTP source: everything happens on
//! the local filesystem, and keyword matching uses the shared Boolean
//! reduction since there is no upstream query engine at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{
    elapsed_ms, generate_params, matches_keyword, parse_boolean_keyword, Integration,
    IntegrationContext,
};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
    SourceErrorKind, SourceMetadata,
};

const SOURCE_ID: &str = "discord_archive";
const DESCRIPTION_TRUNCATE: usize = 500;

const QUERY_PROMPT: &str = "You generate search parameters for a local archive of \
exported Discord messages. Given a research question, produce a JSON object \
with:\n\
- keyword: terms to match in message text; quoted phrases and NOT exclusions \
are supported\n\
- channel (optional): restrict to one channel name\n\
- author (optional): restrict to one author handle\n\
The archive holds community chat about defense and space topics. If chat \
logs cannot help with the question, set not_applicable to true and explain \
in reason. Output only the JSON object.";

pub struct DiscordArchiveIntegration {
    ctx: IntegrationContext,
}

impl DiscordArchiveIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }

    fn archive_dir(&self) -> Option<PathBuf> {
        self.ctx.settings.archive_dir.as_ref().map(PathBuf::from)
    }
}

/// One exported message line
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchivedMessage {
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

impl ArchivedMessage {
    fn jump_url(&self) -> String {
        match (&self.guild_id, &self.channel_id, &self.message_id) {
            (Some(guild), Some(channel), Some(message)) => {
                format!("https://discord.com/channels/{}/{}/{}", guild, channel, message)
            }
            _ => String::new(),
        }
    }
}

fn scan_archive(
    dir: &Path,
    params: &QueryParams,
) -> Result<Vec<ResultItem>, SourceError> {
    let terms = parse_boolean_keyword(params.get_str("keyword").unwrap_or_default());
    let channel_filter = params.get_str("channel").map(str::to_lowercase);
    let author_filter = params.get_str("author").map(str::to_lowercase);

    let entries = std::fs::read_dir(dir).map_err(|e| {
        SourceError::new(
            SourceErrorKind::ConfigMissing,
            SOURCE_ID,
            format!("archive directory {:?} unreadable: {}", dir, e),
        )
    })?;

    let mut items = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("[DiscordArchive] Skipping unreadable {:?}: {}", path, e);
                continue;
            }
        };
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let message: ArchivedMessage = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(_) => continue,
            };
            let text = message.content.clone().unwrap_or_default();
            if text.is_empty() || !matches_keyword(&text, &terms) {
                continue;
            }
            if let Some(ref wanted) = channel_filter {
                if message.channel.as_deref().map(str::to_lowercase).as_deref()
                    != Some(wanted.as_str())
                {
                    continue;
                }
            }
            if let Some(ref wanted) = author_filter {
                if message.author.as_deref().map(str::to_lowercase).as_deref()
                    != Some(wanted.as_str())
                {
                    continue;
                }
            }

            let mut description = text.clone();
            if description.len() > DESCRIPTION_TRUNCATE {
                description.truncate(
                    (0..=DESCRIPTION_TRUNCATE)
                        .rev()
                        .find(|&i| description.is_char_boundary(i))
                        .unwrap_or(0),
                );
            }
            let title = match &message.channel {
                Some(channel) => format!("#{}: {}", channel, first_words(&text, 10)),
                None => first_words(&text, 10),
            };
            items.push(ResultItem {
                title,
                url: message.jump_url(),
                date: message.timestamp.clone().unwrap_or_default(),
                description,
                author: message.author.clone(),
                source_id: SOURCE_ID.to_string(),
                raw: serde_json::to_value(&message).unwrap_or_default(),
            });
        }
    }

    // Newest first; exported timestamps are RFC3339 so string order works
    items.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(items)
}

fn first_words(text: &str, count: usize) -> String {
    text.split_whitespace().take(count).collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Integration for DiscordArchiveIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "Discord Archive".to_string(),
            category: SourceCategory::SocialChatArchive,
            requires_credential: false,
            estimated_latency_ms: Some(50),
            estimated_cost_per_call: None,
            daily_call_limit: None,
            description: "A local archive of exported Discord messages from defense and \
                          space community servers. Informal chat; occasionally surfaces \
                          details hours before any public reporting."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn is_relevant(&self, _question: &str) -> bool {
        // Without a configured archive there is nothing to search
        self.archive_dir().map(|dir| dir.is_dir()).unwrap_or(false)
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("keyword", json!({ "type": "string", "minLength": 1 })),
                ("channel", json!({ "type": "string" })),
                ("author", json!({ "type": "string" })),
            ],
            &["keyword"],
        );
        match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema).await? {
            Ok(params) => Ok(GeneratedQuery::Params(params)),
            Err(reason) => Ok(GeneratedQuery::NotApplicable { reason }),
        }
    }

    async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult {
        let meta = self.metadata();
        let started = Instant::now();

        let Some(dir) = self.archive_dir() else {
            return QueryResult::failure(
                &meta,
                params.clone(),
                SourceError::new(
                    SourceErrorKind::ConfigMissing,
                    SOURCE_ID,
                    "integrations.discord_archive.archive_dir is not configured",
                ),
                0,
            );
        };

        match scan_archive(&dir, params) {
            Ok(items) => {
                let total = items.len() as u64;
                QueryResult::ok(&meta, params.clone(), total, items, limit, elapsed_ms(started))
            }
            Err(error) => QueryResult::failure(&meta, params.clone(), error, elapsed_ms(started)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_archive(dir: &Path, name: &str, lines: &[serde_json::Value]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn params(keyword: &str) -> QueryParams {
        let mut params = QueryParams::new();
        params.set("keyword", json!(keyword));
        params
    }

    #[test]
    fn test_scan_matches_and_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(
            dir.path(),
            "rocketry.jsonl",
            &[
                json!({"guild_id": "1", "channel_id": "2", "channel": "launch-chat",
                       "author": "skywatcher", "content": "static fire test confirmed at the cape",
                       "timestamp": "2026-07-01T10:00:00Z", "message_id": "100"}),
                json!({"channel": "launch-chat", "author": "other",
                       "content": "static fire window moved again",
                       "timestamp": "2026-07-02T10:00:00Z", "message_id": "101"}),
                json!({"channel": "off-topic", "author": "other",
                       "content": "anyone watching the game tonight",
                       "timestamp": "2026-07-03T10:00:00Z", "message_id": "102"}),
            ],
        );

        let items = scan_archive(dir.path(), &params("\"static fire\"")).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].date > items[1].date);
        assert_eq!(
            items[1].url,
            "https://discord.com/channels/1/2/100"
        );
        assert!(items[1].title.starts_with("#launch-chat:"));
    }

    #[test]
    fn test_scan_applies_not_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(
            dir.path(),
            "chat.jsonl",
            &[
                json!({"channel": "news", "author": "alice",
                       "content": "launch scrubbed due to weather",
                       "timestamp": "2026-07-01T00:00:00Z"}),
                json!({"channel": "news", "author": "bob",
                       "content": "launch confirmed for tonight",
                       "timestamp": "2026-07-01T01:00:00Z"}),
            ],
        );

        let items = scan_archive(dir.path(), &params("launch NOT scrubbed")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].author.as_deref(), Some("bob"));

        let mut scoped = params("launch");
        scoped.set("author", json!("ALICE"));
        let items = scan_archive(dir.path(), &scoped).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].author.as_deref(), Some("alice"));
    }

    #[test]
    fn test_missing_dir_is_classified() {
        let err = scan_archive(Path::new("/nonexistent/archive"), &params("x")).unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::ConfigMissing);
    }
}
