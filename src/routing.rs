//! Routing table: which findings go to which channels.
//!
//! The table is a YAML document:
//!
//! ```yaml
//! severity_levels: [Unknown, Info, Low, Medium, High, Critical]
//! telegram_channels:
//!   - id: protocol_tg
//!     description: Protocol alerts
//!     bot_token: ${TELEGRAM_BOT_TOKEN}
//!     chat_id: "1001234567"
//! discord_channels:
//!   - id: protocol_discord
//!     description: Protocol alerts
//!     webhook_url: https://discord.com/api/webhooks/...
//! opsgenie_channels:
//!   - id: oncall
//!     description: On-call rotation
//!     api_key: ${OPSGENIE_API_KEY}
//! consumers:
//!   - consumerName: discord
//!     type: Discord
//!     channel_id: protocol_discord
//!     severities: [High, Critical]
//!     by_quorum: true
//!     subjects: [findings.protocol.steth]
//! ```
//!
//! Secret fields written as `${VAR}` are read from the environment at load
//! time. Loading validates the whole table; an invalid table is fatal.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::finding::Severity;
use crate::sender::ChannelKind;

/// Minimum number of dot-separated segments in a subject: `<root>.<team>.<bot>`.
pub const MIN_SUBJECT_SEGMENTS: usize = 3;

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RoutingError>;

/// Errors raised while loading or validating the routing table.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Failed to read routing table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse routing table: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Severity level '{0}' is not a known severity")]
    InvalidSeverityLevel(String),

    #[error("Duplicate {kind} channel id '{id}'")]
    DuplicateChannel { kind: ChannelKind, id: String },

    #[error("Channel '{channel}' references environment variable '{var}' which is not set")]
    MissingSecret { channel: String, var: String },

    #[error("Duplicate consumer name '{0}'")]
    DuplicateConsumer(String),

    #[error("Consumer name '{0}' must be non-empty and must not contain whitespace, '.', '*' or '>'")]
    InvalidConsumerName(String),

    #[error("Consumer '{consumer}' has unrecognized channel type '{kind}'")]
    UnknownChannelType { consumer: String, kind: String },

    #[error("Consumer '{consumer}' references unknown {kind} channel '{channel_id}'")]
    UnknownChannel {
        consumer: String,
        kind: ChannelKind,
        channel_id: String,
    },

    #[error("Consumer '{consumer}' uses severity '{severity}' outside the declared severity levels")]
    UnknownSeverity { consumer: String, severity: String },

    #[error("Consumer '{0}' has no severities")]
    NoSeverities(String),

    #[error("Consumer '{0}' has no subjects")]
    NoSubjects(String),

    #[error("Consumer '{consumer}' subject '{subject}' must look like <root>.<team>.<bot>")]
    InvalidSubject { consumer: String, subject: String },

    #[error("Runtime consumer '{0}' is produced by more than one subject")]
    DuplicateRuntimeConsumer(String),
}

// ============================================================================
// Document shape
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSeverityLevel {
    Name(String),
    Entry { id: String },
}

impl RawSeverityLevel {
    fn name(&self) -> &str {
        match self {
            RawSeverityLevel::Name(name) => name,
            RawSeverityLevel::Entry { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTelegramChannel {
    id: String,
    #[serde(default)]
    description: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct RawDiscordChannel {
    id: String,
    #[serde(default)]
    description: String,
    webhook_url: String,
}

#[derive(Debug, Deserialize)]
struct RawOpsGenieChannel {
    id: String,
    #[serde(default)]
    description: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RawConsumer {
    #[serde(rename = "consumerName")]
    consumer_name: String,
    #[serde(rename = "type")]
    kind: String,
    channel_id: String,
    #[serde(default)]
    severities: Vec<String>,
    #[serde(default)]
    by_quorum: bool,
    #[serde(default)]
    subjects: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRoutingTable {
    #[serde(default)]
    severity_levels: Vec<RawSeverityLevel>,
    #[serde(default)]
    telegram_channels: Vec<RawTelegramChannel>,
    #[serde(default)]
    discord_channels: Vec<RawDiscordChannel>,
    #[serde(default)]
    opsgenie_channels: Vec<RawOpsGenieChannel>,
    #[serde(default)]
    consumers: Vec<RawConsumer>,
}

// ============================================================================
// Validated model
// ============================================================================

/// Destination and secrets of a channel.
#[derive(Clone, PartialEq, Eq)]
pub enum ChannelTarget {
    Telegram { bot_token: String, chat_id: String },
    Discord { webhook_url: String },
    OpsGenie { api_key: String },
}

impl ChannelTarget {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelTarget::Telegram { .. } => ChannelKind::Telegram,
            ChannelTarget::Discord { .. } => ChannelKind::Discord,
            ChannelTarget::OpsGenie { .. } => ChannelKind::OpsGenie,
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ChannelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTarget")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ChannelDef {
    pub id: String,
    pub description: String,
    pub target: ChannelTarget,
}

/// A validated consumer entry.
#[derive(Debug, Clone)]
pub struct ConsumerDef {
    pub consumer_name: String,
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    pub subjects: Vec<String>,
    pub severities: BTreeSet<Severity>,
    pub by_quorum: bool,
}

/// One consumer bound to one subject.
#[derive(Debug, Clone)]
pub struct RuntimeConsumerDef {
    /// `{team}_{consumer_name}_{bot}`; also the durable binding name.
    pub name: String,
    pub consumer_name: String,
    pub subject: String,
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    pub severities: HashSet<Severity>,
    pub by_quorum: bool,
}

/// Runtime consumer name for a consumer bound to a subject, or `None` when the
/// subject has fewer than three segments or is not a literal subject.
pub fn runtime_consumer_name(consumer_name: &str, subject: &str) -> Option<String> {
    let segments: Vec<&str> = subject.split('.').collect();
    if segments.len() < MIN_SUBJECT_SEGMENTS || segments.iter().any(|s| !is_literal_token(s)) {
        return None;
    }
    Some(format!("{}_{}_{}", segments[1], consumer_name, segments[2]))
}

/// Wildcards and whitespace cannot appear in a durable binding name.
fn is_literal_token(token: &str) -> bool {
    !token.is_empty()
        && !token
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '*' | '>'))
}

/// A validated routing table.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    severity_levels: Vec<Severity>,
    channels: HashMap<(ChannelKind, String), ChannelDef>,
    consumers: Vec<ConsumerDef>,
    runtime: Vec<RuntimeConsumerDef>,
}

impl RoutingTable {
    /// Read and validate a routing table file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RoutingError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_yaml_str(&raw)?;

        info!(
            path = %path.display(),
            channels = table.channels.len(),
            consumers = table.consumers.len(),
            runtime_consumers = table.runtime.len(),
            "Routing table loaded"
        );
        Ok(table)
    }

    /// Parse and validate a routing table, resolving secrets from the process
    /// environment.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Self::from_yaml_str_with_env(raw, |var| std::env::var(var).ok())
    }

    /// Parse and validate with an explicit environment lookup.
    pub fn from_yaml_str_with_env<F>(raw: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawRoutingTable = serde_yaml::from_str(raw)?;
        Self::validate(raw, &env)
    }

    fn validate<F>(raw: RawRoutingTable, env: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let severity_levels = raw
            .severity_levels
            .iter()
            .map(|level| {
                level
                    .name()
                    .parse::<Severity>()
                    .map_err(|_| RoutingError::InvalidSeverityLevel(level.name().to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut channels = HashMap::new();
        let mut add_channel = |def: ChannelDef| -> Result<()> {
            let key = (def.target.kind(), def.id.clone());
            if channels.contains_key(&key) {
                return Err(RoutingError::DuplicateChannel {
                    kind: key.0,
                    id: key.1,
                });
            }
            channels.insert(key, def);
            Ok(())
        };

        for ch in raw.telegram_channels {
            add_channel(ChannelDef {
                target: ChannelTarget::Telegram {
                    bot_token: resolve_secret(&ch.id, &ch.bot_token, env)?,
                    chat_id: resolve_secret(&ch.id, &ch.chat_id, env)?,
                },
                id: ch.id,
                description: ch.description,
            })?;
        }
        for ch in raw.discord_channels {
            add_channel(ChannelDef {
                target: ChannelTarget::Discord {
                    webhook_url: resolve_secret(&ch.id, &ch.webhook_url, env)?,
                },
                id: ch.id,
                description: ch.description,
            })?;
        }
        for ch in raw.opsgenie_channels {
            add_channel(ChannelDef {
                target: ChannelTarget::OpsGenie {
                    api_key: resolve_secret(&ch.id, &ch.api_key, env)?,
                },
                id: ch.id,
                description: ch.description,
            })?;
        }

        let mut consumers = Vec::with_capacity(raw.consumers.len());
        let mut names = HashSet::new();
        for c in raw.consumers {
            if !names.insert(c.consumer_name.clone()) {
                return Err(RoutingError::DuplicateConsumer(c.consumer_name));
            }
            consumers.push(validate_consumer(c, &severity_levels, &channels)?);
        }

        let mut runtime = Vec::new();
        let mut runtime_names = HashSet::new();
        for consumer in &consumers {
            for subject in &consumer.subjects {
                let name = runtime_consumer_name(&consumer.consumer_name, subject).ok_or_else(
                    || RoutingError::InvalidSubject {
                        consumer: consumer.consumer_name.clone(),
                        subject: subject.clone(),
                    },
                )?;
                if !runtime_names.insert(name.clone()) {
                    return Err(RoutingError::DuplicateRuntimeConsumer(name));
                }
                runtime.push(RuntimeConsumerDef {
                    name,
                    consumer_name: consumer.consumer_name.clone(),
                    subject: subject.clone(),
                    channel_id: consumer.channel_id.clone(),
                    channel_kind: consumer.channel_kind,
                    severities: consumer.severities.iter().copied().collect(),
                    by_quorum: consumer.by_quorum,
                });
            }
        }

        Ok(Self {
            severity_levels,
            channels,
            consumers,
            runtime,
        })
    }

    pub fn severity_levels(&self) -> &[Severity] {
        &self.severity_levels
    }

    pub fn consumers(&self) -> &[ConsumerDef] {
        &self.consumers
    }

    /// One entry per (consumer, subject) pair, in table order.
    pub fn runtime_consumers(&self) -> &[RuntimeConsumerDef] {
        &self.runtime
    }

    pub fn channel(&self, kind: ChannelKind, id: &str) -> Option<&ChannelDef> {
        self.channels.get(&(kind, id.to_string()))
    }

    /// Every subject any consumer listens on, deduplicated.
    pub fn subjects(&self) -> BTreeSet<String> {
        self.runtime.iter().map(|r| r.subject.clone()).collect()
    }
}

fn validate_consumer(
    c: RawConsumer,
    severity_levels: &[Severity],
    channels: &HashMap<(ChannelKind, String), ChannelDef>,
) -> Result<ConsumerDef> {
    let name = &c.consumer_name;
    if name.is_empty()
        || name
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '.' | '*' | '>'))
    {
        return Err(RoutingError::InvalidConsumerName(name.clone()));
    }

    let channel_kind: ChannelKind =
        c.kind
            .parse()
            .map_err(|_| RoutingError::UnknownChannelType {
                consumer: name.clone(),
                kind: c.kind.clone(),
            })?;

    if !channels.contains_key(&(channel_kind, c.channel_id.clone())) {
        return Err(RoutingError::UnknownChannel {
            consumer: name.clone(),
            kind: channel_kind,
            channel_id: c.channel_id,
        });
    }

    if c.severities.is_empty() {
        return Err(RoutingError::NoSeverities(name.clone()));
    }
    let mut severities = BTreeSet::new();
    for raw in &c.severities {
        let severity = raw
            .parse::<Severity>()
            .ok()
            .filter(|s| severity_levels.contains(s))
            .ok_or_else(|| RoutingError::UnknownSeverity {
                consumer: name.clone(),
                severity: raw.clone(),
            })?;
        severities.insert(severity);
    }

    if c.subjects.is_empty() {
        return Err(RoutingError::NoSubjects(name.clone()));
    }
    for subject in &c.subjects {
        if runtime_consumer_name(name, subject).is_none() {
            return Err(RoutingError::InvalidSubject {
                consumer: name.clone(),
                subject: subject.clone(),
            });
        }
    }

    Ok(ConsumerDef {
        consumer_name: c.consumer_name,
        channel_id: c.channel_id,
        channel_kind,
        subjects: c.subjects,
        severities,
        by_quorum: c.by_quorum,
    })
}

/// Resolve `${VAR}` references; any other value is taken literally.
fn resolve_secret<F>(channel: &str, value: &str, env: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let trimmed = value.trim();
    match trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => env(var).ok_or_else(|| RoutingError::MissingSecret {
            channel: channel.to_string(),
            var: var.to_string(),
        }),
        None => Ok(value.to_string()),
    }
}
