//! Human-readable rendering of findings.
//!
//! The formatter splits its output into the finding description and a footer
//! of metadata lines. Channels with message size caps truncate only the
//! description and keep the footer intact.

use chrono::{DateTime, Utc};

use crate::finding::Finding;

const TIME_FORMAT: &str = "%H:%M:%S%.3f %Z";

/// Warning banner inserted when a message had to be truncated.
pub fn truncation_banner(limit: usize) -> String {
    format!("*Warn: Msg >={limit}, pls review description message*")
}

/// Deployment-specific formatting parameters.
#[derive(Debug, Clone)]
pub struct Formatter {
    source: String,
    block_explorer: String,
}

impl Formatter {
    /// `block_explorer` is the explorer base URL, e.g. `https://etherscan.io`.
    pub fn new(source: impl Into<String>, block_explorer: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            block_explorer: block_explorer.into().trim_end_matches('/').to_string(),
        }
    }

    /// Format a finding stamped with the current server time.
    pub fn format(&self, finding: &Finding) -> FormattedFinding {
        self.format_at(finding, Utc::now())
    }

    /// Format a finding with an explicit server timestamp.
    pub fn format_at(&self, finding: &Finding, now: DateTime<Utc>) -> FormattedFinding {
        let mut lines = Vec::with_capacity(8);

        match finding.alert_link.as_deref() {
            Some(link) if !link.is_empty() => {
                lines.push(format!("[Alert Id:]({}) {}", link, finding.alert_id))
            }
            _ => lines.push(format!("Alert Id: {}", finding.alert_id)),
        }
        lines.push(format!("Bot name: {}", finding.bot_name));
        lines.push(format!("Team: {}", finding.team));

        if let Some(block) = finding.block_number {
            lines.push(format!(
                "Block number: [{block}]({}/block/{block})",
                self.block_explorer
            ));
        }
        if let Some(tx_hash) = finding.tx_hash.as_deref().filter(|h| !h.is_empty()) {
            lines.push(format!(
                "Tx hash: [{}]({}/tx/{})",
                shorten_hex(tx_hash),
                self.block_explorer,
                tx_hash
            ));
        }

        lines.push(format!("Source: {}", self.source));
        lines.push(format!("Server timestamp: {}", now.format(TIME_FORMAT)));

        if let Some(block_time) = finding
            .block_timestamp
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        {
            lines.push(format!("Block timestamp: {}", block_time.format(TIME_FORMAT)));
        }

        FormattedFinding {
            title: None,
            description: finding.description.clone(),
            footer: lines.join("\n"),
        }
    }
}

/// Formatter output, kept in parts so the description can be truncated alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedFinding {
    title: Option<String>,
    description: String,
    footer: String,
}

impl FormattedFinding {
    /// Prepend a title block (used by channels that show the finding name).
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn footer(&self) -> &str {
        &self.footer
    }

    /// Render the complete message.
    pub fn render(&self) -> String {
        self.assemble(&self.description, None)
    }

    /// Render the message so it holds at most `limit` characters.
    ///
    /// Oversized messages get a truncated description followed by the
    /// truncation banner, then the untouched footer.
    pub fn render_within(&self, limit: usize) -> String {
        let full = self.render();
        if full.chars().count() <= limit {
            return full;
        }

        let banner = truncation_banner(limit);
        let fixed = self.assemble("", Some(&banner)).chars().count();
        let budget = limit.saturating_sub(fixed);
        let description = truncate_chars(&self.description, budget);

        let message = self.assemble(&description, Some(&banner));
        if message.chars().count() > limit {
            // Footer alone exceeds the cap.
            return truncate_chars(&message, limit);
        }
        message
    }

    fn assemble(&self, description: &str, banner: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(title);
            out.push_str("\n\n");
        }
        out.push_str(description);
        out.push_str("\n\n");
        if let Some(banner) = banner {
            out.push_str(banner);
            out.push_str("\n\n");
        }
        out.push_str(&self.footer);
        out
    }
}

/// Shorten a hex string for display: `0xabcdef...123` becomes `xabc...123`.
///
/// Strings of ten characters or fewer are returned unchanged.
pub fn shorten_hex(hex: &str) -> String {
    let chars: Vec<char> = hex.chars().collect();
    if chars.len() <= 10 {
        return hex.to_string();
    }
    let head: String = chars[2..5].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("x{head}...{tail}")
}

/// Abbreviate a finding fingerprint for log lines: first four and last four
/// characters.
pub fn short_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return key.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
