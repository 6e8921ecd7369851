use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_SHORTCUT: &str = "º";
pub const DEFAULT_MESSAGE: &str = "Hello World from DMS!";

/// Closed enumeration of the six persisted configuration fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    DiscordToken,
    DiscordUserId,
    ServerId,
    ChannelId,
    Shortcut,
    Message,
}

impl FieldKey {
    pub const ALL: [FieldKey; 6] = [
        FieldKey::DiscordToken,
        FieldKey::DiscordUserId,
        FieldKey::ServerId,
        FieldKey::ChannelId,
        FieldKey::Shortcut,
        FieldKey::Message,
    ];

    /// The key written to the config file.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::DiscordToken => "discord_token",
            FieldKey::DiscordUserId => "discord_user_id",
            FieldKey::ServerId => "latest_server_id",
            FieldKey::ChannelId => "latest_channel_id",
            FieldKey::Shortcut => "latest_shortcut",
            FieldKey::Message => "latest_message",
        }
    }

    /// Value substituted when the stored value is absent or blank.
    pub fn default_value(self) -> &'static str {
        match self {
            FieldKey::Shortcut => DEFAULT_SHORTCUT,
            FieldKey::Message => DEFAULT_MESSAGE,
            _ => "",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        FieldKey::ALL
            .into_iter()
            .find(|key| key.as_str() == raw.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = FieldKey::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown field '{raw}' (expected one of: {})", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub label: &'static str,
    pub required: bool,
}

/// Declaration order drives both the settings rows and the
/// missing-fields report.
pub const FIELDS: [FieldSpec; 6] = [
    FieldSpec {
        key: FieldKey::DiscordToken,
        label: "Discord Token",
        required: true,
    },
    FieldSpec {
        key: FieldKey::DiscordUserId,
        label: "Discord User Id",
        required: true,
    },
    FieldSpec {
        key: FieldKey::ServerId,
        label: "Server Id",
        required: true,
    },
    FieldSpec {
        key: FieldKey::ChannelId,
        label: "Channel Id",
        required: true,
    },
    FieldSpec {
        key: FieldKey::Shortcut,
        label: "Shortcut",
        required: true,
    },
    FieldSpec {
        key: FieldKey::Message,
        label: "Message",
        required: true,
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRecord {
    discord_token: String,
    discord_user_id: String,
    server_id: String,
    channel_id: String,
    shortcut: String,
    message: String,
}

impl ConfigRecord {
    pub fn get(&self, key: FieldKey) -> &str {
        match key {
            FieldKey::DiscordToken => &self.discord_token,
            FieldKey::DiscordUserId => &self.discord_user_id,
            FieldKey::ServerId => &self.server_id,
            FieldKey::ChannelId => &self.channel_id,
            FieldKey::Shortcut => &self.shortcut,
            FieldKey::Message => &self.message,
        }
    }

    fn set(&mut self, key: FieldKey, value: String) {
        match key {
            FieldKey::DiscordToken => self.discord_token = value,
            FieldKey::DiscordUserId => self.discord_user_id = value,
            FieldKey::ServerId => self.server_id = value,
            FieldKey::ChannelId => self.channel_id = value,
            FieldKey::Shortcut => self.shortcut = value,
            FieldKey::Message => self.message = value,
        }
    }

    fn normalize(&mut self) {
        for key in FieldKey::ALL {
            let trimmed = self.get(key).trim().to_string();
            if trimmed.is_empty() {
                self.set(key, key.default_value().to_string());
            } else {
                self.set(key, trimmed);
            }
        }
    }
}

/// Owns the on-disk `KEY="value"` file and the normalized in-memory copy.
///
/// Single-process, single-writer: concurrent external edits are not merged,
/// the last writer wins after the next `load()`.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    record: ConfigRecord,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            path: path.into(),
            record: ConfigRecord::default(),
        };
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    pub fn get(&self, key: FieldKey) -> &str {
        self.record.get(key)
    }

    /// Re-reads the backing file. An absent or unreadable file falls back to
    /// defaults; this never fails to the caller.
    pub fn load(&mut self) {
        let mut record = ConfigRecord::default();
        if let Ok(text) = std::fs::read_to_string(&self.path) {
            for line in text.lines() {
                if let Some((key, value)) = parse_line(line) {
                    record.set(key, value);
                }
            }
        }
        record.normalize();
        self.record = record;
    }

    /// Applies a sparse update, writes all six fields back in declaration
    /// order, then reloads so the in-memory state is re-normalized from the
    /// just-written file.
    pub fn save(&mut self, updates: &[(FieldKey, String)]) -> Result<()> {
        let mut record = self.record.clone();
        for (key, value) in updates {
            record.set(*key, value.trim().to_string());
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create config directory {}",
                    parent.display()
                )
            })?;
        }

        let mut contents = String::new();
        for key in FieldKey::ALL {
            contents.push_str(key.as_str());
            contents.push_str("=\"");
            contents.push_str(&escape_value(record.get(key)));
            contents.push_str("\"\n");
        }

        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write config file {}", self.path.display()))?;

        self.load();
        Ok(())
    }

    /// Current values keyed by their persisted names, in declaration order.
    pub fn get_all(&self) -> Vec<(&'static str, String)> {
        FieldKey::ALL
            .into_iter()
            .map(|key| (key.as_str(), self.record.get(key).to_string()))
            .collect()
    }
}

/// Each value must stay on one file line, so newlines are escaped along
/// with quotes and the escape character itself.
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            // Files written before backslash escaping may contain bare
            // backslashes; keep them as-is.
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_line(line: &str) -> Option<(FieldKey, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, rest) = line.split_once('=')?;
    let key = key.trim().parse::<FieldKey>().ok()?;

    let rest = rest.trim();
    let inner = rest.strip_prefix('"')?.strip_suffix('"')?;
    Some((key, unescape_value(inner)))
}

/// Labels of required fields whose trimmed value is empty, in declaration
/// order of the field table.
pub fn missing_required_labels(store: &ConfigStore) -> Vec<String> {
    FIELDS
        .iter()
        .filter(|spec| spec.required && store.get(spec.key).trim().is_empty())
        .map(|spec| spec.label.to_string())
        .collect()
}

/// Short display form for menus and the CLI: tokens are masked, long
/// messages truncated.
pub fn preview_value(key: FieldKey, value: &str) -> String {
    let value = value.trim();
    match key {
        FieldKey::DiscordToken if !value.is_empty() => {
            let count = value.chars().count();
            if count > 10 {
                let head: String = value.chars().take(4).collect();
                let tail: String = value.chars().skip(count - 4).collect();
                format!("{head}...{tail}")
            } else {
                "***".to_string()
            }
        }
        FieldKey::Message if value.chars().count() > 40 => {
            let head: String = value.chars().take(37).collect();
            format!("{head}...")
        }
        _ => value.to_string(),
    }
}
