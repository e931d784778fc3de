//! Image archiving: message filtering and archive path derivation.
//!
//! Layout: `<base>/<display name>/<YYYYMMDD>/<unix>_<HHMMSS>.jpg`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local, Utc};
use tracing::{debug, info, warn};

use crate::client::WechatClient;
use crate::config::Config;
use crate::message::{InboundMessage, MessageKind};

const IMAGE_EXTENSION: &str = "jpg";
const UNKNOWN_FOLDER: &str = "unknown";

/// Why a message was skipped without doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotImage(MessageKind),
    SelfSent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Ignored(SkipReason),
    SenderUnresolved { sender: String },
    Saved { path: PathBuf },
    SaveFailed { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub base_path: PathBuf,
    pub skip_self_messages: bool,
    /// Keep non-ASCII letters and digits in folder names
    pub unicode_names: bool,
}

impl ArchiveSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_path: config.effective_base_path(),
            skip_self_messages: config.skip_self_messages,
            unicode_names: config.unicode_folder_names,
        }
    }
}

pub struct Archiver<'a, C> {
    client: &'a C,
    settings: ArchiveSettings,
    clock: fn() -> i64,
}

impl<'a, C: WechatClient> Archiver<'a, C> {
    pub fn new(client: &'a C, settings: ArchiveSettings) -> Self {
        Self {
            client,
            settings,
            clock: unix_now,
        }
    }

    /// Overrides the clock used for the `<unix>` part of file names.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// Archives one message.
    ///
    /// Filtered messages and lookup misses are reported as outcomes and
    /// never touch the filesystem.
    ///
    /// # Errors
    /// Returns an error if the timestamp is out of range or the target
    /// directory cannot be created.
    pub async fn process(&self, message: &InboundMessage) -> Result<ArchiveOutcome> {
        if !message.kind.is_image() {
            debug!("Skipping non-image message type: {}", message.kind);
            return Ok(ArchiveOutcome::Ignored(SkipReason::NotImage(message.kind)));
        }

        if self.settings.skip_self_messages && message.is_self {
            debug!("Skipping self-sent message {}", message.id);
            return Ok(ArchiveOutcome::Ignored(SkipReason::SelfSent));
        }

        let Some(sender_name) = self.client.lookup_display_name(&message.sender).await else {
            return Ok(ArchiveOutcome::SenderUnresolved {
                sender: message.sender.clone(),
            });
        };
        info!("Processing image from: {sender_name}");

        let display_name = match message.origin.room_id() {
            Some(room_id) => match self.client.lookup_display_name(room_id).await {
                Some(group_name) => {
                    info!("Group message from: {group_name}");
                    format!("{group_name}_{sender_name}")
                }
                None => {
                    warn!("Cannot get group info for room {room_id}, using sender name only");
                    sender_name
                }
            },
            None => sender_name,
        };

        let folder = folder_name(&display_name, &message.sender, self.settings.unicode_names);
        let message_time = local_time(message.timestamp)?;
        let dir = self
            .settings
            .base_path
            .join(&folder)
            .join(date_folder(&message_time));
        ensure_dir(&dir)?;

        let file_name = archive_file_name((self.clock)(), &message_time);
        let path = unique_path(&dir, &file_name);

        if self.client.save_image(message, &path).await {
            Ok(ArchiveOutcome::Saved { path })
        } else {
            Ok(ArchiveOutcome::SaveFailed { path })
        }
    }
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Removes every character that is not alphanumeric, a space, `-` or `_`.
///
/// Order is preserved; nothing is replaced. With `unicode` set, non-ASCII
/// letters and digits are kept as well.
pub fn sanitize_display_name(name: &str, unicode: bool) -> String {
    name.chars()
        .filter(|c| {
            let alnum = if unicode {
                c.is_alphanumeric()
            } else {
                c.is_ascii_alphanumeric()
            };
            alnum || matches!(c, ' ' | '-' | '_')
        })
        .collect()
}

/// Folder for a display name, falling back to the sender id when the
/// sanitized name has nothing left.
fn folder_name(display_name: &str, sender: &str, unicode: bool) -> String {
    let sanitized = sanitize_display_name(display_name, unicode);
    if !sanitized.trim().is_empty() {
        return sanitized;
    }
    let fallback = sanitize_display_name(sender, false);
    if fallback.trim().is_empty() {
        UNKNOWN_FOLDER.to_string()
    } else {
        fallback
    }
}

/// Converts unix seconds to local wall-clock time.
///
/// # Errors
/// Returns an error if the timestamp is out of range.
pub fn local_time(timestamp: i64) -> Result<DateTime<Local>> {
    DateTime::from_timestamp(timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .ok_or_else(|| anyhow!("Message timestamp {timestamp} is out of range"))
}

/// `YYYYMMDD` folder for a message time.
pub fn date_folder(time: &DateTime<Local>) -> String {
    time.format("%Y%m%d").to_string()
}

/// `<now>_<HHMMSS>.jpg`
pub fn archive_file_name(now_unix: i64, time: &DateTime<Local>) -> String {
    format!("{now_unix}_{}.{IMAGE_EXTENSION}", time.format("%H%M%S"))
}

/// Creates `path` and any missing parents. Returns true if it was created.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))?;
    info!("Created directory: {}", path.display());
    Ok(true)
}

/// Returns `dir/file_name`, or `dir/<stem>_<n>.<ext>` if that is taken.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let ext = name.extension().and_then(|e| e.to_str());

    let mut n: u32 = 1;
    loop {
        let next = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(next);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
