use crate::{
    Result,
    constants::{BLOCKED_NAME, MAX_READER_CHANNEL, MIN_READER_CHANNEL, UNKNOWN_NAME},
    error::Error,
};
use chrono::Utc;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Numeric credential id decoded from a reader frame.
///
/// Persisted stores key credentials by the decimal string form, so the
/// serialized representation is a string. Deserialization also accepts a
/// bare JSON integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CardId(u64);

impl CardId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CardId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CardId {
    type Err = Error;

    /// Parse a decimal card number. Surrounding whitespace is ignored.
    ///
    /// # Errors
    /// Returns `Error::MalformedInput` for anything that is not an unsigned
    /// 64-bit decimal integer.
    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(CardId)
            .map_err(|_| Error::malformed(format!("Invalid card number: {s:?}")))
    }
}

impl Serialize for CardId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CardId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CardIdVisitor;

        impl Visitor<'_> for CardIdVisitor {
            type Value = CardId;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal card number as string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<CardId, E> {
                Ok(CardId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<CardId, E> {
                u64::try_from(v)
                    .map(CardId)
                    .map_err(|_| E::custom(format!("negative card number: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<CardId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(CardIdVisitor)
    }
}

/// Reader channel number (1-based). Each channel has its own pulse decoder,
/// relay output and camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ReaderChannel(u8);

impl ReaderChannel {
    /// Create a channel with validation.
    ///
    /// # Errors
    /// Returns `Error::Configuration` if the number is outside
    /// `MIN_READER_CHANNEL..=MAX_READER_CHANNEL`.
    pub fn new(channel: u8) -> Result<Self> {
        if !(MIN_READER_CHANNEL..=MAX_READER_CHANNEL).contains(&channel) {
            return Err(Error::configuration(format!(
                "Reader channel must be {MIN_READER_CHANNEL}-{MAX_READER_CHANNEL}, got {channel}"
            )));
        }
        Ok(Self(channel))
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ReaderChannel {
    type Error = Error;

    fn try_from(channel: u8) -> Result<Self> {
        Self::new(channel)
    }
}

impl From<ReaderChannel> for u8 {
    fn from(channel: ReaderChannel) -> Self {
        channel.0
    }
}

impl fmt::Display for ReaderChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessOutcome {
    #[serde(rename = "Access Granted")]
    Granted,
    #[serde(rename = "Access Denied")]
    Denied,
    #[serde(rename = "Blocked")]
    Blocked,
}

impl AccessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "Access Granted",
            Self::Denied => "Access Denied",
            Self::Blocked => "Blocked",
        }
    }
}

impl fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record produced by every accepted scan.
///
/// Field names on the wire match the persisted transaction cache layout.
/// `id` makes remote appends idempotent: a record re-sent after an
/// ambiguous timeout overwrites itself instead of duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[serde(rename = "card_number")]
    pub card_id: CardId,

    #[serde(rename = "name")]
    pub resolved_name: String,

    #[serde(rename = "status")]
    pub outcome: AccessOutcome,

    /// Epoch seconds.
    pub timestamp: i64,

    #[serde(rename = "reader")]
    pub reader_channel: ReaderChannel,
}

impl Transaction {
    /// Create a transaction stamped with the current wall-clock time.
    pub fn new(
        card_id: CardId,
        resolved_name: impl Into<String>,
        outcome: AccessOutcome,
        reader_channel: ReaderChannel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            card_id,
            resolved_name: resolved_name.into(),
            outcome,
            timestamp: Utc::now().timestamp(),
            reader_channel,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Allow-list entry.
///
/// The registry keys entries by the decimal card string; `card_number`
/// repeats it so an entry is self-describing when exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "id", default)]
    pub external_id: String,

    #[serde(default)]
    pub ref_id: String,

    #[serde(rename = "name", default)]
    pub display_name: String,

    #[serde(default)]
    pub card_number: String,
}

impl Credential {
    pub fn new(
        card_id: CardId,
        external_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            ref_id: String::new(),
            display_name: display_name.into(),
            card_number: card_id.to_string(),
        }
    }

    #[must_use]
    pub fn with_ref_id(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = ref_id.into();
        self
    }

    /// Parsed card id, if `card_number` is numeric.
    pub fn card_id(&self) -> Option<CardId> {
        self.card_number.parse().ok()
    }

    /// Name to record for a granted scan; never empty.
    pub fn name_or_unknown(&self) -> &str {
        if self.display_name.trim().is_empty() {
            UNKNOWN_NAME
        } else {
            &self.display_name
        }
    }
}

/// Logical state of a relay output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// Pulses on granted scans.
    #[default]
    Normal,
    /// Output held open; scans do not pulse.
    OpenHold,
    /// Output held closed; scans do not pulse.
    CloseHold,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::OpenHold => write!(f, "OpenHold"),
            Self::CloseHold => write!(f, "CloseHold"),
        }
    }
}

/// Per-day outcome counters, keyed by ISO date in the stats store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounter {
    pub date: String,
    #[serde(default)]
    pub valid_entries: u64,
    #[serde(default)]
    pub invalid_entries: u64,
    #[serde(default)]
    pub blocked_entries: u64,
}

impl DayCounter {
    pub fn zero(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            valid_entries: 0,
            invalid_entries: 0,
            blocked_entries: 0,
        }
    }

    pub fn record(&mut self, outcome: AccessOutcome) {
        match outcome {
            AccessOutcome::Granted => self.valid_entries += 1,
            AccessOutcome::Denied => self.invalid_entries += 1,
            AccessOutcome::Blocked => self.blocked_entries += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.valid_entries + self.invalid_entries + self.blocked_entries
    }
}

/// Display name recorded for a scan, given its outcome.
pub fn outcome_name(outcome: AccessOutcome) -> &'static str {
    match outcome {
        AccessOutcome::Blocked => BLOCKED_NAME,
        AccessOutcome::Granted | AccessOutcome::Denied => UNKNOWN_NAME,
    }
}
