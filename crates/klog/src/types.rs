//! Core types for the logging system.
//!
//! This module provides:
//! - [`Priority`]: Numeric filtering threshold, independent of level
//! - [`Level`] / [`LevelMask`]: Severity categories and sets of them
//! - [`Source`] / [`SourceMask`]: Origin categories and sets of them
//! - [`LogEvent`]: An immutable record of a single log occurrence
//!
//! A [`LogEvent`] serializes to one human-readable line:
//!
//! ```text
//! 2024-05-01 12:00:00.123 [INFO] APP | main.rs.42 demo > started
//! ```

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// `strftime` pattern of the timestamp prefix of a stored line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Byte length of a formatted timestamp (`YYYY-MM-DD HH:mm:ss.SSS`).
pub const TIMESTAMP_LEN: usize = 23;

/// Numeric priority of an event. Higher is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Default priority of [`Level::Fault`].
    pub const HIGHEST: Self = Self(5);
    /// Default priority of [`Level::Error`].
    pub const HIGHER: Self = Self(4);
    /// Default priority of [`Level::Warn`].
    pub const HIGH: Self = Self(3);
    /// Default priority of [`Level::Info`].
    pub const LOW: Self = Self(2);
    /// Default priority of [`Level::Debug`].
    pub const LOWER: Self = Self(1);
    /// Default priority of [`Level::Util`].
    pub const LOWEST: Self = Self(0);
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOWEST
    }
}

/// Severity or category of an event. Each level is a single bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Unrecoverable failures
    Fault,
    /// Error conditions
    Error,
    /// Warning conditions
    Warn,
    /// General information
    Info,
    /// Debugging information
    Debug,
    /// Utilization samples
    Util,
}

impl Level {
    /// All levels, most to least severe.
    pub const ALL: [Self; 6] = [
        Self::Fault,
        Self::Error,
        Self::Warn,
        Self::Info,
        Self::Debug,
        Self::Util,
    ];

    /// Returns the bit this level occupies in a [`LevelMask`].
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Self::Fault => 1 << 0,
            Self::Error => 1 << 1,
            Self::Warn => 1 << 2,
            Self::Info => 1 << 3,
            Self::Debug => 1 << 4,
            Self::Util => 1 << 5,
        }
    }

    /// Returns the tag written between brackets in a stored line.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Fault => "FAULT",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Util => "UTIL",
        }
    }

    /// Parses a bracket tag back into a level.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.tag() == tag)
    }

    /// Returns the priority used when a call site gives none.
    #[must_use]
    pub const fn default_priority(self) -> Priority {
        match self {
            Self::Fault => Priority::HIGHEST,
            Self::Error => Priority::HIGHER,
            Self::Warn => Priority::HIGH,
            Self::Info => Priority::LOW,
            Self::Debug => Priority::LOWER,
            Self::Util => Priority::LOWEST,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Category of the producer of an event. Each source is a single bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Application call sites
    App,
    /// CPU sampler
    Cpu,
    /// Memory sampler
    Ram,
}

impl Source {
    /// All sources.
    pub const ALL: [Self; 3] = [Self::App, Self::Cpu, Self::Ram];

    /// Returns the bit this source occupies in a [`SourceMask`].
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Self::App => 1 << 0,
            Self::Cpu => 1 << 1,
            Self::Ram => 1 << 2,
        }
    }
}

/// Generates a bitmask set over one of the single-bit enums above.
macro_rules! bitmask_set {
    ($(#[$meta:meta])* $name:ident over $item:ident as $repr:literal, all = $all:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(from = $repr, into = $repr)]
        pub struct $name(u8);

        impl $name {
            /// The empty set.
            pub const NONE: Self = Self(0);
            /// Every member.
            pub const ALL: Self = Self($all);

            /// Builds a set from raw bits, dropping unknown ones.
            #[must_use]
            pub const fn from_bits_truncate(bits: u8) -> Self {
                Self(bits & $all)
            }

            /// Returns the raw bits.
            #[must_use]
            pub const fn bits(self) -> u8 {
                self.0
            }

            /// Exact bit match: true when every bit of `item` is set.
            #[must_use]
            pub const fn contains(self, item: $item) -> bool {
                self.0 & item.bit() == item.bit()
            }

            /// True when no bit is set.
            #[must_use]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns the members in declaration order.
            pub fn iter(self) -> impl Iterator<Item = $item> {
                $item::ALL.into_iter().filter(move |item| self.contains(*item))
            }
        }

        impl From<$item> for $name {
            fn from(item: $item) -> Self {
                Self(item.bit())
            }
        }

        impl From<Vec<$item>> for $name {
            fn from(items: Vec<$item>) -> Self {
                items.into_iter().collect()
            }
        }

        impl From<$name> for Vec<$item> {
            fn from(mask: $name) -> Self {
                mask.iter().collect()
            }
        }

        impl FromIterator<$item> for $name {
            fn from_iter<I: IntoIterator<Item = $item>>(iter: I) -> Self {
                Self(iter.into_iter().fold(0, |bits, item| bits | item.bit()))
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOr<$item> for $name {
            type Output = Self;

            fn bitor(self, rhs: $item) -> Self {
                Self(self.0 | rhs.bit())
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl Not for $name {
            type Output = Self;

            fn not(self) -> Self {
                Self(!self.0 & $all)
            }
        }
    };
}

bitmask_set! {
    /// A set of [`Level`]s.
    LevelMask over Level as "Vec<Level>", all = 0b11_1111
}

bitmask_set! {
    /// A set of [`Source`]s.
    SourceMask over Source as "Vec<Source>", all = 0b111
}

impl LevelMask {
    /// Only [`Level::Fault`].
    pub const FAULT: Self = Self(Level::Fault.bit());
    /// Only [`Level::Error`].
    pub const ERROR: Self = Self(Level::Error.bit());
    /// Only [`Level::Warn`].
    pub const WARN: Self = Self(Level::Warn.bit());
    /// Only [`Level::Info`].
    pub const INFO: Self = Self(Level::Info.bit());
    /// Only [`Level::Debug`].
    pub const DEBUG: Self = Self(Level::Debug.bit());
    /// Only [`Level::Util`].
    pub const UTIL: Self = Self(Level::Util.bit());
}

impl SourceMask {
    /// Only [`Source::App`].
    pub const APP: Self = Self(Source::App.bit());
    /// Only [`Source::Cpu`].
    pub const CPU: Self = Self(Source::Cpu.bit());
    /// Only [`Source::Ram`].
    pub const RAM: Self = Self(Source::Ram.bit());

    /// True when either sampler source is set.
    #[must_use]
    pub const fn wants_sampling(self) -> bool {
        self.contains(Source::Cpu) || self.contains(Source::Ram)
    }
}

/// A single log occurrence.
///
/// Events are immutable once built. Nodes clone them into their queues; nothing
/// keeps them after the chain traversal except the stored line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    priority: Priority,
    timestamp: DateTime<Utc>,
    source: Source,
    level: Level,
    origin: String,
    message: String,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        priority: Priority,
        source: Source,
        level: Level,
        origin: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            priority,
            timestamp: Utc::now(),
            source,
            level,
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Creates a new event builder.
    #[must_use]
    pub fn builder() -> LogEventBuilder {
        LogEventBuilder::default()
    }

    /// Returns the priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns when the event was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the source.
    #[must_use]
    pub const fn source(&self) -> Source {
        self.source
    }

    /// Returns the level.
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Returns the call-site string, empty for synthetic events.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Formats the timestamp prefix.
    #[must_use]
    pub fn time_tag(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Formats the source segment, including the origin for application events.
    #[must_use]
    pub fn source_tag(&self) -> String {
        match self.source {
            Source::App => format!("APP | {}", self.origin),
            Source::Cpu => "CPU".to_string(),
            Source::Ram => "RAM".to_string(),
        }
    }

    /// Serializes the event to one line, without the delimiter.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{} [{}] {} > {}",
            self.time_tag(),
            self.level.tag(),
            self.source_tag(),
            self.message
        )
    }

    /// Parses a stored line back into an event.
    ///
    /// Never fails. A line that does not match the format yields a best-effort
    /// event: whatever prefix parsed is kept, the rest falls back to `Info`,
    /// `App`, the current time, and the raw text as message.
    #[must_use]
    pub fn parse_line(line: &str) -> Self {
        let timestamp = line
            .get(..TIMESTAMP_LEN)
            .and_then(|t| NaiveDateTime::parse_from_str(t, TIMESTAMP_FORMAT).ok())
            .map(|naive| naive.and_utc());

        let Some(timestamp) = timestamp else {
            return Self::malformed(Utc::now(), line);
        };

        let rest = &line[TIMESTAMP_LEN..];
        match Self::parse_tail(rest) {
            Some((level, source, origin, message)) => Self {
                priority: level.default_priority(),
                timestamp,
                source,
                level,
                origin,
                message,
            },
            None => Self::malformed(timestamp, rest.trim_start()),
        }
    }

    /// True when both events describe the same stored record.
    ///
    /// Compares at millisecond resolution, the precision kept on disk.
    #[must_use]
    pub fn same_record(&self, other: &Self) -> bool {
        self.timestamp.timestamp_millis() == other.timestamp.timestamp_millis()
            && self.level == other.level
            && self.source == other.source
            && self.message == other.message
    }

    fn parse_tail(rest: &str) -> Option<(Level, Source, String, String)> {
        let rest = rest.strip_prefix(" [")?;
        let (tag, rest) = rest.split_once("] ")?;
        let level = Level::from_tag(tag)?;
        let (source_tag, message) = rest.split_once(" > ")?;

        let (source, origin) = match source_tag {
            "CPU" => (Source::Cpu, String::new()),
            "RAM" => (Source::Ram, String::new()),
            other => {
                let origin = other
                    .strip_prefix("APP | ")
                    .or_else(|| other.strip_prefix("APP |"))?;
                (Source::App, origin.to_string())
            }
        };

        Some((level, source, origin, message.to_string()))
    }

    fn malformed(timestamp: DateTime<Utc>, message: &str) -> Self {
        Self {
            priority: Priority::LOWEST,
            timestamp,
            source: Source::App,
            level: Level::Info,
            origin: String::new(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Builder for constructing log events.
///
/// Unset fields default to `Info`, `App`, the level's default priority, the
/// current time, and empty strings.
#[derive(Debug, Default)]
pub struct LogEventBuilder {
    priority: Option<Priority>,
    timestamp: Option<DateTime<Utc>>,
    source: Option<Source>,
    level: Option<Level>,
    origin: String,
    message: String,
}

impl LogEventBuilder {
    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the source.
    #[must_use]
    pub const fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the level.
    #[must_use]
    pub const fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Sets the call-site string.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Builds the event.
    #[must_use]
    pub fn build(self) -> LogEvent {
        let level = self.level.unwrap_or(Level::Info);
        LogEvent {
            priority: self.priority.unwrap_or_else(|| level.default_priority()),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source: self.source.unwrap_or(Source::App),
            level,
            origin: self.origin,
            message: self.message,
        }
    }
}

/// Builds the origin string for a call site: `<file name>.<line> <function>`.
///
/// Only the last path component of `file` is kept.
#[must_use]
pub fn format_origin(file: &str, line: u32, function: &str) -> String {
    let name = file.rsplit(['/', '\\']).next().unwrap_or(file);
    format!("{name}.{line} {function}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45)
            .single()
            .map(|t| t + chrono::Duration::milliseconds(123))
            .unwrap_or_else(Utc::now)
    }

    // ===========================================
    // Priority / Level / Source Tests
    // ===========================================

    #[test]
    fn priority_ordering() {
        assert!(Priority::HIGHEST > Priority::HIGHER);
        assert!(Priority::HIGHER > Priority::HIGH);
        assert!(Priority::HIGH > Priority::LOW);
        assert!(Priority::LOW > Priority::LOWER);
        assert!(Priority::LOWER > Priority::LOWEST);
        assert_eq!(Priority::default(), Priority::LOWEST);
    }

    #[test_case(Level::Fault, Priority::HIGHEST ; "fault")]
    #[test_case(Level::Error, Priority::HIGHER ; "error")]
    #[test_case(Level::Warn, Priority::HIGH ; "warn")]
    #[test_case(Level::Info, Priority::LOW ; "info")]
    #[test_case(Level::Debug, Priority::LOWER ; "debug")]
    #[test_case(Level::Util, Priority::LOWEST ; "util")]
    fn level_default_priority(level: Level, expected: Priority) {
        assert_eq!(level.default_priority(), expected);
    }

    #[test]
    fn level_bits_are_distinct_single_bits() {
        let mut seen = 0u8;
        for level in Level::ALL {
            assert_eq!(level.bit().count_ones(), 1);
            assert_eq!(seen & level.bit(), 0);
            seen |= level.bit();
        }
        assert_eq!(seen, LevelMask::ALL.bits());
    }

    #[test]
    fn level_tag_roundtrip() {
        for level in Level::ALL {
            assert_eq!(Level::from_tag(level.tag()), Some(level));
        }
        assert_eq!(Level::from_tag("TRACE"), None);
    }

    #[test]
    fn level_display() {
        assert_eq!(Level::Warn.to_string(), "WARN");
    }

    // ===========================================
    // Mask Tests
    // ===========================================

    #[test]
    fn source_mask_contains_exact_bit() {
        let mask = SourceMask::APP | SourceMask::RAM;
        assert!(mask.contains(Source::App));
        assert!(mask.contains(Source::Ram));
        assert!(!mask.contains(Source::Cpu));
    }

    #[test]
    fn source_mask_wants_sampling() {
        assert!(!SourceMask::APP.wants_sampling());
        assert!(SourceMask::CPU.wants_sampling());
        assert!((SourceMask::APP | SourceMask::RAM).wants_sampling());
        assert!(!SourceMask::NONE.wants_sampling());
    }

    #[test]
    fn mask_not_stays_within_all() {
        assert_eq!(!SourceMask::APP, SourceMask::CPU | SourceMask::RAM);
        assert_eq!(!LevelMask::NONE, LevelMask::ALL);
        assert_eq!(!LevelMask::ALL, LevelMask::NONE);
    }

    #[test]
    fn mask_from_bits_truncate_drops_unknown() {
        assert_eq!(SourceMask::from_bits_truncate(0xFF), SourceMask::ALL);
        assert_eq!(LevelMask::from_bits_truncate(0b1100_0001), LevelMask::FAULT);
    }

    #[test]
    fn mask_iter_and_collect() {
        let mask: LevelMask = [Level::Error, Level::Debug].into_iter().collect();
        let levels: Vec<Level> = mask.iter().collect();
        assert_eq!(levels, vec![Level::Error, Level::Debug]);
    }

    #[test]
    fn mask_serde_as_list() {
        let mask = SourceMask::APP | SourceMask::CPU;
        let json = serde_json::to_string(&mask).expect("serialize");
        assert_eq!(json, r#"["app","cpu"]"#);

        let back: SourceMask = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, mask);
    }

    // ===========================================
    // LogEvent Tests
    // ===========================================

    #[test]
    fn builder_defaults() {
        let event = LogEvent::builder().message("hello").build();
        assert_eq!(event.level(), Level::Info);
        assert_eq!(event.source(), Source::App);
        assert_eq!(event.priority(), Priority::LOW);
        assert_eq!(event.origin(), "");
        assert_eq!(event.message(), "hello");
    }

    #[test]
    fn builder_priority_overrides_level_default() {
        let event = LogEvent::builder()
            .level(Level::Debug)
            .priority(Priority::HIGHEST)
            .build();
        assert_eq!(event.priority(), Priority::HIGHEST);
    }

    #[test]
    fn to_line_app_event() {
        let event = LogEvent::builder()
            .timestamp(fixed_time())
            .level(Level::Warn)
            .origin("main.rs.42 demo")
            .message("disk almost full")
            .build();
        assert_eq!(
            event.to_line(),
            "2024-05-01 12:30:45.123 [WARN] APP | main.rs.42 demo > disk almost full"
        );
    }

    #[test_case(Source::Cpu, "CPU" ; "cpu")]
    #[test_case(Source::Ram, "RAM" ; "ram")]
    fn to_line_sampler_event(source: Source, tag: &str) {
        let event = LogEvent::builder()
            .timestamp(fixed_time())
            .level(Level::Util)
            .source(source)
            .message("x")
            .build();
        assert_eq!(
            event.to_line(),
            format!("2024-05-01 12:30:45.123 [UTIL] {tag} > x")
        );
    }

    #[test]
    fn parse_line_roundtrip_fields() {
        let original = LogEvent::builder()
            .timestamp(fixed_time())
            .level(Level::Error)
            .origin("lib.rs.7 klog::tests")
            .message("boom > with arrow")
            .build();

        let parsed = LogEvent::parse_line(&original.to_line());
        assert_eq!(parsed.timestamp(), original.timestamp());
        assert_eq!(parsed.level(), Level::Error);
        assert_eq!(parsed.source(), Source::App);
        assert_eq!(parsed.origin(), "lib.rs.7 klog::tests");
        assert_eq!(parsed.message(), "boom > with arrow");
        assert_eq!(parsed.priority(), Priority::HIGHER);
        assert!(parsed.same_record(&original));
    }

    #[test]
    fn parse_line_preserves_millisecond() {
        let original = LogEvent::new(Priority::LOW, Source::App, Level::Info, "", "now");
        let parsed = LogEvent::parse_line(&original.to_line());
        assert_eq!(
            parsed.timestamp().timestamp_millis(),
            original.timestamp().timestamp_millis()
        );
    }

    #[test]
    fn parse_line_empty_origin_and_message() {
        let original = LogEvent::builder().timestamp(fixed_time()).build();
        let parsed = LogEvent::parse_line(&original.to_line());
        assert_eq!(parsed.origin(), "");
        assert_eq!(parsed.message(), "");
        assert_eq!(parsed.source(), Source::App);
    }

    #[test]
    fn parse_line_sampler_source() {
        let line = "2024-05-01 12:30:45.123 [UTIL] RAM > resident: 1.00 MB";
        let parsed = LogEvent::parse_line(line);
        assert_eq!(parsed.source(), Source::Ram);
        assert_eq!(parsed.level(), Level::Util);
        assert_eq!(parsed.message(), "resident: 1.00 MB");
    }

    #[test]
    fn parse_line_garbage_is_best_effort() {
        let parsed = LogEvent::parse_line("not a log line");
        assert_eq!(parsed.level(), Level::Info);
        assert_eq!(parsed.source(), Source::App);
        assert_eq!(parsed.priority(), Priority::LOWEST);
        assert_eq!(parsed.message(), "not a log line");
    }

    #[test]
    fn parse_line_keeps_timestamp_of_partial_line() {
        let parsed = LogEvent::parse_line("2024-05-01 12:30:45.123 [BOGUS] who knows");
        assert_eq!(parsed.timestamp(), fixed_time());
        assert_eq!(parsed.message(), "[BOGUS] who knows");
    }

    #[test]
    fn parse_line_multibyte_prefix_does_not_panic() {
        let parsed = LogEvent::parse_line("ééééééééééééééééééé");
        assert_eq!(parsed.message(), "ééééééééééééééééééé");
    }

    #[test]
    fn format_origin_keeps_last_component() {
        assert_eq!(
            format_origin("src/app/main.rs", 12, "app::main"),
            "main.rs.12 app::main"
        );
        assert_eq!(format_origin("C:\\src\\lib.rs", 3, "f"), "lib.rs.3 f");
        assert_eq!(format_origin("lib.rs", 1, ""), "lib.rs.1 ");
    }
}
