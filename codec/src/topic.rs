// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Topic names, topic filters and the matcher that relates them.
//!
//! A *topic name* (carried by PUBLISH) is a concrete `/`-separated path. A
//! *topic filter* (carried by SUBSCRIBE/UNSUBSCRIBE) is shaped the same way
//! but may use `+` and `#` as whole-level wildcards. [`PubTopic`] and
//! [`SubTopic`] wrap validated instances of each so that a malformed topic
//! can never reach the dispatch loop.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    /// Topic name or filter is empty.
    Empty,

    /// Contains the null character.
    ContainsNul,

    /// Contains a control character disallowed in MQTT strings (U+0001..U+001F, U+007F..U+009F).
    ContainsControlChar,

    /// A topic name (not a filter) contained `+` or `#`.
    ContainsWildcard,

    /// `+` or `#` did not occupy a whole level, or `#` was not the last level.
    InvalidWildcardPosition,

    /// Exceeds the 16-bit length-prefix limit.
    TooLong,
}

fn validate_common(s: &str) -> Result<(), TopicError> {
    if s.is_empty() {
        return Err(TopicError::Empty);
    }
    if s.len() > usize::from(u16::MAX) {
        return Err(TopicError::TooLong);
    }
    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(TopicError::ContainsNul);
        }
        let cp = c as u32;
        if (0x0001..=0x001F).contains(&cp) || (0x007F..=0x009F).contains(&cp) {
            return Err(TopicError::ContainsControlChar);
        }
    }
    Ok(())
}

/// Validate a concrete topic name, as used in PUBLISH and in a CONNECT will-topic.
///
/// # Errors
///
/// Returns error per [`TopicError`].
pub fn validate_topic_name(s: &str) -> Result<(), TopicError> {
    validate_common(s)?;
    if s.contains('+') || s.contains('#') {
        return Err(TopicError::ContainsWildcard);
    }
    Ok(())
}

/// Validate a topic filter, as used in SUBSCRIBE/UNSUBSCRIBE.
///
/// `+` and `#` are only legal when they occupy an entire level, and `#` is
/// only legal as the last level.
///
/// # Errors
///
/// Returns error per [`TopicError`].
pub fn validate_topic_filter(s: &str) -> Result<(), TopicError> {
    validate_common(s)?;
    let levels: Vec<&str> = s.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && *level != "#" {
            return Err(TopicError::InvalidWildcardPosition);
        }
        if *level == "#" && i != last {
            return Err(TopicError::InvalidWildcardPosition);
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::InvalidWildcardPosition);
        }
    }
    Ok(())
}

/// Decide whether `topic` (a concrete topic name) is covered by `filter`.
///
/// Implements the level-by-level matching rules of MQTT §4.7: `+` matches
/// exactly one level (including an empty one), `#` as the last level
/// matches zero or more trailing levels. A filter starting with `+` or `#`
/// never matches a topic starting with `$`, preserving the `$SYS`
/// convention.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut f_levels = filter.split('/');
    let mut t_levels = topic.split('/');

    loop {
        match (f_levels.next(), t_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some("+"), None) => return false,
            (Some(f), Some(t)) => {
                if f != t {
                    return false;
                }
            }
            (Some(_), None) | (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

fn bytes_of(s: &str) -> usize {
    2 + s.len()
}

fn encode_str(s: &str, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
    #[allow(clippy::cast_possible_truncation)]
    let len = s.len() as u16;
    buf.write_u16::<BigEndian>(len)?;
    buf.write_all(s.as_bytes())?;
    Ok(bytes_of(s))
}

fn decode_str(ba: &mut ByteArray) -> Result<String, DecodeError> {
    let len = ba.read_u16()?;
    ba.read_string(len as usize).map_err(DecodeError::from)
}

/// A validated, wildcard-free topic name, as carried by PUBLISH.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PubTopic(String);

impl PubTopic {
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid topic name.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_topic_name(topic).map_err(|_err| EncodeError::InvalidTopic)?;
        Ok(Self(topic.to_string()))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        bytes_of(&self.0)
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = decode_str(ba)?;
        validate_topic_name(&s).map_err(|_err| DecodeError::InvalidTopic)?;
        Ok(Self(s))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        encode_str(&self.0, buf)
    }
}

/// A validated topic filter (possibly containing `+`/`#`), as carried by
/// SUBSCRIBE/UNSUBSCRIBE.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubTopic(String);

impl SubTopic {
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid topic filter.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_topic_filter(topic).map_err(|_err| EncodeError::InvalidTopic)?;
        Ok(Self(topic.to_string()))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        bytes_of(&self.0)
    }

    /// Does this filter cover `topic`?
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.0, topic)
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = decode_str(ba)?;
        validate_topic_filter(&s).map_err(|_err| DecodeError::InvalidTopic)?;
        Ok(Self(s))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        encode_str(&self.0, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("a/b/c").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a/+/c").is_err());
        assert!(validate_topic_name("a/#").is_err());
        assert!(validate_topic_name("a/\u{0000}").is_err());
    }

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("sport/+/player1/#").is_ok());
        assert!(validate_topic_filter("sport/tennis#").is_err());
        assert!(validate_topic_filter("sport/#/player1").is_err());
        assert!(validate_topic_filter("sport/te+nis").is_err());
        assert!(validate_topic_filter("/foo").is_ok());
    }

    #[test]
    fn test_topic_matches_wildcards() {
        assert!(topic_matches("sport/+/player1/#", "sport/tennis/player1"));
        assert!(topic_matches(
            "sport/+/player1/#",
            "sport/tennis/player1/ranking"
        ));
        assert!(topic_matches(
            "sport/+/player1/#",
            "sport/golf/player1/tour/2024"
        ));
        assert!(!topic_matches("sport/+/player1/#", "sport/player1"));
    }

    #[test]
    fn test_topic_matches_dollar_sign() {
        assert!(!topic_matches("+/monitor/Clients", "$SYS/monitor/Clients"));
        assert!(!topic_matches("#", "$SYS/monitor/Clients"));
        assert!(topic_matches("$SYS/#", "$SYS/monitor/Clients"));
    }

    #[test]
    fn test_empty_level_not_equal_to_no_level() {
        assert!(!topic_matches("foo", "/foo"));
        assert!(topic_matches("/foo", "/foo"));
    }
}
