// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::error::{DecodeError, EncodeError};

/// A validated PUBLISH topic name. Topic names never contain wildcard
/// characters \[MQTT-3.3.2-2\] and must be at least one character long.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopicName(String);

impl TopicName {
    /// # Errors
    /// Returns [`EncodeError::InvalidClientId`] is never produced here; use
    /// [`DecodeError`] for wire-originated names and this for locally built
    /// ones via `try_from`.
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        if s.is_empty() || s.contains(['+', '#']) {
            return Err(DecodeError::InvalidTopicName);
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for TopicName {
    type Error = EncodeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s).map_err(|_| EncodeError::InvalidClientId)
    }
}

/// A validated SUBSCRIBE topic filter, which may contain the `+` and `#`
/// wildcards subject to the placement rules in section 4.7.1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<String>,
}

impl TopicFilter {
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        if s.is_empty() {
            return Err(DecodeError::EmptyTopicFilter);
        }

        let levels: Vec<&str> = s.split('/').collect();
        for (i, level) in levels.iter().enumerate() {
            if level.contains('#') {
                // `#` must be the last character and occupy an entire level
                // on its own [MQTT-4.7.1-2].
                if *level != "#" || i != levels.len() - 1 {
                    return Err(DecodeError::InvalidTopicName);
                }
            }
            if level.contains('+') {
                // `+` must occupy an entire level on its own [MQTT-4.7.1-3].
                if *level != "+" {
                    return Err(DecodeError::InvalidTopicName);
                }
            }
        }

        Ok(Self {
            raw: s.to_string(),
            levels: levels.into_iter().map(str::to_string).collect(),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check whether `topic` matches this filter per section 4.7.
    ///
    /// Topics beginning with `$` (e.g. `$SYS/...`) never match a filter
    /// whose first level is a wildcard \[MQTT-4.7.2-1\].
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let topic_levels: Vec<&str> = topic.split('/').collect();

        if topic.starts_with('$')
            && matches!(self.levels.first().map(String::as_str), Some("+") | Some("#"))
        {
            return false;
        }

        Self::match_levels(&self.levels, &topic_levels)
    }

    fn match_levels(filter: &[String], topic: &[&str]) -> bool {
        match (filter.first(), topic.first()) {
            (Some(f), _) if f == "#" => true,
            (Some(f), Some(_)) if f == "+" => Self::match_levels(&filter[1..], &topic[1..]),
            (Some(f), Some(t)) if f == t => Self::match_levels(&filter[1..], &topic[1..]),
            (None, None) => true,
            _ => false,
        }
    }
}
