//! Topic names and subscription filters.
//!
//! Topics are hierarchical, slash-separated strings such as
//! `sensors/environmental`. Filters may end with a single `#` segment that
//! matches any remaining suffix, e.g. `sensors/#`.

use crate::error::{Error, Result};

/// Multi-level wildcard segment.
pub const WILDCARD: &str = "#";

/// A validated topic name used for publishing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName(String);

impl TopicName {
    /// Parses and validates a topic name.
    ///
    /// # Examples
    ///
    /// ```
    /// use resilient_telemetry::TopicName;
    ///
    /// let topic = TopicName::parse("sensors/environmental")?;
    /// assert_eq!(topic.as_str(), "sensors/environmental");
    /// assert!(TopicName::parse("sensors/#").is_err());
    /// # Ok::<(), resilient_telemetry::Error>(())
    /// ```
    pub fn parse(topic: &str) -> Result<Self> {
        check_common(topic)?;
        if topic.contains('#') || topic.contains('+') {
            return Err(Error::InvalidTopic(format!(
                "topic name '{}' must not contain wildcards",
                topic
            )));
        }
        Ok(Self(topic.to_string()))
    }

    /// Returns the topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TopicName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A validated subscription filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
    literals: Vec<String>,
    wildcard: bool,
}

impl TopicFilter {
    /// Parses a subscription filter.
    ///
    /// `#` is only accepted as the whole last segment. Single-level `+`
    /// wildcards are not supported.
    ///
    /// # Examples
    ///
    /// ```
    /// use resilient_telemetry::TopicFilter;
    ///
    /// let filter = TopicFilter::parse("sensors/#")?;
    /// assert!(filter.matches("sensors/environmental/room1"));
    /// assert!(!filter.matches("other/environmental"));
    /// # Ok::<(), resilient_telemetry::Error>(())
    /// ```
    pub fn parse(filter: &str) -> Result<Self> {
        check_common(filter)?;
        if filter.contains('+') {
            return Err(Error::InvalidTopic(format!(
                "filter '{}' uses unsupported single-level wildcard '+'",
                filter
            )));
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let last = parts.len() - 1;
        let mut literals = Vec::with_capacity(parts.len());
        let mut wildcard = false;

        for (i, part) in parts.iter().enumerate() {
            if part.contains('#') {
                if *part != WILDCARD || i != last {
                    return Err(Error::InvalidTopic(format!(
                        "filter '{}': '#' must be the entire last segment",
                        filter
                    )));
                }
                wildcard = true;
            } else {
                literals.push(part.to_string());
            }
        }

        Ok(Self {
            raw: filter.to_string(),
            literals,
            wildcard,
        })
    }

    /// Returns true if `topic` is delivered to this filter.
    ///
    /// A trailing `#` also matches its parent level, so `sensors/#` matches
    /// `sensors`.
    pub fn matches(&self, topic: &str) -> bool {
        let levels: Vec<&str> = topic.split('/').collect();

        if self.wildcard {
            levels.len() >= self.literals.len()
                && self.literals.iter().zip(&levels).all(|(l, t)| l == t)
        } else {
            levels.len() == self.literals.len()
                && self.literals.iter().zip(&levels).all(|(l, t)| l == t)
        }
    }

    /// Number of literal (non-wildcard) segments.
    pub fn literal_len(&self) -> usize {
        self.literals.len()
    }

    /// Returns true if the filter ends with `#`.
    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Ranking used to pick the best of several matching filters: more
    /// literal segments first, then exact filters over wildcard ones.
    pub fn specificity(&self) -> (usize, bool) {
        (self.literals.len(), !self.wildcard)
    }

    /// Returns the filter as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl std::str::FromStr for TopicFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn check_common(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.contains('\0') {
        return Err(Error::InvalidTopic(format!(
            "topic '{}' contains a null byte",
            topic.escape_default()
        )));
    }
    Ok(())
}
