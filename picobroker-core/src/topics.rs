//! Topic names, topic filters and the wildcard matcher.
//!
//! Levels are separated by `/`. Empty levels are legal (`a//b`, `/a`, `a/`).
//! In filters `+` stands for exactly one level and `#` for any number of
//! trailing levels, zero included; each wildcard must occupy a whole level and
//! `#` must be the last one. Topics starting with `$` are reserved for the
//! server and are never matched by a filter whose first level is a wildcard.

use thiserror::Error;

pub const LEVEL_SEPARATOR: char = '/';
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,
    #[error("topic names must not contain wildcards")]
    WildcardInTopicName,
    #[error("'#' must be the last level and occupy it entirely")]
    MisplacedMultiLevelWildcard,
    #[error("'+' must occupy an entire level")]
    MisplacedSingleLevelWildcard,
    #[error("topic contains the null character")]
    NullCharacter,
}

/// Checks a topic a client publishes to (or names in its Last Will).
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NullCharacter);
    }
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInTopicName);
    }
    Ok(())
}

/// Checks a subscription filter.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NullCharacter);
    }
    let mut levels = filter.split(LEVEL_SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != MULTI_LEVEL_WILDCARD || levels.peek().is_some()) {
            return Err(TopicError::MisplacedMultiLevelWildcard);
        }
        if level.contains('+') && level != SINGLE_LEVEL_WILDCARD {
            return Err(TopicError::MisplacedSingleLevelWildcard);
        }
    }
    Ok(())
}

/// Whether the topic name `published` is matched by `filter`.
///
/// Invalid filters and empty topics match nothing.
pub fn matches(filter: &str, published: &str) -> bool {
    if published.is_empty() || validate_topic_filter(filter).is_err() {
        return false;
    }
    if published.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = published.split(LEVEL_SEPARATOR);
    for filter_level in filter.split(LEVEL_SEPARATOR) {
        match filter_level {
            MULTI_LEVEL_WILDCARD => return true,
            SINGLE_LEVEL_WILDCARD => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if topic_levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    topic_levels.next().is_none()
}
