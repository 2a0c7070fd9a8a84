//! MQTT topic filter matching.

/// Match a topic against a filter with MQTT wildcard semantics:
/// `+` matches exactly one level, `#` matches any remaining levels and
/// is only legal as the final level.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/').peekable();
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => {
                // '#' must be the tail; anything after it is malformed
                // and matches nothing.
                return filter_levels.next().is_none();
            }
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a filter: `#` only at the tail, wildcards as whole levels.
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return false;
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }
    true
}
