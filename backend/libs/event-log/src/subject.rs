//! Subject filter matching
//!
//! Subjects are dot-separated tokens. In a filter, `*` matches exactly one
//! token and a trailing `>` matches one or more remaining tokens.

pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return filter_tokens.next().is_none(),
            (Some("*"), Some(token)) => {
                if token.is_empty() {
                    return false;
                }
            }
            (Some(expected), Some(token)) => {
                if expected != token {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Translate a filter into an anchored regex usable for Kafka pattern subscriptions
pub fn filter_to_regex(filter: &str) -> String {
    let tokens: Vec<String> = filter
        .split('.')
        .map(|token| match token {
            "*" => "[^.]+".to_string(),
            ">" => ".+".to_string(),
            literal => regex::escape(literal),
        })
        .collect();

    format!("^{}$", tokens.join("\\."))
}
