//! Glob pattern translation

use regex::Regex;

use crate::{DbError, Result};

/// Translate a glob pattern into an anchored regex.
///
/// Supports `*` (any run), `?` (any single char) and `[...]` character
/// classes with a leading `!` for negation. Everything else matches
/// literally.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' {
                        re.push('\\');
                    }
                    re.push(inner);
                }
                re.push(']');
            }
            // Escape regex metacharacters
            '.' | '+' | '(' | ')' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                re.push('\\');
                re.push(c);
            }
            _ => re.push(c),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| DbError::Invalid(format!("invalid glob pattern: {e}")))
}
