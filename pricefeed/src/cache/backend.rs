//! TTL-capable key/value backend behind both cache layers.

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Remote (or in-process) key/value store with per-key expiry.
///
/// Patterns passed to [`CacheBackend::scan`] use Redis glob syntax; use
/// [`escape_glob`] for any caller-controlled part.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value and resetting its TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// All keys matching `pattern`.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;
}

const DELETE_BATCH: usize = 500;

/// Scan-and-delete every key matching `pattern`.
pub async fn delete_matching(backend: &dyn CacheBackend, pattern: &str) -> Result<u64> {
    let keys = backend.scan(pattern).await?;
    let mut deleted = 0;
    for batch in keys.chunks(DELETE_BATCH) {
        deleted += backend.delete(batch).await?;
    }
    Ok(deleted)
}

/// Escape glob metacharacters so `value` only matches itself.
pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, PartialEq)]
enum Token {
    Star,
    One,
    Lit(char),
}

/// Glob matching with `*`, `?` and backslash escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => Token::Star,
            '?' => Token::One,
            '\\' => Token::Lit(chars.next().unwrap_or('\\')),
            other => Token::Lit(other),
        });
    }

    let text: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < text.len() {
        match tokens.get(pi) {
            Some(Token::Star) => {
                backtrack = Some((pi, ti));
                pi += 1;
            }
            Some(Token::One) => {
                pi += 1;
                ti += 1;
            }
            Some(Token::Lit(c)) if *c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match backtrack {
                Some((star, start)) => {
                    pi = star + 1;
                    ti = start + 1;
                    backtrack = Some((star, start + 1));
                }
                None => return false,
            },
        }
    }

    tokens[pi..].iter().all(|t| *t == Token::Star)
}
