//! Subject grammar: `thread.<thread_id>.<verb|source>`.
//!
//! Patterns support `*` (exactly one token) and `>` (the rest of the
//! subject), NATS-style: `thread.*.need`, `thread.<id>.>`.

use canswarm_core::envelope::Verb;
use canswarm_core::types::ThreadId;

/// Canonical subject for an envelope verb within a thread.
pub fn subject_for(thread: &ThreadId, verb: Verb) -> String {
    format!(
        "thread.{}.{}",
        thread.to_hex(),
        verb.as_wire().to_ascii_lowercase()
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Literal(String),
    Star,
    Tail,
}

/// A parsed subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    /// Parse a pattern. `>` is only meaningful as the final token.
    pub fn parse(pattern: &str) -> Self {
        let tokens = pattern
            .split('.')
            .map(|t| match t {
                "*" => Token::Star,
                ">" => Token::Tail,
                literal => Token::Literal(literal.to_string()),
            })
            .collect();
        Self { tokens }
    }

    pub fn matches(&self, subject: &str) -> bool {
        let parts: Vec<&str> = subject.split('.').collect();
        let mut i = 0;
        for token in &self.tokens {
            match token {
                Token::Tail => return i < parts.len(),
                Token::Star => {
                    if i >= parts.len() {
                        return false;
                    }
                    i += 1;
                }
                Token::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return false;
                    }
                    i += 1;
                }
            }
        }
        i == parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_shape() {
        let thread = ThreadId::from_bytes([0xab; 32]);
        let subject = subject_for(&thread, Verb::Need);
        assert!(subject.starts_with("thread."));
        assert!(subject.ends_with(".need"));
    }

    #[test]
    fn star_matches_one_token() {
        let p = Pattern::parse("thread.*.need");
        assert!(p.matches("thread.abc.need"));
        assert!(!p.matches("thread.abc.def.need"));
        assert!(!p.matches("thread.abc.propose"));
    }

    #[test]
    fn tail_matches_rest() {
        let p = Pattern::parse("thread.abc.>");
        assert!(p.matches("thread.abc.need"));
        assert!(p.matches("thread.abc.update_plan"));
        assert!(!p.matches("thread.abc"));
        assert!(!p.matches("thread.def.need"));
    }

    #[test]
    fn literal_is_exact() {
        let p = Pattern::parse("thread.abc.need");
        assert!(p.matches("thread.abc.need"));
        assert!(!p.matches("thread.abc.need.extra"));
    }
}
