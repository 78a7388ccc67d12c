//! Glob pattern matching for principal, action, and resource patterns
//!
//! Supports:
//! - `*` - Zero or more characters within one `/`-separated segment
//! - `**` - Zero or more characters, crossing `/` boundaries
//! - `?` - Exactly one character (not `/`)
//! - `[abc]`, `[a-z]`, `[!a-z]` - Character classes (not `/`)
//! - `{read,write}` - Alternation, branches may contain globs
//! - `\*` - Escapes the next character
//!
//! `^` is an ordinary class member; only `!` negates.
//!
//! Identifiers such as `"user-123"` or `"document:read"` contain no separator,
//! so `*` behaves as an unrestricted wildcard for them. Values are matched as
//! paths: repeated `/` collapse to one and a trailing `/` is dropped, so
//! `doc/` matches `doc`. Matching is case-sensitive and runs in
//! O(pattern * value) per alternative.

use std::borrow::Cow;
use thiserror::Error;

const SEPARATOR: char = '/';

/// Upper bound on the number of branches a `{...}` pattern may expand to.
const MAX_ALTERNATIVES: usize = 64;

/// Why a glob pattern could not be compiled
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GlobError {
    #[error("unterminated character class `[`")]
    UnterminatedClass,

    #[error("unterminated alternation `{{`")]
    UnterminatedAlternation,

    #[error("pattern ends with a dangling `\\`")]
    DanglingEscape,

    #[error("alternation expands to more than {} branches", MAX_ALTERNATIVES)]
    TooManyAlternatives,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    Star,
    DoubleStar,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    /// Single-character tokens only; stars are handled by the matcher
    fn accepts(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => c != SEPARATOR,
            Token::Class { negated, ranges } => {
                if c == SEPARATOR {
                    return false;
                }
                let hit = ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
                hit != *negated
            }
            Token::Star | Token::DoubleStar => false,
        }
    }
}

#[derive(Debug)]
enum Node {
    Token(Token),
    Alternation(Vec<Vec<Node>>),
}

/// A compiled glob pattern
#[derive(Debug, Clone)]
pub struct Glob {
    alternatives: Vec<Vec<Token>>,
}

impl Glob {
    /// Compile a glob pattern
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut pos = 0;
        let nodes = parse_sequence(&chars, &mut pos, false)?;
        let alternatives = expand(&nodes)?;
        Ok(Glob { alternatives })
    }

    /// Check whether `value` matches this pattern in full
    pub fn matches(&self, value: &str) -> bool {
        let value: Vec<char> = normalize(value).chars().collect();
        self.alternatives
            .iter()
            .any(|tokens| match_tokens(tokens, &value))
    }
}

/// Stateless pattern matcher used by the authorization engine
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if a value matches a glob pattern
    ///
    /// A pattern that fails to compile never matches.
    ///
    /// # Examples
    /// ```
    /// use authzen::iam::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("document:*", "document:read"));
    /// assert!(PatternMatcher::matches("user-?", "user-1"));
    /// assert!(!PatternMatcher::matches("user-?", "user-12"));
    /// ```
    pub fn matches(pattern: &str, value: &str) -> bool {
        let normalized = normalize(value);
        let value: &str = &normalized;

        // Fast paths for the two most common shapes
        if pattern == "*" || pattern == "**" {
            return pattern == "**" || !value.contains(SEPARATOR);
        }
        if !pattern.contains(['*', '?', '[', '{', '\\']) {
            return pattern == value;
        }

        match Glob::new(pattern) {
            Ok(glob) => glob.matches(value),
            Err(_) => false,
        }
    }

    /// Check if any pattern in the list matches the value
    ///
    /// An empty list never matches.
    pub fn matches_any(patterns: &[String], value: &str) -> bool {
        patterns.iter().any(|p| Self::matches(p, value))
    }

    /// Check that a pattern compiles
    pub fn validate(pattern: &str) -> Result<(), GlobError> {
        Glob::new(pattern).map(|_| ())
    }
}

/// Collapse repeated separators and drop a trailing one; a lone `/` is kept
fn normalize(value: &str) -> Cow<'_, str> {
    if !value.contains("//") && (value.len() <= 1 || !value.ends_with(SEPARATOR)) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == SEPARATOR && out.ends_with(SEPARATOR) {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with(SEPARATOR) {
        out.pop();
    }
    Cow::Owned(out)
}

fn parse_sequence(
    chars: &[char],
    pos: &mut usize,
    in_alternation: bool,
) -> Result<Vec<Node>, GlobError> {
    let mut nodes = Vec::new();

    while *pos < chars.len() {
        let c = chars[*pos];
        match c {
            ',' | '}' if in_alternation => break,
            '\\' => {
                let escaped = *chars.get(*pos + 1).ok_or(GlobError::DanglingEscape)?;
                nodes.push(Node::Token(Token::Literal(escaped)));
                *pos += 2;
            }
            '*' => {
                if chars.get(*pos + 1) == Some(&'*') {
                    nodes.push(Node::Token(Token::DoubleStar));
                    *pos += 2;
                    // `***` and longer collapse into one `**`
                    while chars.get(*pos) == Some(&'*') {
                        *pos += 1;
                    }
                } else {
                    nodes.push(Node::Token(Token::Star));
                    *pos += 1;
                }
            }
            '?' => {
                nodes.push(Node::Token(Token::AnyChar));
                *pos += 1;
            }
            '[' => {
                *pos += 1;
                nodes.push(Node::Token(parse_class(chars, pos)?));
            }
            '{' => {
                *pos += 1;
                let mut branches = Vec::new();
                loop {
                    branches.push(parse_sequence(chars, pos, true)?);
                    match chars.get(*pos) {
                        Some(',') => *pos += 1,
                        Some('}') => {
                            *pos += 1;
                            break;
                        }
                        _ => return Err(GlobError::UnterminatedAlternation),
                    }
                }
                nodes.push(Node::Alternation(branches));
            }
            _ => {
                nodes.push(Node::Token(Token::Literal(c)));
                *pos += 1;
            }
        }
    }

    Ok(nodes)
}

/// Parse a character class; `pos` points just past the opening `[`
fn parse_class(chars: &[char], pos: &mut usize) -> Result<Token, GlobError> {
    let mut negated = false;
    if chars.get(*pos) == Some(&'!') {
        negated = true;
        *pos += 1;
    }

    let mut ranges = Vec::new();
    let mut first = true;

    loop {
        let c = *chars.get(*pos).ok_or(GlobError::UnterminatedClass)?;
        *pos += 1;

        let lo = match c {
            // A leading `]` is a literal member
            ']' if !first => break,
            '\\' => {
                let escaped = *chars.get(*pos).ok_or(GlobError::UnterminatedClass)?;
                *pos += 1;
                escaped
            }
            _ => c,
        };
        first = false;

        // `a-z` range unless `-` is the last member
        if chars.get(*pos) == Some(&'-') && chars.get(*pos + 1).is_some_and(|&n| n != ']') {
            let hi = chars[*pos + 1];
            *pos += 2;
            if lo <= hi {
                ranges.push((lo, hi));
            }
        } else {
            ranges.push((lo, lo));
        }
    }

    Ok(Token::Class { negated, ranges })
}

fn expand(nodes: &[Node]) -> Result<Vec<Vec<Token>>, GlobError> {
    let mut prefixes: Vec<Vec<Token>> = vec![Vec::new()];

    for node in nodes {
        match node {
            Node::Token(token) => {
                for prefix in &mut prefixes {
                    prefix.push(token.clone());
                }
            }
            Node::Alternation(branches) => {
                let mut suffixes = Vec::new();
                for branch in branches {
                    suffixes.extend(expand(branch)?);
                }
                if prefixes.len().saturating_mul(suffixes.len()) > MAX_ALTERNATIVES {
                    return Err(GlobError::TooManyAlternatives);
                }
                let mut next = Vec::with_capacity(prefixes.len() * suffixes.len());
                for prefix in &prefixes {
                    for suffix in &suffixes {
                        let mut combined = prefix.clone();
                        combined.extend(suffix.iter().cloned());
                        next.push(combined);
                    }
                }
                prefixes = next;
            }
        }
    }

    Ok(prefixes)
}

/// Dynamic programming match: row `i` holds whether `tokens[i..]` matches
/// `value[j..]` for every `j`. Rows are computed from the end of the pattern.
fn match_tokens(tokens: &[Token], value: &[char]) -> bool {
    let n = value.len();
    let mut next = vec![false; n + 1];
    next[n] = true;

    for token in tokens.iter().rev() {
        let mut cur = vec![false; n + 1];
        for j in (0..=n).rev() {
            cur[j] = match token {
                Token::Star => next[j] || (j < n && value[j] != SEPARATOR && cur[j + 1]),
                Token::DoubleStar => next[j] || (j < n && cur[j + 1]),
                single => j < n && single.accepts(value[j]) && next[j + 1],
            };
        }
        next = cur;
    }

    next[0]
}
