//! Model selection predicates.
//!
//! A predicate is a boolean expression over collection tags:
//!
//! ```text
//! expr    := and ("OR" and)*
//! and     := unary ("AND" unary)*
//! unary   := "NOT" unary | primary
//! primary := "(" expr ")" | "*" | TAG
//! ```
//!
//! Keywords and tags are case-insensitive. `*` matches every entry.

use std::collections::BTreeSet;
use std::fmt;

/// Error raised when a predicate expression cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredicateError {
    #[error("empty predicate")]
    Empty,
    #[error("unexpected '{token}' at token {position}")]
    UnexpectedToken { token: String, position: usize },
    #[error("unexpected end of predicate")]
    UnexpectedEnd,
    #[error("unclosed '(' at token {position}")]
    UnclosedParen { position: usize },
}

/// Parsed selection predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Any,
    Tag(String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Single tag-membership term.
    #[must_use]
    pub fn tag(tag: &str) -> Self {
        Self::Tag(tag.trim().to_ascii_uppercase())
    }

    /// Parse a predicate expression.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError`] on empty input, stray tokens, or unbalanced
    /// parentheses.
    pub fn parse(input: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(input);
        if tokens.is_empty() {
            return Err(PredicateError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(PredicateError::UnexpectedToken {
                token: token.to_string(),
                position: parser.pos,
            });
        }
        Ok(expr)
    }

    /// Evaluate against a set of upper-cased tags.
    #[must_use]
    pub fn matches(&self, tags: &BTreeSet<String>) -> bool {
        match self {
            Self::Any => true,
            Self::Tag(tag) => tags.contains(tag),
            Self::Not(inner) => !inner.matches(tags),
            Self::And(terms) => terms.iter().all(|t| t.matches(tags)),
            Self::Or(terms) => terms.iter().any(|t| t.matches(tags)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, terms: &[Predicate], op: &str) -> fmt::Result {
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                match term {
                    Predicate::And(_) | Predicate::Or(_) => write!(f, "({term})")?,
                    _ => write!(f, "{term}")?,
                }
            }
            Ok(())
        }

        match self {
            Self::Any => f.write_str("*"),
            Self::Tag(tag) => f.write_str(tag),
            Self::Not(inner) => match inner.as_ref() {
                Self::And(_) | Self::Or(_) => write!(f, "NOT ({inner})"),
                _ => write!(f, "NOT {inner}"),
            },
            Self::And(terms) => join(f, terms, "AND"),
            Self::Or(terms) => join(f, terms, "OR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Star,
    Tag(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
            Self::Not => f.write_str("NOT"),
            Self::Star => f.write_str("*"),
            Self::Tag(t) => f.write_str(t),
        }
    }
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let upper = word.to_ascii_uppercase();
        tokens.push(match upper.as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "*" => Token::Star,
            _ => Token::Tag(upper),
        });
        word.clear();
    };

    for ch in input.chars() {
        match ch {
            '(' | ')' => {
                flush(&mut word, &mut tokens);
                tokens.push(if ch == '(' {
                    Token::LParen
                } else {
                    Token::RParen
                });
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens);
    tokens
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Predicate::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Predicate, PredicateError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, PredicateError> {
        let position = self.pos;
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(PredicateError::UnexpectedToken {
                        token: token.to_string(),
                        position: self.pos - 1,
                    }),
                    None => Err(PredicateError::UnclosedParen { position }),
                }
            }
            Some(Token::Star) => Ok(Predicate::Any),
            Some(Token::Tag(tag)) => Ok(Predicate::Tag(tag)),
            Some(token) => Err(PredicateError::UnexpectedToken {
                token: token.to_string(),
                position,
            }),
            None => Err(PredicateError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_ascii_uppercase()).collect()
    }

    #[rstest]
    #[case("BOOK", &["BOOK"], true)]
    #[case("book", &["BOOK"], true)]
    #[case("BOOK", &["THESIS"], false)]
    #[case("BOOK OR THESIS", &["THESIS"], true)]
    #[case("BOOK AND NOT THESIS", &["BOOK", "THESIS"], false)]
    #[case("BOOK AND NOT THESIS", &["BOOK"], true)]
    #[case("NOT (VIDEO OR PHOTO)", &["BOOK"], true)]
    #[case("NOT (VIDEO OR PHOTO)", &["PHOTO"], false)]
    #[case("(ARTICLE OR PREPRINT) AND CERN", &["PREPRINT", "CERN"], true)]
    #[case("(ARTICLE OR PREPRINT) AND CERN", &["PREPRINT"], false)]
    #[case("*", &[], true)]
    #[case("a or b and c", &["A"], true)]
    #[case("a or b and c", &["B"], false)]
    fn test_predicate_matches(#[case] expr: &str, #[case] entry_tags: &[&str], #[case] expected: bool) {
        let predicate = Predicate::parse(expr).unwrap();
        assert_eq!(predicate.matches(&tags(entry_tags)), expected, "{expr}");
    }

    #[rstest]
    #[case("", PredicateError::Empty)]
    #[case("   ", PredicateError::Empty)]
    #[case("BOOK AND", PredicateError::UnexpectedEnd)]
    #[case("(BOOK OR THESIS", PredicateError::UnclosedParen { position: 0 })]
    #[case("BOOK THESIS", PredicateError::UnexpectedToken { token: "THESIS".into(), position: 1 })]
    #[case("OR BOOK", PredicateError::UnexpectedToken { token: "OR".into(), position: 0 })]
    #[case("BOOK)", PredicateError::UnexpectedToken { token: ")".into(), position: 1 })]
    fn test_predicate_parse_errors(#[case] expr: &str, #[case] expected: PredicateError) {
        assert_eq!(Predicate::parse(expr).unwrap_err(), expected);
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let predicate = Predicate::parse("A OR B AND C").unwrap();
        assert_eq!(
            predicate,
            Predicate::Or(vec![
                Predicate::tag("A"),
                Predicate::And(vec![Predicate::tag("B"), Predicate::tag("C")]),
            ])
        );
    }

    #[test]
    fn test_display_reparses_to_same_predicate() {
        let predicate = Predicate::parse("NOT (a or b) and (c or *)").unwrap();
        let rendered = predicate.to_string();
        assert_eq!(rendered, "NOT (A OR B) AND (C OR *)");
        assert_eq!(Predicate::parse(&rendered).unwrap(), predicate);
    }
}
