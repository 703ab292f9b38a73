//! Dedup key templates (`"{user_id}:{source_ip}"`).

use ironstream_core::event::CanonicalEvent;

use crate::error::CorrelationError;

/// Rendered in place of a field the event does not carry.
pub const MISSING_FIELD: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(String),
}

/// Parsed dedup key template
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DedupTemplate {
    pieces: Vec<Piece>,
}

impl DedupTemplate {
    /// Parses `{field}` placeholders. `{{` and `}}` are literal braces.
    pub fn parse(rule_id: &str, template: &str) -> Result<Self, CorrelationError> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    let field = field.trim();
                    if !closed || field.is_empty() {
                        return Err(CorrelationError::validation(
                            rule_id,
                            format!("malformed dedup_key template '{template}'"),
                        ));
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Field(field.to_owned()));
                }
                '}' => {
                    return Err(CorrelationError::validation(
                        rule_id,
                        format!("unmatched '}}' in dedup_key template '{template}'"),
                    ));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Ok(Self { pieces })
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Renders against an event; an empty template renders as `fallback`.
    pub fn render(&self, event: &CanonicalEvent, fallback: &str) -> String {
        if self.pieces.is_empty() {
            return fallback.to_owned();
        }
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Field(f) => match event.field(f) {
                    Some(v) => out.push_str(&v),
                    None => out.push_str(MISSING_FIELD),
                },
            }
        }
        out
    }
}
