//! Structural queries over the element tree.
//!
//! The query language is a CSS-selector-like subset:
//!
//! - `*` and tag names (`card`, `deck`); leading digits are allowed in
//!   identifiers (`#3rd-row` needs no escaping here)
//! - `#name`, `.class`, `[attr=value]` / `[attr="value"]`
//! - descendant (whitespace) and child (`>`) combinators
//! - comma-separated alternatives
//!
//! One domain extension: `.mine` matches elements whose `player`
//! attribute equals the querying player's seat index.

use super::node::NodeData;
use crate::error::DocumentError;

/// Context a query is evaluated in.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryCtx {
    /// Seat index of the querying player, for `.mine`.
    pub player: Option<usize>,
}

impl QueryCtx {
    /// Context for a specific player's seat.
    #[must_use]
    pub fn for_player(player: usize) -> Self {
        Self {
            player: Some(player),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Step {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    mine: bool,
    attrs: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Compound {
    steps: Vec<Step>,
    /// combinators[i] joins steps[i] and steps[i+1].
    combinators: Vec<Combinator>,
}

/// A parsed query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    text: String,
    alts: Vec<Compound>,
}

impl Query {
    /// Parse a query string.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let bad = |reason: &str| DocumentError::BadQuery {
            query: text.to_string(),
            reason: reason.to_string(),
        };

        let mut alts = Vec::new();
        for alt in split_top_level(text) {
            let alt = alt.trim();
            if alt.is_empty() {
                return Err(bad("empty selector"));
            }
            alts.push(parse_compound(alt).map_err(|reason| bad(&reason))?);
        }
        if alts.is_empty() {
            return Err(bad("empty selector"));
        }
        Ok(Self {
            text: text.to_string(),
            alts,
        })
    }

    /// The original query text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether `node` matches this query, given ancestor access.
    ///
    /// `ancestors` yields the node's parent chain, nearest first.
    pub(crate) fn node_matches(
        &self,
        node: &NodeData,
        ancestors: &[&NodeData],
        ctx: &QueryCtx,
    ) -> bool {
        self.alts
            .iter()
            .any(|comp| compound_matches(comp, comp.steps.len() - 1, node, ancestors, ctx))
    }
}

fn compound_matches(
    comp: &Compound,
    step_idx: usize,
    node: &NodeData,
    ancestors: &[&NodeData],
    ctx: &QueryCtx,
) -> bool {
    if !step_matches(&comp.steps[step_idx], node, ctx) {
        return false;
    }
    if step_idx == 0 {
        return true;
    }
    match comp.combinators[step_idx - 1] {
        Combinator::Child => match ancestors.split_first() {
            Some((parent, rest)) => compound_matches(comp, step_idx - 1, parent, rest, ctx),
            None => false,
        },
        Combinator::Descendant => (0..ancestors.len()).any(|i| {
            compound_matches(comp, step_idx - 1, ancestors[i], &ancestors[i + 1..], ctx)
        }),
    }
}

fn step_matches(step: &Step, node: &NodeData, ctx: &QueryCtx) -> bool {
    if let Some(tag) = &step.tag {
        if node.tag != *tag {
            return false;
        }
    }
    if let Some(id) = &step.id {
        if node.id.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    for class in &step.classes {
        if node.class.as_deref() != Some(class.as_str()) {
            return false;
        }
    }
    if step.mine {
        let Some(player) = ctx.player else {
            return false;
        };
        if node.attrs.get("player").map(String::as_str) != Some(player.to_string().as_str()) {
            return false;
        }
    }
    for (key, value) in &step.attrs {
        if node.attrs.get(key) != Some(value) {
            return false;
        }
    }
    true
}

/// Split on commas that are not inside brackets or quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(text: &str) -> Result<Compound, String> {
    let mut steps = Vec::new();
    let mut combinators = Vec::new();
    let mut pending: Option<Combinator> = None;
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            // whitespace is a descendant combinator unless followed by '>'
            if pending.is_none() && !steps.is_empty() {
                pending = Some(Combinator::Descendant);
            }
            i += 1;
        } else if chars[i] == '>' {
            if steps.is_empty() {
                return Err("selector starts with '>'".to_string());
            }
            pending = Some(Combinator::Child);
            i += 1;
        } else {
            let (step, consumed) = parse_step(&chars[i..])?;
            i += consumed;
            if !steps.is_empty() {
                combinators.push(pending.take().unwrap_or(Combinator::Descendant));
            } else {
                pending = None;
            }
            steps.push(step);
        }
    }

    if steps.is_empty() {
        return Err("empty selector".to_string());
    }
    if pending.is_some() && combinators.len() < steps.len() {
        // trailing combinator with no right-hand step, e.g. "board >"
        if combinators.len() == steps.len() - 1 && pending == Some(Combinator::Child) {
            return Err("dangling '>'".to_string());
        }
    }
    Ok(Compound { steps, combinators })
}

/// Parse one simple-selector step, returning it and the chars consumed.
fn parse_step(chars: &[char]) -> Result<(Step, usize), String> {
    let mut step = Step::default();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    if i < chars.len() && chars[i] == '*' {
        i += 1;
    } else if i < chars.len() && is_ident_char(chars[i]) {
        step.tag = Some(read_ident(&mut i));
    }

    loop {
        match chars.get(i) {
            Some('#') => {
                i += 1;
                let id = read_ident(&mut i);
                if id.is_empty() {
                    return Err("empty #id".to_string());
                }
                step.id = Some(id);
            }
            Some('.') => {
                i += 1;
                let class = read_ident(&mut i);
                if class.is_empty() {
                    return Err("empty .class".to_string());
                }
                if class == "mine" {
                    step.mine = true;
                } else {
                    step.classes.push(class);
                }
            }
            Some('[') => {
                i += 1;
                let key = read_ident(&mut i);
                if key.is_empty() {
                    return Err("empty attribute name".to_string());
                }
                match chars.get(i) {
                    Some(']') => {
                        return Err(format!("attribute [{key}] needs =value"));
                    }
                    Some('=') => {
                        i += 1;
                        let value = if let Some(&(q @ ('"' | '\''))) = chars.get(i) {
                            i += 1;
                            let start = i;
                            while i < chars.len() && chars[i] != q {
                                i += 1;
                            }
                            if i == chars.len() {
                                return Err("unterminated quote".to_string());
                            }
                            let v: String = chars[start..i].iter().collect();
                            i += 1;
                            v
                        } else {
                            let start = i;
                            while i < chars.len() && chars[i] != ']' {
                                i += 1;
                            }
                            chars[start..i].iter().collect::<String>().trim().to_string()
                        };
                        if chars.get(i) != Some(&']') {
                            return Err("missing ']'".to_string());
                        }
                        i += 1;
                        step.attrs.push((key, value));
                    }
                    _ => return Err("malformed attribute selector".to_string()),
                }
            }
            _ => break,
        }
    }

    if i == 0 {
        return Err(format!("unexpected character '{}'", chars[0]));
    }
    Ok((step, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag_id_class() {
        let q = Query::parse("card#ace.piece").unwrap();
        let step = &q.alts[0].steps[0];

        assert_eq!(step.tag.as_deref(), Some("card"));
        assert_eq!(step.id.as_deref(), Some("ace"));
        assert_eq!(step.classes, vec!["piece".to_string()]);
    }

    #[test]
    fn test_parse_leading_digit_id() {
        let q = Query::parse("#3rd-row").unwrap();
        assert_eq!(q.alts[0].steps[0].id.as_deref(), Some("3rd-row"));
    }

    #[test]
    fn test_parse_attr_forms() {
        let q = Query::parse("[player=\"2\"]").unwrap();
        assert_eq!(
            q.alts[0].steps[0].attrs,
            vec![("player".to_string(), "2".to_string())]
        );

        let q = Query::parse("[suit=hearts]").unwrap();
        assert_eq!(
            q.alts[0].steps[0].attrs,
            vec![("suit".to_string(), "hearts".to_string())]
        );
    }

    #[test]
    fn test_parse_mine() {
        let q = Query::parse("card.mine").unwrap();
        assert!(q.alts[0].steps[0].mine);
        assert!(q.alts[0].steps[0].classes.is_empty());
    }

    #[test]
    fn test_parse_combinators() {
        let q = Query::parse("board > row card").unwrap();
        let comp = &q.alts[0];

        assert_eq!(comp.steps.len(), 3);
        assert_eq!(
            comp.combinators,
            vec![Combinator::Child, Combinator::Descendant]
        );
    }

    #[test]
    fn test_parse_alternatives() {
        let q = Query::parse("card, token.piece").unwrap();
        assert_eq!(q.alts.len(), 2);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "  ", "> card", "[=3]", "[open]", "card[", "#", "a[x='y]"] {
            assert!(Query::parse(bad).is_err(), "accepted {bad:?}");
        }
    }
}
