//! Decay descriptors such as `[Xi_cc+ -> ^(D0 -> ^K- ^pi+) ^p+ ^K- ^pi+]CC`.
//!
//! `->` describes a reconstructed decay, `=>` a generated one (extra
//! photons tolerated). A `^` marks a node for branch binding and a trailing
//! `cc`/`CC` after a bracketed descriptor adds the charge-conjugate pattern.

use std::fmt;

use thiserror::Error;

use super::table::ParticleTable;

#[derive(Debug, Error, PartialEq)]
pub enum DescriptorError {
    #[error("Malformed decay descriptor '{descriptor}': {reason}")]
    Malformed { descriptor: String, reason: String },
    #[error("Unknown particle '{0}'")]
    UnknownParticle(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrow {
    /// `->`
    Reconstructed,
    /// `=>`
    Generated,
}

/// One node of a decay pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayNode {
    pub particle: String,
    pub marked: bool,
    pub arrow: Option<Arrow>,
    pub daughters: Vec<DecayNode>,
}

impl DecayNode {
    pub fn leaf(particle: impl Into<String>) -> Self {
        Self {
            particle: particle.into(),
            marked: false,
            arrow: None,
            daughters: Vec::new(),
        }
    }

    pub fn is_basic(&self) -> bool {
        self.daughters.is_empty()
    }

    /// Node reached by following daughter indices from this node.
    pub fn at(&self, path: &[usize]) -> Option<&DecayNode> {
        match path.split_first() {
            None => Some(self),
            Some((&i, rest)) => self.daughters.get(i)?.at(rest),
        }
    }

    /// Structural equality ignoring `^` marks.
    pub fn same_shape(&self, other: &DecayNode) -> bool {
        self.particle == other.particle
            && self.daughters.len() == other.daughters.len()
            && self
                .daughters
                .iter()
                .zip(&other.daughters)
                .all(|(a, b)| a.same_shape(b))
    }

    pub fn conjugate(&self, table: &ParticleTable) -> Result<DecayNode, DescriptorError> {
        let particle = table
            .antiparticle(&self.particle)
            .ok_or_else(|| DescriptorError::UnknownParticle(self.particle.clone()))?;
        let daughters = self
            .daughters
            .iter()
            .map(|d| d.conjugate(table))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DecayNode {
            particle: particle.to_string(),
            marked: self.marked,
            arrow: self.arrow,
            daughters,
        })
    }

    fn validate(&self, table: &ParticleTable) -> Result<(), DescriptorError> {
        if table.by_name(&self.particle).is_none() {
            return Err(DescriptorError::UnknownParticle(self.particle.clone()));
        }
        self.daughters.iter().try_for_each(|d| d.validate(table))
    }

    fn collect_marked(&self, path: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if self.marked {
            out.push(path.clone());
        }
        for (i, d) in self.daughters.iter().enumerate() {
            path.push(i);
            d.collect_marked(path, out);
            path.pop();
        }
    }
}

impl fmt::Display for DecayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.marked {
            f.write_str("^")?;
        }
        if self.daughters.is_empty() {
            return f.write_str(&self.particle);
        }
        let arrow = match self.arrow {
            Some(Arrow::Generated) => "=>",
            _ => "->",
        };
        write!(f, "({} {}", self.particle, arrow)?;
        for d in &self.daughters {
            write!(f, " {d}")?;
        }
        f.write_str(")")
    }
}

/// A parsed decay descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub head: DecayNode,
    pub cc: bool,
}

impl Descriptor {
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let malformed = |reason: &str| DescriptorError::Malformed {
            descriptor: input.to_string(),
            reason: reason.to_string(),
        };

        let tokens = tokenize(input);
        let mut parser = Parser { tokens: &tokens, pos: 0 };

        let (head, cc) = if parser.eat(&Token::LBracket) {
            let head = parser.parse_tree().map_err(|r| malformed(&r))?;
            if !parser.eat(&Token::RBracket) {
                return Err(malformed("expected ']'"));
            }
            let cc = match parser.peek() {
                Some(Token::Name(n)) if n.eq_ignore_ascii_case("cc") => {
                    parser.pos += 1;
                    true
                }
                _ => false,
            };
            (head, cc)
        } else {
            (parser.parse_tree().map_err(|r| malformed(&r))?, false)
        };

        if parser.pos != tokens.len() {
            return Err(malformed("trailing tokens"));
        }
        Ok(Descriptor { head, cc })
    }

    /// Parses and checks every particle name against the table.
    pub fn parse_with(input: &str, table: &ParticleTable) -> Result<Self, DescriptorError> {
        let descriptor = Self::parse(input)?;
        descriptor.head.validate(table)?;
        Ok(descriptor)
    }

    /// The explicit pattern plus, for `cc` descriptors, its conjugate when
    /// that differs.
    pub fn patterns(&self, table: &ParticleTable) -> Result<Vec<DecayNode>, DescriptorError> {
        let mut out = vec![self.head.clone()];
        if self.cc {
            let conj = self.head.conjugate(table)?;
            if !is_same_decay(&conj, &self.head) {
                out.push(conj);
            }
        }
        Ok(out)
    }

    /// Paths (daughter indices from the head) of the `^`-marked nodes.
    pub fn marked_paths(&self) -> Vec<Vec<usize>> {
        let mut out = Vec::new();
        self.head.collect_marked(&mut Vec::new(), &mut out);
        out
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cc {
            write!(f, "[{}]CC", self.head)
        } else {
            write!(f, "{}", self.head)
        }
    }
}

// Order-insensitive comparison of two decays (`[pi+ pi-]cc` is self-conjugate).
fn is_same_decay(a: &DecayNode, b: &DecayNode) -> bool {
    if a.particle != b.particle || a.daughters.len() != b.daughters.len() {
        return false;
    }
    let mut used = vec![false; b.daughters.len()];
    a.daughters.iter().all(|da| {
        let hit = b
            .daughters
            .iter()
            .enumerate()
            .find(|(j, db)| !used[*j] && is_same_decay(da, db));
        match hit {
            Some((j, _)) => {
                used[j] = true;
                true
            }
            None => false,
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LBracket,
    RBracket,
    LParen,
    RParen,
    Caret,
    Arrow(Arrow),
    Name(String),
}

fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let is_arrow = |i: usize| {
        i + 1 < chars.len() && (chars[i] == '-' || chars[i] == '=') && chars[i + 1] == '>'
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if is_arrow(i) {
            let arrow = if c == '-' { Arrow::Reconstructed } else { Arrow::Generated };
            tokens.push(Token::Arrow(arrow));
            i += 2;
            continue;
        }
        let single = match c {
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '^' => Some(Token::Caret),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len()
            && !chars[i].is_whitespace()
            && !"[]()^".contains(chars[i])
            && !is_arrow(i)
        {
            i += 1;
        }
        tokens.push(Token::Name(chars[start..i].iter().collect()));
    }
    tokens
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn name(&mut self) -> Result<String, String> {
        match self.peek() {
            Some(Token::Name(n)) => {
                let n = n.clone();
                self.pos += 1;
                Ok(n)
            }
            other => Err(format!("expected particle name, got {other:?}")),
        }
    }

    // tree := name (arrow item+)?
    fn parse_tree(&mut self) -> Result<DecayNode, String> {
        let particle = self.name()?;
        let mut node = DecayNode::leaf(particle);
        if let Some(Token::Arrow(a)) = self.peek() {
            node.arrow = Some(*a);
            self.pos += 1;
            while matches!(
                self.peek(),
                Some(Token::Caret) | Some(Token::LParen) | Some(Token::Name(_))
            ) {
                node.daughters.push(self.parse_item()?);
            }
            if node.daughters.is_empty() {
                return Err(format!("'{}' has an arrow but no daughters", node.particle));
            }
        }
        Ok(node)
    }

    // item := '^'? ( '(' tree ')' | name )
    fn parse_item(&mut self) -> Result<DecayNode, String> {
        let marked = self.eat(&Token::Caret);
        let mut node = if self.eat(&Token::LParen) {
            let inner = self.parse_tree()?;
            if !self.eat(&Token::RParen) {
                return Err("expected ')'".to_string());
            }
            inner
        } else {
            DecayNode::leaf(self.name()?)
        };
        node.marked = marked;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cc_two_body() {
        let d = Descriptor::parse("[D0 -> K- pi+]cc").unwrap();
        assert!(d.cc);
        assert_eq!(d.head.particle, "D0");
        let names: Vec<_> = d.head.daughters.iter().map(|n| n.particle.as_str()).collect();
        assert_eq!(names, vec!["K-", "pi+"]);
    }

    #[test]
    fn parses_marked_nested_tree_without_spaces() {
        let d = Descriptor::parse("[Xi_cc+ -> ^(D0-> ^K- ^pi+) ^p+ ^K- ^pi+]CC").unwrap();
        assert_eq!(d.head.daughters.len(), 4);
        assert_eq!(d.head.daughters[0].particle, "D0");
        assert_eq!(d.head.daughters[0].daughters.len(), 2);
        assert_eq!(
            d.marked_paths(),
            vec![vec![0], vec![0, 0], vec![0, 1], vec![1], vec![2], vec![3]]
        );
    }

    #[test]
    fn generated_arrow() {
        let d = Descriptor::parse("[Xi_cc+ => (D0 => K- pi+) p+ K- pi+]CC").unwrap();
        assert_eq!(d.head.arrow, Some(Arrow::Generated));
        assert_eq!(d.head.daughters[0].arrow, Some(Arrow::Generated));
    }

    #[test]
    fn conjugate_pattern() {
        let table = ParticleTable::standard();
        let d = Descriptor::parse_with("[D0 -> K- pi+]cc", &table).unwrap();
        let patterns = d.patterns(&table).unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[1].particle, "D~0");
        assert_eq!(patterns[1].daughters[0].particle, "K+");
        assert_eq!(patterns[1].daughters[1].particle, "pi-");
    }

    #[test]
    fn self_conjugate_pattern_is_not_duplicated() {
        let table = ParticleTable::standard();
        let d = Descriptor::parse_with("[KS0 -> pi+ pi-]cc", &table).unwrap();
        assert_eq!(d.patterns(&table).unwrap().len(), 1);
    }

    #[test]
    fn rejects_unknown_particles_and_bad_syntax() {
        let table = ParticleTable::standard();
        assert_eq!(
            Descriptor::parse_with("[D0 -> K- pion+]cc", &table),
            Err(DescriptorError::UnknownParticle("pion+".into()))
        );
        assert!(Descriptor::parse("[D0 -> K- pi+").is_err());
        assert!(Descriptor::parse("D0 ->").is_err());
        assert!(Descriptor::parse("D0 -> (K- pi+").is_err());
    }
}
