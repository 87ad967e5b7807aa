use regex::Regex;

use super::ast::{BinOp, Expr, Functor, Kind, Scope, VertexVar};
use super::token::{tokenize, Token};
use super::{ExprError, Preamble};
use crate::particles::ParticleTable;

/// Unit symbols. Energies are in MeV, lengths in mm, times in ns.
pub(crate) fn unit(name: &str) -> Option<f64> {
    Some(match name {
        "keV" => 1e-3,
        "MeV" => 1.0,
        "GeV" => 1e3,
        "TeV" => 1e6,
        "um" | "micrometer" => 1e-3,
        "mm" => 1.0,
        "cm" => 10.0,
        "m" | "meter" => 1e3,
        "fs" => 1e-6,
        "ps" => 1e-3,
        "ns" => 1.0,
        _ => return None,
    })
}

pub(crate) fn parse(
    input: &str,
    scope: Scope,
    table: &ParticleTable,
    preamble: &Preamble,
) -> Result<Expr, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        scope,
        table,
        preamble,
    };
    let expr = parser.parse_or()?;
    if parser.pos < tokens.len() {
        return Err(ExprError::Syntax(format!(
            "unexpected token after expression: {:?}",
            tokens[parser.pos]
        )));
    }
    Ok(expr)
}

/// Splits a `NAME = expression` preamble line.
pub(crate) fn split_definition(line: &str) -> Result<(String, &str), ExprError> {
    let bad = || ExprError::Preamble(line.to_string());
    let (name, body) = line.split_once('=').ok_or_else(bad)?;
    let name = name.trim();
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !valid || body.trim().is_empty() {
        return Err(bad());
    }
    Ok((name.to_string(), body))
}

fn const_value(e: &Expr) -> Option<f64> {
    match e {
        Expr::Number(n) => Some(*n),
        Expr::Neg(a) => Some(-const_value(a)?),
        Expr::Binary(op, a, b) => {
            let (a, b) = (const_value(a)?, const_value(b)?);
            match op {
                BinOp::Add => Some(a + b),
                BinOp::Sub => Some(a - b),
                BinOp::Mul => Some(a * b),
                BinOp::Div => Some(a / b),
                _ => None,
            }
        }
        _ => None,
    }
}

fn functor_scope(f: &Functor) -> Scope {
    use Functor::*;
    match f {
        AM | APt | AP | AEta | ASum(_) | AdaMass(_) | ADoca(..) | ADocaChi2(..) | ADocaMax
        | ADocaChi2Max | ADocaCut(_) | ADocaChi2Cut(_) | AChild(..) | AMaxChild(_)
        | AMinChild(_) => Scope::Combination,
        HltPass(_) | HltPassRe(_) => Scope::Event,
        _ => Scope::Candidate,
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    scope: Scope,
    table: &'a ParticleTable,
    preamble: &'a Preamble,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(ExprError::Syntax(format!("expected {:?}, got {:?}", expected, other))),
        }
    }

    fn check(&self, e: &Expr, want: Kind, context: &str) -> Result<(), ExprError> {
        if e.kind() == want {
            Ok(())
        } else {
            let what = match want {
                Kind::Num => "numeric",
                Kind::Bool => "boolean",
            };
            Err(ExprError::Type(format!("{context} expects a {what} operand")))
        }
    }

    fn binary(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Result<Expr, ExprError> {
        let context = format!("{op:?}");
        self.check(&lhs, op.operand_kind(), &context)?;
        self.check(&rhs, op.operand_kind(), &context)?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = self.binary(BinOp::Or, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = self.binary(BinOp::And, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        self.binary(op, lhs, rhs)
    }

    fn parse_add(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                self.check(&e, Kind::Num, "unary minus")?;
                Ok(Expr::Neg(Box::new(e)))
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                self.check(&e, Kind::Bool, "negation")?;
                Ok(Expr::Not(Box::new(e)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if let Some(def) = self.preamble.lookup(&name) {
                    if self.scope != Scope::Candidate && const_value(def).is_none() {
                        return Err(ExprError::WrongScope {
                            name,
                            scope: self.scope,
                        });
                    }
                    return Ok(def.clone());
                }
                if let Some(u) = unit(&name) {
                    return Ok(Expr::Number(u));
                }
                let functor = self.parse_functor(&name)?;
                let scope = functor_scope(&functor);
                if scope != self.scope {
                    return Err(ExprError::WrongScope {
                        name,
                        scope: self.scope,
                    });
                }
                Ok(Expr::Functor(functor))
            }
            other => Err(ExprError::Syntax(format!(
                "expected number, functor, or '(', got {:?}",
                other
            ))),
        }
    }

    // ── Functor arguments ──────────────────────────────────────

    fn open(&mut self) -> Result<(), ExprError> {
        self.expect(&Token::LParen)
    }

    fn close(&mut self) -> Result<(), ExprError> {
        self.expect(&Token::RParen)
    }

    fn comma(&mut self) -> Result<(), ExprError> {
        self.expect(&Token::Comma)
    }

    /// Accepts an optional empty `()` after an argument-less functor.
    fn optional_empty_parens(&mut self) -> Result<(), ExprError> {
        if matches!(self.peek(), Some(Token::LParen))
            && matches!(self.tokens.get(self.pos + 1), Some(Token::RParen))
        {
            self.pos += 2;
        }
        Ok(())
    }

    fn sub_expr(&mut self, scope: Scope) -> Result<Expr, ExprError> {
        let outer = std::mem::replace(&mut self.scope, scope);
        let e = self.parse_or();
        self.scope = outer;
        e
    }

    fn num_arg(&mut self) -> Result<Expr, ExprError> {
        let e = self.sub_expr(Scope::Candidate)?;
        self.check(&e, Kind::Num, "functor argument")?;
        Ok(e)
    }

    fn bool_arg(&mut self) -> Result<Expr, ExprError> {
        let e = self.sub_expr(Scope::Candidate)?;
        self.check(&e, Kind::Bool, "predicate argument")?;
        Ok(e)
    }

    fn const_arg(&mut self) -> Result<f64, ExprError> {
        let e = self.parse_add()?;
        const_value(&e).ok_or_else(|| ExprError::Syntax("expected a constant".to_string()))
    }

    fn index_arg(&mut self) -> Result<usize, ExprError> {
        match self.advance().cloned() {
            Some(Token::Num(n)) if n >= 1.0 && n.fract() == 0.0 => Ok(n as usize),
            other => Err(ExprError::Syntax(format!(
                "expected a 1-based daughter index, got {:?}",
                other
            ))),
        }
    }

    fn string_arg(&mut self) -> Result<String, ExprError> {
        match self.advance().cloned() {
            Some(Token::Str(s)) => Ok(s),
            other => Err(ExprError::Syntax(format!("expected a string, got {:?}", other))),
        }
    }

    fn mass_arg(&mut self) -> Result<f64, ExprError> {
        let name = self.string_arg()?;
        self.table
            .by_name(&name)
            .map(|p| p.mass)
            .ok_or(ExprError::UnknownParticle(name))
    }

    fn vertex_var(&mut self) -> Result<VertexVar, ExprError> {
        match self.advance().cloned() {
            Some(Token::Ident(v)) => Ok(match v.as_str() {
                "VX" => VertexVar::X,
                "VY" => VertexVar::Y,
                "VZ" => VertexVar::Z,
                "VCHI2" => VertexVar::Chi2,
                "VCHI2PDOF" => VertexVar::Chi2PerDof,
                "VDOF" => VertexVar::Ndof,
                _ => return Err(ExprError::UnknownFunctor(v)),
            }),
            other => Err(ExprError::Syntax(format!("expected a vertex functor, got {:?}", other))),
        }
    }

    fn primary_arg(&mut self) -> Result<(), ExprError> {
        match self.advance().cloned() {
            Some(Token::Ident(v)) if v == "PRIMARY" => Ok(()),
            other => Err(ExprError::Syntax(format!("expected PRIMARY, got {:?}", other))),
        }
    }

    /// Optional trailing distance-calculator name, e.g. the `''` in
    /// `ADOCAMAX('')`.
    fn optional_tool_arg(&mut self, leading_comma: bool) -> Result<(), ExprError> {
        if leading_comma {
            if !matches!(self.peek(), Some(Token::Comma)) {
                return Ok(());
            }
            self.advance();
        }
        if matches!(self.peek(), Some(Token::Str(_))) {
            self.advance();
        }
        Ok(())
    }

    fn parse_functor(&mut self, name: &str) -> Result<Functor, ExprError> {
        use Functor::*;
        let f = match name {
            "P" => P,
            "PT" => Pt,
            "PX" => Px,
            "PY" => Py,
            "PZ" => Pz,
            "E" => E,
            "M" => M,
            "MM" => Mm,
            "ETA" => Eta,
            "PHI" => Phi,
            "Q" => Q,
            "ID" => Id,
            "ABSID" => AbsId,
            "TRCHI2DOF" => TrChi2Dof,
            "TRGHOSTPROB" | "TRGHP" => TrGhostProb,
            "PIDe" => PidE,
            "PIDmu" => PidMu,
            "PIDK" => PidK,
            "PIDp" => PidP,
            "PROBNNk" => ProbNnK,
            "PROBNNpi" => ProbNnPi,
            "PROBNNp" => ProbNnP,
            "BPVVD" => BpvVd,
            "BPVVDCHI2" => BpvVdChi2,
            "BPVDIRA" => BpvDira,
            "BPVIP" => {
                self.optional_empty_parens()?;
                BpvIp
            }
            "BPVIPCHI2" => {
                self.optional_empty_parens()?;
                BpvIpChi2
            }
            "DOCAMAX" => DocaMax,
            "DOCACHI2MAX" => DocaChi2Max,
            "LV01" => Lv01,
            "ISBASIC" => IsBasic,
            "HASTRACK" => HasTrack,
            "ALL" => All,
            "NONE" => Never,
            "AM" => AM,
            "APT" => APt,
            "AP" => AP,
            "AETA" => AEta,
            "VFASPF" | "BPV" => {
                self.open()?;
                let v = self.vertex_var()?;
                self.close()?;
                if name == "VFASPF" {
                    EndVertex(v)
                } else {
                    BestPv(v)
                }
            }
            "MIPDV" | "MIPCHI2DV" => {
                self.open()?;
                self.primary_arg()?;
                self.close()?;
                if name == "MIPDV" {
                    MipDv
                } else {
                    MipChi2Dv
                }
            }
            "DMASS" | "ADMASS" | "ADAMASS" => {
                self.open()?;
                let m = self.mass_arg()?;
                self.close()?;
                match name {
                    "DMASS" => DMass(m),
                    "ADMASS" => AdMass(m),
                    _ => AdaMass(m),
                }
            }
            "CHILD" | "ACHILD" => {
                self.open()?;
                let e = self.num_arg()?;
                self.comma()?;
                let i = self.index_arg()?;
                self.close()?;
                if name == "CHILD" {
                    Child(Box::new(e), i)
                } else {
                    AChild(Box::new(e), i)
                }
            }
            "MAXTREE" | "MINTREE" => {
                self.open()?;
                let pred = self.bool_arg()?;
                self.comma()?;
                let fun = self.num_arg()?;
                self.comma()?;
                let default = self.const_arg()?;
                self.close()?;
                if name == "MAXTREE" {
                    MaxTree(Box::new(pred), Box::new(fun), default)
                } else {
                    MinTree(Box::new(pred), Box::new(fun), default)
                }
            }
            "NINTREE" => {
                self.open()?;
                let pred = self.bool_arg()?;
                self.close()?;
                NInTree(Box::new(pred))
            }
            "ASUM" | "AMAXCHILD" | "AMINCHILD" => {
                self.open()?;
                let e = self.num_arg()?;
                self.close()?;
                match name {
                    "ASUM" => ASum(Box::new(e)),
                    "AMAXCHILD" => AMaxChild(Box::new(e)),
                    _ => AMinChild(Box::new(e)),
                }
            }
            "ADOCA" | "ADOCACHI2" => {
                self.open()?;
                let i = self.index_arg()?;
                self.comma()?;
                let j = self.index_arg()?;
                self.optional_tool_arg(true)?;
                self.close()?;
                if name == "ADOCA" {
                    ADoca(i, j)
                } else {
                    ADocaChi2(i, j)
                }
            }
            "ADOCAMAX" | "AMAXDOCA" | "ADOCACHI2MAX" => {
                self.open()?;
                self.optional_tool_arg(false)?;
                self.close()?;
                if name == "ADOCACHI2MAX" {
                    ADocaChi2Max
                } else {
                    ADocaMax
                }
            }
            "ADOCACUT" | "ADOCACHI2CUT" => {
                self.open()?;
                let x = self.const_arg()?;
                self.optional_tool_arg(true)?;
                self.close()?;
                if name == "ADOCACUT" {
                    ADocaCut(x)
                } else {
                    ADocaChi2Cut(x)
                }
            }
            "HLT_PASS" | "HLT_PASS_RE" => {
                self.open()?;
                let s = self.string_arg()?;
                self.close()?;
                if name == "HLT_PASS" {
                    HltPass(s)
                } else {
                    let re = Regex::new(&format!("^(?:{s})$"))
                        .map_err(|e| ExprError::Pattern(e.to_string()))?;
                    HltPassRe(re)
                }
            }
            _ => return Err(ExprError::UnknownFunctor(name.to_string())),
        };
        Ok(f)
    }
}
