use std::fmt;

use regex::Regex;

/// Where an expression is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A single existing candidate.
    Candidate,
    /// A tentative combination of daughters before the vertex fit.
    Combination,
    /// The event as a whole (decision reports).
    Event,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Candidate => "candidate",
            Scope::Combination => "combination",
            Scope::Event => "event",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Num,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn kind(self) -> Kind {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => Kind::Num,
            _ => Kind::Bool,
        }
    }

    pub(crate) fn operand_kind(self) -> Kind {
        match self {
            BinOp::And | BinOp::Or => Kind::Bool,
            _ => Kind::Num,
        }
    }
}

/// Quantities of a vertex, as used by `VFASPF(...)` and `BPV(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VertexVar {
    X,
    Y,
    Z,
    Chi2,
    Chi2PerDof,
    Ndof,
}

#[derive(Debug, Clone)]
pub(crate) enum Functor {
    // Candidate scope
    P,
    Pt,
    Px,
    Py,
    Pz,
    E,
    M,
    Mm,
    Eta,
    Phi,
    Q,
    Id,
    AbsId,
    TrChi2Dof,
    TrGhostProb,
    PidE,
    PidMu,
    PidK,
    PidP,
    ProbNnK,
    ProbNnPi,
    ProbNnP,
    EndVertex(VertexVar),
    BestPv(VertexVar),
    BpvVd,
    BpvVdChi2,
    BpvDira,
    BpvIp,
    BpvIpChi2,
    MipDv,
    MipChi2Dv,
    DMass(f64),
    AdMass(f64),
    DocaMax,
    DocaChi2Max,
    Lv01,
    IsBasic,
    HasTrack,
    All,
    Never,
    Child(Box<Expr>, usize),
    MaxTree(Box<Expr>, Box<Expr>, f64),
    MinTree(Box<Expr>, Box<Expr>, f64),
    NInTree(Box<Expr>),

    // Combination scope
    AM,
    APt,
    AP,
    AEta,
    ASum(Box<Expr>),
    AdaMass(f64),
    ADoca(usize, usize),
    ADocaChi2(usize, usize),
    ADocaMax,
    ADocaChi2Max,
    ADocaCut(f64),
    ADocaChi2Cut(f64),
    AChild(Box<Expr>, usize),
    AMaxChild(Box<Expr>),
    AMinChild(Box<Expr>),

    // Event scope
    HltPass(String),
    HltPassRe(Regex),
}

impl Functor {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Functor::IsBasic
            | Functor::HasTrack
            | Functor::All
            | Functor::Never
            | Functor::ADocaCut(_)
            | Functor::ADocaChi2Cut(_)
            | Functor::HltPass(_)
            | Functor::HltPassRe(_) => Kind::Bool,
            _ => Kind::Num,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Number(f64),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Functor(Functor),
}

impl Expr {
    pub(crate) fn kind(&self) -> Kind {
        match self {
            Expr::Number(_) | Expr::Neg(_) => Kind::Num,
            Expr::Not(_) => Kind::Bool,
            Expr::Binary(op, _, _) => op.kind(),
            Expr::Functor(f) => f.kind(),
        }
    }
}
