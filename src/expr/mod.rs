//! Cut and variable expressions.
//!
//! Expressions are written in the functor language of the selection
//! framework (`(P > 2*GeV) & (MIPCHI2DV(PRIMARY) > 9)`), parsed once at
//! configuration time into an [`CompiledExpr`] and evaluated per candidate,
//! per tentative combination, or per event. Boolean results are `1.0`/`0.0`;
//! `None` means "no value" and never passes a cut.

mod ast;
mod eval;
mod parser;
mod token;

use thiserror::Error;

use crate::event::{CandidateStore, Event};
use crate::particles::ParticleTable;
use crate::types::CandidateId;

pub use ast::{Kind, Scope};
pub use eval::EvalContext;

use ast::Expr;
use eval::{is_true, Target};

/// Numeric form of a boolean, as stored in cuts and tuple columns.
pub(crate) fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown functor '{0}'")]
    UnknownFunctor(String),
    #[error("functor '{name}' is not available in {scope} scope")]
    WrongScope { name: String, scope: Scope },
    #[error("type error: {0}")]
    Type(String),
    #[error("unknown particle '{0}'")]
    UnknownParticle(String),
    #[error("invalid pattern: {0}")]
    Pattern(String),
    #[error("malformed preamble definition '{0}'")]
    Preamble(String),
}

/// Named intermediate definitions (`DZ = VFASPF(VZ) - BPV(VZ)`) that later
/// expressions may reference. Definitions are candidate-scoped and may use
/// earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Preamble {
    defs: Vec<(String, Expr)>,
}

impl Preamble {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse<S: AsRef<str>>(lines: &[S], table: &ParticleTable) -> Result<Self, ExprError> {
        let mut preamble = Preamble::empty();
        for line in lines {
            let (name, body) = parser::split_definition(line.as_ref())?;
            let expr = parser::parse(body, Scope::Candidate, table, &preamble)?;
            preamble.defs.retain(|(n, _)| *n != name);
            preamble.defs.push((name, expr));
        }
        Ok(preamble)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Expr> {
        self.defs.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.iter().map(|(n, _)| n.as_str())
    }
}

/// A parsed expression ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    scope: Scope,
    ast: Expr,
}

impl CompiledExpr {
    pub fn compile(input: &str, scope: Scope, table: &ParticleTable) -> Result<Self, ExprError> {
        Self::compile_with(input, scope, table, &Preamble::empty())
    }

    pub fn compile_with(
        input: &str,
        scope: Scope,
        table: &ParticleTable,
        preamble: &Preamble,
    ) -> Result<Self, ExprError> {
        let ast = parser::parse(input, scope, table, preamble)?;
        Ok(Self {
            source: input.to_string(),
            scope,
            ast,
        })
    }

    /// Compiles a predicate; numeric expressions are rejected.
    pub fn compile_cut(input: &str, scope: Scope, table: &ParticleTable) -> Result<Self, ExprError> {
        let e = Self::compile(input, scope, table)?;
        if e.kind() != Kind::Bool {
            return Err(ExprError::Type(format!("cut '{input}' is not a predicate")));
        }
        Ok(e)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn kind(&self) -> Kind {
        self.ast.kind()
    }

    pub fn eval_candidate(&self, ctx: &EvalContext<'_>, id: CandidateId) -> Option<f64> {
        debug_assert_eq!(self.scope, Scope::Candidate);
        self.ast.eval(ctx, Target::Candidate(id))
    }

    pub fn eval_combination(&self, ctx: &EvalContext<'_>, daughters: &[CandidateId]) -> Option<f64> {
        debug_assert_eq!(self.scope, Scope::Combination);
        self.ast.eval(ctx, Target::Combination(daughters))
    }

    pub fn eval_event(&self, event: &Event) -> Option<f64> {
        debug_assert_eq!(self.scope, Scope::Event);
        let store = CandidateStore::new();
        self.ast.eval(&EvalContext::new(event, &store), Target::Event)
    }

    pub fn accepts_candidate(&self, ctx: &EvalContext<'_>, id: CandidateId) -> bool {
        self.eval_candidate(ctx, id).is_some_and(is_true)
    }

    pub fn accepts_combination(&self, ctx: &EvalContext<'_>, daughters: &[CandidateId]) -> bool {
        self.eval_combination(ctx, daughters).is_some_and(is_true)
    }

    pub fn accepts_event(&self, event: &Event) -> bool {
        self.eval_event(event).is_some_and(is_true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ParticleTable {
        ParticleTable::standard()
    }

    fn constant(src: &str) -> f64 {
        let e = CompiledExpr::compile(src, Scope::Event, &table()).unwrap();
        e.eval_event(&Event::default()).unwrap()
    }

    #[test]
    fn units_scale_to_mev_and_mm() {
        assert!((constant("2*GeV") - 2000.0).abs() < 1e-10);
        assert!((constant("0.5*mm + 1*cm") - 10.5).abs() < 1e-10);
        assert!((constant("110*MeV") - 110.0).abs() < 1e-10);
    }

    #[test]
    fn boolean_results_are_one_or_zero() {
        assert_eq!(constant("2 > 1"), 1.0);
        assert_eq!(constant("(2 > 1) & (1 > 2)"), 0.0);
        assert_eq!(flag(true) + flag(false), 1.0);
    }

    #[test]
    fn job_cuts_compile() {
        let t = table();
        for (src, scope) in [
            ("(P > 2*GeV)", Scope::Candidate),
            (
                "(((APT>1*GeV) | (ASUM(PT)>1.2*GeV)) & (ADAMASS('D0')<110*MeV) & (ADOCA(1,2)<0.5*mm) & (ADOCACHI2CUT(15,'')))",
                Scope::Combination,
            ),
            ("((VFASPF(VCHI2)<10) & (ADMASS('D0')<100*MeV) & (BPVVDCHI2>36))", Scope::Candidate),
            ("(TRCHI2DOF<5.0)& (P>2000.0)& (PT>250.0) & (MIPCHI2DV(PRIMARY)>-1.0)", Scope::Candidate),
            ("(AM<4000.0)& (APT>2000.0)& (ADOCAMAX('')<0.5)", Scope::Combination),
            (
                "(VFASPF(VCHI2)<60.0)&(CHILD(VFASPF(VZ),1) - VFASPF(VZ) > 0.01)& (BPVVDCHI2 > -1.0)& (BPVDIRA > 0.0)",
                Scope::Candidate,
            ),
            ("HLT_PASS('StrippingXiccXiccPlusToD0PKPiDecision')", Scope::Event),
        ] {
            let e = CompiledExpr::compile_cut(src, scope, &t);
            assert!(e.is_ok(), "{src}: {e:?}");
        }
    }

    #[test]
    fn preamble_definitions_are_inlined() {
        let t = table();
        let pre = Preamble::parse(
            &[
                "DZ = VFASPF(VZ) - BPV(VZ)",
                "TRACK_MAX_PT = MAXTREE(ISBASIC & HASTRACK, PT, -1)",
            ],
            &t,
        )
        .unwrap();
        assert_eq!(pre.names().collect::<Vec<_>>(), vec!["DZ", "TRACK_MAX_PT"]);
        let e = CompiledExpr::compile_with("TRACK_MAX_PT", Scope::Candidate, &t, &pre).unwrap();
        assert_eq!(e.kind(), Kind::Num);
    }

    #[test]
    fn malformed_preamble_line() {
        let err = Preamble::parse(&["= P"], &table()).unwrap_err();
        assert!(matches!(err, ExprError::Preamble(_)));
    }

    #[test]
    fn combination_functor_in_candidate_scope_is_rejected() {
        let err = CompiledExpr::compile("AM < 4000", Scope::Candidate, &table()).unwrap_err();
        assert_eq!(
            err,
            ExprError::WrongScope {
                name: "AM".into(),
                scope: Scope::Candidate
            }
        );
    }

    #[test]
    fn syntax_and_type_errors() {
        let t = table();
        assert!(matches!(
            CompiledExpr::compile("P >", Scope::Candidate, &t),
            Err(ExprError::Syntax(_))
        ));
        assert!(matches!(
            CompiledExpr::compile("FOO > 1", Scope::Candidate, &t),
            Err(ExprError::UnknownFunctor(_))
        ));
        assert!(matches!(
            CompiledExpr::compile("P & PT", Scope::Candidate, &t),
            Err(ExprError::Type(_))
        ));
        assert!(matches!(
            CompiledExpr::compile_cut("P + 1", Scope::Candidate, &t),
            Err(ExprError::Type(_))
        ));
        assert!(matches!(
            CompiledExpr::compile("ADMASS('Dzero') < 1", Scope::Candidate, &t),
            Err(ExprError::UnknownParticle(_))
        ));
    }

    #[test]
    fn hlt_pass_over_decision_reports() {
        use crate::event::TriggerDecision;
        let t = table();
        let event = Event {
            decisions: vec![
                TriggerDecision {
                    name: "StrippingXiccXiccPlusToD0PKPiDecision".into(),
                    decision: true,
                    objects: vec![],
                },
                TriggerDecision {
                    name: "Hlt2CharmHadD02HH_D02KPiDecision".into(),
                    decision: false,
                    objects: vec![],
                },
            ],
            ..Event::default()
        };
        let pass = CompiledExpr::compile_cut(
            "HLT_PASS('StrippingXiccXiccPlusToD0PKPiDecision')",
            Scope::Event,
            &t,
        )
        .unwrap();
        assert!(pass.accepts_event(&event));
        let re = CompiledExpr::compile_cut("HLT_PASS_RE('Hlt2CharmHad.*Decision')", Scope::Event, &t)
            .unwrap();
        assert!(!re.accepts_event(&event));
    }
}
