mod common;

use std::collections::BTreeMap;

use common::{D0Decay, EventBuilder, D0_MASS, D0_TRIGGER, KAONS, PIONS};
use decay_select::config::presets;
use std::collections::BTreeSet;

use decay_select::event::{CandidateStore, Event, TriggerDecision, TriggerObject};
use decay_select::expr::ExprError;
use decay_select::particles::{ParticleId, ParticleTable};
use decay_select::selection::{
    Algorithm, CombinerConfig, FilterConfig, NodeError, Pipeline, PipelineError, SelectionSpec,
    TaggerConfig, TisTos,
};
use decay_select::selection::tagger::classify;
use decay_select::types::{CandidateId, SelectionName, TrackId};

const TOS_SPEC: &str = "Hlt2.*CharmHadD02.*Decision%TOS";

fn d0_event(d0: &D0Decay) -> Event {
    d0.add_to(EventBuilder::new(1, 1)).build()
}

/// Runs the pipeline on one event and returns the store plus the
/// candidates of every executed selection.
fn run(
    pipeline: &mut Pipeline,
    event: &Event,
) -> (CandidateStore, BTreeMap<SelectionName, Vec<CandidateId>>) {
    let table = ParticleTable::standard();
    let mut store = CandidateStore::new();
    let out = pipeline.run(event, &mut store, &table);
    let selections = out.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    (store, selections)
}

fn build(specs: &[SelectionSpec], top: &str) -> Result<Pipeline, PipelineError> {
    Pipeline::build(specs, &top.into(), &ParticleTable::standard())
}

fn count(selections: &BTreeMap<SelectionName, Vec<CandidateId>>, name: &str) -> usize {
    selections.get(&SelectionName::from(name)).map_or(0, Vec::len)
}

fn with_d0_filter(code: &str) -> Vec<SelectionSpec> {
    let mut specs = presets::xicc_selections();
    for spec in &mut specs {
        if spec.name.as_str() == "Sel_D02KPi" {
            spec.algorithm = Algorithm::Filter(FilterConfig {
                code: code.to_string(),
            });
        }
    }
    specs
}

#[test]
fn d0_inside_mass_window_and_displaced_passes() {
    let mut pipeline = build(&presets::xicc_selections(), "Sel_D02KPi").unwrap();
    let (store, sel) = run(&mut pipeline, &d0_event(&D0Decay::nominal()));

    assert_eq!(count(&sel, "Sel_LooseD02KPi"), 1);
    assert_eq!(count(&sel, "Sel_D02KPi"), 1);
    let d0 = store.get(sel[&SelectionName::from("Sel_D02KPi")][0]);
    assert_eq!(d0.id, ParticleId(421));
    assert!((d0.momentum.mass() - D0_MASS).abs() < 1e-3);
    assert_eq!(d0.daughters.len(), 2);
    let vertex = d0.end_vertex.as_ref().unwrap();
    assert!((vertex.position.z - 10.0).abs() < 1e-6);
    assert!(vertex.chi2 < 1e-6);
}

#[test]
fn d0_outside_combination_mass_window_is_rejected() {
    let mut pipeline = build(&presets::xicc_selections(), "Sel_D02KPi").unwrap();
    let (_, sel) = run(&mut pipeline, &d0_event(&D0Decay::with_flight(10.0, D0_MASS + 150.0)));
    assert_eq!(count(&sel, "Sel_LooseD02KPi"), 0);
    assert_eq!(count(&sel, "Sel_D02KPi"), 0);
    let stats = &pipeline.combiner_stats()[&SelectionName::from("Sel_LooseD02KPi")];
    assert_eq!(stats.combinations, 1);
    assert_eq!(stats.failed_combination_cut, 1);
}

#[test]
fn soft_filter_tightens_mass_window() {
    let mut pipeline = build(&presets::xicc_selections(), "Sel_D02KPi").unwrap();
    let (_, sel) = run(&mut pipeline, &d0_event(&D0Decay::with_flight(10.0, D0_MASS + 90.0)));
    assert_eq!(count(&sel, "Sel_LooseD02KPi"), 1);
    assert_eq!(count(&sel, "Sel_D02KPi"), 0);
}

#[test]
fn d0_without_flight_significance_is_rejected() {
    let mut pipeline = build(&presets::xicc_selections(), "Sel_D02KPi").unwrap();
    let (_, sel) = run(&mut pipeline, &d0_event(&D0Decay::with_flight(0.3, D0_MASS)));
    assert_eq!(count(&sel, "Sel_LooseD02KPi"), 0);
    let stats = &pipeline.combiner_stats()[&SelectionName::from("Sel_LooseD02KPi")];
    assert_eq!(stats.failed_mother_cut, 1);
}

#[test]
fn mother_cut_needs_a_primary_vertex() {
    let mut pipeline = build(&presets::xicc_selections(), "Sel_D02KPi").unwrap();
    let event = D0Decay::nominal()
        .add_to(EventBuilder::new(1, 1).without_primary_vertices())
        .build();
    let (_, sel) = run(&mut pipeline, &event);
    // BPVVDCHI2 has no value without a primary vertex
    assert_eq!(count(&sel, "Sel_LooseD02KPi"), 0);
}

fn momentum_cut_combiner() -> Vec<SelectionSpec> {
    let combiner = CombinerConfig {
        decay_descriptor: "[D0 -> K- pi+]cc".to_string(),
        daughters_cuts: [
            ("K+".to_string(), "(P > 2*GeV)".to_string()),
            ("pi+".to_string(), "(P > 2*GeV)".to_string()),
        ]
        .into(),
        combination_cut: String::new(),
        mother_cut: String::new(),
    };
    vec![
        SelectionSpec::source("Kaons", KAONS),
        SelectionSpec::source("Pions", PIONS),
        SelectionSpec::new("D0", Algorithm::Combine(combiner), &["Kaons", "Pions"]),
    ]
}

fn soft_kaon_event(kaon_p: f64) -> Event {
    let kaon = [0.0, 0.0, kaon_p];
    let pion = common::pion_for_mass(kaon, [0.5, 0.0, 1.0], D0_MASS);
    EventBuilder::new(1, 1)
        .track(1, [0.5, 0.2, 8.0], kaon, -1)
        .track(2, [0.5, 0.2, 8.0], pion, 1)
        .particle(KAONS, -321, 1)
        .particle(PIONS, 211, 2)
        .build()
}

#[test]
fn daughter_cut_applies_to_both_charges() {
    let mut pipeline = build(&momentum_cut_combiner(), "D0").unwrap();

    let (_, sel) = run(&mut pipeline, &soft_kaon_event(1900.0));
    assert_eq!(count(&sel, "D0"), 0, "1.9 GeV kaon must fail the K+ cut copied to K-");

    let (store, sel) = run(&mut pipeline, &soft_kaon_event(2500.0));
    assert_eq!(count(&sel, "D0"), 1);
    let d0 = store.get(sel[&SelectionName::from("D0")][0]);
    let kaon = store.get(d0.daughters[0]);
    assert_eq!(kaon.id, ParticleId(-321));
    assert!((kaon.momentum.p() - 2500.0).abs() < 1e-9);
}

fn tagged_specs(required: u32) -> Vec<SelectionSpec> {
    let mut specs = presets::xicc_selections();
    for spec in &mut specs {
        if spec.name.as_str() == "Sel_XiccD0TisTos" {
            spec.algorithm = Algorithm::Tag(TaggerConfig {
                specs: [(TOS_SPEC.to_string(), required)].into(),
            });
        }
    }
    specs
}

fn tag_of(event: &Event, required: u32) -> (usize, Option<Option<bool>>) {
    let mut pipeline = build(&tagged_specs(required), "Sel_XiccD0TisTos").unwrap();
    let (store, sel) = run(&mut pipeline, event);
    let d0 = sel[&SelectionName::from("Sel_D02KPi")][0];
    let kept = count(&sel, "Sel_XiccD0TisTos");
    let tag = if kept > 0 { Some(store.get(d0).tag(TOS_SPEC)) } else { None };
    (kept, tag)
}

#[test]
fn tag_absent_differs_from_tag_false() {
    let d0 = D0Decay::nominal();
    let no_report = d0_event(&d0);
    let unrelated = d0
        .add_to(EventBuilder::new(1, 2))
        .decision(D0_TRIGGER, true, &[7, 8])
        .build();
    let on_signal = d0
        .add_to(EventBuilder::new(1, 3))
        .decision(D0_TRIGGER, true, &[1, 2])
        .build();

    assert_eq!(tag_of(&no_report, 0), (1, Some(None)));
    assert_eq!(tag_of(&unrelated, 0), (1, Some(Some(false))));
    assert_eq!(tag_of(&on_signal, 0), (1, Some(Some(true))));
}

#[test]
fn required_tag_drops_absent_and_false() {
    let d0 = D0Decay::nominal();
    let no_report = d0_event(&d0);
    let unrelated = d0
        .add_to(EventBuilder::new(1, 2))
        .decision(D0_TRIGGER, true, &[7, 8])
        .build();
    let partial = d0
        .add_to(EventBuilder::new(1, 3))
        .decision(D0_TRIGGER, true, &[1, 7, 8])
        .build();
    let on_signal = d0
        .add_to(EventBuilder::new(1, 4))
        .decision(D0_TRIGGER, true, &[1, 2])
        .build();

    assert_eq!(tag_of(&no_report, 1).0, 0);
    assert_eq!(tag_of(&unrelated, 1).0, 0);
    // one of three object tracks is below the 70% overlap
    assert_eq!(tag_of(&partial, 1).0, 0);
    assert_eq!(tag_of(&on_signal, 1), (1, Some(Some(true))));
}

fn report(fired: bool, objects: &[&[u32]]) -> TriggerDecision {
    TriggerDecision {
        name: D0_TRIGGER.to_string(),
        decision: fired,
        objects: objects
            .iter()
            .map(|o| TriggerObject {
                tracks: o.iter().copied().map(TrackId).collect(),
            })
            .collect(),
    }
}

fn candidate_tracks(ids: &[u32]) -> BTreeSet<TrackId> {
    ids.iter().copied().map(TrackId).collect()
}

#[test]
fn tis_needs_one_object_independent_of_the_candidate() {
    let tracks = candidate_tracks(&[1, 2]);

    let mixed = report(true, &[&[1, 2], &[7]]);
    assert!(classify(&[&mixed], &tracks, TisTos::Tis));
    assert!(classify(&[&mixed], &tracks, TisTos::Tos));

    let on_signal = report(true, &[&[1, 2], &[2]]);
    assert!(!classify(&[&on_signal], &tracks, TisTos::Tis));

    let not_fired = report(false, &[&[7]]);
    assert!(!classify(&[&not_fired], &tracks, TisTos::Tis));
    assert!(!classify(&[&not_fired], &tracks, TisTos::Dec));
}

#[test]
fn fired_decision_without_objects_is_neither_tis_nor_tos() {
    let tracks = candidate_tracks(&[1, 2]);
    let bare = report(true, &[]);
    assert!(classify(&[&bare], &tracks, TisTos::Dec));
    assert!(!classify(&[&bare], &tracks, TisTos::Tis));
    assert!(!classify(&[&bare], &tracks, TisTos::Tos));

    let empty_object = report(true, &[&[]]);
    assert!(!classify(&[&empty_object], &tracks, TisTos::Tis));
    assert!(!classify(&[&empty_object], &tracks, TisTos::Tos));
}

#[test]
fn tis_tag_on_the_d0() {
    const TIS_SPEC: &str = "Hlt2.*CharmHadD02.*Decision%TIS";
    let mut specs = presets::xicc_selections();
    for spec in &mut specs {
        if spec.name.as_str() == "Sel_XiccD0TisTos" {
            spec.algorithm = Algorithm::Tag(TaggerConfig {
                specs: [(TIS_SPEC.to_string(), 0)].into(),
            });
        }
    }
    let mut pipeline = build(&specs, "Sel_XiccD0TisTos").unwrap();
    let d0 = D0Decay::nominal();

    let mut mixed = d0
        .add_to(EventBuilder::new(1, 1))
        .decision(D0_TRIGGER, true, &[1, 2])
        .build();
    mixed.decisions[0].objects.push(TriggerObject {
        tracks: vec![TrackId(7)],
    });
    let (store, sel) = run(&mut pipeline, &mixed);
    let id = sel[&SelectionName::from("Sel_XiccD0TisTos")][0];
    assert_eq!(store.get(id).tag(TIS_SPEC), Some(true));

    let mut bare = d0
        .add_to(EventBuilder::new(1, 2))
        .decision(D0_TRIGGER, true, &[])
        .build();
    bare.decisions[0].objects.clear();
    let (store, sel) = run(&mut pipeline, &bare);
    let id = sel[&SelectionName::from("Sel_XiccD0TisTos")][0];
    assert_eq!(store.get(id).tag(TIS_SPEC), Some(false));
}

#[test]
fn filter_is_idempotent() {
    let mut specs = presets::xicc_selections();
    specs.push(SelectionSpec::new(
        "Again",
        Algorithm::Filter(FilterConfig {
            code: "(ADMASS('D0')<75.0) & (BPVVDCHI2>64.0)".to_string(),
        }),
        &["Sel_D02KPi"],
    ));
    let mut pipeline = build(&specs, "Again").unwrap();
    for mass in [D0_MASS, D0_MASS + 50.0, D0_MASS + 90.0, D0_MASS - 60.0] {
        let (_, sel) = run(&mut pipeline, &d0_event(&D0Decay::with_flight(10.0, mass)));
        assert_eq!(
            sel[&SelectionName::from("Sel_D02KPi")],
            sel[&SelectionName::from("Again")]
        );
    }
}

#[test]
fn loosening_a_cut_never_removes_candidates() {
    let mut tight = build(&with_d0_filter("(ADMASS('D0')<30.0) & (BPVVDCHI2>64.0)"), "Sel_D02KPi").unwrap();
    let mut loose = build(&with_d0_filter("(ADMASS('D0')<200.0) & (BPVVDCHI2>1.0)"), "Sel_D02KPi").unwrap();
    for (z, dm) in [(10.0, 0.0), (10.0, 50.0), (10.0, -95.0), (2.0, 10.0), (0.8, 0.0)] {
        let event = d0_event(&D0Decay::with_flight(z, D0_MASS + dm));
        let (_, t) = run(&mut tight, &event);
        let (_, l) = run(&mut loose, &event);
        let t = &t[&SelectionName::from("Sel_D02KPi")];
        let l = &l[&SelectionName::from("Sel_D02KPi")];
        assert!(t.iter().all(|id| l.contains(id)), "z={z} dm={dm}");
    }
}

#[test]
fn conjugate_event_gives_conjugate_candidates() {
    let mut pipeline = build(&presets::xicc_selections(), "Sel_D02KPi").unwrap();
    let (store, sel) = run(&mut pipeline, &d0_event(&D0Decay::nominal()));
    let (cstore, csel) = run(&mut pipeline, &d0_event(&D0Decay::nominal().conjugate()));

    let d0 = &sel[&SelectionName::from("Sel_D02KPi")];
    let d0bar = &csel[&SelectionName::from("Sel_D02KPi")];
    assert_eq!(d0.len(), 1);
    assert_eq!(d0bar.len(), 1);
    let a = store.get(d0[0]);
    let b = cstore.get(d0bar[0]);
    assert_eq!(a.id, ParticleId(421));
    assert_eq!(b.id, ParticleId(-421));
    assert!((a.momentum.mass() - b.momentum.mass()).abs() < 1e-9);
    let (va, vb) = (a.end_vertex.as_ref().unwrap(), b.end_vertex.as_ref().unwrap());
    assert!((va.position.z - vb.position.z).abs() < 1e-9);
    assert!((va.chi2 - vb.chi2).abs() < 1e-9);
}

#[test]
fn each_selection_runs_once_per_event() {
    let specs = presets::xicc_selections();
    let pipeline = build(&specs, "Xicc+_Sel").unwrap();
    let order: Vec<&str> = pipeline.order().map(|n| n.as_str()).collect();
    assert_eq!(order.len(), specs.len());
    assert_eq!(order.last(), Some(&"Xicc+_Sel"));
    let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
    assert!(pos("Sel_LooseD02KPi") < pos("Sel_D02KPi"));
    assert!(pos("Sel_D02KPi") < pos("Sel_XiccD0TisTos"));
    assert!(pos("Sel_FilteredPions") < pos("Xicc+_Sel"));
}

#[test]
fn shared_upstream_runs_once_and_combiner_sees_each_candidate_once() {
    let mut specs = presets::xicc_selections();
    for (name, code) in [("WideD0", "(ADMASS('D0')<100.0)"), ("NarrowD0", "(ADMASS('D0')<50.0)")] {
        specs.push(SelectionSpec::new(
            name,
            Algorithm::Filter(FilterConfig {
                code: code.to_string(),
            }),
            &["Sel_LooseD02KPi"],
        ));
    }
    specs.push(SelectionSpec::new(
        "B2D0K",
        Algorithm::Combine(CombinerConfig {
            decay_descriptor: "[B0 -> D0 K+]cc".to_string(),
            ..CombinerConfig::default()
        }),
        &["WideD0", "NarrowD0", "StdNoPIDsKaons"],
    ));
    let mut pipeline = build(&specs, "B2D0K").unwrap();

    let d0 = D0Decay::nominal();
    let event = d0
        .add_to(EventBuilder::new(1, 1))
        .track(3, d0.point_along(4.0), [300.0, -150.0, 6000.0], 1)
        .particle(KAONS, 321, 3)
        .build();
    let (store, sel) = run(&mut pipeline, &event);

    let loose = &sel[&SelectionName::from("Sel_LooseD02KPi")];
    assert_eq!(loose.len(), 1);
    assert_eq!(sel[&SelectionName::from("WideD0")], *loose);
    assert_eq!(sel[&SelectionName::from("NarrowD0")], *loose);
    assert_eq!(count(&sel, "B2D0K"), 1);
    // two kaons, one pion, the D0 and the B0
    assert_eq!(store.len(), 5);

    let stats = pipeline.combiner_stats();
    assert_eq!(stats[&SelectionName::from("Sel_LooseD02KPi")].combinations, 1);
    assert_eq!(stats[&SelectionName::from("B2D0K")].combinations, 1);
    let order: Vec<&str> = pipeline.order().map(|n| n.as_str()).collect();
    assert_eq!(order.iter().filter(|n| **n == "Sel_LooseD02KPi").count(), 1);
}

fn pass_all(name: &str, input: &str) -> SelectionSpec {
    SelectionSpec::new(
        name,
        Algorithm::Filter(FilterConfig {
            code: "ALL".to_string(),
        }),
        &[input],
    )
}

#[test]
fn cycle_is_a_configuration_error() {
    let specs = vec![pass_all("A", "B"), pass_all("B", "A")];
    let err = build(&specs, "A").unwrap_err();
    assert!(matches!(err, PipelineError::Cycle(ref path) if path.contains("A") && path.contains("B")));
}

#[test]
fn undeclared_input_is_a_configuration_error() {
    let specs = vec![pass_all("A", "Missing")];
    match build(&specs, "A").unwrap_err() {
        PipelineError::UndeclaredSelection { selection, missing } => {
            assert_eq!(selection.as_str(), "A");
            assert_eq!(missing.as_str(), "Missing");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn duplicate_and_unknown_names_are_rejected() {
    let specs = vec![SelectionSpec::source("K", KAONS), SelectionSpec::source("K", PIONS)];
    assert!(matches!(build(&specs, "K"), Err(PipelineError::DuplicateSelection(_))));

    let specs = vec![SelectionSpec::source("K", KAONS)];
    assert!(matches!(build(&specs, "Nope"), Err(PipelineError::UnknownTop(_))));
}

#[test]
fn wrong_number_of_inputs_is_rejected() {
    let specs = vec![
        SelectionSpec::source("K", KAONS),
        SelectionSpec::source("P", PIONS),
        SelectionSpec::new(
            "F",
            Algorithm::Filter(FilterConfig {
                code: "ALL".to_string(),
            }),
            &["K", "P"],
        ),
    ];
    assert!(matches!(
        build(&specs, "F"),
        Err(PipelineError::Arity { got: 2, .. })
    ));
}

fn filter_error(code: &str) -> NodeError {
    let specs = vec![
        SelectionSpec::source("K", KAONS),
        SelectionSpec::new(
            "F",
            Algorithm::Filter(FilterConfig {
                code: code.to_string(),
            }),
            &["K"],
        ),
    ];
    match build(&specs, "F").unwrap_err() {
        PipelineError::Node { source, .. } => source,
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn malformed_expressions_fail_at_build_time() {
    assert!(matches!(
        filter_error("(P > "),
        NodeError::Expression(ExprError::Syntax(_))
    ));
    assert!(matches!(
        filter_error("FOO > 3"),
        NodeError::Expression(ExprError::UnknownFunctor(_))
    ));
    assert!(matches!(
        filter_error("AM < 4000"),
        NodeError::Expression(ExprError::WrongScope { .. })
    ));
    assert!(matches!(
        filter_error("P + 1"),
        NodeError::Expression(ExprError::Type(_))
    ));
}

#[test]
fn unknown_particle_in_descriptor_fails_at_build_time() {
    let specs = vec![
        SelectionSpec::source("K", KAONS),
        SelectionSpec::new(
            "X",
            Algorithm::Combine(CombinerConfig {
                decay_descriptor: "[D0 -> K- kaon+]cc".to_string(),
                ..CombinerConfig::default()
            }),
            &["K"],
        ),
    ];
    assert!(matches!(
        build(&specs, "X"),
        Err(PipelineError::Node { .. })
    ));
}
