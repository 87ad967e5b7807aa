//! Ready-made job configurations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::RunConfig;
use crate::selection::{
    Algorithm, CombinerConfig, FilterConfig, SelectionSpec, TaggerConfig,
};
use crate::tuple::{BranchTool, McTupleConfig, TisTosConfig, TupleConfig};

pub const STRIPPING_LINE: &str = "XiccXiccPlusToD0PKPi";

const SOFT_TRACK_CUT: &str = "(TRCHI2DOF<5.0) & (P>2000.0) & (PT>250.0) & (MIPCHI2DV(PRIMARY)>-1.0)";

fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn filter(name: &str, code: &str, input: &str) -> SelectionSpec {
    SelectionSpec::new(
        name,
        Algorithm::Filter(FilterConfig {
            code: code.to_string(),
        }),
        &[input],
    )
}

/// Selections building Xi_cc+ -> (D0 -> K- pi+) p+ K- pi+ and its conjugate.
pub fn xicc_selections() -> Vec<SelectionSpec> {
    let d0 = CombinerConfig {
        decay_descriptor: "[D0 -> K- pi+]cc".to_string(),
        daughters_cuts: map(&[("K+", "(P > 2*GeV)"), ("pi+", "(P > 2*GeV)")]),
        combination_cut: "(((APT>1*GeV) | (ASUM(PT)>1.2*GeV)) & (ADAMASS('D0')<110*MeV) & (ADOCA(1,2)<0.5*mm) & (ADOCACHI2CUT(15,'')))".to_string(),
        mother_cut: "((VFASPF(VCHI2)<10) & (ADMASS('D0')<100*MeV) & (BPVVDCHI2>36))".to_string(),
    };
    let xicc = CombinerConfig {
        decay_descriptor: "[Xi_cc+ -> D0 p+ K- pi+]cc".to_string(),
        daughters_cuts: map(&[
            ("", "ALL"),
            ("D0", "ALL"),
            ("D~0", "ALL"),
            ("K+", "ALL"),
            ("K-", "ALL"),
            ("p+", "ALL"),
            ("p~-", "ALL"),
            ("pi+", "ALL"),
            ("pi-", "ALL"),
        ]),
        combination_cut: "(AM<4000.0)& (APT>2000.0)& (ADOCAMAX('')<0.5)".to_string(),
        mother_cut: "(VFASPF(VCHI2)<60.0)&(CHILD(VFASPF(VZ),1) - VFASPF(VZ) > 0.01)& (BPVVDCHI2 > -1.0)& (BPVDIRA > 0.0)".to_string(),
    };
    let tistos = TaggerConfig {
        specs: [("Hlt2.*CharmHadD02.*Decision%TOS".to_string(), 0)].into(),
    };

    vec![
        SelectionSpec::source("StdNoPIDsKaons", "Phys/StdNoPIDsKaons/Particles"),
        SelectionSpec::source("StdNoPIDsPions", "Phys/StdNoPIDsPions/Particles"),
        SelectionSpec::source("StdAllNoPIDsKaons", "Phys/StdAllNoPIDsKaons/Particles"),
        SelectionSpec::source("StdAllNoPIDsPions", "Phys/StdAllNoPIDsPions/Particles"),
        SelectionSpec::source("StdAllNoPIDsProtons", "Phys/StdAllNoPIDsProtons/Particles"),
        SelectionSpec::new(
            "Sel_LooseD02KPi",
            Algorithm::Combine(d0),
            &["StdNoPIDsKaons", "StdNoPIDsPions"],
        ),
        filter(
            "Sel_D02KPi",
            "(ADMASS('D0')<75.0) & (BPVVDCHI2>64.0)",
            "Sel_LooseD02KPi",
        ),
        filter("Sel_FilteredProtons", SOFT_TRACK_CUT, "StdAllNoPIDsProtons"),
        filter("Sel_FilteredKaons", SOFT_TRACK_CUT, "StdAllNoPIDsKaons"),
        filter("Sel_FilteredPions", SOFT_TRACK_CUT, "StdAllNoPIDsPions"),
        SelectionSpec::new("Sel_XiccD0TisTos", Algorithm::Tag(tistos), &["Sel_D02KPi"]),
        SelectionSpec::new(
            "Xicc+_Sel",
            Algorithm::Combine(xicc),
            &[
                "Sel_XiccD0TisTos",
                "Sel_FilteredProtons",
                "Sel_FilteredKaons",
                "Sel_FilteredPions",
            ],
        ),
    ]
}

fn branches(arrow: &str) -> BTreeMap<String, String> {
    let d = |marked: &str| -> String {
        let m = |name: &str| if name == marked { "^" } else { "" };
        format!(
            "[Xi_cc+ {arrow} {}(D0 {arrow} {}K- {}pi+) {}p+ {}K- {}pi+]CC",
            m("D0"),
            m("Kminus"),
            m("piplus"),
            m("pplus"),
            m("Ksoft"),
            m("pisoft"),
        )
    };
    ["Xicc", "D0", "Kminus", "piplus", "pplus", "Ksoft", "pisoft"]
        .into_iter()
        .map(|b| (b.to_string(), d(b)))
        .collect()
}

fn loki(variables: &[(&str, &str)]) -> BranchTool {
    BranchTool::LoKiHybrid {
        name: "XiccLoKiTuple".to_string(),
        preambulo: vec![
            "DZ = VFASPF(VZ) - BPV(VZ)".to_string(),
            "TRACK_MAX_PT = MAXTREE(ISBASIC & HASTRACK, PT, -1)".to_string(),
        ],
        variables: map(variables),
    }
}

pub fn xicc_tuple(simulation: bool) -> TupleConfig {
    let mut tool_list: Vec<String> = [
        "TupleToolGeometry",
        "TupleToolKinematic",
        "TupleToolEventInfo",
        "TupleToolTrackInfo",
        "TupleToolPrimaries",
        "TupleToolTISTOS",
        "TupleToolAngles",
        "TupleToolPid",
        "TupleToolPropertime",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if simulation {
        tool_list.push("TupleToolMCTruth".to_string());
        tool_list.push("TupleToolMCBackgroundInfo".to_string());
    }

    let tistos = TisTosConfig {
        trigger_list: [
            "Hlt1TrackAllL0Decision",
            "Hlt1GlobalDecision",
            "Hlt2CharmHadD02HH_D02PiPiDecision",
            "Hlt2CharmHadD02HH_D02PiPiWideMassDecision",
            "Hlt2CharmHadD02HHKsLLDecision",
            "Hlt2CharmHadD02HHKsDDDecision",
            "Hlt2CharmHadD02HH_D02KPiDecision",
            "Hlt2CharmHadD02HH_D02KPiWideMassDecision",
            "Hlt2CharmHadD02HH_D02KKDecision",
            "Hlt2CharmHadD02HH_D02KKWideMassDecision",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        verbose_l0: false,
        verbose_hlt1: true,
        verbose_hlt2: true,
    };

    let variables1 = [
        ("MAXDOCA", "DOCAMAX"),
        ("DIRA", "BPVDIRA"),
        ("DecayAngle", "LV01"),
        ("P", "P"),
        ("TRACK_Eta", "ETA"),
        ("DZ", "DZ"),
        ("MAX_PT", "TRACK_MAX_PT"),
        ("VTX_CHI2", "VFASPF(VCHI2)"),
        ("VTX_VZ", "VFASPF(VZ)"),
        ("MIPCHI2DV", "MIPCHI2DV(PRIMARY)"),
    ];
    let variables2 = [("P", "P"), ("TRACK_Eta", "ETA")];

    let mut branch_tools = BTreeMap::new();
    branch_tools.insert(
        "Xicc".to_string(),
        vec![
            BranchTool::DecayTreeFitter {
                name: "ConsD0Mass".to_string(),
                daughters_to_constrain: vec!["D0".to_string()],
                constrain_to_origin_vertex: false,
                verbose: true,
            },
            BranchTool::DecayTreeFitter {
                name: "ConsPV".to_string(),
                daughters_to_constrain: Vec::new(),
                constrain_to_origin_vertex: true,
                verbose: true,
            },
            loki(&variables1),
        ],
    );
    branch_tools.insert("D0".to_string(), vec![loki(&variables1)]);
    for b in ["Kminus", "piplus", "pplus", "Ksoft", "pisoft"] {
        branch_tools.insert(b.to_string(), vec![loki(&variables2)]);
    }

    TupleConfig {
        name: "DecayTreeTuple".to_string(),
        decay: "[Xi_cc+ -> ^(D0-> ^K- ^pi+) ^p+ ^K- ^pi+]CC".to_string(),
        branches: branches("->"),
        tool_list,
        tistos,
        branch_tools,
    }
}

pub fn xicc_mc_tuple() -> McTupleConfig {
    McTupleConfig {
        name: "MCDecayTreeTuple".to_string(),
        decay: "[Xi_cc+ => ^(D0 => ^K- ^pi+) ^p+ ^K- ^pi+]CC".to_string(),
        branches: branches("=>"),
        tool_list: [
            "MCTupleToolKinematic",
            "MCTupleToolAngles",
            "MCTupleToolEventType",
            "MCTupleToolPID",
            "MCTupleToolPrimaries",
            "MCTupleToolPrompt",
            "MCTupleToolInteractions",
            "MCTupleToolReconstructed",
            "MCTupleToolHierarchy",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
}

/// The complete Xi_cc+ -> D0 p+ K- pi+ job on simulated 2012 conditions.
pub fn xicc_to_d0_p_k_pi() -> RunConfig {
    let simulation = true;
    RunConfig {
        data_type: "2012".to_string(),
        input_type: "DST".to_string(),
        simulation,
        lumi: !simulation,
        print_freq: 1000,
        evt_max: -1,
        dddb_tag: "dddb-20150928".to_string(),
        conddb_tag: "sim-20160321-2-vc-md100".to_string(),
        tuple_file: PathBuf::from("Xicc2D0pKpi_MagDown_tuple"),
        event_filter: Some(format!("HLT_PASS('Stripping{STRIPPING_LINE}Decision')")),
        selections: xicc_selections(),
        top_selection: "Xicc+_Sel".into(),
        tuple: xicc_tuple(simulation),
        mc_tuple: simulation.then(xicc_mc_tuple),
        print_decay_tree: false,
    }
}
