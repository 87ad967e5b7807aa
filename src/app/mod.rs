//! The event loop.
//!
//! [`Application`] owns everything built from a [`RunConfig`]: the event
//! pre-filter, the selection pipeline and the tuple recorders. All of it is
//! compiled up front, so a bad configuration fails before any event is read.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, RunConfig};
use crate::event::{CandidateStore, Event, EventSource, JsonLinesSource, SourceError};
use crate::expr::{CompiledExpr, Scope};
use crate::particles::ParticleTable;
use crate::selection::Pipeline;
use crate::tuple::{McTupleRecorder, RowSink, TupleError, TupleRecorder, TupleSchema, TupleWriter};
use crate::types::SelectionName;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Tuple output failed: {0}")]
    Tuple(#[from] TupleError),
    #[error("Cannot open input: {0}")]
    Source(#[from] SourceError),
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub events_read: u64,
    /// Events that passed the event pre-filter.
    pub events_accepted: u64,
    /// Events with at least one top-level candidate.
    pub events_selected: u64,
    /// Candidates produced per selection.
    pub candidates: BTreeMap<SelectionName, u64>,
    /// Rows written per tuple.
    pub rows: BTreeMap<String, u64>,
    /// Set when reading stopped early on a malformed or unreadable event.
    pub read_error: Option<String>,
}

pub struct Application {
    config: RunConfig,
    table: ParticleTable,
    event_filter: Option<CompiledExpr>,
    pipeline: Pipeline,
    tuple: TupleRecorder,
    mc_tuple: Option<McTupleRecorder>,
}

impl Application {
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        Self::with_table(config, ParticleTable::standard())
    }

    pub fn with_table(config: RunConfig, table: ParticleTable) -> Result<Self, ConfigError> {
        config.check_settings()?;
        let event_filter = config
            .event_filter
            .as_deref()
            .map(|code| CompiledExpr::compile_cut(code, Scope::Event, &table))
            .transpose()
            .map_err(ConfigError::EventFilter)?;
        let pipeline = Pipeline::build(&config.selections, &config.top_selection, &table)?;
        let tuple = TupleRecorder::compile(&config.tuple, &table).map_err(|source| ConfigError::Tuple {
            tuple: config.tuple.name.clone(),
            source,
        })?;
        let mc_tuple = match (&config.mc_tuple, config.simulation) {
            (Some(mc), true) => Some(McTupleRecorder::compile(mc, &table).map_err(|source| {
                ConfigError::Tuple {
                    tuple: mc.name.clone(),
                    source,
                }
            })?),
            (Some(mc), false) => {
                tracing::warn!(tuple = %mc.name, "generator-level tuple ignored for real data");
                None
            }
            (None, _) => None,
        };

        tracing::info!(
            data_type = %config.data_type,
            dddb = %config.dddb_tag,
            conddb = %config.conddb_tag,
            simulation = config.simulation,
            "application configured"
        );
        Ok(Self {
            config,
            table,
            event_filter,
            pipeline,
            tuple,
            mc_tuple,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn tuple(&self) -> &TupleRecorder {
        &self.tuple
    }

    pub fn mc_tuple(&self) -> Option<&McTupleRecorder> {
        self.mc_tuple.as_ref()
    }

    /// Declares every active tuple to `sink`.
    pub fn register(&self, sink: &mut impl RowSink) -> Result<(), TupleError> {
        sink.register(self.tuple.name(), self.tuple.columns())?;
        if let Some(mc) = &self.mc_tuple {
            sink.register(mc.name(), mc.columns())?;
        }
        Ok(())
    }

    /// Runs one event through pre-filter, pipeline and tuples. The event must
    /// already be counted in `summary.events_read`.
    pub fn process_event(
        &mut self,
        event: &Event,
        sink: &mut impl RowSink,
        summary: &mut RunSummary,
    ) -> Result<(), TupleError> {
        if let Some(filter) = &self.event_filter {
            if !filter.accepts_event(event) {
                tracing::trace!(event = event.event_number, "event rejected by pre-filter");
                return Ok(());
            }
        }
        summary.events_accepted += 1;

        let mut store = CandidateStore::new();
        let output = self.pipeline.run(event, &mut store, &self.table);
        for (name, ids) in output.iter() {
            *summary.candidates.entry(name.clone()).or_default() += ids.len() as u64;
        }

        let top = output.top();
        if !top.is_empty() {
            summary.events_selected += 1;
        }
        if self.config.print_decay_tree {
            for &id in top {
                tracing::debug!(
                    run = event.run_number,
                    event = event.event_number,
                    tree = %store.describe(id, &self.table),
                    "top candidate"
                );
            }
        }

        let sequence = summary.events_read.saturating_sub(1);
        let rows = self.tuple.record(event, sequence, &store, &self.table, top);
        for row in &rows {
            sink.write_row(self.tuple.name(), row)?;
        }
        *summary.rows.entry(self.tuple.name().to_string()).or_default() += rows.len() as u64;

        if let Some(mc) = &self.mc_tuple {
            let rows = mc.record(event, &self.table);
            for row in &rows {
                sink.write_row(mc.name(), row)?;
            }
            *summary.rows.entry(mc.name().to_string()).or_default() += rows.len() as u64;
        }
        Ok(())
    }

    /// Processes events until the source is exhausted, the event limit is
    /// reached, or an event cannot be read. A read failure ends the loop
    /// without discarding rows already written.
    pub fn run<S: EventSource>(&mut self, events: S, sink: &mut impl RowSink) -> Result<RunSummary, RunError> {
        self.register(sink)?;
        let limit = self.config.event_limit();
        let print_freq = self.config.print_freq;
        let mut summary = RunSummary::default();

        for item in events {
            if limit.map_or(false, |max| summary.events_read >= max) {
                tracing::info!(evt_max = self.config.evt_max, "event limit reached");
                break;
            }
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, events_read = summary.events_read, "stopping at unreadable event");
                    summary.read_error = Some(e.to_string());
                    break;
                }
            };
            summary.events_read += 1;
            if print_freq > 0 && summary.events_read % print_freq == 0 {
                tracing::info!(
                    events = summary.events_read,
                    run = event.run_number,
                    event = event.event_number,
                    "processing"
                );
            }
            self.process_event(&event, sink, &mut summary)?;
        }

        tracing::info!(
            events_read = summary.events_read,
            events_accepted = summary.events_accepted,
            events_selected = summary.events_selected,
            "run finished"
        );
        for (name, stats) in self.pipeline.combiner_stats() {
            tracing::info!(
                selection = %name,
                combinations = stats.combinations,
                accepted = stats.accepted,
                "combiner summary"
            );
        }
        Ok(summary)
    }

    /// Reads a JSON-lines event file and writes the tuples into the
    /// configured output directory.
    pub fn run_file(&mut self, input: &Path) -> Result<(RunSummary, Vec<TupleSchema>), RunError> {
        let source = JsonLinesSource::open(input)?;
        let mut writer = TupleWriter::create(&self.config.tuple_file, self.config.digest()?)?;
        let summary = self.run(source, &mut writer)?;
        let schemas = writer.finish()?;
        Ok((summary, schemas))
    }
}
