//! In-process data collector
//!
//! The controller serializes a [`SessionConfig`] once per session. Inside the
//! process under test, a [`Collector`] reads it, binds to the named control
//! surface and, at each test-case boundary, selects the active mutant and
//! flushes coverage or the mutant-seen flag to a [`DataSink`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{MutationError, Result};
use crate::mutant::{MutantId, TestId, TestSet};
use crate::runtime::{self, ControlSettings, SurfaceSlot};

/// Sink key for coverage payloads
pub const COVERAGE_KEY: &str = "switchboard.coverage";

/// Sink key for the mutant-seen flag
pub const MUTANT_COVERED_KEY: &str = "switchboard.active_mutant_covered";

/// Receives per-test data from the collector
pub trait DataSink {
    fn send_data(&mut self, test_id: &str, key: &str, value: &str);
}

/// One mutant and the tests that should run with it active
///
/// An empty test list makes the mutant active for every test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutantTests {
    pub id: MutantId,
    #[serde(default)]
    pub tests: Vec<TestId>,
}

/// Session configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub coverage: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutants: Vec<MutantTests>,
    pub control_surface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<MutantId>>,
}

impl SessionConfig {
    pub fn new(
        need_coverage: bool,
        mutant_tests: Option<&BTreeMap<MutantId, TestSet>>,
        control_surface: &str,
        mutants_to_trace: Option<&BTreeSet<MutantId>>,
    ) -> Self {
        let mutants = mutant_tests
            .map(|map| {
                map.iter()
                    .map(|(id, tests)| MutantTests {
                        id: *id,
                        tests: tests.ids().cloned().collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        // only mutants that are part of this session can be traced
        let trace = match (mutant_tests, mutants_to_trace) {
            (Some(map), Some(traced)) => {
                let ids: Vec<MutantId> = traced
                    .iter()
                    .copied()
                    .filter(|id| map.contains_key(id))
                    .collect();
                (!ids.is_empty()).then_some(ids)
            }
            _ => None,
        };

        Self {
            coverage: need_coverage,
            mutants,
            control_surface: control_surface.to_string(),
            trace,
        }
    }

    pub fn to_document(&self) -> Result<String> {
        self.validate()?;
        serde_json::to_string(self).map_err(|e| MutationError::InvalidDocument {
            message: e.to_string(),
        })
    }

    pub fn from_document(document: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(document).map_err(|e| MutationError::InvalidDocument {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// A mutant active for every test must be alone in its session
    fn validate(&self) -> Result<()> {
        let whole_suite: Vec<MutantId> = self
            .mutants
            .iter()
            .filter(|entry| entry.tests.is_empty())
            .map(|entry| entry.id)
            .collect();
        if !whole_suite.is_empty() && self.mutants.len() > 1 {
            return Err(MutationError::ConfigError {
                message: format!(
                    "mutants {whole_suite:?} are active for every test but share the session with {} other entries",
                    self.mutants.len() - 1
                ),
            });
        }
        Ok(())
    }
}

/// Per-process protocol endpoint
pub struct Collector<S: DataSink> {
    sink: S,
    coverage: bool,
    single_mutant: Option<MutantId>,
    mutant_tested_by: BTreeMap<TestId, MutantId>,
    traced: BTreeSet<MutantId>,
    slot: Option<Arc<SurfaceSlot>>,
    unconfigured_at_start: usize,
}

impl<S: DataSink> Collector<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            coverage: false,
            single_mutant: None,
            mutant_tested_by: BTreeMap::new(),
            traced: BTreeSet::new(),
            slot: None,
            unconfigured_at_start: 0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Mutants this session can activate, as a display list
    pub fn mutant_list(&self) -> String {
        match self.single_mutant {
            Some(id) => id.to_string(),
            None => self
                .mutant_tested_by
                .values()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn test_session_start(&mut self, document: &str) -> Result<()> {
        let config = SessionConfig::from_document(document).map_err(|e| {
            error!(error = %e, "cannot read session configuration");
            e
        })?;

        self.coverage = config.coverage;
        self.single_mutant = None;
        self.mutant_tested_by.clear();
        for entry in &config.mutants {
            if entry.tests.is_empty() {
                self.single_mutant = Some(entry.id);
            } else {
                for test in &entry.tests {
                    self.mutant_tested_by.insert(test.clone(), entry.id);
                }
            }
        }
        self.traced = config.trace.iter().flatten().copied().collect();

        let slot = SurfaceSlot::new(&config.control_surface);
        slot.apply(ControlSettings {
            capture_coverage: self.coverage,
            ..Default::default()
        });
        if runtime::subscribe(&slot) {
            debug!(surface = %config.control_surface, "control surface already registered");
        }
        if let Some(control) = slot.control() {
            if control.unconfigured_hits() > 0 {
                warn!(
                    surface = %config.control_surface,
                    hits = control.unconfigured_hits(),
                    "guards were reached before the session was configured"
                );
            }
        }
        self.slot = Some(slot);

        info!(
            coverage = self.coverage,
            mutants = %self.mutant_list(),
            surface = %config.control_surface,
            "test session starts"
        );
        Ok(())
    }

    pub fn test_case_start(&mut self, test_id: &str) {
        let active = if self.coverage {
            None
        } else {
            let active = self
                .single_mutant
                .or_else(|| self.mutant_tested_by.get(test_id).copied());
            if active.is_none() {
                warn!(test = test_id, "test is not mapped to a mutant; running without one");
            }
            active
        };
        let must_log = active.is_some_and(|id| self.traced.contains(&id));

        let Some(slot) = &self.slot else {
            error!(test = test_id, "test case started outside of a session");
            return;
        };
        slot.apply(ControlSettings {
            capture_coverage: self.coverage,
            active_mutant: active,
            must_log,
        });
        if let Some(control) = slot.control() {
            control.reset_test_case();
            self.unconfigured_at_start = control.unconfigured_hits();
        }
        debug!(test = test_id, mutant = ?active, "test case starts");
    }

    pub fn test_case_end(&mut self, test_id: &str) {
        let Some(slot) = &self.slot else {
            error!(test = test_id, "test case ended outside of a session");
            return;
        };
        let Some(control) = slot.control() else {
            error!(
                test = test_id,
                surface = slot.name(),
                "control surface was never registered; no data sent for this test"
            );
            return;
        };
        if control.unconfigured_hits() > self.unconfigured_at_start {
            error!(
                test = test_id,
                surface = slot.name(),
                "guards fired before the surface was configured; no data sent for this test"
            );
            return;
        }

        if self.coverage {
            let payload = control.coverage().encode();
            self.sink.send_data(test_id, COVERAGE_KEY, &payload);
        } else {
            let seen = control.take_mutant_seen();
            self.sink
                .send_data(test_id, MUTANT_COVERED_KEY, if seen { "true" } else { "false" });
        }
        debug!(test = test_id, "test case ends");
    }

    pub fn test_session_end(&mut self) {
        if let Some(slot) = self.slot.take() {
            runtime::unsubscribe(&slot);
        }
        info!("test session ends");
    }
}
