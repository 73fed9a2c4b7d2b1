//! Runtime control surface linked into the instrumented crate
//!
//! Every guard calls [`MutantControl::check`] on a static owned by the
//! injected control module. The module registers that static here on first
//! use, and a [`SurfaceSlot`] held by the collector is resolved against it,
//! either immediately or when the registration arrives.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::coverage::CoveragePayload;
use crate::mutant::MutantId;

const NO_MUTANT: i64 = -1;

/// Ids in first-reached order
#[derive(Debug, Default)]
struct ReachedIds {
    order: Vec<MutantId>,
    seen: BTreeSet<MutantId>,
}

impl ReachedIds {
    const fn new() -> Self {
        Self {
            order: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    fn insert(&mut self, id: MutantId) {
        if self.seen.insert(id) {
            self.order.push(id);
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// Guard ids reached during the current test case
#[derive(Debug, Default)]
struct CoverageBuffer {
    /// Reached while no mutant was selected
    idle: ReachedIds,
    /// Reached while some mutant was selected
    selected: ReachedIds,
}

impl CoverageBuffer {
    const fn new() -> Self {
        Self {
            idle: ReachedIds::new(),
            selected: ReachedIds::new(),
        }
    }

    fn record(&mut self, id: MutantId, mutant_selected: bool) {
        if mutant_selected {
            self.selected.insert(id);
        } else {
            self.idle.insert(id);
        }
    }
}

/// What the collector wants the control surface to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSettings {
    pub capture_coverage: bool,
    pub active_mutant: Option<MutantId>,
    pub must_log: bool,
}

/// Process-global state consulted by every guard
#[derive(Debug)]
pub struct MutantControl {
    active_mutant: AtomicI64,
    capture_coverage: AtomicBool,
    must_log: AtomicBool,
    active_mutant_seen: AtomicBool,
    configured: AtomicBool,
    unconfigured_hits: AtomicUsize,
    coverage: Mutex<CoverageBuffer>,
}

impl Default for MutantControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MutantControl {
    pub const fn new() -> Self {
        Self {
            active_mutant: AtomicI64::new(NO_MUTANT),
            capture_coverage: AtomicBool::new(false),
            must_log: AtomicBool::new(false),
            active_mutant_seen: AtomicBool::new(false),
            configured: AtomicBool::new(false),
            unconfigured_hits: AtomicUsize::new(0),
            coverage: parking_lot::const_mutex(CoverageBuffer::new()),
        }
    }

    /// Called by the guard of mutant `id`; true selects the mutated branch
    pub fn check(&self, id: MutantId) -> bool {
        if !self.configured.load(Ordering::Relaxed) {
            self.unconfigured_hits.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let active = self.active_mutant.load(Ordering::Relaxed);
        if self.capture_coverage.load(Ordering::Relaxed) {
            self.coverage.lock().record(id, active != NO_MUTANT);
        }

        let selected = active == i64::from(id);
        if selected {
            self.active_mutant_seen.store(true, Ordering::Relaxed);
        }
        if self.must_log.load(Ordering::Relaxed) {
            info!(target: "switchboard::trace", mutant = id, selected, "guard reached");
        }
        selected
    }

    pub fn apply(&self, settings: ControlSettings) {
        let active = settings.active_mutant.map_or(NO_MUTANT, i64::from);
        self.active_mutant.store(active, Ordering::Relaxed);
        self.capture_coverage
            .store(settings.capture_coverage, Ordering::Relaxed);
        self.must_log.store(settings.must_log, Ordering::Relaxed);
        self.configured.store(true, Ordering::Relaxed);
    }

    /// Clear per-test state before a test case starts
    pub fn reset_test_case(&self) {
        self.active_mutant_seen.store(false, Ordering::Relaxed);
        let mut coverage = self.coverage.lock();
        coverage.idle.clear();
        coverage.selected.clear();
    }

    pub fn active_mutant(&self) -> Option<MutantId> {
        MutantId::try_from(self.active_mutant.load(Ordering::Relaxed)).ok()
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Relaxed)
    }

    /// Guard hits that happened before any configuration was applied
    pub fn unconfigured_hits(&self) -> usize {
        self.unconfigured_hits.load(Ordering::Relaxed)
    }

    /// Read and clear the seen flag
    pub fn take_mutant_seen(&self) -> bool {
        self.active_mutant_seen.swap(false, Ordering::Relaxed)
    }

    pub fn coverage(&self) -> CoveragePayload {
        let coverage = self.coverage.lock();
        CoveragePayload {
            reached: coverage.idle.order.clone(),
            reached_while_active: coverage.selected.order.clone(),
        }
    }
}

/// A collector's handle on a named control surface
///
/// Resolves at most once. Settings applied before resolution are kept and
/// pushed to the surface when it resolves.
#[derive(Debug)]
pub struct SurfaceSlot {
    name: String,
    control: OnceLock<&'static MutantControl>,
    pending: Mutex<ControlSettings>,
}

impl SurfaceSlot {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            control: OnceLock::new(),
            pending: Mutex::new(ControlSettings::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn control(&self) -> Option<&'static MutantControl> {
        self.control.get().copied()
    }

    fn resolve(&self, control: &'static MutantControl) {
        let pending = self.pending.lock();
        if self.control.set(control).is_ok() {
            control.apply(*pending);
            debug!(surface = %self.name, "control surface resolved");
        }
    }

    /// Record `settings` and push them to the surface if it is resolved
    pub fn apply(&self, settings: ControlSettings) {
        let mut pending = self.pending.lock();
        *pending = settings;
        if let Some(control) = self.control() {
            control.apply(settings);
        }
    }
}

struct Registry {
    surfaces: BTreeMap<String, &'static MutantControl>,
    listeners: Vec<Arc<SurfaceSlot>>,
}

static REGISTRY: Mutex<Registry> = parking_lot::const_mutex(Registry {
    surfaces: BTreeMap::new(),
    listeners: Vec::new(),
});

/// Announce a control surface; called once by the injected control module
pub fn register_surface(name: &str, control: &'static MutantControl) {
    let mut registry = REGISTRY.lock();
    registry.surfaces.insert(name.to_string(), control);
    registry.listeners.retain(|slot| {
        if slot.name == name {
            slot.resolve(control);
            false
        } else {
            true
        }
    });
    debug!(surface = name, "control surface registered");
}

/// Resolve `slot` now if its surface is known, otherwise on registration
///
/// Returns true when the slot resolved immediately.
pub fn subscribe(slot: &Arc<SurfaceSlot>) -> bool {
    let mut registry = REGISTRY.lock();
    match registry.surfaces.get(&slot.name).copied() {
        Some(control) => {
            slot.resolve(control);
            true
        }
        None => {
            registry.listeners.push(Arc::clone(slot));
            false
        }
    }
}

pub fn unsubscribe(slot: &Arc<SurfaceSlot>) {
    REGISTRY
        .lock()
        .listeners
        .retain(|listener| !Arc::ptr_eq(listener, slot));
}
