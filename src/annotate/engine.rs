//! Runs conversion passes over a document.
//!
//! A pass resolves the current rates, then walks the locator rules in
//! priority order, parsing and annotating every candidate that is not already
//! annotated. At most one pass executes at a time: a request made while a pass
//! is running is folded into a single follow-up pass that starts as soon as the
//! running one finishes.

use crate::annotate::locator::{PriceCandidate, PriceLocator, Scope};
use crate::annotate::parser::parse_amount;
use crate::annotate::render::{self, Conversion};
use crate::core::{Currency, RatePair, RateSnapshot, RateSource};
use crate::dom::Document;
use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

pub type SharedDocument = Arc<AsyncMutex<Document>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PassRequest {
    scope: Scope,
    /// Remove every annotation before annotating again.
    clear_first: bool,
}

impl PassRequest {
    fn merge(self, other: PassRequest) -> PassRequest {
        PassRequest {
            scope: self.scope.merge(other.scope),
            clear_first: self.clear_first || other.clear_first,
        }
    }
}

#[derive(Debug)]
enum EngineState {
    Idle,
    Running { follow_up: Option<PassRequest> },
}

#[derive(Debug, Default)]
struct RateCache {
    current: Option<RateSnapshot>,
    last_known_good: Option<RateSnapshot>,
}

/// Counts from one or more executed passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub passes: usize,
    pub annotated: usize,
    pub removed: usize,
    /// Candidates without a usable amount.
    pub skipped: usize,
    pub failed: usize,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.passes += other.passes;
        self.annotated += other.annotated;
        self.removed += other.removed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// This call ran the pass and any follow-ups requested meanwhile.
    Completed(PassReport),
    /// Another pass was running; the request will run as its follow-up.
    Coalesced,
    /// The pass panicked. The engine accepts new requests again.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub passes_executed: usize,
    pub requests_coalesced: usize,
}

pub struct ConversionEngine {
    document: SharedDocument,
    source: Arc<dyn RateSource>,
    locator: PriceLocator,
    fallback_rates: Option<RatePair>,
    state: Mutex<EngineState>,
    rates: Mutex<RateCache>,
    passes_executed: AtomicUsize,
    requests_coalesced: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConversionEngine {
    pub fn new(document: SharedDocument, source: Arc<dyn RateSource>, locator: PriceLocator) -> Self {
        Self {
            document,
            source,
            locator,
            fallback_rates: None,
            state: Mutex::new(EngineState::Idle),
            rates: Mutex::new(RateCache::default()),
            passes_executed: AtomicUsize::new(0),
            requests_coalesced: AtomicUsize::new(0),
        }
    }

    /// Rates to use when the source has nothing to offer.
    pub fn with_fallback_rates(mut self, rates: Option<RatePair>) -> Self {
        self.fallback_rates = rates;
        self
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            passes_executed: self.passes_executed.load(Ordering::SeqCst),
            requests_coalesced: self.requests_coalesced.load(Ordering::SeqCst),
        }
    }

    /// Annotates what is new in `scope`, leaving existing annotations alone.
    pub async fn run_pass(self: &Arc<Self>, scope: Scope) -> PassOutcome {
        self.submit(PassRequest {
            scope,
            clear_first: false,
        })
        .await
    }

    /// Removes every annotation and marker, then annotates the whole document.
    pub async fn full_rerender(self: &Arc<Self>) -> PassOutcome {
        self.submit(PassRequest {
            scope: Scope::Document,
            clear_first: true,
        })
        .await
    }

    /// Replaces the cached snapshot used by every later pass.
    pub fn set_rates(&self, snapshot: RateSnapshot) {
        debug!(rates = ?snapshot.rates(), "Rates changed");
        let mut cache = lock(&self.rates);
        cache.last_known_good = Some(snapshot.clone());
        cache.current = Some(snapshot);
    }

    /// Swaps in `snapshot` and re-renders so no stale amount stays visible.
    pub async fn on_rates_changed(self: &Arc<Self>, snapshot: RateSnapshot) -> PassOutcome {
        self.set_rates(snapshot);
        self.full_rerender().await
    }

    /// Forgets the cached snapshot so the next pass asks the source again.
    pub fn invalidate_rates(&self) {
        lock(&self.rates).current = None;
    }

    async fn submit(self: &Arc<Self>, request: PassRequest) -> PassOutcome {
        {
            let mut state = lock(&self.state);
            match &mut *state {
                EngineState::Running { follow_up } => {
                    *follow_up = Some(match follow_up.take() {
                        Some(pending) => pending.merge(request),
                        None => request,
                    });
                    self.requests_coalesced.fetch_add(1, Ordering::SeqCst);
                    debug!("Pass already running, request coalesced");
                    return PassOutcome::Coalesced;
                }
                EngineState::Idle => *state = EngineState::Running { follow_up: None },
            }
        }

        // Detached from the caller: dropping this future does not cancel the pass
        let engine = Arc::clone(self);
        match tokio::spawn(async move { engine.drain(request).await }).await {
            Ok(report) => PassOutcome::Completed(report),
            Err(e) => {
                warn!("Conversion pass failed: {}", e);
                PassOutcome::Failed
            }
        }
    }

    /// Runs `request` and every follow-up, then releases the latch.
    async fn drain(&self, mut request: PassRequest) -> PassReport {
        let mut latch = LatchRelease {
            state: &self.state,
            released: false,
        };
        let mut report = PassReport::default();
        loop {
            report.absorb(self.execute(request).await);

            let mut state = lock(&self.state);
            let next = match &mut *state {
                EngineState::Running { follow_up } => follow_up.take(),
                EngineState::Idle => None,
            };
            match next {
                Some(next) => request = next,
                None => {
                    *state = EngineState::Idle;
                    latch.released = true;
                    break;
                }
            }
        }
        report
    }

    async fn resolve_rates(&self) -> Option<RatePair> {
        let cached = lock(&self.rates).current.as_ref().map(RateSnapshot::rates);
        if cached.is_some() {
            return cached;
        }

        match self.source.current_rates().await {
            Ok(Some(snapshot)) => {
                let mut cache = lock(&self.rates);
                // A change notification may have landed while we were waiting
                let current = cache.current.get_or_insert(snapshot).clone();
                let rates = current.rates();
                cache.last_known_good = Some(current);
                Some(rates)
            }
            Ok(None) => {
                debug!("No rates available yet");
                self.fallback_rates
            }
            Err(e) => {
                let last_known_good = lock(&self.rates).last_known_good.clone();
                warn!(
                    "Reading rates failed: {:#}. Using {}",
                    e,
                    if last_known_good.is_some() {
                        "last known rates"
                    } else if self.fallback_rates.is_some() {
                        "fallback rates"
                    } else {
                        "no rates"
                    }
                );
                last_known_good.map(|s| s.rates()).or(self.fallback_rates)
            }
        }
    }

    async fn execute(&self, request: PassRequest) -> PassReport {
        let rates = self.resolve_rates().await;
        self.passes_executed.fetch_add(1, Ordering::SeqCst);

        let mut report = PassReport {
            passes: 1,
            ..Default::default()
        };
        let mut doc = self.document.lock().await;

        if request.clear_first {
            report.removed = render::remove_all(&mut doc);
        }

        let Some(rates) = rates else {
            debug!("Pass skipped, no rates");
            return report;
        };

        let scope = normalize_scope(&doc, request.scope);
        for rule in self.locator.rules() {
            for candidate in self.locator.locate(&doc, rule, &scope) {
                // An earlier candidate in this pass may have covered this one
                if self.locator.is_excluded(&doc, candidate.element) {
                    continue;
                }
                match annotate_candidate(&mut doc, &candidate, rates) {
                    Ok(true) => report.annotated += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        warn!(role = %candidate.role, "Failed to annotate price: {:#}", e);
                        report.failed += 1;
                    }
                }
            }
        }

        debug!(?report, "Pass finished");
        report
    }
}

/// Frees the latch when a pass unwinds before finishing.
struct LatchRelease<'a> {
    state: &'a Mutex<EngineState>,
    released: bool,
}

impl Drop for LatchRelease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut state = lock(self.state);
        if let EngineState::Running {
            follow_up: Some(pending),
        } = &*state
        {
            warn!(?pending, "Dropping coalesced request after a failed pass");
        }
        *state = EngineState::Idle;
    }
}

/// Annotates one candidate; `Ok(false)` when its text holds no positive amount.
fn annotate_candidate(doc: &mut Document, candidate: &PriceCandidate, rates: RatePair) -> Result<bool> {
    let amount = match parse_amount(&candidate.text, candidate.role.strip_policy()) {
        Some(amount) if amount > 0.0 => amount,
        _ => return Ok(false),
    };

    let conversions: Vec<Conversion> = Currency::ALL
        .iter()
        .map(|&currency| Conversion {
            currency,
            amount: amount * rates.get(currency),
        })
        .collect();
    render::render(doc, candidate.element, candidate.role.render_mode(), &conversions)?;
    Ok(true)
}

/// Drops detached roots and roots already covered by another root.
fn normalize_scope(doc: &Document, scope: Scope) -> Scope {
    let Scope::Subtrees(roots) = scope else {
        return scope;
    };
    let attached: Vec<_> = roots.into_iter().filter(|&r| doc.is_attached(r)).collect();
    let roots = attached
        .iter()
        .copied()
        .filter(|&r| !attached.iter().any(|&other| other != r && doc.contains(other, r)))
        .collect();
    Scope::Subtrees(roots)
}
