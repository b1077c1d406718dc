//! Turns document changes and rate updates into conversion passes.

use crate::annotate::engine::{ConversionEngine, PassOutcome};
use crate::annotate::locator::Scope;
use crate::annotate::render;
use crate::core::RateSnapshot;
use crate::core::config::AnnotateConfig;
use crate::dom::{Document, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Nodes the host added or whose text changed since the last batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub added: Vec<NodeId>,
}

impl MutationBatch {
    pub fn new(added: Vec<NodeId>) -> Self {
        Self { added }
    }
}

/// Trailing-edge timer: every `schedule` pushes the deadline out again.
#[derive(Debug)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Resolves at `deadline`, never when there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct MutationWatcher {
    engine: Arc<ConversionEngine>,
    timer: DebounceTimer,
    region: Option<NodeId>,
    pending: Vec<NodeId>,
    passes: JoinSet<PassOutcome>,
}

impl MutationWatcher {
    pub fn new(engine: Arc<ConversionEngine>, debounce: Duration) -> Self {
        Self {
            engine,
            timer: DebounceTimer::new(debounce),
            region: None,
            pending: Vec::new(),
            passes: JoinSet::new(),
        }
    }

    /// Debounces with `annotate.debounce_ms`.
    pub fn from_config(engine: Arc<ConversionEngine>, config: &AnnotateConfig) -> Self {
        Self::new(engine, config.debounce())
    }

    /// Only react to changes below `region`. The whole document by default.
    pub fn with_region(mut self, region: NodeId) -> Self {
        self.region = Some(region);
        self
    }

    /// Runs until `mutations` closes, then waits for passes still in flight.
    pub async fn run(
        mut self,
        mut mutations: mpsc::UnboundedReceiver<MutationBatch>,
        mut rate_changes: broadcast::Receiver<RateSnapshot>,
    ) {
        let mut rates_open = true;
        info!("Watching document for changes");

        loop {
            tokio::select! {
                batch = mutations.recv() => {
                    let Some(batch) = batch else {
                        break;
                    };
                    self.on_mutations(batch).await;
                }
                _ = sleep_until_deadline(self.timer.deadline()) => {
                    self.timer.cancel();
                    let roots = std::mem::take(&mut self.pending);
                    debug!(roots = roots.len(), "Debounce elapsed, starting pass");
                    let engine = self.engine.clone();
                    self.passes.spawn(async move { engine.run_pass(Scope::Subtrees(roots)).await });
                }
                change = rate_changes.recv(), if rates_open => {
                    match change {
                        Ok(snapshot) => self.on_rates(Some(snapshot)),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Missed rate notifications, re-reading rates");
                            self.on_rates(None);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Rate notifications closed");
                            rates_open = false;
                        }
                    }
                }
                Some(finished) = self.passes.join_next(), if !self.passes.is_empty() => {
                    log_finished(finished);
                }
            }
        }

        while let Some(finished) = self.passes.join_next().await {
            log_finished(finished);
        }
        info!("Watcher stopped");
    }

    async fn on_mutations(&mut self, batch: MutationBatch) {
        let relevant: Vec<NodeId> = {
            let doc = self.engine.document().lock().await;
            batch
                .added
                .into_iter()
                .filter(|&id| is_relevant(&doc, self.region, id))
                .collect()
        };
        if relevant.is_empty() {
            return;
        }

        for id in relevant {
            if !self.pending.contains(&id) {
                self.pending.push(id);
            }
        }
        self.timer.schedule();
    }

    /// A new snapshot, or `None` when notifications were missed.
    fn on_rates(&mut self, snapshot: Option<RateSnapshot>) {
        // The re-render covers everything still pending
        self.timer.cancel();
        self.pending.clear();

        // Applied in arrival order; every re-render reads the newest snapshot
        match snapshot {
            Some(snapshot) => self.engine.set_rates(snapshot),
            None => self.engine.invalidate_rates(),
        }
        let engine = self.engine.clone();
        self.passes.spawn(async move { engine.full_rerender().await });
    }
}

fn is_relevant(doc: &Document, region: Option<NodeId>, id: NodeId) -> bool {
    if !doc.is_attached(id) {
        return false;
    }
    if region.is_some_and(|region| !doc.contains(region, id)) {
        return false;
    }
    // Our own insertions
    !std::iter::once(id)
        .chain(doc.ancestors(id))
        .any(|node| render::is_annotation(doc, node))
}

fn log_finished(finished: Result<PassOutcome, tokio::task::JoinError>) {
    match finished {
        Ok(outcome) => debug!(?outcome, "Pass task finished"),
        Err(e) => warn!("Pass task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::engine::tests::{
        PAGE, StaticRateSource, annotation_texts, engine_for, snapshot,
    };
    use crate::core::RateSource;
    use crate::dom::Selector;

    const DEBOUNCE: Duration = Duration::from_millis(100);

    async fn append_lot(engine: &ConversionEngine, text: &str) -> NodeId {
        let mut doc = engine.document().lock().await;
        let main: Selector = "main".parse().unwrap();
        let main = main.select_all(&doc, doc.root())[0];
        doc.append_element_with_text(main, "div", Some("fr notranslate"), text)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_timer_reschedules() {
        let mut timer = DebounceTimer::new(DEBOUNCE);
        assert!(!timer.is_pending());

        timer.schedule();
        let first = timer.deadline().unwrap();
        tokio::time::advance(Duration::from_millis(60)).await;
        timer.schedule();
        assert_eq!(timer.deadline().unwrap() - first, Duration::from_millis(60));

        timer.cancel();
        assert!(!timer.is_pending());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_burst_of_mutations_runs_one_pass() {
        let source = Arc::new(StaticRateSource::new(Some(snapshot(0.0067, 0.0062))));
        let engine = engine_for(PAGE, source.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = MutationWatcher::new(engine.clone(), DEBOUNCE);
        let handle = tokio::spawn(watcher.run(rx, source.subscribe()));

        // 50 batches over 49ms
        for i in 0..50 {
            let lot = append_lot(&engine, &format!("{},000", i + 1)).await;
            tx.send(MutationBatch::new(vec![lot])).unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(engine.stats().passes_executed, 0);

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(engine.stats().passes_executed, 1);
        assert_eq!(annotation_texts(&engine).await.len(), 50);

        drop(tx);
        handle.await.unwrap();
        assert_eq!(engine.stats().passes_executed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_annotation_nodes_do_not_trigger_passes() {
        let source = Arc::new(StaticRateSource::new(Some(snapshot(0.0067, 0.0062))));
        let engine = engine_for(PAGE, source.clone());
        engine.run_pass(Scope::Document).await;

        let annotations: Vec<NodeId> = {
            let doc = engine.document().lock().await;
            doc.descendants(doc.root())
                .into_iter()
                .filter(|&id| render::is_annotation(&doc, id))
                .collect()
        };
        assert_eq!(annotations.len(), 2);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(MutationWatcher::new(engine.clone(), DEBOUNCE).run(rx, source.subscribe()));
        tx.send(MutationBatch::new(annotations)).unwrap();
        tokio::time::sleep(DEBOUNCE * 3).await;

        drop(tx);
        handle.await.unwrap();
        assert_eq!(engine.stats().passes_executed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_outside_region_are_ignored() {
        let source = Arc::new(StaticRateSource::new(Some(snapshot(0.0067, 0.0062))));
        let engine = engine_for(PAGE, source.clone());
        let (region, outside) = {
            let mut doc = engine.document().lock().await;
            let fees: Selector = "div.fee-breakdown".parse().unwrap();
            let region = fees.select_all(&doc, doc.root())[0];
            let body = doc.body();
            let outside = doc
                .append_element_with_text(body, "div", Some("fr notranslate"), "5,000")
                .unwrap();
            (region, outside)
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = MutationWatcher::new(engine.clone(), DEBOUNCE).with_region(region);
        let handle = tokio::spawn(watcher.run(rx, source.subscribe()));
        tx.send(MutationBatch::new(vec![outside])).unwrap();
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(engine.stats().passes_executed, 0);

        tx.send(MutationBatch::new(vec![region])).unwrap();
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(engine.stats().passes_executed, 1);
        assert_eq!(annotation_texts(&engine).await, vec![" (≈ $2.95 / €2.73)"]);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_change_rerenders_and_drops_pending_mutations() {
        let source = Arc::new(StaticRateSource::new(Some(snapshot(0.0067, 0.0062))));
        let engine = engine_for(PAGE, source.clone());
        engine.run_pass(Scope::Document).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(MutationWatcher::new(engine.clone(), DEBOUNCE).run(rx, source.subscribe()));

        let lot = append_lot(&engine, "1,000").await;
        tx.send(MutationBatch::new(vec![lot])).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.publish(snapshot(0.01, 0.005));
        tokio::time::sleep(DEBOUNCE * 3).await;

        // Initial pass plus the re-render; the pending mutation was absorbed
        assert_eq!(engine.stats().passes_executed, 2);
        assert_eq!(
            annotation_texts(&engine).await,
            vec![
                "≈ $42.00 USD≈ €21.00 EUR",
                " (≈ $4.40 / €2.20)",
                "≈ $10.00 USD≈ €5.00 EUR",
            ]
        );

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagged_notifications_reread_source() {
        let source = Arc::new(StaticRateSource::new(Some(snapshot(0.0067, 0.0062))));
        let engine = engine_for(PAGE, source.clone());
        engine.run_pass(Scope::Document).await;
        assert_eq!(source.reads.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Subscribed but not yet consumed: the channel overflows
        let rates = source.subscribe();
        for i in 1..=20 {
            source.publish(snapshot(0.001 * i as f64, 0.005));
        }

        let (tx, rx) = mpsc::unbounded_channel::<MutationBatch>();
        let handle = tokio::spawn(MutationWatcher::new(engine.clone(), DEBOUNCE).run(rx, rates));
        tokio::time::sleep(DEBOUNCE).await;
        drop(tx);
        handle.await.unwrap();

        assert!(source.reads.load(std::sync::atomic::Ordering::SeqCst) >= 2);
        assert!(
            annotation_texts(&engine)
                .await
                .contains(&"≈ $84.00 USD≈ €21.00 EUR".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_uses_configured_debounce() {
        let source = Arc::new(StaticRateSource::new(Some(snapshot(0.0067, 0.0062))));
        let engine = engine_for(PAGE, source.clone());
        let config = AnnotateConfig {
            debounce_ms: 250,
            ..AnnotateConfig::default()
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = MutationWatcher::from_config(engine.clone(), &config);
        let handle = tokio::spawn(watcher.run(rx, source.subscribe()));
        let lot = append_lot(&engine, "1,000").await;
        tx.send(MutationBatch::new(vec![lot])).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(engine.stats().passes_executed, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.stats().passes_executed, 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn test_back_to_back_rate_changes_keep_the_newest() {
        let source = Arc::new(StaticRateSource::new(Some(snapshot(0.0067, 0.0062))));
        let engine = engine_for(PAGE, source.clone());
        engine.run_pass(Scope::Document).await;

        let rates = source.subscribe();
        source.publish(snapshot(0.01, 0.005));
        source.publish(snapshot(0.02, 0.005));

        let (tx, rx) = mpsc::unbounded_channel::<MutationBatch>();
        let handle = tokio::spawn(MutationWatcher::new(engine.clone(), DEBOUNCE).run(rx, rates));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let texts = annotation_texts(&engine).await;
                if texts.first().is_some_and(|text| text.contains("$84.00")) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("newest rates never rendered");

        drop(tx);
        handle.await.unwrap();

        let texts = annotation_texts(&engine).await;
        assert_eq!(texts[0], "≈ $84.00 USD≈ €21.00 EUR");
        assert!(texts.iter().all(|text| !text.contains("$42.00")));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn test_watcher_survives_a_panicking_pass() {
        let source = Arc::new(StaticRateSource::panics_once(snapshot(0.0067, 0.0062)));
        let engine = engine_for(PAGE, source.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(
            MutationWatcher::new(engine.clone(), Duration::from_millis(20)).run(rx, source.subscribe()),
        );

        // First pass panics in the rate lookup
        let first = append_lot(&engine, "1,000").await;
        tx.send(MutationBatch::new(vec![first])).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while source.reads.load(std::sync::atomic::Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(annotation_texts(&engine).await.is_empty());

        // The next quiet period still gets a pass
        let second = append_lot(&engine, "2,000").await;
        tx.send(MutationBatch::new(vec![second])).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while annotation_texts(&engine).await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no pass ran after the failure");

        drop(tx);
        handle.await.unwrap();
        assert_eq!(annotation_texts(&engine).await, vec!["≈ $13.40 USD≈ €12.40 EUR"]);
    }
}
