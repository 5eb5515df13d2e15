//! Drives one automation run across whatever backend it is handed.
//!
//! Phases run strictly in order; the cancel token is polled at every phase
//! and item boundary. Partial failure is data (per-item outcomes), never an
//! error: the run itself only fails when the session or the fulfillment
//! mode cannot be established at all.

use crate::backend::{CartBackend, ProductHit};
use crate::cancel::CancelToken;
use crate::config::FulfillmentMode;
use crate::error::{CartError, Result};
use crate::model::{CartLineItem, DesiredItem, OperationOutcome, RunSummary};
use crate::progress::Progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ModeEnsuring,
    Resolving,
    Mutating,
    Reconciling,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::ModeEnsuring => "mode",
            Phase::Resolving => "resolve",
            Phase::Mutating => "mutate",
            Phase::Reconciling => "reconcile",
        }
    }
}

pub struct Orchestrator<'a> {
    backend: &'a mut dyn CartBackend,
}

impl<'a> Orchestrator<'a> {
    pub fn new(backend: &'a mut dyn CartBackend) -> Self {
        Self { backend }
    }

    fn enter(&self, phase: Phase) {
        log::debug!("{}: entering {} phase", self.backend.name(), phase.label());
    }

    /// Establish session and mode; shared preamble of every operation.
    fn prepare(&mut self, mode: FulfillmentMode, progress: &mut dyn Progress) -> Result<()> {
        self.backend.ensure_session(progress)?;
        self.enter(Phase::ModeEnsuring);
        self.backend.ensure_mode(mode, progress)
    }

    /// Add every desired item to the remote cart, then reconcile.
    ///
    /// Exactly one outcome is recorded per attempted item. Cancellation
    /// truncates cleanly: unresolved items get no outcome, resolved but
    /// unattempted items are recorded as skipped, and reconciliation is
    /// not performed for a stopped run.
    pub fn run_add(
        &mut self,
        items: &[DesiredItem],
        mode: FulfillmentMode,
        cancel: &CancelToken,
        progress: &mut dyn Progress,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        progress.begin(items.len());

        self.prepare(mode, progress)?;
        if cancel.is_cancelled() {
            summary.stopped = true;
            progress.finish();
            return Ok(summary);
        }

        self.enter(Phase::Resolving);
        let matches = self.backend.resolve_batch(items, cancel, progress);
        if matches.len() < items.len() {
            summary.stopped = true;
        }

        self.enter(Phase::Mutating);
        let mut expired = false;
        let mut matches_iter = matches.iter();
        while let Some(matched) = matches_iter.next() {
            if cancel.is_cancelled() {
                summary.stopped = true;
                record(&mut summary, progress, OperationOutcome::skipped(&matched.source, "cancelled"));
                for remaining in matches_iter.by_ref() {
                    record(
                        &mut summary,
                        progress,
                        OperationOutcome::skipped(&remaining.source, "cancelled"),
                    );
                }
                break;
            }

            if let Some(reason) = &matched.error {
                record(&mut summary, progress, OperationOutcome::failed(&matched.source, reason.clone()));
                continue;
            }

            progress.log(&format!("Adding to cart: {}", matched.name));
            match self.backend.apply_add(matched, progress) {
                Ok(()) => {
                    record(&mut summary, progress, OperationOutcome::added(&matched.source));
                }
                Err(CartError::SessionExpired) => {
                    // Batch-fatal: no silent mid-batch re-authentication.
                    record(
                        &mut summary,
                        progress,
                        OperationOutcome::failed(&matched.source, CartError::SessionExpired.to_string()),
                    );
                    for remaining in matches_iter.by_ref() {
                        record(
                            &mut summary,
                            progress,
                            OperationOutcome::failed(
                                &remaining.source,
                                "not attempted: session expired",
                            ),
                        );
                    }
                    expired = true;
                    break;
                }
                Err(err) => {
                    record(&mut summary, progress, OperationOutcome::failed(&matched.source, err.to_string()));
                }
            }
        }

        if summary.stopped {
            progress.finish();
            return Ok(summary);
        }

        // Always re-derive the authoritative cart, even after an aborted
        // batch; the outcomes above stand regardless of what the read says.
        self.enter(Phase::Reconciling);
        match self.backend.read_cart(progress) {
            Ok(cart) => summary.cart = Some(cart),
            Err(err) => {
                if expired {
                    log::debug!("reconciliation skipped cleanly after expiry: {}", err);
                }
                summary.reconcile_error = Some(err.to_string());
            }
        }

        progress.finish();
        Ok(summary)
    }

    /// Authoritative cart contents.
    pub fn fetch_cart(
        &mut self,
        mode: FulfillmentMode,
        progress: &mut dyn Progress,
    ) -> Result<Vec<CartLineItem>> {
        self.prepare(mode, progress)?;
        self.enter(Phase::Reconciling);
        self.backend.read_cart(progress)
    }

    /// Remove everything from the remote cart; returns the removed count.
    pub fn clear_cart(
        &mut self,
        mode: FulfillmentMode,
        progress: &mut dyn Progress,
    ) -> Result<usize> {
        self.prepare(mode, progress)?;
        self.backend.clear_cart(progress)
    }

    /// Interactive catalog search, up to a dozen hits.
    pub fn search_products(
        &mut self,
        query: &str,
        mode: FulfillmentMode,
        progress: &mut dyn Progress,
    ) -> Result<Vec<ProductHit>> {
        self.prepare(mode, progress)?;
        self.backend.search_products(query, progress)
    }
}

fn record(summary: &mut RunSummary, progress: &mut dyn Progress, outcome: OperationOutcome) {
    progress.item_done(&outcome);
    summary.record(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OutcomeStatus, ResolvedMatch};
    use crate::progress::NullProgress;
    use std::collections::HashMap;
    use std::collections::VecDeque;

    /// Scriptable in-memory backend for orchestrator invariants.
    #[derive(Default)]
    struct MockBackend {
        session_calls: u32,
        mode_calls: u32,
        add_calls: u32,
        resolve_errors: HashMap<u64, String>,
        add_script: VecDeque<Result<()>>,
        cart: Vec<CartLineItem>,
        read_error: Option<String>,
        cancel_after_first_add: Option<CancelToken>,
    }

    impl CartBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn ensure_session(&mut self, _progress: &mut dyn Progress) -> Result<()> {
            self.session_calls += 1;
            Ok(())
        }

        fn ensure_mode(&mut self, _mode: FulfillmentMode, _progress: &mut dyn Progress) -> Result<()> {
            self.mode_calls += 1;
            Ok(())
        }

        fn resolve_batch(
            &mut self,
            items: &[DesiredItem],
            cancel: &CancelToken,
            _progress: &mut dyn Progress,
        ) -> Vec<ResolvedMatch> {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            items
                .iter()
                .map(|item| match self.resolve_errors.get(&item.id) {
                    Some(reason) => ResolvedMatch::failed(item.clone(), reason.clone()),
                    None => ResolvedMatch {
                        item_id: Some(format!("items_1-{}", item.id)),
                        name: item.label.clone(),
                        price: "$1.00".to_string(),
                        size: String::new(),
                        source: item.clone(),
                        error: None,
                    },
                })
                .collect()
        }

        fn apply_add(&mut self, _matched: &ResolvedMatch, _progress: &mut dyn Progress) -> Result<()> {
            self.add_calls += 1;
            let result = self.add_script.pop_front().unwrap_or(Ok(()));
            if self.add_calls == 1 {
                if let Some(token) = &self.cancel_after_first_add {
                    token.cancel();
                }
            }
            result
        }

        fn read_cart(&mut self, _progress: &mut dyn Progress) -> Result<Vec<CartLineItem>> {
            match &self.read_error {
                Some(reason) => Err(CartError::Transport(reason.clone())),
                None => Ok(self.cart.clone()),
            }
        }

        fn clear_cart(&mut self, _progress: &mut dyn Progress) -> Result<usize> {
            let count = self.cart.len();
            self.cart.clear();
            Ok(count)
        }

        fn search_products(&mut self, _query: &str, _progress: &mut dyn Progress) -> Result<Vec<ProductHit>> {
            Ok(Vec::new())
        }
    }

    fn items(count: u64) -> Vec<DesiredItem> {
        (0..count).map(|i| DesiredItem::new(i, format!("item-{i}"))).collect()
    }

    #[test]
    fn test_one_outcome_per_item() {
        let mut backend = MockBackend::default();
        let list = items(4);
        let summary = Orchestrator::new(&mut backend)
            .run_add(&list, FulfillmentMode::Instore, &CancelToken::new(), &mut NullProgress)
            .unwrap();

        assert_eq!(summary.outcomes.len(), 4);
        assert_eq!(summary.added, 4);
        assert!(!summary.stopped);
        assert!(summary.cart.is_some());
        assert_eq!(backend.session_calls, 1);
        assert_eq!(backend.mode_calls, 1);
    }

    #[test]
    fn test_resolution_error_fails_without_mutation() {
        let mut backend = MockBackend::default();
        backend.resolve_errors.insert(1, "transport error: timeout".to_string());
        let list = items(3);
        let summary = Orchestrator::new(&mut backend)
            .run_add(&list, FulfillmentMode::Instore, &CancelToken::new(), &mut NullProgress)
            .unwrap();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.failed, 1);
        // The failed resolution never reached apply_add.
        assert_eq!(backend.add_calls, 2);
        let failed = summary.outcomes.iter().find(|o| o.status == OutcomeStatus::Failed).unwrap();
        assert_eq!(failed.item_id, 1);
        assert!(failed.reason.as_deref().unwrap().contains("timeout"));
    }

    #[test]
    fn test_session_expiry_aborts_batch_and_fails_remaining() {
        let mut backend = MockBackend::default();
        backend.add_script = VecDeque::from([Ok(()), Err(CartError::SessionExpired)]);
        backend.read_error = Some("no session".to_string());
        let list = items(4);
        let summary = Orchestrator::new(&mut backend)
            .run_add(&list, FulfillmentMode::Instore, &CancelToken::new(), &mut NullProgress)
            .unwrap();

        assert_eq!(summary.outcomes.len(), 4);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.failed, 3);
        // Only two adds were attempted; the rest were marked, not sent.
        assert_eq!(backend.add_calls, 2);
        assert!(summary.outcomes[2].reason.as_deref().unwrap().contains("not attempted"));
        // Reconciliation was still attempted and its failure recorded.
        assert!(summary.reconcile_error.is_some());
        assert!(summary.cart.is_none());
    }

    #[test]
    fn test_pre_cancelled_run_stops_before_resolution() {
        let mut backend = MockBackend::default();
        let token = CancelToken::new();
        token.cancel();
        let summary = Orchestrator::new(&mut backend)
            .run_add(&items(5), FulfillmentMode::Instore, &token, &mut NullProgress)
            .unwrap();

        assert!(summary.stopped);
        assert!(summary.outcomes.is_empty());
        assert!(summary.cart.is_none());
        assert_eq!(backend.add_calls, 0);
    }

    #[test]
    fn test_cancel_mid_mutation_skips_rest_and_reconciliation() {
        let token = CancelToken::new();
        let mut backend = MockBackend {
            cancel_after_first_add: Some(token.clone()),
            ..MockBackend::default()
        };
        let summary = Orchestrator::new(&mut backend)
            .run_add(&items(4), FulfillmentMode::Instore, &token, &mut NullProgress)
            .unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.outcomes.len(), 4);
        assert!(summary.cart.is_none());
        assert_eq!(backend.add_calls, 1);
    }

    #[test]
    fn test_reconcile_error_preserves_outcomes() {
        let mut backend = MockBackend::default();
        backend.read_error = Some("panel not found".to_string());
        let summary = Orchestrator::new(&mut backend)
            .run_add(&items(2), FulfillmentMode::Instore, &CancelToken::new(), &mut NullProgress)
            .unwrap();

        assert_eq!(summary.added, 2);
        assert!(summary.cart.is_none());
        assert!(summary.reconcile_error.as_deref().unwrap().contains("panel not found"));
    }

    #[test]
    fn test_fetch_cart_prepares_session_and_mode() {
        let mut backend = MockBackend::default();
        backend.cart = vec![CartLineItem {
            item_id: None,
            name: "Milk".to_string(),
            price: "$3.49".to_string(),
            size: String::new(),
            quantity: 1,
        }];
        let cart = Orchestrator::new(&mut backend)
            .fetch_cart(FulfillmentMode::Pickup, &mut NullProgress)
            .unwrap();
        assert_eq!(cart.len(), 1);
        assert_eq!(backend.session_calls, 1);
        assert_eq!(backend.mode_calls, 1);
    }
}
