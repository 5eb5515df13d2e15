use serde::{Deserialize, Serialize};

/// One grocery item the caller wants added to the cart. Immutable for the
/// duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesiredItem {
    /// Client correlation id, echoed back in per-item events.
    #[serde(default)]
    pub id: u64,

    /// Display label ("Milk", "Mom's oat bread").
    #[serde(rename = "item")]
    pub label: String,

    /// Search text used against the catalog; falls back to the label.
    #[serde(rename = "productName", default)]
    pub search_text: Option<String>,

    #[serde(default = "default_quantity")]
    pub quantity: u32,

    /// Free-text note, shown alongside the label in progress output.
    #[serde(default)]
    pub note: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

impl DesiredItem {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self { id, label: label.into(), search_text: None, quantity: 1, note: None }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity.max(1);
        self
    }

    pub fn with_search_text(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }

    /// The text actually sent to catalog search.
    pub fn search_term(&self) -> &str {
        self.search_text.as_deref().unwrap_or(&self.label)
    }

    /// Label plus note, as shown to humans.
    pub fn display_label(&self) -> String {
        match &self.note {
            Some(note) => format!("{} ({})", self.label, note),
            None => self.label.clone(),
        }
    }
}

/// Outcome of resolving one [`DesiredItem`] against the catalog.
///
/// `item_id: None` with `error: None` means the search genuinely returned
/// no candidates ("not found"), which is distinct from a transport failure
/// during the search (`error: Some`).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMatch {
    /// Catalog entry id, e.g. `items_755261-12345`. Absent when not found.
    pub item_id: Option<String>,

    /// Display name from the catalog; falls back to the search term.
    pub name: String,

    /// Unit price as rendered by the storefront ("$2.49"); may be empty.
    pub price: String,

    /// Package size ("16 fl oz"); may be empty.
    pub size: String,

    pub source: DesiredItem,

    /// Populated only when resolution itself failed.
    pub error: Option<String>,
}

impl ResolvedMatch {
    /// A match for a search that completed but returned no candidates.
    pub fn not_found(source: DesiredItem) -> Self {
        let name = source.search_term().to_string();
        Self { item_id: None, name, price: String::new(), size: String::new(), source, error: None }
    }

    /// A match for a search that failed at the transport level.
    pub fn failed(source: DesiredItem, reason: impl Into<String>) -> Self {
        let mut matched = Self::not_found(source);
        matched.error = Some(reason.into());
        matched
    }
}

/// One line of the authoritative remote cart, as re-derived during
/// reconciliation. Never patched incrementally: the remote cart can change
/// underneath us (promotions, substitutions), so every reconciliation
/// rebuilds the full list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLineItem {
    /// Catalog entry id when the transport can recover one. The browser
    /// strategy often cannot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub price: String,

    #[serde(default)]
    pub size: String,

    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Added,
    Failed,
    Skipped,
}

/// Per-item result of one automation run. Exactly one of these exists per
/// attempted [`DesiredItem`]. Items resolved but never attempted get
/// `Skipped` (cancellation) or `Failed` (batch abort); items the run never
/// resolved get none at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcome {
    pub item_id: u64,
    pub label: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OperationOutcome {
    pub fn added(item: &DesiredItem) -> Self {
        Self { item_id: item.id, label: item.display_label(), status: OutcomeStatus::Added, reason: None }
    }

    pub fn failed(item: &DesiredItem, reason: impl Into<String>) -> Self {
        Self {
            item_id: item.id,
            label: item.display_label(),
            status: OutcomeStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(item: &DesiredItem, reason: impl Into<String>) -> Self {
        Self {
            item_id: item.id,
            label: item.display_label(),
            status: OutcomeStatus::Skipped,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregate result of a run. Partial failure is reported here, never
/// thrown: the orchestrator only errors when it cannot establish a session
/// or ensure the fulfillment mode at all.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    pub outcomes: Vec<OperationOutcome>,
    pub added: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Authoritative cart contents after the run, when reconciliation
    /// succeeded.
    pub cart: Option<Vec<CartLineItem>>,

    /// Why reconciliation failed, when it did. Add outcomes above are still
    /// valid in that case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_error: Option<String>,

    /// True when the run was cancelled before completing all items.
    pub stopped: bool,
}

impl RunSummary {
    /// Append an outcome, keeping the counters consistent.
    pub fn record(&mut self, outcome: OperationOutcome) {
        match outcome.status {
            OutcomeStatus::Added => self.added += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}
