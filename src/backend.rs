use crate::cancel::CancelToken;
use crate::config::FulfillmentMode;
use crate::error::Result;
use crate::model::{CartLineItem, DesiredItem, ResolvedMatch};
use crate::progress::Progress;

/// A product hit returned by standalone catalog search.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProductHit {
    pub name: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
}

/// The transport-neutral contract both strategies implement: the fast path
/// speaks GraphQL directly, the browser path drives a rendered page. Both
/// must produce the same logical results for every operation.
///
/// Session acquisition is implicit: every method consults the backend's
/// session store first and re-authenticates when the cached session fails
/// its probe. Mode reconciliation is explicit and separate — acquiring a
/// session never silently switches modes.
pub trait CartBackend {
    /// Human-readable strategy name for progress output ("fast", "browser").
    fn name(&self) -> &'static str;

    /// Acquire (or revalidate) the authenticated session. Fails with the
    /// session-level taxonomy: `MissingCredentials`, `LoginFlow`,
    /// `Verification`.
    fn ensure_session(&mut self, progress: &mut dyn Progress) -> Result<()>;

    /// Ensure the remote cart is associated with `mode`. A no-op when the
    /// session already matches — zero remote calls in that case.
    fn ensure_mode(&mut self, mode: FulfillmentMode, progress: &mut dyn Progress) -> Result<()>;

    /// Resolve every desired item to at most one catalog entry. Infallible
    /// at the batch level: per-item transport failures are recorded on the
    /// corresponding [`ResolvedMatch`], and "no candidates" is a valid
    /// resolution, not an error. The returned vector is a prefix-aligned
    /// subset of `items` when the token cancels mid-batch.
    fn resolve_batch(
        &mut self,
        items: &[DesiredItem],
        cancel: &CancelToken,
        progress: &mut dyn Progress,
    ) -> Vec<ResolvedMatch>;

    /// Add one resolved item at its requested quantity. One remote
    /// operation per item so success and failure stay attributable.
    /// `Err(SessionExpired)` is batch-fatal; `Err(Transport)` (already
    /// retried once internally) and `Err(Rejected)` are terminal for this
    /// item only.
    fn apply_add(&mut self, matched: &ResolvedMatch, progress: &mut dyn Progress) -> Result<()>;

    /// Re-derive the authoritative cart contents from the remote system,
    /// in presentation order. Always rebuilt from scratch.
    fn read_cart(&mut self, progress: &mut dyn Progress) -> Result<Vec<CartLineItem>>;

    /// Remove every item from the remote cart; returns the removed count.
    fn clear_cart(&mut self, progress: &mut dyn Progress) -> Result<usize>;

    /// Standalone catalog search for interactive use (up to 12 hits).
    fn search_products(&mut self, query: &str, progress: &mut dyn Progress) -> Result<Vec<ProductHit>>;
}
