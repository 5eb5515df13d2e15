//! The browser strategy: every operation drives the live storefront UI
//! through a headless Chrome tab. Slower than the fast path but immune to
//! persisted-query hash rotation.

use crate::backend::{CartBackend, ProductHit};
use crate::browser::dialogs;
use crate::browser::panel;
use crate::browser::parser;
use crate::browser::selectors;
use crate::browser::session::{BrowserSession, LaunchOptions};
use crate::browser::auth;
use crate::cancel::CancelToken;
use crate::config::{FulfillmentMode, StoreConfig};
use crate::error::{CartError, Result};
use crate::model::{CartLineItem, DesiredItem, ResolvedMatch};
use crate::progress::Progress;
use crate::session::SessionStore;
use serde::Deserialize;
use std::time::Duration;

/// Hard bound on removal clicks per clear run, in case the panel keeps
/// re-rendering buttons.
const MAX_REMOVAL_CLICKS: u32 = 100;

/// First product card scraped off a results page.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FirstHit {
    slug: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    size: String,
}

/// A live logged-in tab plus the mode it was last verified to be in.
pub struct BrowserState {
    session: BrowserSession,
    mode: FulfillmentMode,
}

pub struct BrowserBackend {
    config: StoreConfig,
    launch: LaunchOptions,
    store: SessionStore<BrowserState>,
}

impl BrowserBackend {
    pub fn new(config: StoreConfig) -> Self {
        Self { config, launch: LaunchOptions::default(), store: SessionStore::new() }
    }

    pub fn with_launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    fn state(&self) -> Result<&BrowserState> {
        self.store.get().ok_or(CartError::SessionExpired)
    }

    /// Full connect flow: launch, storefront navigation, login / ZIP gate,
    /// shopping-mode dialog, and a final probe of the mode the page
    /// actually landed in.
    fn connect(&mut self, progress: &mut dyn Progress) -> Result<()> {
        self.config.require_credentials()?;

        progress.log("Launching browser...");
        let session = BrowserSession::launch(self.launch.clone())?;

        progress.log("Loading store page...");
        session.navigate(&self.config.base_url())?;
        session.settle(2000);

        if auth::needs_auth(&session.current_url()?) {
            if !auth::login(&session, &self.config, progress)? {
                log::debug!("login affordance not found on first pass");
            }
            session.settle(2000);
            if auth::needs_auth(&session.current_url()?) {
                auth::enter_zip(&session, &self.config.zip_code, progress)?;
            }
        }

        // The mode dialog blocks everything else, so clear it before
        // checking the login state.
        let mode = self.config.shopping_mode;
        progress.log("Setting shopping mode...");
        for _ in 0..3 {
            if !dialogs::dismiss_shopping_mode_dialog(&session, mode)? {
                break;
            }
            session.settle(1000);
        }
        dialogs::close_popups(&session)?;
        session.settle(500);

        progress.log("Verifying login status...");
        if !dialogs::appears_logged_in(&session)? {
            if !auth::login(&session, &self.config, progress)? {
                return Err(CartError::LoginFlow(
                    "could not reach the login form".to_string(),
                ));
            }
            session.settle(2000);
            for _ in 0..3 {
                if !dialogs::dismiss_shopping_mode_dialog(&session, mode)? {
                    break;
                }
                session.settle(1000);
            }
        }

        dialogs::close_popups(&session)?;
        session.settle(1000);

        // Cache the mode the page is ACTUALLY in. If dialog dismissal
        // failed, caching the requested mode would mask the failed switch.
        let actual = dialogs::current_mode(&session)?.unwrap_or(mode);
        progress.log(&format!("Connected! (mode: {})", actual.label()));
        self.store.replace(BrowserState { session, mode: actual });
        Ok(())
    }

    /// Clear overlays and run one search from the storefront search bar.
    fn run_search(&self, term: &str) -> Result<()> {
        let state = self.state()?;
        let session = &state.session;

        dialogs::dismiss_shopping_mode_dialog(session, state.mode)?;
        dialogs::close_popups(session)?;
        dialogs::close_portal_overlays(session)?;
        session.settle(300);

        let mut input = selectors::first_visible(session, selectors::SEARCH_INPUT)?;
        if input.is_none() {
            // One more dismissal round; a late promo overlay is the usual
            // reason the bar is occluded.
            dialogs::close_popups(session)?;
            session.settle(1000);
            input = selectors::first_visible(session, selectors::SEARCH_INPUT)?;
        }
        let Some(input) = input else {
            return Err(CartError::Browser("search bar not found".to_string()));
        };

        session.type_into(&input, term)?;
        session.press_key("Enter")?;

        if session.wait_for(selectors::PRODUCT_LINK, Duration::from_secs(8)).is_err() {
            session.settle(2000);
        }
        session.settle(500);
        Ok(())
    }

    /// First product card on the current results page, if any.
    fn scrape_first_hit(&self) -> Result<Option<FirstHit>> {
        self.state()?.session.evaluate_json(
            r#"(() => {
                const link = document.querySelector('a[href*="/products/"]');
                if (!link) return JSON.stringify(null);
                const m = (link.href || '').match(/\/products\/\d+-(.+)$/);
                const block = link.closest('li') || link.parentElement;
                const text = block ? (block.innerText || '') : '';
                return JSON.stringify({
                    slug: m ? m[1] : '',
                    price: (text.match(/\$\d+\.\d{2}/) || [''])[0],
                    size: (text.match(/\d+(?:\.\d+)?\s*(?:oz|fl oz|lb|gal|ct|pk|ml|l|qt|pt)/i) || [''])[0],
                });
            })()"#,
        )
    }

    /// Click the stepper until the card shows `target` units. Returns how
    /// far it got.
    fn increment_to(&self, target: u32) -> Result<u32> {
        let session = &self.state()?.session;
        for reached in 1..target {
            let clicked = selectors::click_first(
                session,
                selectors::INCREMENT_BUTTON,
                selectors::INCREMENT_BUTTON_TEXT,
            )?;
            if !clicked {
                return Ok(reached);
            }
            session.settle(300);
        }
        Ok(target)
    }

    /// Click the first visible Remove / Decrement control in the panel and
    /// return its aria-label, or None when no such control remains.
    fn click_removal_control(&self) -> Result<Option<String>> {
        self.state()?.session.evaluate_json(
            r#"(() => {
                const sels = [
                    '[role="dialog"] button[aria-label^="Remove " i]',
                    'button[aria-label^="Decrement quantity" i]',
                ];
                for (const sel of sels) {
                    let btn = null;
                    try { btn = document.querySelector(sel); } catch { continue; }
                    if (!btn) continue;
                    const r = btn.getBoundingClientRect();
                    if (r.width === 0 || r.height === 0) continue;
                    const label = btn.getAttribute('aria-label') || '';
                    btn.click();
                    return JSON.stringify(label);
                }
                return JSON.stringify(null);
            })()"#,
        )
    }

    /// Confirm a removal in the alert dialog, when one appeared.
    fn confirm_removal(&self) -> Result<()> {
        let session = &self.state()?.session;
        let clicked = session.evaluate_bool(
            r#"(() => {
                const dlg = document.querySelector('[role="alertdialog"]');
                if (!dlg) return false;
                for (const btn of dlg.querySelectorAll('button')) {
                    const t = (btn.textContent || '').trim();
                    if (/^(Remove|Confirm|Yes)/i.test(t)) { btn.click(); return true; }
                }
                return false;
            })()"#,
        )?;
        if clicked {
            session.settle(2000);
        }
        Ok(())
    }

    /// Try the Manage -> "Remove all items" bulk path. Returns whether the
    /// bulk removal was triggered.
    fn bulk_remove(&self, progress: &mut dyn Progress) -> Result<bool> {
        let session = &self.state()?.session;
        if !selectors::click_first(session, &[], &["Manage", "Edit"])? {
            return Ok(false);
        }
        progress.log("Found Manage button, trying bulk remove...");
        session.settle(2000);

        if !selectors::click_first(session, &[], &["Remove all items", "Remove all"])? {
            return Ok(false);
        }
        session.settle(3000);

        if selectors::click_first(session, &[], &["Remove all", "Confirm", "Yes"])? {
            session.settle(2000);
        }
        Ok(true)
    }
}

impl CartBackend for BrowserBackend {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn ensure_session(&mut self, progress: &mut dyn Progress) -> Result<()> {
        if let Some(state) = self.store.get() {
            // Probe: the tab must still evaluate, and the page must not
            // have dropped back to a logged-out state.
            let alive = state.session.evaluate_bool("true").unwrap_or(false)
                && dialogs::appears_logged_in(&state.session).unwrap_or(false);
            if alive {
                progress.log("Reusing existing browser session");
                return Ok(());
            }
            progress.log("Browser session stale, reconnecting...");
            self.store.invalidate();
        }
        self.connect(progress)
    }

    fn ensure_mode(&mut self, mode: FulfillmentMode, progress: &mut dyn Progress) -> Result<()> {
        let already = {
            let session = &self.state()?.session;
            dialogs::dismiss_shopping_mode_dialog(session, mode)?;
            dialogs::close_popups(session)?;
            dialogs::current_mode(session)? == Some(mode)
        };

        if !already {
            let session = &self.state()?.session;
            progress.log(&format!("Switching to {} mode...", mode.label()));
            // The mode buttons sit next to the search bar; a second click is
            // sometimes needed when the first one toggled a dialog instead.
            for attempt in 0..2 {
                if selectors::click_first(session, &[], &[mode.label()])? {
                    session.settle(2000);
                    if dialogs::dismiss_shopping_mode_dialog(session, mode)? {
                        session.settle(2000);
                    }
                    dialogs::close_popups(session)?;
                    match dialogs::current_mode(session)? {
                        Some(current) if current == mode => break,
                        // Probe found nothing; accept the click on the last
                        // attempt rather than failing on a blind spot.
                        None if attempt == 1 => break,
                        _ => continue,
                    }
                } else if attempt == 1 {
                    return Err(CartError::Browser(format!(
                        "could not find the {} mode button",
                        mode.label()
                    )));
                }
            }

            if let Some(current) = dialogs::current_mode(session)? {
                if current != mode {
                    return Err(CartError::Browser(format!(
                        "mode switch failed: page still reports {}",
                        current.label()
                    )));
                }
            }
            progress.log(&format!("Switched to {} mode", mode.label()));
        }

        self.store.get_mut().ok_or(CartError::SessionExpired)?.mode = mode;
        Ok(())
    }

    fn resolve_batch(
        &mut self,
        items: &[DesiredItem],
        cancel: &CancelToken,
        progress: &mut dyn Progress,
    ) -> Vec<ResolvedMatch> {
        let total = items.len();
        let mut matches = Vec::with_capacity(total);

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            progress.log(&format!(
                "[{}/{}] Searching for: {}",
                index + 1,
                total,
                item.display_label()
            ));

            let resolved = match self.run_search(item.search_term()).and_then(|_| self.scrape_first_hit()) {
                Ok(Some(hit)) => {
                    let name = parser::slug_to_name(&hit.slug);
                    ResolvedMatch {
                        item_id: None,
                        name: if name.len() < 3 { item.search_term().to_string() } else { name },
                        price: hit.price,
                        size: hit.size,
                        source: item.clone(),
                        error: None,
                    }
                }
                Ok(None) => ResolvedMatch::not_found(item.clone()),
                Err(err) => ResolvedMatch::failed(item.clone(), err.to_string()),
            };
            matches.push(resolved);
        }

        matches
    }

    fn apply_add(&mut self, matched: &ResolvedMatch, progress: &mut dyn Progress) -> Result<()> {
        // The results page has moved on since resolution; search again so
        // the Add button belongs to this item.
        self.run_search(matched.source.search_term())?;

        let session = &self.state()?.session;
        if !selectors::click_first(session, selectors::ADD_BUTTON, selectors::ADD_BUTTON_TEXT)? {
            return Err(CartError::Rejected("no Add button found in results".to_string()));
        }
        session.settle(500);

        let quantity = matched.source.quantity;
        if quantity > 1 {
            progress.log(&format!("Setting quantity to {}...", quantity));
            let reached = self.increment_to(quantity)?;
            if reached < quantity {
                return Err(CartError::Rejected(format!(
                    "only reached quantity {} of {}",
                    reached, quantity
                )));
            }
        }

        dialogs::close_popups(&self.state()?.session)?;
        Ok(())
    }

    fn read_cart(&mut self, progress: &mut dyn Progress) -> Result<Vec<CartLineItem>> {
        let state = self.state()?;
        progress.log("Scraping cart...");

        let snapshot = panel::open_and_capture(&state.session, state.mode, progress)?;
        let items = parser::parse_cart_snapshot(&snapshot);
        panel::close(&state.session)?;

        let items = items?;
        progress.log(&format!("Cart scrape: {} item(s) found", items.len()));
        Ok(items)
    }

    fn clear_cart(&mut self, progress: &mut dyn Progress) -> Result<usize> {
        let initial = {
            let state = self.state()?;
            let session = &state.session;

            progress.log("Opening cart...");
            let initial = panel::badge_count(session)?;
            if initial == Some(0) {
                progress.log("Cart is already empty.");
                return Ok(0);
            }

            if !selectors::click_first(session, selectors::CART_BUTTON, &[])? {
                return Err(CartError::PanelNotFound);
            }
            session.settle(3000);
            initial
        };

        if self.bulk_remove(progress)? {
            let removed = initial.unwrap_or(1) as usize;
            progress.log(&format!("Removed {} item(s) from cart.", removed));
            panel::close(&self.state()?.session)?;
            return Ok(removed.max(1));
        }

        progress.log("Removing items individually...");
        let budget = initial.map(|n| n.saturating_mul(15).max(15)).unwrap_or(MAX_REMOVAL_CLICKS);
        let mut clicks = 0u32;
        let mut last_name = String::new();

        while clicks < budget.min(MAX_REMOVAL_CLICKS) {
            let Some(label) = self.click_removal_control()? else { break };
            clicks += 1;

            let item_name = label
                .trim_start_matches("Decrement quantity of ")
                .trim_start_matches("Remove ")
                .trim();
            if !item_name.is_empty() && item_name != last_name {
                progress.log(&format!("Removing: {}...", item_name));
                last_name = item_name.to_string();
            }

            self.state()?.session.settle(1500);
            self.confirm_removal()?;
        }

        let session = &self.state()?.session;
        dialogs::close_popups(session)?;
        session.settle(1000);
        let remaining = panel::badge_count(session)?;

        let removed = match (initial, remaining) {
            (Some(before), Some(after)) => before.saturating_sub(after) as usize,
            _ => clicks as usize,
        };
        progress.log(&format!("Removed {} item(s) from cart.", removed));
        Ok(removed)
    }

    fn search_products(&mut self, query: &str, progress: &mut dyn Progress) -> Result<Vec<ProductHit>> {
        progress.log(&format!("Searching for \"{}\"...", query));
        self.run_search(query)?;

        let hits: Vec<FirstHit> = self.state()?.session.evaluate_json(
            r#"(() => {
                const results = [];
                const seen = new Set();
                for (const link of document.querySelectorAll('a[href*="/products/"]')) {
                    if (results.length >= 12) break;
                    const m = (link.href || '').match(/\/products\/\d+-(.+)$/);
                    const slug = m ? m[1] : '';
                    if (!slug || seen.has(slug)) continue;
                    seen.add(slug);
                    const block = link.closest('li') || link.parentElement;
                    const text = block ? (block.innerText || '') : '';
                    results.push({
                        slug,
                        price: (text.match(/\$\d+\.\d{2}/) || [''])[0],
                        size: (text.match(/\d+(?:\.\d+)?\s*(?:oz|fl oz|lb|gal|ct|pk|ml|l|qt|pt)/i) || [''])[0],
                    });
                }
                return JSON.stringify(results);
            })()"#,
        )?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let name = parser::slug_to_name(&hit.slug);
                (name.len() >= 3)
                    .then_some(ProductHit { name, price: hit.price, size: hit.size })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_hit_deserializes() {
        let hit: FirstHit =
            serde_json::from_str(r#"{"slug": "whole-milk", "price": "$3.49", "size": "1 gal"}"#)
                .unwrap();
        assert_eq!(hit.slug, "whole-milk");
        assert_eq!(hit.price, "$3.49");
    }

    #[test]
    fn test_backend_without_session_reports_expiry() {
        let mut backend = BrowserBackend::new(StoreConfig::default());
        let items = vec![DesiredItem::new(1, "Milk")];
        let matches =
            backend.resolve_batch(&items, &CancelToken::new(), &mut crate::progress::NullProgress);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].error.is_some());
    }

    // Everything else needs a live Chrome plus storefront access.
    #[test]
    #[ignore]
    fn test_connect_and_read_cart() {
        let mut config = StoreConfig::default();
        config.apply_env_overrides();
        let mut backend = BrowserBackend::new(config);
        backend.ensure_session(&mut crate::progress::NullProgress).expect("connect failed");
        let cart = backend.read_cart(&mut crate::progress::NullProgress).expect("read failed");
        println!("cart: {:?}", cart);
    }
}
