//! Open the cart side panel and capture a [`CartPanelSnapshot`] for the
//! parser strategies to work on.

use crate::browser::dialogs;
use crate::browser::parser::STOP_HEADERS;
use crate::browser::selectors;
use crate::browser::session::BrowserSession;
use crate::config::FulfillmentMode;
use crate::error::{CartError, Result};
use crate::progress::Progress;
use serde::Deserialize;
use std::time::Duration;

const SNAPSHOT_JS: &str = include_str!("cart_snapshot.js");

/// Markup that indicates the panel actually rendered cart content.
const PANEL_CONTENT: &str = concat!(
    "[role=\"dialog\"] a[href*=\"/products/\"], ",
    ".__reakit-portal a[href*=\"/products/\"], ",
    "[role=\"dialog\"] img[src*=\"product\"], ",
    "[role=\"dialog\"] li"
);

/// One structured capture of the cart panel DOM. Everything the four parser
/// strategies need, lifted out of the page in a single evaluation so the
/// strategies all see the same state.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartPanelSnapshot {
    /// Whether a plausible cart container was located at all.
    pub found: bool,

    /// The container's rendered text, newline-separated.
    pub full_text: String,

    pub product_links: Vec<ProductLinkBlock>,
    pub stepper_blocks: Vec<StepperBlock>,

    /// Capture diagnostics, folded into parse failure messages.
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// One `a[href*="/products/"]` in the panel plus its item block context.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductLinkBlock {
    /// URL slug after `/products/<digits>-`.
    pub slug: String,

    /// Rendered text of the enclosing item block.
    #[serde(default)]
    pub block_text: String,

    /// True when the link sits at or past the recommendation boundary.
    #[serde(default)]
    pub past_boundary: bool,

    #[serde(default)]
    pub quantity_hint: Option<u32>,
}

/// One item block located by its stepper / remove controls.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepperBlock {
    /// Product-link slug inside the block, empty when absent.
    #[serde(default)]
    pub slug: String,

    /// Longest plausible text node, the name fallback.
    #[serde(default)]
    pub candidate_text: String,

    #[serde(default)]
    pub block_text: String,

    #[serde(default)]
    pub quantity_hint: Option<u32>,
}

fn snapshot_script() -> Result<String> {
    let headers = serde_json::to_string(STOP_HEADERS)
        .map_err(|e| CartError::Browser(format!("Failed to render snapshot script: {}", e)))?;
    Ok(SNAPSHOT_JS.replace("__STOP_HEADERS__", &headers))
}

/// Capture a snapshot of the currently open panel.
pub fn capture(session: &BrowserSession) -> Result<CartPanelSnapshot> {
    session.evaluate_json(&snapshot_script()?)
}

/// Click the cart button, wait for the panel to render, and capture it.
///
/// When no capture finds a container, overlays are dismissed and the whole
/// sequence retried; two exhausted attempts are a [`CartError::PanelNotFound`].
pub fn open_and_capture(
    session: &BrowserSession,
    mode: FulfillmentMode,
    progress: &mut dyn Progress,
) -> Result<CartPanelSnapshot> {
    for attempt in 0..2 {
        if attempt > 0 {
            progress.log("Cart panel not found, dismissing overlays and retrying...");
            dialogs::close_popups(session)?;
            dialogs::dismiss_shopping_mode_dialog(session, mode)?;
            session.settle(2000);
        }

        if !selectors::click_first(session, selectors::CART_BUTTON, &[])? {
            continue;
        }
        progress.log("Opened cart panel, waiting for content...");

        if session.wait_for(PANEL_CONTENT, Duration::from_secs(8)).is_err() {
            // Some panel states (empty cart) render none of the content
            // markers; give the animation time and capture anyway.
            session.settle(3000);
        }
        session.settle(2000);

        let snapshot = capture(session)?;
        for line in &snapshot.diagnostics {
            log::debug!("panel: {}", line);
        }
        if snapshot.found {
            return Ok(snapshot);
        }
    }
    Err(CartError::PanelNotFound)
}

/// Close the panel again so it does not occlude later interactions.
pub fn close(session: &BrowserSession) -> Result<()> {
    if selectors::click_first(session, selectors::CART_CLOSE, &[])? {
        session.settle(1000);
    }
    Ok(())
}

/// Item count shown on the cart button badge, when the aria-label carries
/// one.
pub fn badge_count(session: &BrowserSession) -> Result<Option<u32>> {
    let label: Option<String> = session.evaluate_json(
        r#"(() => {
            const btn = document.querySelector('[aria-label*="View Cart" i], button[aria-label*="cart" i]');
            return JSON.stringify(btn ? btn.getAttribute('aria-label') : null);
        })()"#,
    )?;
    Ok(label.and_then(|l| {
        let digits: String = l.chars().skip_while(|c| !c.is_ascii_digit()).take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }))
}
