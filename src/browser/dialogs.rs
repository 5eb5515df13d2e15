//! Overlay handling: promotional popups, the shopping-mode dialog, and the
//! probe that reads which fulfillment mode the page is actually in.

use crate::browser::selectors;
use crate::browser::session::BrowserSession;
use crate::config::FulfillmentMode;
use crate::error::Result;

const MODE_DIALOG_HEADING: &str = "How would you like to shop";

/// Click away generic popups (promos, app upsells, cookie banners). Repeats
/// until nothing more is dismissible, bounded to a few rounds.
pub fn close_popups(session: &BrowserSession) -> Result<()> {
    for _ in 0..3 {
        let closed =
            selectors::click_first(session, selectors::POPUP_CLOSE, selectors::POPUP_CLOSE_TEXT)?;
        if !closed {
            break;
        }
        session.settle(500);
    }
    Ok(())
}

/// Force-close any reakit portal overlays left blocking the page.
pub fn close_portal_overlays(session: &BrowserSession) -> Result<()> {
    session.evaluate_bool(
        r#"(() => {
            const portals = document.querySelectorAll('.__reakit-portal');
            for (const p of portals) {
                const btn = p.querySelector('button[aria-label="Close"], button[aria-label="close"]');
                if (btn) btn.click();
            }
            return true;
        })()"#,
    )?;
    Ok(())
}

/// Dismiss the "How would you like to shop?" dialog, choosing `mode`.
///
/// Every click is scoped to the detected dialog or portal root. The page
/// has mode buttons with identical labels next to the search bar; clicking
/// those instead of the dialog's buttons silently toggles the live mode.
/// Returns whether a dialog was found and acted on.
pub fn dismiss_shopping_mode_dialog(session: &BrowserSession, mode: FulfillmentMode) -> Result<bool> {
    if !mode_dialog_present(session)? {
        return Ok(false);
    }

    // Step 1: pick the mode inside the dialog scope.
    let clicked_mode = scoped_click(session, &format!("text:{}", mode.label()))?;
    if clicked_mode {
        session.settle(1000);
    }

    // Step 2: confirm, falling back to plain close.
    for action in ["text:Confirm", "text:Continue", "close"] {
        if scoped_click(session, action)? {
            // Give the dialog time to animate away before the caller
            // re-checks for it.
            session.settle(1500);
            return Ok(true);
        }
    }

    Ok(clicked_mode)
}

fn mode_dialog_present(session: &BrowserSession) -> Result<bool> {
    session.evaluate_bool(&format!(
        r#"(() => {{
            for (const root of document.querySelectorAll('[role="dialog"], .__reakit-portal')) {{
                if ((root.innerText || '').includes({heading})) return true;
            }}
            return false;
        }})()"#,
        heading = js_str(MODE_DIALOG_HEADING),
    ))
}

/// Click one control inside the shopping-mode dialog scope. `action` is
/// either `text:<label>` for a button text match or `close` for the close
/// button.
fn scoped_click(session: &BrowserSession, action: &str) -> Result<bool> {
    let expression = format!(
        r#"(() => {{
            let scope = null;
            for (const root of document.querySelectorAll('[role="dialog"], .__reakit-portal')) {{
                if ((root.innerText || '').includes({heading})) {{ scope = root; break; }}
            }}
            if (!scope) return false;
            const action = {action};
            const visible = el => {{
                const r = el.getBoundingClientRect();
                return r.width > 0 && r.height > 0;
            }};
            if (action === 'close') {{
                const btn = scope.querySelector('button[aria-label="Close"]');
                if (btn && visible(btn)) {{ btn.click(); return true; }}
                return false;
            }}
            const label = action.slice(5).toLowerCase();
            for (const btn of scope.querySelectorAll('button')) {{
                const t = (btn.textContent || '').trim().toLowerCase();
                if ((t === label || t.startsWith(label)) && visible(btn)) {{
                    btn.click();
                    return true;
                }}
            }}
            return false;
        }})()"#,
        heading = js_str(MODE_DIALOG_HEADING),
        action = js_str(action),
    );
    session.evaluate_bool(&expression)
}

/// Which fulfillment mode the page reports as active, from the
/// `aria-current` attribute of the visible mode buttons. `None` when no
/// button carries the attribute (probe is best-effort).
pub fn current_mode(session: &BrowserSession) -> Result<Option<FulfillmentMode>> {
    let label: Option<String> = session.evaluate_json(
        r#"(() => {
            for (const btn of document.querySelectorAll('button')) {
                const text = (btn.textContent || '').trim();
                const m = text.match(/^(Delivery|Pickup|In-Store)/i);
                if (!m || text.length >= 60) continue;
                const r = btn.getBoundingClientRect();
                if (r.width === 0 || r.height === 0) continue;
                const current = btn.getAttribute('aria-current');
                if (current === 'true' || current === 'page') {
                    return JSON.stringify(m[0]);
                }
            }
            return JSON.stringify(null);
        })()"#,
    )?;
    Ok(label.as_deref().and_then(FulfillmentMode::from_label))
}

/// True when no visible "Log In" / "Sign In" affordance exists. The URL
/// alone is not a reliable signal; the page may sit at the storefront
/// without being authenticated.
pub fn appears_logged_in(session: &BrowserSession) -> Result<bool> {
    session.evaluate_bool(
        r#"(() => {
            for (const el of document.querySelectorAll('a, button')) {
                const text = (el.textContent || '').trim();
                if (/^(Log In|Sign In)/i.test(text) && text.length < 30) {
                    const r = el.getBoundingClientRect();
                    if (r.width > 0 && r.height > 0) return false;
                }
            }
            return true;
        })()"#,
    )
}

fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
