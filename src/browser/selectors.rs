//! Ordered selector strategy chains for the storefront UI.
//!
//! The storefront ships no stable test ids, so every interaction tries a
//! chain of selectors in order and takes the first visible hit. Chains are
//! ordered most-specific first; the tail entries are broad fallbacks that
//! survive markup churn.

use crate::browser::session::BrowserSession;
use crate::error::Result;

pub const SEARCH_INPUT: &[&str] = &[
    "#search-bar-input",
    "input[type=\"search\"]",
    "input[aria-label*=\"search\" i]",
    "input[placeholder*=\"Search\" i]",
    "[data-testid*=\"search\"] input",
    "header input[type=\"text\"]",
];

pub const ZIP_INPUT: &[&str] = &[
    "input[placeholder*=\"ZIP\" i]",
    "input[aria-label*=\"ZIP\" i]",
    "input[name*=\"zip\" i]",
    "input[inputmode=\"numeric\"]",
];

pub const CART_BUTTON: &[&str] = &[
    "[aria-label*=\"View Cart\" i]",
    "button[aria-label*=\"cart\" i]",
    "[aria-label*=\"cart\" i]",
    "[data-testid*=\"cart\"]",
    "a[href*=\"cart\"]",
];

pub const CART_CLOSE: &[&str] = &[
    "[role=\"dialog\"] button[aria-label=\"Close\"]",
    ".__reakit-portal button[aria-label=\"Close\"]",
    "[role=\"dialog\"] button[aria-label*=\"close\" i]",
    "button[aria-label=\"Close cart\"]",
];

pub const LOGIN_LINK: &[&str] = &[
    "[data-testid*=\"login\"]",
    "[data-testid*=\"signin\"]",
    "a[href*=\"login\"]",
    "a[href*=\"signin\"]",
    "a[href*=\"sign-in\"]",
];
pub const LOGIN_LINK_TEXT: &[&str] = &["Log In", "Sign In"];

pub const EMAIL_INPUT: &[&str] = &[
    "input[type=\"email\"]",
    "input[name=\"email\"]",
    "input[name=\"username\"]",
    "input[id*=\"email\" i]",
    "input[id*=\"user\" i]",
    "input[placeholder*=\"email\" i]",
    "input[autocomplete=\"email\"]",
    "input[autocomplete=\"username\"]",
];

pub const PASSWORD_INPUT: &[&str] = &[
    "input[type=\"password\"]",
    "input[name=\"password\"]",
    "input[id*=\"password\" i]",
    "input[autocomplete=\"current-password\"]",
];

pub const SUBMIT_BUTTON: &[&str] = &["button[type=\"submit\"]", "input[type=\"submit\"]"];
pub const SUBMIT_BUTTON_TEXT: &[&str] = &["Log In", "Sign In", "Submit"];

pub const ADD_BUTTON: &[&str] = &[
    "[data-testid*=\"add\"] button",
    "[aria-label*=\"Add to cart\" i]",
    "[aria-label*=\"add\" i][role=\"button\"]",
];
pub const ADD_BUTTON_TEXT: &[&str] = &["Add to cart", "Add"];

pub const INCREMENT_BUTTON: &[&str] =
    &["button[aria-label*=\"increment\" i]", "button[aria-label*=\"increase\" i]"];
pub const INCREMENT_BUTTON_TEXT: &[&str] = &["+"];

pub const POPUP_CLOSE: &[&str] = &[
    "button[aria-label=\"Close\"]",
    "[data-testid=\"modal-close\"]",
    ".__reakit-portal button[aria-label=\"Close\"]",
];
pub const POPUP_CLOSE_TEXT: &[&str] = &["Close", "Not now", "Dismiss", "Got it", "Confirm"];

/// Product links in search results and the cart panel.
pub const PRODUCT_LINK: &str = "a[href*=\"/products/\"]";

/// Serialize a chain as a JS array literal for in-page evaluation.
fn js_string_array(items: &[&str]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Visibility-checked click: first the CSS chain, then buttons/anchors whose
/// text starts with one of `texts`. Returns whether anything was clicked.
pub fn click_first(session: &BrowserSession, css: &[&str], texts: &[&str]) -> Result<bool> {
    let expression = format!(
        r#"(() => {{
            const css = {css};
            const texts = {texts}.map(t => t.toLowerCase());
            const visible = el => {{
                const r = el.getBoundingClientRect();
                return r.width > 0 && r.height > 0;
            }};
            for (const sel of css) {{
                let el = null;
                try {{ el = document.querySelector(sel); }} catch {{ continue; }}
                if (el && visible(el)) {{ el.click(); return true; }}
            }}
            if (texts.length > 0) {{
                for (const el of document.querySelectorAll('button, a')) {{
                    const t = (el.textContent || '').trim().toLowerCase();
                    if (t.length === 0 || t.length > 40) continue;
                    if (texts.some(x => t === x || t.startsWith(x + ' ')) && visible(el)) {{
                        el.click();
                        return true;
                    }}
                }}
            }}
            return false;
        }})()"#,
        css = js_string_array(css),
        texts = js_string_array(texts),
    );
    session.evaluate_bool(&expression)
}

/// First selector in the chain with a visible match, if any.
pub fn first_visible(session: &BrowserSession, css: &[&str]) -> Result<Option<String>> {
    let expression = format!(
        r#"(() => {{
            const css = {css};
            for (const sel of css) {{
                let el = null;
                try {{ el = document.querySelector(sel); }} catch {{ continue; }}
                if (el) {{
                    const r = el.getBoundingClientRect();
                    if (r.width > 0 && r.height > 0) return JSON.stringify(sel);
                }}
            }}
            return JSON.stringify(null);
        }})()"#,
        css = js_string_array(css),
    );
    session.evaluate_json(&expression)
}

/// Type into the first visible input from the chain. Returns false when no
/// input in the chain is visible.
pub fn fill_first(session: &BrowserSession, css: &[&str], value: &str) -> Result<bool> {
    match first_visible(session, css)? {
        Some(selector) => {
            session.type_into(&selector, value)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
