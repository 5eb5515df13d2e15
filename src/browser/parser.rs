//! The four-strategy cascade that turns a [`CartPanelSnapshot`] into cart
//! line items.
//!
//! Strategies run strictly in order and never merge results: the first one
//! to produce any items wins. Each is tuned to one rendering of the panel;
//! merging them double-counts items that appear in more than one shape.
//!
//!   1. quantity-line text walk (the richest rendering, both panel formats)
//!   2. product-link harvest (URL slugs when the text layer is opaque)
//!   3. stepper-control harvest (items located by their +/- buttons)
//!   4. generic price-line fallback
//!
//! Everything here is a pure function over the snapshot so the cascade is
//! testable without a browser.

use crate::browser::panel::{CartPanelSnapshot, ProductLinkBlock, StepperBlock};
use crate::error::{CartError, Result};
use crate::model::CartLineItem;
use indexmap::IndexSet;
use regex::Regex;
use std::sync::LazyLock;

/// Section headings that mark the start of recommendation rails. Everything
/// at or after the first of these belongs to upsell content, not the cart.
pub const STOP_HEADERS: &[&str] = &[
    "Complete your cart",
    "Buy it again",
    "You might also like",
    "Recommended for you",
    "Customers also bought",
];

/// Panel chrome that must never be taken for a product name.
const SKIP_NAMES: &[&str] = &[
    "Shopping Cart",
    "Shopping list",
    "Your cart",
    "Pickup order",
    "Your order",
    "Manage",
    "Woodman's Food Markets",
    "Shopping",
];

/// Per-unit disambiguation tolerance in dollars.
const PRICE_TOLERANCE: f64 = 0.02;

static EMPTY_CART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)your (personal )?cart is empty|cart is empty|no items in your cart").unwrap()
});
static QTY_SAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Quantity:\s*(\d+)").unwrap());
static QTY_LINE_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^Quantity:").unwrap());
static COUNT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)\s*(ct|item|ea|each|pk|lb|oz)?").unwrap());
static PRICE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\$\d").unwrap());
static PRICE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\d+\.\d{2}").unwrap());
static PRICE_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$?(\d+\.?\d*)").unwrap());
static REPLACEMENT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(Replace with|Choose replacement|Choose a replacement|Original price|Current price|Sale price|On sale|Save \$)").unwrap()
});
static UNIT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d+(?:\.\d+)?\s*(?:fl\s*oz|oz|ct|item|items|ea|each|pk|lb|lbs|gal|gallon|ml|l|qt|pt|count|kg|g)\s*$").unwrap()
});
static SIZE_WORD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:half|quarter|whole)?\s*(?:gallon|pint|quart|liter|litre)\s*$").unwrap()
});
static CHROME_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(Shopper|Checkout|Subtotal|Shopping|Woodman|Choose|\d+\s*(am|pm))").unwrap()
});
static DIGITS_ONLY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static SIZE_IN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\((\d+(?:\.\d+)?\s*(?:oz|fl oz|lb|gal|ct|pk|ml|l|qt|pt)[^)]*)\)").unwrap()
});
static SIZE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+(?:\.\d+)?\s*(?:oz|fl oz|lb|gal|ct|pk|ml|l|qt|pt)").unwrap()
});
static QTY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:Quantity|Qty)[:\s]*(\d+)").unwrap());
static FALLBACK_CHROME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(Remove|Edit|Manage|Save|Checkout|Subtotal|Est\.|Shopper|Shopping|Your\s)").unwrap()
});

/// Run the cascade over one snapshot.
///
/// An explicit empty-cart marker short-circuits to an empty list. All four
/// strategies coming back empty without that marker is a
/// [`CartError::ParseExhausted`]: the panel rendered something we cannot
/// read, and a silent empty result would corrupt reconciliation.
pub fn parse_cart_snapshot(snapshot: &CartPanelSnapshot) -> Result<Vec<CartLineItem>> {
    if EMPTY_CART.is_match(&snapshot.full_text) {
        return Ok(Vec::new());
    }

    let lines = cart_lines(&snapshot.full_text);

    let strategies: Vec<(&str, Box<dyn Fn() -> Vec<CartLineItem> + '_>)> = vec![
        ("quantity-line walk", Box::new(|| quantity_line_items(&lines))),
        ("product-link harvest", Box::new(|| product_link_items(&snapshot.product_links))),
        ("stepper harvest", Box::new(|| stepper_items(&snapshot.stepper_blocks))),
        ("price-line fallback", Box::new(|| price_line_items(&lines))),
    ];

    match first_yield(&strategies) {
        Some(items) => Ok(items),
        None => Err(CartError::ParseExhausted(format!(
            "all strategies empty over {} panel lines ({})",
            lines.len(),
            snapshot.diagnostics.join("; "),
        ))),
    }
}

/// Run strategies in order, stopping at the first to produce any items.
/// Later strategies are never invoked once an earlier one yields.
fn first_yield(
    strategies: &[(&str, Box<dyn Fn() -> Vec<CartLineItem> + '_>)],
) -> Option<Vec<CartLineItem>> {
    for (label, strategy) in strategies {
        let items = strategy();
        if !items.is_empty() {
            log::debug!("cart parse: {} produced {} item(s)", label, items.len());
            return Some(items);
        }
    }
    None
}

/// Trim, drop blanks, and cut at the first recommendation heading.
fn cart_lines(full_text: &str) -> Vec<String> {
    let all: Vec<String> =
        full_text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
    let cutoff = all.iter().position(|line| {
        let lowered = line.to_lowercase();
        STOP_HEADERS.iter().any(|h| lowered.contains(&h.to_lowercase()))
    });
    match cutoff {
        Some(index) => all[..index].to_vec(),
        None => all,
    }
}

/// Turn a product URL slug into a display name ("whole-milk" -> "Whole Milk").
pub fn slug_to_name(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_dollars(raw: &str) -> Option<f64> {
    PRICE_VALUE.captures(raw).and_then(|c| c[1].parse().ok())
}

/// When several prices surround one item and the quantity is known, prefer
/// the per-unit price: the smallest collected price, but only when the
/// largest is that price times the quantity (within tolerance). Otherwise
/// the caller keeps the price closest to the name.
fn disambiguate_price(prices: &[String], quantity: u32) -> Option<String> {
    if quantity <= 1 || prices.len() < 2 {
        return None;
    }
    let mut parsed: Vec<(f64, &String)> =
        prices.iter().filter_map(|p| parse_dollars(p).map(|v| (v, p))).collect();
    if parsed.len() < 2 {
        return None;
    }
    parsed.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (smallest_val, smallest_raw) = (&parsed[0].0, parsed[0].1);
    let largest_val = parsed[parsed.len() - 1].0;
    if (largest_val - smallest_val * f64::from(quantity)).abs() < PRICE_TOLERANCE {
        Some(smallest_raw.clone())
    } else {
        None
    }
}

fn plausible_name(candidate: &str) -> bool {
    candidate.len() >= 3
        && !SKIP_NAMES.contains(&candidate)
        && !candidate.starts_with('$')
        && !candidate.starts_with("Est.")
        && !CHROME_PREFIX.is_match(candidate)
        && !DIGITS_ONLY.is_match(candidate)
        && !UNIT_LINE.is_match(candidate)
        && !SIZE_WORD_LINE.is_match(candidate)
}

/// Strategy 1: find "Quantity:" lines and walk backwards over noise to the
/// price(s) and name. Handles both panel formats: `Quantity: 1 item` on one
/// line, and `Quantity:` with the count (`2 ct`) on the next.
fn quantity_line_items(lines: &[String]) -> Vec<CartLineItem> {
    let mut items = Vec::new();

    for (qi, line) in lines.iter().enumerate() {
        if !QTY_LINE_START.is_match(line) {
            continue;
        }

        let mut quantity = 1;
        if let Some(caps) = QTY_SAME_LINE.captures(line) {
            quantity = caps[1].parse().unwrap_or(1);
        } else if let Some(next) = lines.get(qi + 1) {
            if let Some(caps) = COUNT_LINE.captures(next) {
                quantity = caps[1].parse().unwrap_or(1);
            }
        }

        // Walk backwards, collecting every price and skipping label noise.
        // The price is overwritten on each hit: the last one found sits
        // closest to the name and is the current (not original) price.
        let mut price = String::new();
        let mut prices_found: Vec<String> = Vec::new();
        let mut back = qi;
        while back > 0 {
            let candidate = &lines[back - 1];
            if REPLACEMENT_LABEL.is_match(candidate) {
                back -= 1;
                continue;
            }
            if PRICE_LINE.is_match(candidate) {
                prices_found.push(candidate.clone());
                price = candidate.clone();
                back -= 1;
                continue;
            }
            if UNIT_LINE.is_match(candidate) || SIZE_WORD_LINE.is_match(candidate) {
                back -= 1;
                continue;
            }
            break;
        }

        let Some(name_line) = back.checked_sub(1).map(|i| &lines[i]) else { continue };
        if !plausible_name(name_line) {
            continue;
        }
        let name = name_line.clone();

        let size = SIZE_IN_NAME.captures(&name).map(|c| c[1].to_string()).unwrap_or_default();
        if let Some(per_unit) = disambiguate_price(&prices_found, quantity) {
            price = per_unit;
        }
        items.push(CartLineItem { item_id: None, name, price, size, quantity });
    }

    items
}

/// Strategy 2: harvest product links, excluding everything past the
/// recommendation boundary, and read price/size/quantity out of each link's
/// item block text.
fn product_link_items(links: &[ProductLinkBlock]) -> Vec<CartLineItem> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut items = Vec::new();

    for link in links {
        if link.past_boundary {
            continue;
        }
        let name = slug_to_name(&link.slug);
        if name.len() < 3 || !seen.insert(name.clone()) {
            continue;
        }

        let price =
            PRICE_TOKEN.find(&link.block_text).map(|m| m.as_str().to_string()).unwrap_or_default();
        let size =
            SIZE_TOKEN.find(&link.block_text).map(|m| m.as_str().to_string()).unwrap_or_default();
        let quantity = link
            .quantity_hint
            .or_else(|| QTY_TOKEN.captures(&link.block_text).and_then(|c| c[1].parse().ok()))
            .unwrap_or(1);

        items.push(CartLineItem { item_id: None, name, price, size, quantity });
    }

    items
}

/// Strategy 3: item blocks located by their stepper / remove buttons. The
/// product-link slug names the item when present; otherwise the longest
/// plausible text node collected by the snapshot.
fn stepper_items(blocks: &[StepperBlock]) -> Vec<CartLineItem> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut items = Vec::new();

    for block in blocks {
        let name = if block.slug.is_empty() {
            block.candidate_text.clone()
        } else {
            slug_to_name(&block.slug)
        };
        if name.len() < 3 || !seen.insert(name.clone()) {
            continue;
        }

        let price =
            PRICE_TOKEN.find(&block.block_text).map(|m| m.as_str().to_string()).unwrap_or_default();
        let size =
            SIZE_TOKEN.find(&block.block_text).map(|m| m.as_str().to_string()).unwrap_or_default();
        let quantity = block
            .quantity_hint
            .or_else(|| QTY_TOKEN.captures(&block.block_text).and_then(|c| c[1].parse().ok()))
            .unwrap_or(1);

        items.push(CartLineItem { item_id: None, name, price, size, quantity });
    }

    items
}

/// Strategy 4: last resort. Any price-shaped line, with up to four lines of
/// backtracking for a plausible name.
fn price_line_items(lines: &[String]) -> Vec<CartLineItem> {
    let mut seen: IndexSet<String> = IndexSet::new();
    let mut items = Vec::new();

    for (li, line) in lines.iter().enumerate() {
        if !PRICE_TOKEN.is_match(line) || !line.starts_with('$') {
            continue;
        }

        let mut name = String::new();
        for back in 1..=4 {
            let Some(index) = li.checked_sub(back) else { break };
            let candidate = &lines[index];
            if candidate.starts_with('$')
                || QTY_LINE_START.is_match(candidate)
                || UNIT_LINE.is_match(candidate)
                || FALLBACK_CHROME.is_match(candidate)
                || candidate.len() < 3
            {
                continue;
            }
            name = candidate.clone();
            break;
        }

        if !name.is_empty() && seen.insert(name.clone()) {
            items.push(CartLineItem {
                item_id: None,
                name,
                price: line.clone(),
                size: String::new(),
                quantity: 1,
            });
        }
    }

    items
}
