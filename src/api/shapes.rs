//! The mutation response has carried its cart object under several
//! different paths over time. Rather than chaining optional-field probes at
//! every call site, the known shapes are modeled as a tagged union with an
//! explicit unrecognized fallback that carries a diagnostic snippet.

use crate::error::{CartError, Result};
use serde::Deserialize;
use serde_json::Value;

/// Maximum length of the diagnostic snippet attached to an unrecognized
/// response, enough to diagnose shape drift remotely without dumping the
/// whole body.
const SNIPPET_LIMIT: usize = 800;

/// One raw line of the cart object inside a mutation response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawCartItem {
    #[serde(rename = "itemId", default)]
    pub item_id: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

/// Which known response shape the cart items were recovered from.
#[derive(Debug, Clone, PartialEq)]
pub enum CartShape {
    /// `data.updateCartItems.cart.cartItemCollection.cartItems`
    Collection(Vec<RawCartItem>),
    /// `data.updateCartItems.cart.items`
    Items(Vec<RawCartItem>),
    /// `data.updateCartItems.cart.cartItems`
    Flat(Vec<RawCartItem>),
    /// None of the known paths matched.
    Unrecognized { snippet: String },
}

impl CartShape {
    /// Probe the known paths in historical order.
    pub fn from_response(body: &Value) -> Self {
        let cart = body
            .get("data")
            .and_then(|d| d.get("updateCartItems"))
            .and_then(|u| u.get("cart"));

        let Some(cart) = cart else {
            return Self::unrecognized(body);
        };

        let candidates: [(&[&str], fn(Vec<RawCartItem>) -> CartShape); 3] = [
            (&["cartItemCollection", "cartItems"], CartShape::Collection),
            (&["items"], CartShape::Items),
            (&["cartItems"], CartShape::Flat),
        ];

        for (path, wrap) in candidates {
            let mut node = cart;
            let mut found = true;
            for segment in path {
                match node.get(segment) {
                    Some(next) => node = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if !found {
                continue;
            }
            if let Some(entries) = node.as_array() {
                let items = entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect();
                return wrap(items);
            }
        }

        Self::unrecognized(body)
    }

    fn unrecognized(body: &Value) -> Self {
        let pretty = serde_json::to_string_pretty(body).unwrap_or_else(|_| "(empty)".into());
        let snippet = pretty.chars().take(SNIPPET_LIMIT).collect();
        Self::Unrecognized { snippet }
    }

    /// The recovered items, or a loud error carrying the snippet.
    pub fn into_items(self) -> Result<Vec<RawCartItem>> {
        match self {
            CartShape::Collection(items) | CartShape::Items(items) | CartShape::Flat(items) => {
                Ok(items)
            }
            CartShape::Unrecognized { snippet } => Err(CartError::UnrecognizedShape(snippet)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(cart: Value) -> Value {
        json!({"data": {"updateCartItems": {"cart": cart}}})
    }

    #[test]
    fn test_collection_shape_preferred() {
        let body = wrap(json!({
            "cartItemCollection": {"cartItems": [{"itemId": "items_1-2", "quantity": 3}]},
            "items": [{"itemId": "ignored", "quantity": 1}],
        }));
        let shape = CartShape::from_response(&body);
        let CartShape::Collection(items) = shape else {
            panic!("expected collection shape, got {:?}", shape);
        };
        assert_eq!(items[0].item_id.as_deref(), Some("items_1-2"));
        assert_eq!(items[0].quantity, 3);
    }

    #[test]
    fn test_items_shape_fallback() {
        let body = wrap(json!({"items": [{"itemId": "items_9-9"}]}));
        let items = CartShape::from_response(&body).into_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 1);
    }

    #[test]
    fn test_flat_shape_fallback() {
        let body = wrap(json!({"cartItems": []}));
        assert_eq!(CartShape::from_response(&body), CartShape::Flat(vec![]));
    }

    #[test]
    fn test_unrecognized_carries_snippet() {
        let body = json!({"data": {"somethingElse": true}});
        let shape = CartShape::from_response(&body);
        let CartShape::Unrecognized { snippet } = &shape else {
            panic!("expected unrecognized shape");
        };
        assert!(snippet.contains("somethingElse"));
        assert!(matches!(shape.into_items(), Err(CartError::UnrecognizedShape(_))));
    }

    #[test]
    fn test_snippet_is_bounded() {
        let huge = wrap(json!({"mystery": "x".repeat(5000)}));
        let body = json!({"data": {"updateCartItems": {"noCart": huge}}});
        let CartShape::Unrecognized { snippet } = CartShape::from_response(&body) else {
            panic!("expected unrecognized shape");
        };
        assert!(snippet.len() <= 800);
    }
}
