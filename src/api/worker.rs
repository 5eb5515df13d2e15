//! The "fast" strategy: every operation is a direct GraphQL call carrying a
//! captured persisted-query hash. No browser involved.

use crate::api::client::{ApiTransport, GqlResponse, with_retry};
use crate::api::queries::{
    OP_ACTIVE_CART_ID, OP_ITEMS, OP_SEARCH, OP_UPDATE_CART_ITEMS, OP_VISIT_SHOP, PersistedQueries,
    ShopIds,
};
use crate::api::shapes::CartShape;
use crate::backend::{CartBackend, ProductHit};
use crate::cancel::CancelToken;
use crate::config::{FulfillmentMode, StoreConfig};
use crate::error::{CartError, Result};
use crate::model::{CartLineItem, DesiredItem, ResolvedMatch};
use crate::progress::Progress;
use crate::session::SessionStore;
use indexmap::IndexSet;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Items processed per concurrent resolution chunk; bounds the load we put
/// on the search endpoint.
const RESOLVE_CHUNK: usize = 5;

/// Candidate ids considered per search.
const SEARCH_LIMIT: usize = 12;

/// Sentinel item id for the structurally no-op mutation used to read the
/// cart back (no direct read query exists; an empty update list has been
/// rejected as invalid input by the gateway).
const SENTINEL_ITEM_ID: &str = "0";

static ITEM_ID_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"items_\d+-\d+").unwrap());
static DOLLAR_AMOUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$[\d.]+").unwrap());

/// Authenticated fast-path session: the cookie jar lives in the transport;
/// this carries the mode-scoped identifiers alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSession {
    pub cart_id: String,
    pub shop_id: String,
    pub mode: FulfillmentMode,
}

/// Name/price/size recovered from an `Items` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDetail {
    pub name: String,
    pub price: String,
    pub size: String,
}

/// Recover catalog ids from a serialized response by shape alone. The
/// search response schema is not stable enough to address structurally, but
/// item ids always look like `items_<shop>-<product>`.
pub fn scan_item_ids(raw: &str, limit: usize) -> Vec<String> {
    let mut ids: IndexSet<String> = IndexSet::new();
    for found in ITEM_ID_TOKEN.find_iter(raw) {
        ids.insert(found.as_str().to_string());
        if ids.len() >= limit {
            break;
        }
    }
    ids.into_iter().collect()
}

/// Map an `Items` response array to per-id details. Price prefers the
/// structured pricing text; failing that, the first dollar-shaped token
/// anywhere in the serialized item.
pub fn parse_item_details(items: &[Value]) -> HashMap<String, ItemDetail> {
    let mut map = HashMap::new();
    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            continue;
        };
        let structured_price = item
            .get("viewSection")
            .and_then(|v| v.get("pricing"))
            .and_then(|v| v.get("price"))
            .and_then(|v| v.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let price = if structured_price.is_empty() {
            let serialized = item.to_string();
            DOLLAR_AMOUNT
                .find(&serialized)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        } else {
            structured_price.to_string()
        };
        map.insert(
            id.to_string(),
            ItemDetail {
                name: item.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                price,
                size: item.get("size").and_then(Value::as_str).unwrap_or("").to_string(),
            },
        );
    }
    map
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub struct ApiBackend<T: ApiTransport> {
    transport: T,
    config: StoreConfig,
    queries: PersistedQueries,
    shops: ShopIds,
    store: SessionStore<ApiSession>,
}

impl<T: ApiTransport + Sync> ApiBackend<T> {
    pub fn with_transport(transport: T, config: StoreConfig) -> Self {
        Self {
            transport,
            config,
            queries: PersistedQueries::default(),
            shops: ShopIds::default(),
            store: SessionStore::new(),
        }
    }

    /// Override the captured persisted-query hashes and shop identifiers.
    pub fn with_queries(mut self, queries: PersistedQueries, shops: ShopIds) -> Self {
        self.queries = queries;
        self.shops = shops;
        self
    }

    fn session(&self) -> Result<&ApiSession> {
        self.store.get().ok_or(CartError::SessionExpired)
    }

    fn active_cart_id(&self, shop_id: &str) -> Result<GqlResponse> {
        self.transport.gql_get(
            OP_ACTIVE_CART_ID,
            json!({ "addressId": null, "shopId": shop_id }),
            &self.queries.active_cart_id,
        )
    }

    /// Acquire a session: probe the cached one with a cheap read, discard it
    /// on an expiry signal, and only then run the full login chain. Mode
    /// mismatch alone never triggers re-authentication here — switching is
    /// an explicit, separate step.
    fn acquire(&mut self, progress: &mut dyn Progress) -> Result<()> {
        if let Some(session) = self.store.get() {
            let shop_id = session.shop_id.clone();
            match self.active_cart_id(&shop_id) {
                Ok(probe) if !probe.is_session_expired() && probe.path(&["data"]).is_some() => {
                    progress.log("Reusing existing fast session");
                    return Ok(());
                }
                Ok(_) => progress.log("Fast session expired, creating new one..."),
                Err(err) => {
                    log::debug!("session probe failed: {}", err);
                    progress.log("Fast session expired, creating new one...");
                }
            }
            self.store.invalidate();
        }

        self.config.require_credentials()?;
        self.transport.login(&self.config, progress)?;

        // Verify with one authenticated read; no cart id means the login
        // chain completed without actually establishing a session.
        progress.log("Verifying session...");
        let mode = self.config.shopping_mode;
        let shop_id = self.shops.for_mode(mode).to_string();
        let verify = self.active_cart_id(&shop_id)?;
        if verify.is_session_expired() {
            return Err(CartError::Verification("store did not accept the new session".into()));
        }
        let cart_id = verify
            .path(&["data", "shopBasket", "cartId"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                CartError::Verification("could not retrieve a cart id after login".into())
            })?;

        progress.log(&format!("Fast session ready (cart: {}...)", truncate_id(&cart_id)));
        self.store.replace(ApiSession { cart_id, shop_id, mode });
        Ok(())
    }

    fn search_variables(&self, query: &str, shop_id: &str, first: usize, tag: usize) -> Value {
        json!({
            "filters": [], "action": null, "query": query,
            "pageViewId": format!("fast-{}-{}", now_millis(), tag),
            "retailerInventorySessionToken": "",
            "elevatedProductId": null, "searchSource": "search",
            "disableReformulation": false, "disableLlm": false, "forceInspiration": false,
            "orderBy": "bestMatch", "clusterId": null, "includeDebugInfo": false,
            "clusteringStrategy": null,
            "contentManagementSearchParams": { "itemGridColumnCount": 5 },
            "shopId": shop_id, "postalCode": self.config.zip_code,
            "zoneId": self.shops.zone_id, "first": first,
        })
    }

    /// Search once and return candidate item ids in ranking order.
    fn search_ids(&self, query: &str, shop_id: &str, first: usize, tag: usize) -> Result<Vec<String>> {
        let response = with_retry(|| {
            self.transport.gql_get(
                OP_SEARCH,
                self.search_variables(query, shop_id, first, tag),
                &self.queries.search_results_placements,
            )
        })?;
        if response.is_session_expired() {
            return Err(CartError::SessionExpired);
        }
        Ok(scan_item_ids(&response.body.to_string(), first))
    }

    /// Fetch details for a set of item ids; failures degrade to an empty
    /// map rather than aborting the caller.
    fn item_details(&self, ids: &[String], shop_id: &str) -> HashMap<String, ItemDetail> {
        if ids.is_empty() {
            return HashMap::new();
        }
        let result = with_retry(|| {
            self.transport.gql_get(
                OP_ITEMS,
                json!({
                    "ids": ids, "shopId": shop_id,
                    "zoneId": self.shops.zone_id, "postalCode": self.config.zip_code,
                }),
                &self.queries.items,
            )
        });
        match result {
            Ok(response) if !response.is_session_expired() => response
                .path(&["data", "items"])
                .and_then(Value::as_array)
                .map(|items| parse_item_details(items))
                .unwrap_or_default(),
            _ => HashMap::new(),
        }
    }

    fn update_cart_body(&self, session: &ApiSession, updates: Value) -> Value {
        json!({
            "operationName": OP_UPDATE_CART_ITEMS,
            "variables": {
                "cartItemUpdates": updates,
                "cartType": session.mode.cart_type(),
                "requestTimestamp": now_millis(),
                "cartId": session.cart_id,
            },
            "extensions": { "persistedQuery": { "version": 1, "sha256Hash": self.queries.update_cart_items } },
        })
    }

    fn quantity_update(item_id: &str, quantity: u32) -> Value {
        json!([{ "itemId": item_id, "quantity": quantity, "quantityType": "each", "trackingParams": {} }])
    }

    /// No-op mutation whose response is the only way to read the full cart.
    fn fetch_raw_cart(&mut self) -> Result<Vec<crate::api::shapes::RawCartItem>> {
        let session = self.session()?.clone();
        let body = self.update_cart_body(&session, Self::quantity_update(SENTINEL_ITEM_ID, 0));
        let response = with_retry(|| self.transport.gql_post(body.clone()))?;
        if response.is_session_expired() {
            self.store.invalidate();
            return Err(CartError::SessionExpired);
        }
        if let Some(message) = response.error_message() {
            return Err(CartError::Rejected(message));
        }
        CartShape::from_response(&response.body).into_items()
    }

    fn line_items_from_raw(
        &self,
        raw: &[crate::api::shapes::RawCartItem],
        shop_id: &str,
        progress: &mut dyn Progress,
    ) -> Vec<CartLineItem> {
        let ids: Vec<String> = raw.iter().filter_map(|item| item.item_id.clone()).collect();
        if !ids.is_empty() {
            progress.log(&format!("Fetching details for {} cart item(s)...", ids.len()));
        }
        let details = self.item_details(&ids, shop_id);
        raw.iter()
            .filter_map(|item| {
                let id = item.item_id.as_deref()?;
                let detail = details.get(id).cloned().unwrap_or_default();
                Some(CartLineItem {
                    item_id: Some(id.to_string()),
                    name: if detail.name.is_empty() { id.to_string() } else { detail.name },
                    price: detail.price,
                    size: detail.size,
                    quantity: item.quantity,
                })
            })
            .collect()
    }
}

impl<T: ApiTransport + Sync> CartBackend for ApiBackend<T> {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn ensure_session(&mut self, progress: &mut dyn Progress) -> Result<()> {
        self.acquire(progress)
    }

    fn ensure_mode(&mut self, mode: FulfillmentMode, progress: &mut dyn Progress) -> Result<()> {
        let desired_shop = self.shops.for_mode(mode).to_string();
        {
            let session = self.session()?;
            if session.mode == mode && session.shop_id == desired_shop {
                return Ok(());
            }
        }

        progress.log(&format!("Switching to {} mode...", mode.label()));
        let response = with_retry(|| {
            self.transport.gql_post(json!({
                "operationName": OP_VISIT_SHOP,
                "variables": { "shopId": desired_shop },
                "extensions": { "persistedQuery": { "version": 1, "sha256Hash": self.queries.visit_shop } },
            }))
        })?;
        if response.is_session_expired() {
            self.store.invalidate();
            return Err(CartError::SessionExpired);
        }

        // Cart identifiers are mode-scoped; re-fetch for the new shop and
        // mutate the cached session in place.
        let cart_response = self.active_cart_id(&desired_shop)?;
        if cart_response.is_session_expired() {
            self.store.invalidate();
            return Err(CartError::SessionExpired);
        }
        let new_cart_id = cart_response
            .path(&["data", "shopBasket", "cartId"])
            .and_then(Value::as_str)
            .map(str::to_string);

        let session = self.store.get_mut().ok_or(CartError::SessionExpired)?;
        if let Some(cart_id) = new_cart_id {
            session.cart_id = cart_id;
        }
        session.shop_id = desired_shop;
        session.mode = mode;
        progress.log(&format!("Switched to {} mode", mode.label()));
        Ok(())
    }

    fn resolve_batch(
        &mut self,
        items: &[DesiredItem],
        cancel: &CancelToken,
        progress: &mut dyn Progress,
    ) -> Vec<ResolvedMatch> {
        let Ok(session) = self.session() else {
            return items
                .iter()
                .map(|item| ResolvedMatch::failed(item.clone(), CartError::SessionExpired.to_string()))
                .collect();
        };
        let shop_id = session.shop_id.clone();

        progress.log("Searching for all items...");
        let total = items.len();
        let mut resolutions: Vec<Result<Option<String>>> = Vec::with_capacity(total);

        for (chunk_index, chunk) in items.chunks(RESOLVE_CHUNK).enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            for (offset, item) in chunk.iter().enumerate() {
                let position = chunk_index * RESOLVE_CHUNK + offset;
                progress.log(&format!(
                    "Searching: {} ({}/{})",
                    item.display_label(),
                    position + 1,
                    total
                ));
            }

            // Bounded fan-out: one scoped thread per item in the chunk, all
            // awaited before the next chunk starts.
            let backend = &*self;
            let chunk_results: Vec<Result<Option<String>>> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .enumerate()
                    .map(|(offset, item)| {
                        let shop_id = shop_id.as_str();
                        let tag = chunk_index * RESOLVE_CHUNK + offset;
                        scope.spawn(move || {
                            backend
                                .search_ids(item.search_term(), shop_id, 4, tag)
                                .map(|ids| ids.into_iter().next())
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(CartError::Transport("search worker panicked".into()))
                        })
                    })
                    .collect()
            });
            resolutions.extend(chunk_results);
        }

        if resolutions.iter().any(|r| matches!(r, Err(CartError::SessionExpired))) {
            self.store.invalidate();
        }

        // One details fetch for everything found, then stitch matches back
        // together in input order.
        let found: Vec<String> =
            resolutions.iter().filter_map(|r| r.as_ref().ok().and_then(|id| id.clone())).collect();
        if !found.is_empty() {
            progress.log("Fetching product details...");
        }
        let details = self.item_details(&found, &shop_id);

        items
            .iter()
            .zip(resolutions)
            .map(|(item, resolution)| match resolution {
                Ok(Some(id)) => {
                    let detail = details.get(&id).cloned().unwrap_or_default();
                    ResolvedMatch {
                        name: if detail.name.is_empty() {
                            item.search_term().to_string()
                        } else {
                            detail.name
                        },
                        price: detail.price,
                        size: detail.size,
                        item_id: Some(id),
                        source: item.clone(),
                        error: None,
                    }
                }
                Ok(None) => ResolvedMatch::not_found(item.clone()),
                Err(err) => ResolvedMatch::failed(item.clone(), err.to_string()),
            })
            .collect()
    }

    fn apply_add(&mut self, matched: &ResolvedMatch, _progress: &mut dyn Progress) -> Result<()> {
        let item_id = matched
            .item_id
            .as_deref()
            .ok_or_else(|| CartError::Rejected("no search results".into()))?;
        let session = self.session()?.clone();
        let body = self.update_cart_body(
            &session,
            Self::quantity_update(item_id, matched.source.quantity),
        );

        let response = with_retry(|| self.transport.gql_post(body.clone()))?;
        if response.is_session_expired() {
            self.store.invalidate();
            return Err(CartError::SessionExpired);
        }
        if let Some(message) = response.error_message() {
            return Err(CartError::Rejected(message));
        }
        Ok(())
    }

    fn read_cart(&mut self, progress: &mut dyn Progress) -> Result<Vec<CartLineItem>> {
        progress.log("Fetching cart via GraphQL...");
        let raw = self.fetch_raw_cart()?;
        if raw.is_empty() {
            progress.log("Cart is empty.");
            return Ok(Vec::new());
        }
        let shop_id = self.session()?.shop_id.clone();
        let items = self.line_items_from_raw(&raw, &shop_id, progress);
        progress.log(&format!("Found {} item(s) in cart.", items.len()));
        Ok(items)
    }

    fn clear_cart(&mut self, progress: &mut dyn Progress) -> Result<usize> {
        progress.log("Fetching cart contents for removal...");
        let raw = self.fetch_raw_cart()?;
        if raw.is_empty() {
            progress.log("Cart is already empty.");
            return Ok(0);
        }

        progress.log(&format!("Removing {} item(s) from cart...", raw.len()));
        let session = self.session()?.clone();
        let updates: Vec<Value> = raw
            .iter()
            .filter_map(|item| item.item_id.as_deref())
            .map(|id| {
                json!({ "itemId": id, "quantity": 0, "quantityType": "each", "trackingParams": {} })
            })
            .collect();
        let body = self.update_cart_body(&session, Value::Array(updates));
        let response = with_retry(|| self.transport.gql_post(body.clone()))?;
        if response.is_session_expired() {
            self.store.invalidate();
            return Err(CartError::SessionExpired);
        }

        // Verify; remove stragglers one at a time, best-effort.
        let remaining = CartShape::from_response(&response.body).into_items().unwrap_or_default();
        if !remaining.is_empty() {
            progress.log(&format!(
                "{} item(s) remain, removing individually...",
                remaining.len()
            ));
            for item in &remaining {
                let Some(id) = item.item_id.as_deref() else { continue };
                let body = self.update_cart_body(&session, Self::quantity_update(id, 0));
                if let Err(err) = with_retry(|| self.transport.gql_post(body.clone())) {
                    log::debug!("straggler removal failed for {}: {}", id, err);
                }
            }
        }

        progress.log(&format!("Removed {} item(s) from cart.", raw.len()));
        Ok(raw.len())
    }

    fn search_products(&mut self, query: &str, progress: &mut dyn Progress) -> Result<Vec<ProductHit>> {
        let session = self.session()?;
        let shop_id = session.shop_id.clone();
        progress.log(&format!("Searching for \"{}\"...", query));

        let ids = match self.search_ids(query, &shop_id, SEARCH_LIMIT, 0) {
            Ok(ids) => ids,
            Err(CartError::SessionExpired) => {
                self.store.invalidate();
                return Err(CartError::SessionExpired);
            }
            Err(err) => return Err(err),
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let details = self.item_details(&ids, &shop_id);
        Ok(ids
            .iter()
            .filter_map(|id| details.get(id))
            .map(|detail| ProductHit {
                name: detail.name.clone(),
                price: detail.price.clone(),
                size: detail.size.clone(),
            })
            .collect())
    }
}

fn truncate_id(id: &str) -> &str {
    // Byte 8 may fall inside a multi-byte char; keep the whole id then.
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport that replays a script of responses and records every call.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<GqlResponse>>>,
        calls: Mutex<Vec<String>>,
        logins: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<GqlResponse>>) -> Self {
            Self {
                responses: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                logins: AtomicU32::new(0),
            }
        }

        fn next(&self, call: String) -> Result<GqlResponse> {
            self.calls.lock().unwrap().push(call);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CartError::Transport("script exhausted".into())))
        }

        fn call_log(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ApiTransport for ScriptedTransport {
        fn gql_get(&self, operation: &str, _variables: Value, _hash: &str) -> Result<GqlResponse> {
            self.next(format!("GET {}", operation))
        }

        fn gql_post(&self, body: Value) -> Result<GqlResponse> {
            let operation = body
                .get("operationName")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            self.next(format!("POST {}", operation))
        }

        fn login(&mut self, _config: &StoreConfig, _progress: &mut dyn Progress) -> Result<()> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ok(body: Value) -> Result<GqlResponse> {
        Ok(GqlResponse { status: 200, body })
    }

    fn unauthorized() -> Result<GqlResponse> {
        Ok(GqlResponse { status: 401, body: Value::Null })
    }

    fn cart_id_body(id: &str) -> Value {
        json!({"data": {"shopBasket": {"cartId": id}}})
    }

    fn configured() -> StoreConfig {
        StoreConfig {
            username: "a@b.com".into(),
            password: "pw".into(),
            ..StoreConfig::default()
        }
    }

    fn session(mode: FulfillmentMode) -> ApiSession {
        ApiSession {
            cart_id: "cart-1".into(),
            shop_id: ShopIds::default().for_mode(mode).to_string(),
            mode,
        }
    }

    fn backend(script: Vec<Result<GqlResponse>>) -> ApiBackend<ScriptedTransport> {
        ApiBackend::with_transport(ScriptedTransport::new(script), configured())
    }

    #[test]
    fn test_scan_item_ids_dedups_in_order() {
        let raw = r#"{"a": "items_755261-111", "b": ["items_755261-222", "items_755261-111"]}"#;
        assert_eq!(scan_item_ids(raw, 12), vec!["items_755261-111", "items_755261-222"]);
        assert_eq!(scan_item_ids(raw, 1), vec!["items_755261-111"]);
        assert!(scan_item_ids("nothing here", 12).is_empty());
    }

    #[test]
    fn test_truncate_id_respects_char_boundaries() {
        assert_eq!(truncate_id("items_755261-111"), "items_75");
        assert_eq!(truncate_id("short"), "short");
        // Byte 8 lands inside a two-byte char; the id comes back whole.
        assert_eq!(truncate_id("aaaééééé-cart"), "aaaééééé-cart");
    }

    #[test]
    fn test_parse_item_details_prefers_structured_price() {
        let items = vec![
            json!({"id": "items_1-1", "name": "Milk", "size": "1 gal",
                   "viewSection": {"pricing": {"price": {"text": "$3.49"}}}}),
            json!({"id": "items_1-2", "name": "Eggs", "priceHint": "$2.99 each"}),
            json!({"name": "no id, skipped"}),
        ];
        let details = parse_item_details(&items);
        assert_eq!(details.len(), 2);
        assert_eq!(details["items_1-1"].price, "$3.49");
        assert_eq!(details["items_1-2"].price, "$2.99");
        assert_eq!(details["items_1-1"].size, "1 gal");
    }

    #[test]
    fn test_expired_probe_triggers_exactly_one_login() {
        // Probe fails with 401, then the post-login verify succeeds.
        let mut backend = backend(vec![unauthorized(), ok(cart_id_body("fresh-cart"))]);
        backend.store.replace(session(FulfillmentMode::Instore));

        backend.ensure_session(&mut NullProgress).unwrap();

        assert_eq!(backend.transport.logins.load(Ordering::SeqCst), 1);
        assert_eq!(backend.session().unwrap().cart_id, "fresh-cart");
        assert_eq!(
            backend.transport.call_log(),
            vec!["GET ActiveCartId", "GET ActiveCartId"]
        );
    }

    #[test]
    fn test_valid_probe_skips_login() {
        let mut backend = backend(vec![ok(cart_id_body("cart-1"))]);
        backend.store.replace(session(FulfillmentMode::Instore));

        backend.ensure_session(&mut NullProgress).unwrap();
        assert_eq!(backend.transport.logins.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_credentials_is_fatal_before_login() {
        let transport = ScriptedTransport::new(vec![]);
        let mut backend = ApiBackend::with_transport(transport, StoreConfig::default());
        let result = backend.ensure_session(&mut NullProgress);
        assert!(matches!(result, Err(CartError::MissingCredentials)));
    }

    #[test]
    fn test_login_without_cart_id_is_verification_error() {
        let mut backend = backend(vec![ok(json!({"data": {"shopBasket": {}}}))]);
        let result = backend.ensure_session(&mut NullProgress);
        assert!(matches!(result, Err(CartError::Verification(_))));
        assert!(backend.store.is_empty());
    }

    #[test]
    fn test_mode_noop_makes_zero_remote_calls() {
        let mut backend = backend(vec![]);
        backend.store.replace(session(FulfillmentMode::Pickup));

        backend.ensure_mode(FulfillmentMode::Pickup, &mut NullProgress).unwrap();
        assert!(backend.transport.call_log().is_empty());
    }

    #[test]
    fn test_mode_switch_refetches_cart_id() {
        let mut backend = backend(vec![ok(json!({"data": {}})), ok(cart_id_body("pickup-cart"))]);
        backend.store.replace(session(FulfillmentMode::Instore));

        backend.ensure_mode(FulfillmentMode::Pickup, &mut NullProgress).unwrap();

        let session = backend.session().unwrap();
        assert_eq!(session.mode, FulfillmentMode::Pickup);
        assert_eq!(session.cart_id, "pickup-cart");
        assert_eq!(session.shop_id, ShopIds::default().pickup);
        assert_eq!(backend.transport.call_log(), vec!["POST VisitShop", "GET ActiveCartId"]);
    }

    #[test]
    fn test_resolve_zero_candidates_is_not_found_not_error() {
        let mut backend = backend(vec![ok(json!({"data": {"search": []}}))]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let items = vec![DesiredItem::new(1, "Unobtanium")];
        let matches = backend.resolve_batch(&items, &CancelToken::new(), &mut NullProgress);

        assert_eq!(matches.len(), 1);
        assert!(matches[0].item_id.is_none());
        assert!(matches[0].error.is_none());
    }

    #[test]
    fn test_resolve_transport_failure_populates_error() {
        // with_retry burns two script entries for the doomed search.
        let mut backend = backend(vec![
            Err(CartError::Transport("timeout".into())),
            Err(CartError::Transport("timeout".into())),
        ]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let items = vec![DesiredItem::new(1, "Milk")];
        let matches = backend.resolve_batch(&items, &CancelToken::new(), &mut NullProgress);

        assert!(matches[0].item_id.is_none());
        assert!(matches[0].error.as_deref().unwrap().contains("timeout"));
    }

    #[test]
    fn test_resolve_enriches_from_details() {
        let search_body = json!({"results": ["items_755261-42"]});
        let details_body = json!({"data": {"items": [
            {"id": "items_755261-42", "name": "Whole Milk", "size": "1 gal",
             "viewSection": {"pricing": {"price": {"text": "$3.49"}}}}
        ]}});
        let mut backend = backend(vec![ok(search_body), ok(details_body)]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let items = vec![DesiredItem::new(1, "Milk")];
        let matches = backend.resolve_batch(&items, &CancelToken::new(), &mut NullProgress);

        assert_eq!(matches[0].item_id.as_deref(), Some("items_755261-42"));
        assert_eq!(matches[0].name, "Whole Milk");
        assert_eq!(matches[0].price, "$3.49");
    }

    #[test]
    fn test_cancelled_resolution_returns_prefix() {
        let token = CancelToken::new();
        token.cancel();
        let mut backend = backend(vec![]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let items: Vec<DesiredItem> =
            (0..7u64).map(|i| DesiredItem::new(i, format!("item-{i}"))).collect();
        let matches = backend.resolve_batch(&items, &token, &mut NullProgress);
        assert!(matches.is_empty());
        assert!(backend.transport.call_log().is_empty());
    }

    #[test]
    fn test_add_retries_transport_failure_once() {
        let mut backend = backend(vec![
            Err(CartError::Transport("reset".into())),
            ok(json!({"data": {"updateCartItems": {"cart": {"items": []}}}})),
        ]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let matched = ResolvedMatch {
            item_id: Some("items_755261-42".into()),
            name: "Milk".into(),
            price: String::new(),
            size: String::new(),
            source: DesiredItem::new(1, "Milk"),
            error: None,
        };
        backend.apply_add(&matched, &mut NullProgress).unwrap();
        assert_eq!(
            backend.transport.call_log(),
            vec!["POST UpdateCartItemsMutation", "POST UpdateCartItemsMutation"]
        );
    }

    #[test]
    fn test_add_two_transport_failures_is_terminal() {
        let mut backend = backend(vec![
            Err(CartError::Transport("reset".into())),
            Err(CartError::Transport("reset".into())),
        ]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let matched = ResolvedMatch {
            item_id: Some("items_755261-42".into()),
            name: "Milk".into(),
            price: String::new(),
            size: String::new(),
            source: DesiredItem::new(1, "Milk"),
            error: None,
        };
        let result = backend.apply_add(&matched, &mut NullProgress);
        assert!(matches!(result, Err(CartError::Transport(_))));
    }

    #[test]
    fn test_add_rejection_surfaces_remote_message() {
        let mut backend = backend(vec![ok(json!({"errors": [{"message": "invalidInput"}]}))]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let matched = ResolvedMatch {
            item_id: Some("items_755261-42".into()),
            name: "Milk".into(),
            price: String::new(),
            size: String::new(),
            source: DesiredItem::new(1, "Milk"),
            error: None,
        };
        match backend.apply_add(&matched, &mut NullProgress) {
            Err(CartError::Rejected(message)) => assert_eq!(message, "invalidInput"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_add_session_expiry_invalidates_store() {
        let mut backend = backend(vec![unauthorized()]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let matched = ResolvedMatch {
            item_id: Some("items_755261-42".into()),
            name: "Milk".into(),
            price: String::new(),
            size: String::new(),
            source: DesiredItem::new(1, "Milk"),
            error: None,
        };
        let result = backend.apply_add(&matched, &mut NullProgress);
        assert!(matches!(result, Err(CartError::SessionExpired)));
        assert!(backend.store.is_empty());
    }

    #[test]
    fn test_read_cart_uses_noop_mutation_and_enriches() {
        let mutation_body = json!({"data": {"updateCartItems": {"cart": {
            "cartItemCollection": {"cartItems": [
                {"itemId": "items_755261-42", "quantity": 2},
                {"itemId": "items_755261-43", "quantity": 1},
            ]}
        }}}});
        let details_body = json!({"data": {"items": [
            {"id": "items_755261-42", "name": "Whole Milk", "size": "1 gal",
             "viewSection": {"pricing": {"price": {"text": "$3.49"}}}},
        ]}});
        let mut backend = backend(vec![ok(mutation_body), ok(details_body)]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let cart = backend.read_cart(&mut NullProgress).unwrap();
        assert_eq!(cart.len(), 2);
        assert_eq!(cart[0].name, "Whole Milk");
        assert_eq!(cart[0].quantity, 2);
        // Unenriched lines fall back to the raw id as the name.
        assert_eq!(cart[1].name, "items_755261-43");
    }

    #[test]
    fn test_read_cart_unrecognized_shape_fails_loudly() {
        let mut backend = backend(vec![ok(json!({"data": {"unexpected": true}}))]);
        backend.store.replace(session(FulfillmentMode::Instore));

        let result = backend.read_cart(&mut NullProgress);
        assert!(matches!(result, Err(CartError::UnrecognizedShape(_))));
    }

    #[test]
    fn test_clear_cart_empty_short_circuits() {
        let mutation_body = json!({"data": {"updateCartItems": {"cart": {"items": []}}}});
        let mut backend = backend(vec![ok(mutation_body)]);
        backend.store.replace(session(FulfillmentMode::Instore));

        assert_eq!(backend.clear_cart(&mut NullProgress).unwrap(), 0);
        assert_eq!(backend.transport.call_log().len(), 1);
    }

    #[test]
    fn test_clear_cart_batch_then_verify() {
        let full = json!({"data": {"updateCartItems": {"cart": {"items": [
            {"itemId": "items_1-1", "quantity": 2},
            {"itemId": "items_1-2", "quantity": 1},
        ]}}}});
        let emptied = json!({"data": {"updateCartItems": {"cart": {"items": []}}}});
        let mut backend = backend(vec![ok(full), ok(emptied)]);
        backend.store.replace(session(FulfillmentMode::Instore));

        assert_eq!(backend.clear_cart(&mut NullProgress).unwrap(), 2);
        assert_eq!(
            backend.transport.call_log(),
            vec!["POST UpdateCartItemsMutation", "POST UpdateCartItemsMutation"]
        );
    }
}
