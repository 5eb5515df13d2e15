use crate::config::StoreConfig;
use crate::error::{CartError, Result};
use crate::progress::Progress;
use serde_json::{Value, json};
use std::time::Duration;

/// Browser-like user agent; the GraphQL gateway rejects obvious bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Every remote call gets this budget before it counts as a transport
/// failure eligible for the single retry.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay between a transport failure and its one retry.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// A GraphQL (or raw HTTP) response: status plus the decoded body. Bodies
/// that are not valid JSON are kept verbatim as a JSON string so diagnostic
/// snippets survive.
#[derive(Debug, Clone)]
pub struct GqlResponse {
    pub status: u16,
    pub body: Value,
}

impl GqlResponse {
    /// HTTP 401/403 are the session-invalid signals this gateway uses.
    pub fn is_session_expired(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    /// First GraphQL application-level error message. Any non-null `errors`
    /// value counts as a rejection even when no message can be dug out of
    /// it; only an absent or null key means success.
    pub fn error_message(&self) -> Option<String> {
        let errors = self.body.get("errors")?;
        if errors.is_null() {
            return None;
        }
        errors
            .get(0)
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(Some("add failed".to_string()))
    }

    /// Walk a dotted path into the body.
    pub fn path(&self, segments: &[&str]) -> Option<&Value> {
        let mut current = &self.body;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

/// The wire surface the fast backend talks through. Injectable so the
/// worker logic is testable against scripted responses.
pub trait ApiTransport {
    /// Persisted-query GET: operation name, JSON variables and the fixed
    /// sha256 hash standing in for the query text.
    fn gql_get(&self, operation: &str, variables: Value, hash: &str) -> Result<GqlResponse>;

    /// Persisted-query POST with a full request body.
    fn gql_post(&self, body: Value) -> Result<GqlResponse>;

    /// Run the full credential login chain, leaving session cookies behind
    /// in the transport. Verification is the caller's job.
    fn login(&mut self, config: &StoreConfig, progress: &mut dyn Progress) -> Result<()>;
}

/// Retry a transport-level failure exactly once after a fixed short delay.
/// Application-level rejections and session expiry pass straight through.
pub fn with_retry<T>(mut call: impl FnMut() -> Result<T>) -> Result<T> {
    match call() {
        Err(err) if err.is_transient() => {
            log::debug!("transient failure, retrying once: {}", err);
            std::thread::sleep(RETRY_DELAY);
            call()
        }
        other => other,
    }
}

/// Production transport: a blocking reqwest client with a shared cookie
/// jar. Redirects are never followed automatically — the login chain reads
/// each `Location` itself so cookies are captured at every hop.
pub struct HttpGql {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpGql {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(CALL_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CartError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url: config.base_url() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn referer(&self) -> String {
        format!("{}/store/woodmans-food-markets/storefront", self.base_url)
    }

    fn decode(response: reqwest::blocking::Response) -> Result<GqlResponse> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|e| CartError::Transport(format!("failed to read response body: {}", e)))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(GqlResponse { status, body })
    }

    /// Raw GET used by the login chain. Does not follow redirects.
    pub fn http_get(&self, url: &str, headers: &[(&str, &str)]) -> Result<GqlResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .map_err(|e| CartError::Transport(format!("GET {} failed: {}", url, e)))?;
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut decoded = Self::decode(response)?;
        if let Some(location) = location {
            // Surface the redirect target alongside the body.
            if let Value::Object(map) = &mut decoded.body {
                map.insert("__location".into(), Value::String(location));
            } else {
                decoded.body = json!({ "__location": location, "__body": decoded.body });
            }
        }
        Ok(decoded)
    }

    /// Raw form POST used by the login chain.
    pub fn http_post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<GqlResponse> {
        let mut request = self.client.post(url).form(form);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .map_err(|e| CartError::Transport(format!("POST {} failed: {}", url, e)))?;
        Self::decode(response)
    }
}

impl ApiTransport for HttpGql {
    fn gql_get(&self, operation: &str, variables: Value, hash: &str) -> Result<GqlResponse> {
        let extensions = json!({ "persistedQuery": { "version": 1, "sha256Hash": hash } });
        let response = self
            .client
            .get(format!("{}/graphql", self.base_url))
            .query(&[
                ("operationName", operation),
                ("variables", &variables.to_string()),
                ("extensions", &extensions.to_string()),
            ])
            .header("Accept", "application/json")
            .header("Referer", self.referer())
            .send()
            .map_err(|e| CartError::Transport(format!("{} failed: {}", operation, e)))?;
        Self::decode(response)
    }

    fn gql_post(&self, body: Value) -> Result<GqlResponse> {
        let response = self
            .client
            .post(format!("{}/graphql", self.base_url))
            .json(&body)
            .header("Accept", "application/json")
            .header("Referer", self.referer())
            .header("Origin", self.base_url.clone())
            .send()
            .map_err(|e| CartError::Transport(format!("graphql POST failed: {}", e)))?;
        Self::decode(response)
    }

    fn login(&mut self, config: &StoreConfig, progress: &mut dyn Progress) -> Result<()> {
        crate::api::auth::login(self, config, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_session_expiry_signal() {
        let ok = GqlResponse { status: 200, body: json!({"data": {}}) };
        let unauthorized = GqlResponse { status: 401, body: Value::Null };
        let forbidden = GqlResponse { status: 403, body: Value::Null };
        assert!(!ok.is_session_expired());
        assert!(unauthorized.is_session_expired());
        assert!(forbidden.is_session_expired());
    }

    #[test]
    fn test_error_message_extraction() {
        let response = GqlResponse {
            status: 200,
            body: json!({"errors": [{"message": "invalidInput"}]}),
        };
        assert_eq!(response.error_message().as_deref(), Some("invalidInput"));

        let clean = GqlResponse { status: 200, body: json!({"data": {}}) };
        assert_eq!(clean.error_message(), None);
    }

    #[test]
    fn test_errors_key_is_a_rejection_regardless_of_shape() {
        // The gateway has shipped empty arrays and bare strings under
        // "errors"; only a missing or null key means the call succeeded.
        let empty = GqlResponse { status: 200, body: json!({"errors": []}) };
        assert_eq!(empty.error_message().as_deref(), Some("add failed"));

        let opaque = GqlResponse { status: 200, body: json!({"errors": "boom"}) };
        assert_eq!(opaque.error_message().as_deref(), Some("add failed"));

        let messageless = GqlResponse { status: 200, body: json!({"errors": [{}]}) };
        assert_eq!(messageless.error_message().as_deref(), Some("add failed"));

        let null = GqlResponse { status: 200, body: json!({"data": {}, "errors": null}) };
        assert_eq!(null.error_message(), None);
    }

    #[test]
    fn test_with_retry_recovers_from_single_transport_failure() {
        let attempts = Cell::new(0u32);
        let result = with_retry(|| {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                Err(CartError::Transport("connection reset".into()))
            } else {
                Ok(attempts.get())
            }
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_with_retry_gives_up_after_second_failure() {
        let attempts = Cell::new(0u32);
        let result: Result<()> = with_retry(|| {
            attempts.set(attempts.get() + 1);
            Err(CartError::Transport("timeout".into()))
        });
        assert!(matches!(result, Err(CartError::Transport(_))));
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_with_retry_never_retries_rejections() {
        let attempts = Cell::new(0u32);
        let result: Result<()> = with_retry(|| {
            attempts.set(attempts.get() + 1);
            Err(CartError::Rejected("item unavailable".into()))
        });
        assert!(matches!(result, Err(CartError::Rejected(_))));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_path_walks_nested_body() {
        let response = GqlResponse {
            status: 200,
            body: json!({"data": {"shopBasket": {"cartId": "abc-123"}}}),
        };
        assert_eq!(
            response.path(&["data", "shopBasket", "cartId"]).and_then(Value::as_str),
            Some("abc-123")
        );
        assert!(response.path(&["data", "missing"]).is_none());
    }
}
