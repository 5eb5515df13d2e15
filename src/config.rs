use crate::error::{CartError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which store-pickup channel the cart is scoped to. Changing the mode
/// changes the active cart identifier on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentMode {
    #[default]
    #[serde(alias = "in-store")]
    Instore,
    Pickup,
}

impl FulfillmentMode {
    /// Human label as it appears on the storefront's mode buttons.
    pub fn label(&self) -> &'static str {
        match self {
            FulfillmentMode::Instore => "In-Store",
            FulfillmentMode::Pickup => "Pickup",
        }
    }

    /// Cart type the GraphQL mutations expect for this mode.
    pub fn cart_type(&self) -> &'static str {
        match self {
            FulfillmentMode::Instore => "list",
            FulfillmentMode::Pickup => "grocery",
        }
    }

    /// Parse a storefront mode label ("Pickup", "In-Store", ...).
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.trim().to_lowercase();
        if lower.starts_with("pickup") {
            Some(FulfillmentMode::Pickup)
        } else if lower.starts_with("in-store") || lower.starts_with("instore") {
            Some(FulfillmentMode::Instore)
        } else {
            None
        }
    }
}

impl std::fmt::Display for FulfillmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

fn default_store_url() -> String {
    "https://shopwoodmans.com".to_string()
}

fn default_zip_code() -> String {
    "53177".to_string()
}

/// Credential source and store identity, loaded before any session
/// acquisition. The JSON field names match the desktop app's settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_store_url")]
    pub store_url: String,

    #[serde(default = "default_zip_code")]
    pub zip_code: String,

    #[serde(default)]
    pub shopping_mode: FulfillmentMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            store_url: default_store_url(),
            zip_code: default_zip_code(),
            shopping_mode: FulfillmentMode::default(),
        }
    }
}

impl StoreConfig {
    /// Load from a JSON settings file, then apply environment overrides
    /// (`CARTBOT_USERNAME`, `CARTBOT_PASSWORD`, `CARTBOT_STORE_URL`).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CartError::Transport(format!("failed to read {}: {}", path.display(), e)))?;
        let mut config: StoreConfig = serde_json::from_str(&raw)
            .map_err(|e| CartError::Transport(format!("invalid settings file {}: {}", path.display(), e)))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over the settings file so
    /// credentials can be kept out of it entirely.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("CARTBOT_USERNAME") {
            self.username = user;
        }
        if let Ok(pass) = std::env::var("CARTBOT_PASSWORD") {
            self.password = pass;
        }
        if let Ok(url) = std::env::var("CARTBOT_STORE_URL") {
            self.store_url = url;
        }
    }

    /// Store URL with any trailing slashes removed.
    pub fn base_url(&self) -> String {
        self.store_url.trim_end_matches('/').to_string()
    }

    /// Fails with [`CartError::MissingCredentials`] unless both a username
    /// and a password are configured.
    pub fn require_credentials(&self) -> Result<()> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(CartError::MissingCredentials);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_labels_round_trip() {
        assert_eq!(FulfillmentMode::from_label("Pickup"), Some(FulfillmentMode::Pickup));
        assert_eq!(FulfillmentMode::from_label("In-Store"), Some(FulfillmentMode::Instore));
        assert_eq!(FulfillmentMode::from_label("pickup order"), Some(FulfillmentMode::Pickup));
        assert_eq!(FulfillmentMode::from_label("Delivery"), None);
    }

    #[test]
    fn test_cart_type_per_mode() {
        assert_eq!(FulfillmentMode::Pickup.cart_type(), "grocery");
        assert_eq!(FulfillmentMode::Instore.cart_type(), "list");
    }

    #[test]
    fn test_config_defaults() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.store_url, "https://shopwoodmans.com");
        assert_eq!(config.zip_code, "53177");
        assert_eq!(config.shopping_mode, FulfillmentMode::Instore);
    }

    #[test]
    fn test_config_camel_case_fields() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"username":"a@b.com","password":"pw","storeUrl":"https://example.com/","shoppingMode":"pickup"}"#,
        )
        .unwrap();
        assert_eq!(config.username, "a@b.com");
        assert_eq!(config.base_url(), "https://example.com");
        assert_eq!(config.shopping_mode, FulfillmentMode::Pickup);
    }

    #[test]
    fn test_require_credentials() {
        let mut config = StoreConfig::default();
        assert!(matches!(config.require_credentials(), Err(CartError::MissingCredentials)));
        config.username = "a@b.com".into();
        config.password = "pw".into();
        assert!(config.require_credentials().is_ok());
    }
}
