use crate::error::{CartError, Result};
use headless_chrome::{Browser, Tab};
use serde::de::DeserializeOwned;
use std::{ffi::OsStr, sync::Arc, time::Duration};

/// Options for launching the storefront browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub chrome_path: Option<std::path::PathBuf>,
    /// Profile directory; a persistent one keeps session cookies across
    /// launches. `None` lets Chrome create a throwaway profile.
    pub user_data_dir: Option<std::path::PathBuf>,
    pub sandbox: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1440,
            window_height: 900,
            chrome_path: None,
            user_data_dir: None,
            sandbox: true,
        }
    }
}

impl LaunchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    pub fn user_data_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.user_data_dir = Some(dir.into());
        self
    }
}

/// Browser session that manages a Chrome/Chromium instance pointed at the
/// storefront. One tab is used for the whole run.
pub struct BrowserSession {
    browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    /// Launch a new browser instance with the given options.
    pub fn launch(options: LaunchOptions) -> Result<Self> {
        let mut launch_opts = headless_chrome::LaunchOptions::default();

        // Ignore default arguments to prevent detection by anti-bot services
        launch_opts.ignore_default_args.push(OsStr::new("--enable-automation"));
        launch_opts.args.push(OsStr::new("--disable-blink-features=AutomationControlled"));

        // Set the browser's idle timeout to 1 hour (default is 30 seconds) to
        // prevent the session from closing between operations of a long run
        launch_opts.idle_browser_timeout = Duration::from_secs(60 * 60);

        launch_opts.headless = options.headless;
        launch_opts.window_size = Some((options.window_width, options.window_height));
        launch_opts.sandbox = options.sandbox;

        if let Some(path) = options.chrome_path {
            launch_opts.path = Some(path);
        }
        if let Some(dir) = options.user_data_dir {
            launch_opts.user_data_dir = Some(dir);
        }

        let browser =
            Browser::new(launch_opts).map_err(|e| CartError::Browser(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| CartError::Browser(format!("Failed to create tab: {}", e)))?;

        Ok(Self { browser, tab })
    }

    /// Launch a browser with default options.
    pub fn new() -> Result<Self> {
        Self::launch(LaunchOptions::default())
    }

    /// The tab every operation runs in.
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    /// Get the underlying Browser instance.
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Navigate the working tab and wait for the load to settle.
    pub fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| CartError::Browser(format!("Failed to navigate to {}: {}", url, e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| CartError::Browser(format!("Navigation timeout at {}: {}", url, e)))?;
        Ok(())
    }

    /// Current page URL, from the page itself rather than the target info.
    pub fn current_url(&self) -> Result<String> {
        let value: String = self.evaluate_json("JSON.stringify(window.location.href)")?;
        Ok(value)
    }

    /// Evaluate a JS expression that returns a JSON string and deserialize
    /// it. All in-page probes go through here so page data crosses the CDP
    /// boundary in exactly one format.
    pub fn evaluate_json<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let remote = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| CartError::Browser(format!("Failed to evaluate expression: {}", e)))?;

        let raw = remote
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| CartError::Browser("Expression did not return a JSON string".to_string()))?;

        serde_json::from_str(raw)
            .map_err(|e| CartError::Browser(format!("Failed to parse page snapshot: {}", e)))
    }

    /// Evaluate a JS expression for its boolean result.
    pub fn evaluate_bool(&self, expression: &str) -> Result<bool> {
        let remote = self
            .tab
            .evaluate(expression, false)
            .map_err(|e| CartError::Browser(format!("Failed to evaluate expression: {}", e)))?;
        Ok(remote.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Click the first element matching the selector.
    pub fn click(&self, css_selector: &str) -> Result<()> {
        let element = self
            .tab
            .find_element(css_selector)
            .map_err(|e| CartError::Browser(format!("Element '{}' not found: {}", css_selector, e)))?;
        element
            .click()
            .map_err(|e| CartError::Browser(format!("Failed to click '{}': {}", css_selector, e)))?;
        Ok(())
    }

    /// Focus an input and type into it, replacing any existing value.
    pub fn type_into(&self, css_selector: &str, text: &str) -> Result<()> {
        let element = self
            .tab
            .find_element(css_selector)
            .map_err(|e| CartError::Browser(format!("Input '{}' not found: {}", css_selector, e)))?;
        element
            .click()
            .map_err(|e| CartError::Browser(format!("Failed to focus '{}': {}", css_selector, e)))?;

        // Clear any stale value so the new text never gets appended to it
        let selector_literal =
            serde_json::to_string(css_selector).unwrap_or_else(|_| "\"\"".into());
        self.tab
            .evaluate(
                &format!(
                    "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; return true; }})()",
                    selector_literal
                ),
                false,
            )
            .map_err(|e| CartError::Browser(format!("Failed to clear '{}': {}", css_selector, e)))?;

        self.tab
            .type_str(text)
            .map_err(|e| CartError::Browser(format!("Failed to type into '{}': {}", css_selector, e)))?;
        Ok(())
    }

    /// Press a single named key (e.g. "Enter") in the working tab.
    pub fn press_key(&self, key: &str) -> Result<()> {
        self.tab
            .press_key(key)
            .map_err(|e| CartError::Browser(format!("Failed to press '{}': {}", key, e)))?;
        Ok(())
    }

    /// Wait for a selector to appear, bounded by `timeout`.
    pub fn wait_for(&self, css_selector: &str, timeout: Duration) -> Result<()> {
        self.tab
            .wait_for_element_with_custom_timeout(css_selector, timeout)
            .map(|_| ())
            .map_err(|e| CartError::Browser(format!("Timed out waiting for '{}': {}", css_selector, e)))
    }

    /// Fixed settle delay for UI transitions with no observable completion
    /// signal (overlays, cart panel slide-in).
    pub fn settle(&self, millis: u64) {
        std::thread::sleep(Duration::from_millis(millis));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_options_builder() {
        let opts = LaunchOptions::new()
            .headless(false)
            .window_size(800, 600)
            .user_data_dir("/tmp/cartbot-profile");

        assert!(!opts.headless);
        assert_eq!(opts.window_width, 800);
        assert_eq!(opts.window_height, 600);
        assert_eq!(
            opts.user_data_dir.as_deref(),
            Some(std::path::Path::new("/tmp/cartbot-profile"))
        );
    }

    // Integration tests (require Chrome to be installed)
    #[test]
    #[ignore] // Ignore by default, run with: cargo test -- --ignored
    fn test_launch_browser() {
        let result = BrowserSession::launch(LaunchOptions::new().headless(true));
        assert!(result.is_ok());
    }

    #[test]
    #[ignore]
    fn test_navigate_and_url() {
        let session = BrowserSession::launch(LaunchOptions::new().headless(true)).expect("Failed to launch browser");

        session.navigate("about:blank").expect("navigate failed");
        let url = session.current_url().expect("url probe failed");
        assert!(url.contains("about:blank"));
    }
}
