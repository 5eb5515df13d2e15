//! Browser strategy: drive the live storefront through headless Chrome.

pub mod auth;
pub mod dialogs;
pub mod panel;
pub mod parser;
pub mod selectors;
pub mod session;
pub mod worker;

pub use panel::CartPanelSnapshot;
pub use session::{BrowserSession, LaunchOptions};
pub use worker::BrowserBackend;
