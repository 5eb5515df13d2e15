//! # cartbot
//!
//! Grocery cart automation for a single retailer storefront, with two
//! interchangeable transport strategies behind one [`CartBackend`] contract:
//!
//! - **fast**: direct GraphQL calls against the storefront gateway using
//!   captured persisted-query hashes ([`ApiBackend`])
//! - **browser**: headless Chrome driving the live storefront UI
//!   ([`BrowserBackend`])
//!
//! The core job is cart reconciliation: resolve free-text grocery items to
//! catalog entries, add them one at a time tolerating per-item failures,
//! and afterwards re-derive the authoritative cart state from the remote
//! side. Local bookkeeping is never trusted as cart state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cartbot::{ApiBackend, CancelToken, DesiredItem, HttpGql, LogProgress, Orchestrator, StoreConfig};
//!
//! # fn main() -> cartbot::Result<()> {
//! let config = StoreConfig::load(std::path::Path::new("settings.json"))?;
//! let transport = HttpGql::new(&config)?;
//! let mut backend = ApiBackend::with_transport(transport, config.clone());
//!
//! let items = vec![
//!     DesiredItem::new(1, "Milk").with_search_text("whole milk gallon"),
//!     DesiredItem::new(2, "Bread").with_quantity(2),
//! ];
//!
//! let summary = Orchestrator::new(&mut backend).run_add(
//!     &items,
//!     config.shopping_mode,
//!     &CancelToken::new(),
//!     &mut LogProgress::default(),
//! )?;
//! println!("added {} of {}", summary.added, items.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`api`]: the fast GraphQL strategy (login chain, persisted queries)
//! - [`browser`]: the headless Chrome strategy (selector chains, the
//!   four-strategy cart panel parser)
//! - [`orchestrator`]: the run state machine shared by both strategies
//! - [`backend`]: the transport-neutral [`CartBackend`] contract
//! - [`model`]: desired items, resolutions, outcomes, summaries
//! - [`config`] / [`error`] / [`progress`] / [`cancel`] / [`session`]:
//!   the supporting pieces

pub mod api;
pub mod backend;
pub mod browser;
pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod session;

pub use api::{ApiBackend, ApiTransport, HttpGql, PersistedQueries, ShopIds};
pub use backend::{CartBackend, ProductHit};
pub use browser::{BrowserBackend, BrowserSession, LaunchOptions};
pub use cancel::CancelToken;
pub use config::{FulfillmentMode, StoreConfig};
pub use error::{CartError, Result};
pub use model::{CartLineItem, DesiredItem, OperationOutcome, OutcomeStatus, ResolvedMatch, RunSummary};
pub use orchestrator::Orchestrator;
pub use progress::{LogProgress, NullProgress, Progress};
pub use session::SessionStore;
