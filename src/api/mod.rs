//! GraphQL fast path: cookie-jar HTTP session plus persisted-query calls.

pub mod auth;
pub mod client;
pub mod queries;
pub mod shapes;
pub mod worker;

pub use client::{ApiTransport, GqlResponse, HttpGql};
pub use queries::{PersistedQueries, ShopIds};
pub use worker::{ApiBackend, ApiSession};
