//! Showtime Server - HTTP surface for campaign showtime decisions
//!
//! The public `GET /campaigns/showtime` endpoint answers the client script
//! with the campaigns to display on the current pageview (JSONP when a
//! `callback` is given). The `/api/v1` endpoints administer campaigns,
//! schedules, the campaign cache and segment providers; every admin mutation
//! refreshes the affected campaign snapshot before the response is sent.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! ## Public Endpoints (No Authentication)
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe with segment provider circuit states
//! - `GET /metrics` - Prometheus metrics
//! - `GET /campaigns/showtime?data=<json>&callback=<fn>` - Showtime decision
//!
//! ## Protected Endpoints (API Key Required)
//!
//! - `GET|POST /api/v1/campaigns` - List / create campaigns
//! - `GET|PUT|DELETE /api/v1/campaigns/{id}` - Read / replace / delete a campaign
//! - `POST /api/v1/campaigns/{id}/activate` and `/deactivate`
//! - `GET|POST /api/v1/campaigns/{id}/schedules` - List / plan schedules
//! - `POST /api/v1/campaigns/{id}/schedules/{schedule_id}/{start|pause|resume|stop}`
//! - `DELETE /api/v1/campaigns/{id}/schedules/{schedule_id}`
//! - `POST /api/v1/cache/rebuild`, `POST /api/v1/cache/clear`
//! - `GET /api/v1/segments` - Segments of every registered provider

pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, spawn_schedule_promotion, start_server};
pub use state::ServerState;
