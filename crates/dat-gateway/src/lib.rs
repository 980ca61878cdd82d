//! HTTP and WebSocket gateway to the Dat peer-to-peer network.
//!
//! The gateway makes content-addressed archives reachable to ordinary web
//! clients: for each URL naming an archive (by hex key or DNS name) it
//! joins the archive's swarm, materializes a view of the archive's
//! filesystem, and serves file requests over HTTP. WebSocket clients get
//! the native replication protocol proxied between them and the swarm.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Clients                              │
//! │                   (HTTP / WebSocket)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        dat-gateway                          │
//! │  ┌─────────────┐ ┌──────────────┐ ┌─────────────────────┐   │
//! │  │   Router    │ │   Content    │ │    Replication      │   │
//! │  │ + Handlers  │ │   Serving    │ │    Proxy (WS)       │   │
//! │  └─────────────┘ └──────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │ Registry │   │ Resolver │   │  Swarm   │
//!        │ (cache)  │   │  (DNS)   │   │ Adapter  │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use dat_gateway::{Gateway, GatewayConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut gateway = Gateway::load(GatewayConfig::default())?;
//! let addr = gateway.listen(([0, 0, 0, 0], 5917).into()).await?;
//! println!("listening on {addr}");
//! // ...
//! gateway.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod content;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod supervisor;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use routes::create_router;
pub use state::GatewayState;
pub use supervisor::Gateway;
