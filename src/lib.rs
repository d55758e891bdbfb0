//! # record-store
//!
//! A minimal JSON record store: records are created and fetched over HTTP and
//! persisted in SQLite, served by a small async HTTP/1.1 stack built on Tokio.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use record_store::{Server, api};
//! use record_store::database::{Database, DatabaseConfig};
//! use record_store::records::RecordStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open(&DatabaseConfig::new("records.db"))?;
//!     let app = api::app(RecordStore::new(db), 6);
//!
//!     let server = Server::bind("127.0.0.1:8081").await?;
//!     server
//!         .run(move |req| {
//!             let app = app.clone();
//!             async move { app.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod database;
pub mod http;
pub mod middleware;
pub mod records;
pub mod router;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
