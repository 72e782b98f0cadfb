//! # API crate: client-side data access for the CMS admin
//!
//! Everything the admin front end needs to read and write content, whether or not the
//! backend server is reachable. Front ends build one [`ClientContext`] per session and
//! call its operations; the modules below are the pieces it is assembled from.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`activity_log`] | Admin-visible log panel, mirrored to `tracing` |
//! | [`client`] | Retrying JSON client for the backend's HTTP surface |
//! | [`context`] | Per-session facade choosing backend, GitHub or local persistence |
//! | [`detector`] | Memoized `/health` probe deciding whether a backend exists |
//! | [`github`] | Commits items, the cover and images through the GitHub contents API |
//! | [`queue`] | FIFO request queue with a fixed pause between operations |
//! | [`site`] | Fetches the published static snapshot (`data/db.json`, `data/cover.json`) |
//! | [`transport`] | HTTP seam (`reqwest` in production) |
//!
//! ## Errors
//!
//! All fallible operations return [`ApiError`]. Validation failures are raised before
//! anything is queued; local write failures are not errors but a
//! [`store::Durability::SessionOnly`] outcome.

pub mod activity_log;
pub mod client;
pub mod context;
pub mod detector;
mod error;
pub mod github;
pub mod queue;
pub mod site;
pub mod transport;

pub use activity_log::{ActivityLog, LogEntry, LogLevel};
pub use client::ApiClient;
pub use context::{ClientContext, Mode};
pub use detector::BackendDetector;
pub use error::ApiError;
pub use github::{CredentialField, CredentialPrompt, GithubPublisher, NoPrompt};
pub use queue::RequestQueue;
pub use site::SnapshotSource;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
