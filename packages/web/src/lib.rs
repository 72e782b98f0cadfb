//! # Web crate: file-backed CMS server
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`settings`] | `config`-crate settings: defaults, `config.toml`, environment |
//! | [`database`] | JSON-file item database and cover, atomic writes, one mutex |
//! | [`seed`] | First-run import of the legacy per-type JSON files |
//! | [`uploads`] | Decoding and storing `data:` URL images |
//! | [`auth`] | `X-ADMIN-TOKEN` middleware for mutating routes |
//! | [`routes`] | axum router, handlers and the `{success, ...}` envelope |

pub mod auth;
pub mod database;
pub mod routes;
pub mod seed;
pub mod settings;
pub mod uploads;

pub use database::{DbError, FileDatabase};
pub use routes::{router, AppError, AppState};
pub use settings::Settings;

/// Bind `settings.server` and serve until the process is stopped.
pub async fn launch(settings: Settings) -> std::io::Result<()> {
    if settings.admin.token.is_empty() {
        tracing::warn!("no admin token configured: mutating endpoints are open to anyone");
    } else {
        tracing::info!("admin token enabled");
    }
    let addr = settings.server.addr();
    let app = router(&settings);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await
}
