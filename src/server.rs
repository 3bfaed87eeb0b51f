//! The BiasScope HTTP server.

pub mod api;
pub mod router;

pub use api::ApiDoc;
pub use api::AppState;
pub use router::create_router;
pub use router::run;
