// API module
//
// Thin HTTP adapter over the ledger operations

pub mod error;
pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use routes::configure_routes;
