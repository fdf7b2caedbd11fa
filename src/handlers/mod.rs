pub mod common;
pub mod health;
pub mod orders;
pub mod payments;
pub mod subscriptions;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
