//! Concrete backend implementations

pub mod http;
pub mod reference;

// Re-export for convenience
pub use http::HttpCompletion;
pub use reference::ReferenceCompletion;
