//! Resource registry for request routing
//!
//! The registry maps request paths to resources. Matching is first-match in
//! registration order over exact paths and `prefix*` wildcards; there is no
//! longest-prefix rule.
//!
//! ```text
//!   GET /cam1/still
//!        │
//!        ▼
//!   [ "/status" ] ─ no
//!   [ "/cam*"   ] ─ yes ──► Arc<MediaResource>
//!   [ "/cam1"   ]   (never reached for /cam1...)
//!   [ "/*"      ]
//! ```

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{PathPattern, RegistryEntry};
pub use error::RegistryError;
pub use store::MediaRegistry;
