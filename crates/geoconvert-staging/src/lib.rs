//! geoconvert-staging — temporary storage for in-flight conversions.
//!
//! The native engine reads and writes files, so every request gets its own
//! directory under a shared root:
//!
//! ```text
//! <root>/
//!   req-<uuid>/        ← one StagedRequest
//!     input.geojson
//!     out/...
//!   req-<uuid>/
//! ```
//!
//! A [`StagedRequest`] removes its directory when dropped, so cleanup
//! happens on success, on error, and when the owning task is cancelled or
//! unwinds. Requests never share a directory, so no cross-request locking
//! is needed.

pub mod area;
pub mod error;

pub use area::{REQUEST_DIR_PREFIX, StagedRequest, StagingArea};
pub use error::{StagingError, StagingResult};
