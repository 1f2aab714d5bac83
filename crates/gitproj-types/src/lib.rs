//! gitproj-types: the vocabulary shared by every gitproj layer.
//!
//! Nothing in here does I/O. The kernel, the test doubles and the CLI all
//! agree on these types:
//!
//! - **ObjectId**: a Git SHA-1 content identifier
//! - **FileSystemTask**: a deferred filesystem side effect, queued durably
//! - **CallbackResult / ProviderResult**: the closed result-code vocabulary
//!   spoken across the OS virtualization boundary
//! - **SparseState / SparseMarker**: sparse-checkout projection state
//! - **PlaceholderKind / PlaceholderEntry**: materialization records
//! - **ProjectionError**: the error taxonomy of the core

mod error;
mod oid;
mod placeholder;
mod result;
mod sparse;
mod task;

pub use error::ProjectionError;
pub use oid::{ObjectId, ParseObjectIdError};
pub use placeholder::{PlaceholderEntry, PlaceholderKind};
pub use result::{CallbackResult, ProviderResult};
pub use sparse::{SparseMarker, SparseState};
pub use task::{FileSystemTask, TaskOperation};
