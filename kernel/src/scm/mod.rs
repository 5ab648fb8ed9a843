//! Version-control capability and value types.

pub mod memory;
pub mod source;
pub mod types;

pub use memory::InMemorySource;
pub use source::{ScmError, ScmSource};
pub use types::{BranchHead, CheckoutMode, RevisionRef, SourceConfiguration, SourceId};
