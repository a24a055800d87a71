pub mod buffer;
pub mod decompose;
pub mod eval;
pub mod ivm;
pub(crate) mod maintain;
pub mod merge;
pub mod query;
pub mod types;
pub mod update;
pub mod view;

pub use ivm::{Ivm, Subscription};
pub use update::{QueryUpdate, UpdateKind};
