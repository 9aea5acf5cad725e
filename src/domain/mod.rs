pub mod types;
pub mod entry;
pub mod event;

pub use types::*;
pub use entry::*;
pub use event::*;
