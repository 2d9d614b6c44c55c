pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{manifest, sync_config};
#[allow(unused_imports)]
pub use mocks::{Call, FaultKind, MemoryStore, Op};
