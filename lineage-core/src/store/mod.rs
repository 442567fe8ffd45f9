pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryLineageStore;
pub use sqlite::SqliteLineageStore;
pub use traits::{BatchRegistry, GraphSource, LinkWriter};
