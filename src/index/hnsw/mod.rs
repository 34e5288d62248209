pub mod index;
pub mod node;
pub mod pqueue;

pub use index::{Hnsw, HnswError, HnswParams};
