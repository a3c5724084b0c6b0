pub mod catalog;
pub mod heap;
pub mod request;
pub mod update;

pub use catalog::Catalog;
pub use heap::{PriorityHeap, QueueEntry};
pub use request::{Priority, ProcessFile, Request, RequestKind, SeqNo};
pub use update::Update;
