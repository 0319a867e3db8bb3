//! Result storage: the append-only unit logs, their writer locks and the
//! saved assessments.

pub mod assessment;
pub mod jsonl;
pub mod lock;
pub mod memory;

pub use assessment::{load_assessment, save_assessment};
pub use jsonl::JsonlResponseLog;
pub use lock::UnitLock;
pub use memory::MemoryResponseLog;
