pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use store::{StoreError, WorkflowLock, WorkflowStore};
