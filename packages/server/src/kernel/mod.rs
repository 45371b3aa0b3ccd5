//! Kernel module - server infrastructure and dependencies.

pub mod file_store;
pub mod memory_store;
pub mod server_kernel;
pub mod test_dependencies;
pub mod worker_pool;

pub use file_store::{FileStore, FileStoreError, LocalFileStore, ScopedFiles};
pub use memory_store::MemoryStore;
pub use server_kernel::ServerKernel;
pub use test_dependencies::{MockFileStore, TestDependencies, TestKernel};
pub use worker_pool::{PoolError, WorkerPool, WorkerPoolConfig};
