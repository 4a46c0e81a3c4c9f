//! Infrastructure layer: durable store, publish executor, dispatcher,
//! retention sweeper.

pub mod dispatcher;
pub mod executor;
pub mod scheduling;
pub mod store;
pub mod sweeper;

pub use dispatcher::{DispatchBackend, DispatchError, DispatcherConfig, TokioDispatcher};
pub use executor::{ExecutionOutcome, PublishExecutor};
pub use scheduling::{ScheduleError, Scheduling};
pub use store::{
    CleanupCounts, InMemoryTaskStore, PublishReceipt, SqliteTaskStore, StoreError, TaskStore,
};
pub use sweeper::{Sweeper, SweeperConfig, SweeperHandle};
