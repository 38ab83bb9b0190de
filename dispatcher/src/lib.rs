//! # Asynchroza Dispatcher
//!
//! Leader-elected fan-out of published messages to a pool of consumers.
//!
//! Every replica runs a [`LeadershipCoordinator`]. The one holding the lock starts the
//! worker set through the [`WorkerSupervisor`]:
//!
//! ```text
//! publisher --> Distributor --(PROCESS)--> consumer --(ACK)--> Acknowledger
//!                    |                                              |
//!                    +-----> pending set <------- remove -----------+
//!                                 ^
//!                 Republisher ----+ (stale entries republished)
//! ```
//!
//! Delivery is at-least-once: anything not acknowledged within the redelivery
//! threshold is published again.

pub mod error;
pub mod leadership;
pub mod pending;
pub mod pool;
pub mod retry;
pub mod supervisor;
pub mod workers;

pub use error::{ConnectionError, WorkerError};
pub use leadership::{GiveUpSignal, LeadershipCoordinator, LeadershipListener, LeadershipState};
pub use pending::PendingMessageStore;
pub use pool::{ConsumerHandle, ConsumerPool, EndpointSnapshot, EndpointStatus};
pub use supervisor::{WorkerKind, WorkerLauncher, WorkerSupervisor};
pub use workers::DispatcherWorkers;
