pub mod common;
pub mod error;
pub mod pool;
pub mod delayed_q;
pub mod socket;
pub mod handshake;
pub mod processor;
pub mod memory;
pub mod bus;
pub mod sim;

pub use common::*;
pub use error::{PoolError, ProtocolViolation, SimError};
pub use pool::{PoolHandle, TransactionPool, TxId};
pub use delayed_q::{Context, Scheduler};
pub use processor::{Completion, Processor};
pub use memory::{Access, JournalEntry, Memory, TargetEvent};
pub use bus::{AddressMap, Bus, RouteEntry};
pub use sim::{Platform, Report};
