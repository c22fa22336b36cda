//! Outward Execution Ports
//!
//! Ports define the interfaces to external services (chain RPC,
//! notifications). Adapters implement these ports for specific backends;
//! the stubs here serve tests and Redis-less development. The outbox
//! processors in the daemon are the only callers.

mod error;
mod ports;
mod stub;

pub use error::ExecError;
pub use ports::{ChainClient, ChainReceipt, NotificationSender, TransferRequest};
pub use stub::{StubChainClient, StubNotifier};
