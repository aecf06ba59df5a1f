//! Chain event listener: RPC access, event decoding, and sync loop.

pub mod events;
pub mod provider;
pub mod sync;

pub use events::{ChainEvent, ChainPayload};
pub use provider::RpcProvider;
pub use sync::SyncEngine;
