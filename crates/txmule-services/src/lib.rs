//! txmule-services: segment store, gateway receive path, paced sender,
//! confirmation tracking, and the adapters that connect them to the world.

pub mod bitcoin_rpc;
pub mod confirmation;
pub mod file_sink;
pub mod gateway;
pub mod loopback;
pub mod relay;
pub mod segment_store;
pub mod send_target;
pub mod sender;
pub mod service;

pub use bitcoin_rpc::BitcoinRpc;
pub use confirmation::{ConfirmationOutcome, ConfirmationTracker};
pub use file_sink::FileSink;
pub use gateway::{DispatchOutcome, Gateway, Handled, RetryPolicy};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use relay::HttpRelay;
pub use segment_store::{PayloadProgress, PutOutcome, SegmentStore, StoreError};
pub use send_target::{Gid, InboundMessage, SendTarget};
pub use sender::{SegmentSender, SendError, SendReport};
pub use service::{
    ConfirmationSource, Delivery, PayloadSink, Relay, Transport, TransportError, TxSubmitter,
};
