//! Chunked transfer protocol over the two GATT characteristics.
//!
//! | Module         | Role                                              | Context  |
//! |----------------|---------------------------------------------------|----------|
//! | `codec`        | 10-byte header + payload wire unit                | both     |
//! | `ack`          | per-unit acknowledgement cell                     | both     |
//! | `channels`     | flags, mailbox and reassembler shared by contexts | both     |
//! | `callbacks`    | stack entry points                                | callback |
//! | `reassembly`   | out-of-order inbound upload assembly              | callback |
//! | `outbound`     | fragment-and-send engine, one unit in flight      | poll     |
//! | `dispatcher`   | command byte to response bytes                    | poll     |
//! | `range`        | range-query arithmetic                            | poll     |
//! | `config_files` | config service file operations                    | poll     |
//! | `supervisor`   | disconnect and upload-stall handling              | poll     |

pub mod ack;
pub mod callbacks;
pub mod channels;
pub mod codec;
pub mod config_files;
pub mod dispatcher;
pub mod outbound;
pub mod range;
pub mod reassembly;
pub mod supervisor;

pub use callbacks::{LinkCallbacks, WriteOutcome};
pub use channels::{PendingCommand, SharedLink};
pub use codec::TransferPacket;
pub use dispatcher::{CommandDispatcher, Response};
pub use outbound::{OutboundEngine, TransferOutcome};
pub use reassembly::Reassembler;
pub use supervisor::{ConnectionSupervisor, LinkState};
