//! ObjectIO keep-alive framing protocol
//!
//! Long-running internode calls stream a byte-tagged response so that
//! proxies and clients see activity while the operation runs:
//!
//! ```text
//! 0x20                      heartbeat, repeatable
//! 0x02 <u32 LE len> <data>  data block (block-streaming only)
//! 0x00 <payload...>         success, payload runs to end of stream
//! 0x01 <message...>         error, message runs to end of stream
//! ```

pub mod codec;
pub mod frame;
pub mod keepalive;
pub mod messages;
pub mod params;
pub mod reader;

pub use frame::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_BLOCK_SIZE, Frame};
pub use keepalive::{DrainBody, FrameStream, KeepAlive, KeepAliveOptions, Outcome, StreamResponse};
pub use messages::{DiskScoped, RemoteError, RpcResponse};
pub use reader::{FrameReader, ProtocolError, wait_for_response, wait_for_stream};
