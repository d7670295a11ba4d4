//! Client-side library for the roomcast distributed chat system.
//!
//! Three layers, composed by a UI or bot integration:
//!
//! - [`Connection`]: async WebSocket transport speaking the JSON envelope
//! - [`ChatService`]: pure state machine turning server frames into
//!   display-ready updates
//! - [`OrderingBuffer`]: per-room restoration of the admin's total order
//!   from potentially out-of-order broadcast delivery
//!
//! The service and buffer do no I/O, so they are fully testable without a
//! node; the transport is a thin framing wrapper.

mod buffer;
mod service;
mod transport;

pub use buffer::{Admission, OrderingBuffer, DEFAULT_MAX_BUFFERED, DEFAULT_MAX_DELIVERED_IDS};
pub use service::{ChatService, ClientUpdate};
pub use transport::{Connection, TransportError};
