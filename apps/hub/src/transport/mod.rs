//! WebSocket transport for validator connections.
//!
//! One reader and one writer task per connection. The writer drains the
//! connection's outbound queue; the reader hands every text frame to the hub.

mod server;

pub use server::serve;
