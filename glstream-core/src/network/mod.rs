//! Transport layer: listeners, blocking client streams and the
//! receive buffer.

pub mod buffer;
pub mod listener;
pub mod stream;

pub use buffer::{DEFAULT_READ_BUFFER, MAX_READ_BUFFER, ReadBuffer};
pub use listener::{PendingClient, RenderListener, default_socket_path};
pub use stream::{RenderStream, StopHandle};
