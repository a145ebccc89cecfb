//! Model for a live frame-trace viewer: sources, threads, filters, frames,
//! history, playback and the connection lifecycle. There is no networking or
//! async runtime here; the only I/O is `filter_store` reading and writing the
//! saved filter list.

pub mod color;
pub mod connection;
pub mod error;
pub mod filter;
pub mod filter_store;
pub mod frame;
pub mod geometry;
pub mod history;
pub mod image;
pub mod playback;
pub mod session;
pub mod source;
pub mod thread;
pub mod wire;

pub use color::Color;
pub use connection::{
    CommandSequencer, ConnectionAction, ConnectionConfig, ConnectionEvent, ConnectionManager,
    ConnectionState,
};
pub use error::{TraceError, WireError};
pub use filter::{Filter, FilterAction, FilterEngine, FilterError, Selector};
pub use frame::{Frame, Painter, RenderContext, RenderStats, VisibleLog};
pub use geometry::{Orientation, Point, Rect, Size};
pub use history::{HistoryBuffer, PushOutcome};
pub use playback::{PlaybackController, PlaybackState};
pub use session::{IngestReport, TraceSession};
