//! Hardware communication.
//!
//! - [`serial`]: byte-stream trait and low-level read helpers
//! - [`session`]: the transport session and its connectors
//! - [`mock`]: simulated instrument for `--simulate` and tests

pub mod mock;
pub mod serial;
pub mod session;

pub use mock::{MockConnector, MockInstrument, MockReply};
pub use serial::{ByteStream, DynStream};
pub use session::{Connector, SerialConnector, SessionTiming, TransportSession};
