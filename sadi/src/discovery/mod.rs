//! Service discovery for a set of input nodes.

pub mod cancellation;
pub mod engine;
pub mod events;
pub mod results;
pub mod session;

pub use cancellation::CancellationFlag;
pub use engine::{DiscoveryEngine, DiscoveryOutcome, DEFAULT_BATCH_SIZE};
pub use events::{found_summary, ChannelSink, DiscoveryEvent, EmitError, EventSink};
pub use results::ResultSet;
pub use session::{DiscoverySession, SessionError};
