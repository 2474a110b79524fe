pub mod collector;
pub mod network;
pub(crate) mod platform;
pub mod probe;
pub mod process;

pub use collector::Collector;
pub use probe::{MemoryReading, StaticProbe, SysinfoProbe, SystemProbe};
pub use process::{Connection, ConnectionState, PortMap, ProcessSnapshot, RawProcess};
