pub mod memstore;
pub mod region;
pub mod stats;
pub mod transport;

pub use memstore::{FailureMode, MemStore};
pub use stats::{GuidepostIndex, StatsRegistry, StatsSummary};
pub use transport::{RowStream, ScanTransport, TableMeta};
