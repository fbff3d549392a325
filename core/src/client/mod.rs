pub mod aggregator;
pub mod connection;
pub mod descriptor;

pub use aggregator::{
    AggregatorPolicy, NameConflictPolicy, ResolvedTool, SourceFailurePolicy, ToolAggregator,
    resolve_names,
};
pub use connection::ToolConnection;
pub use descriptor::{ConnectionDescriptor, TransportKind};
