//! Membership subsystem.
//!
//! # Data Flow
//! ```text
//! mirror snapshot (EndpointSlices + legacy Endpoints)
//!     → types.rs (flatten both shapes into MembershipRecords)
//!     → resolver.rs (swap pod IP for the node's internal IP when known)
//!     → mapper.rs (readiness filter, port override, naming)
//!     → Vec<BackendServerSpec> in mirror order
//! ```
//!
//! # Design Decisions
//! - Nothing in here fails; missing optional fields drop out silently
//! - Slice-derived servers win; legacy subsets are only a fallback
//! - Output order follows input order, so identical input gives identical output

pub mod mapper;
pub mod resolver;
pub mod types;

pub use mapper::{map_to_backends, MappingOptions};
pub use resolver::{resolve_address, HostAddressTable};
pub use types::{
    FlatSubset, LegacyEndpoints, MembershipRecord, MembershipSnapshot, SliceEndpoint, SlicePort,
    SubsetAddress, TopologySlice,
};
