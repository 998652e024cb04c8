pub mod algo;
pub mod graph;
pub mod utils;

/// Module exposing all traits in a single level.
pub mod traits {
    use super::*;
    pub use algo::traits::*;
    pub use utils::traits::*;
}

/// Use `use sparsegraph_algo::prelude::*;` to import the graph type,
/// the algorithm drivers and all traits.
pub mod prelude {
    use super::*;
    pub use algo::bcc::FastBcc;
    pub use algo::bfs::Bfs;
    pub use algo::connectivity::{connectivity, connectivity_with_forest, spanning_forest};
    pub use algo::kcore::KCore;
    pub use algo::ldd::Ldd;
    pub use algo::reach::{MultiReach, Reach};
    pub use algo::scc::{num_sccs, Scc};
    pub use algo::sssp::{BellmanFord, DeltaStepping, RhoStepping, Sssp};
    pub use graph::{Csr, Forest, NodeId, WEdge};
    pub use traits::*;
    pub use utils::{HashBag, ResizableTable, Sampler, SparseTable};
}
