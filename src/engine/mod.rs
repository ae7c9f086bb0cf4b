//! Pipeline nodes, chains and request execution.
//!
//! A request maps content types to chains. Executing it groups the heap's
//! nuts by type and runs each group through its chain; groups without a
//! chain pass through. A [`HeadNode`] (the cache) may wrap the execution.

mod chain;
mod node;
mod request;
mod stage;

pub use chain::Chain;
pub use node::{Node, compare, parse};
pub use request::{EngineRequest, EngineRequestBuilder, RequestKey};
pub use stage::Stage;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::nut::{Nut, NutType};

/// Entry point wrapping a whole execution.
pub trait HeadNode: Send + Sync {
    fn parse(&self, request: &EngineRequest) -> Result<Vec<Nut>>;
}

/// Run the chains over the heap's current nuts.
pub fn run_chains(request: &EngineRequest) -> Result<Vec<Nut>> {
    run_chains_over(request, request.heap().nuts())
}

/// Run the chains over `nuts`, grouped by type in type order.
pub fn run_chains_over(request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
    let mut groups: BTreeMap<NutType, Vec<Nut>> = BTreeMap::new();
    for nut in nuts {
        groups.entry(nut.nut_type()).or_default().push(nut);
    }

    let mut out = Vec::new();
    for (nut_type, group) in groups {
        match request.chain(nut_type) {
            Some(chain) => out.extend(chain.parse(request, group)?),
            None => out.extend(group),
        }
    }
    Ok(out)
}

/// Execute `request`, through `head` when given.
pub fn execute(request: &EngineRequest, head: Option<&dyn HeadNode>) -> Result<Vec<Nut>> {
    match head {
        Some(head) if !request.should_skip(Stage::Cache) => head.parse(request),
        _ => run_chains(request),
    }
}
