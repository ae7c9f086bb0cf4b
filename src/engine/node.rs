use std::cmp::Ordering;

use super::request::EngineRequest;
use super::stage::Stage;
use crate::error::Result;
use crate::nut::{Nut, NutType};

/// A processing unit of a chain.
///
/// A node only ever sees nuts of the types it declares; the chain forwards
/// every other nut untouched.
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    fn stage(&self) -> Stage;

    /// Content types this node accepts.
    fn nut_types(&self) -> &[NutType];

    /// A node disabled by configuration is skipped.
    fn works(&self) -> bool {
        true
    }

    /// Transform the accepted nuts.
    fn internal_parse(&self, request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>>;
}

/// Order two nodes by stage.
pub fn compare(a: &dyn Node, b: &dyn Node) -> Ordering {
    a.stage().cmp(&b.stage())
}

/// Run one node over `nuts`.
///
/// Nuts of other types keep their relative order after the transformed
/// ones. An excluded stage or a node that does not work passes everything
/// through.
pub fn parse(node: &dyn Node, request: &EngineRequest, nuts: Vec<Nut>) -> Result<Vec<Nut>> {
    if request.should_skip(node.stage()) || !node.works() {
        return Ok(nuts);
    }

    let (accepted, untouched): (Vec<_>, Vec<_>) = nuts
        .into_iter()
        .partition(|nut| node.nut_types().contains(&nut.nut_type()));
    if accepted.is_empty() {
        return Ok(untouched);
    }

    let mut out = node.internal_parse(request, accepted)?;
    out.extend(untouched);
    Ok(out)
}
