//! Scatter Expansion
//!
//! Replicates a step once per element of its scattered array inputs,
//! under dotproduct semantics: all scattered arrays must have equal
//! length, instance *i* receives element *i* of each, and outputs gather
//! back into arrays ordered by *i*. Nesting composes by extending the
//! instance index tuple, never by flattening.

use std::collections::BTreeMap;

use super::errors::ResolveError;
use super::plan::Slot;

/// The common length of a step's scattered inputs.
///
/// Fails with [`ResolveError::ScatterLengthMismatch`] when lengths
/// differ, and when any scattered source has no statically known length
/// (a lone upstream scalar output cannot be scattered over).
pub fn scatter_length(
    step_id: &str,
    scattered: &[(&str, &Slot)],
) -> Result<usize, ResolveError> {
    let mut lengths: Vec<(&str, usize)> = Vec::with_capacity(scattered.len());

    for (name, slot) in scattered {
        match slot.known_len() {
            Some(len) => lengths.push((name, len)),
            None => {
                return Err(ResolveError::ScatterLengthMismatch {
                    step: step_id.to_string(),
                    detail: format!("length of '{}' is not known at resolve time", name),
                })
            }
        }
    }

    let first = lengths.first().map(|(_, len)| *len).unwrap_or(0);
    if lengths.iter().any(|(_, len)| *len != first) {
        let detail = lengths
            .iter()
            .map(|(name, len)| format!("{}={}", name, len))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ResolveError::ScatterLengthMismatch {
            step: step_id.to_string(),
            detail,
        });
    }

    Ok(first)
}

/// Input slots for scatter instance *i*: element *i* of every scattered
/// input, the whole slot for everything else.
pub fn instance_inputs(
    bound: &BTreeMap<String, Slot>,
    scatter_names: &[String],
    i: usize,
) -> BTreeMap<String, Slot> {
    bound
        .iter()
        .map(|(name, slot)| {
            let projected = if scatter_names.iter().any(|s| s == name) {
                slot.element(i).unwrap_or_else(|| slot.clone())
            } else {
                slot.clone()
            };
            (name.clone(), projected)
        })
        .collect()
}

/// Gathers per-instance output slots into one array-shaped slot, in
/// instance order. Ordering is a property of the plan: it holds even
/// when instances complete out of order at run time.
pub fn gather(per_instance: Vec<Slot>) -> Slot {
    Slot::List(per_instance)
}
