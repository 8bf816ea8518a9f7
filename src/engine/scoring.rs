use crate::model::{Dataset, Label, Score};
use crate::registry::Named;
use std::collections::BTreeMap;
use tracing::debug;

/// Compute every requested score that is defined for this dataset.
///
/// Target-dependent scores are skipped when the dataset has no target; a
/// skipped or undefined score has no entry at all.
pub(crate) fn evaluate(
    dataset: &Dataset,
    pred: &[Label],
    scores: &[&Score],
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for score in scores {
        if score.needs_target() && dataset.target().is_none() {
            debug!(score = score.name(), "skipped: dataset has no target");
            continue;
        }
        match score.calc(dataset, pred) {
            Some(v) => {
                out.insert(score.name().to_string(), v);
            }
            None => debug!(score = score.name(), "undefined for this labelling"),
        }
    }
    out
}
