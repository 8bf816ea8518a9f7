//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for single runs and for the compare report.

use crate::engine::Catalog;
use crate::metrics::{self, ScoreStats};
use crate::model::{RunId, RunResult};
use crate::registry::Named;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn name_or_missing<T: Named>(
    registry: &crate::registry::Registry<T>,
    id: crate::registry::Id<T>,
) -> String {
    registry
        .get(id)
        .map(|e| e.name().to_string())
        .unwrap_or_else(|_| format!("<removed {}>", T::KIND))
}

/// One line per run, for listings.
pub(crate) fn run_line(catalog: &Catalog, id: RunId, run: &RunResult) -> String {
    let cfg = run.config();
    format!(
        "{id:>4}  {:<20} {:<16} {:<24} {} clusters  [{}]",
        run.name(),
        name_or_missing(&catalog.datasets, cfg.dataset),
        name_or_missing(&catalog.algorithms, cfg.algorithm),
        run.cluster_sizes().len(),
        cfg.params
    )
}

pub(crate) fn build_run_summary(catalog: &Catalog, id: RunId, run: &RunResult) -> TextSummary {
    let cfg = run.config();
    let mut lines = vec![
        format!("Run {id}: {}", run.name()),
        format!("Dataset:   {}", name_or_missing(&catalog.datasets, cfg.dataset)),
        format!("Algorithm: {}", name_or_missing(&catalog.algorithms, cfg.algorithm)),
        format!("Params:    {}", cfg.params),
        format!(
            "Elapsed:   {} (at {})",
            humantime::format_duration(run.elapsed()),
            run.timestamp_utc()
        ),
    ];

    let sizes: Vec<String> = run
        .cluster_sizes()
        .iter()
        .map(|(label, n)| {
            if *label < 0 {
                format!("noise: {n}")
            } else {
                format!("{label}: {n}")
            }
        })
        .collect();
    lines.push(format!("Clusters:  {}", sizes.join(", ")));

    if cfg.scores.is_empty() {
        lines.push("Scores:    none requested".into());
    } else {
        lines.push("Scores:".into());
        for score_id in &cfg.scores {
            let name = name_or_missing(&catalog.scores, *score_id);
            match run.scores().get(&name) {
                Some(v) => lines.push(format!("  {name:<20} {v:.4}")),
                None => lines.push(format!("  {name:<20} -")),
            }
        }
    }
    TextSummary { lines }
}

pub(crate) fn build_compare_summary(stats: &[ScoreStats]) -> TextSummary {
    let mut lines = Vec::new();
    if stats.is_empty() {
        lines.push("No scores to compare.".into());
        return TextSummary { lines };
    }
    for s in stats {
        let direction = if metrics::lower_is_better(&s.score) {
            "lower is better"
        } else {
            "higher is better"
        };
        lines.push(format!(
            "{} ({direction}): avg {:.4} med {:.4} p25 {:.4} p75 {:.4}",
            s.score, s.mean, s.median, s.p25, s.p75
        ));
        for (rank, (id, name, value)) in s.ranking.iter().enumerate() {
            lines.push(format!("  {:>2}. {value:.4}  {name} ({id})", rank + 1));
        }
    }
    TextSummary { lines }
}
