use crate::error::LabError;
use crate::metrics;
use crate::model::AppMode;
use crate::orchestrator::{self, PostRunOptions, RunRequest, Workbench, WorkspacePaths};
use crate::params::RawParam;
use crate::registry::Named;
use crate::session::RunRecord;
use crate::storage::{self, BlobOptions, ImportOptions};
use crate::text_summary;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "cluster-lab",
    version,
    about = "Configure, run and compare clustering experiments"
)]
pub struct Cli {
    /// Workspace directory holding datasets, plugins and the session
    #[arg(long, env = "CLUSTER_LAB_HOME", global = true)]
    pub home: Option<PathBuf>,

    /// Session file (default: <home>/session.json)
    #[arg(long, global = true)]
    pub session: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, global = true)]
    pub auto_save: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print only the error message on failure (for scripts)
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Manage datasets
    #[command(subcommand)]
    Datasets(DatasetsCmd),
    /// Inspect and load algorithms
    #[command(subcommand)]
    Algorithms(AlgorithmsCmd),
    /// Inspect scoring functions
    #[command(subcommand)]
    Scores(ScoresCmd),
    /// Execute one algorithm on one dataset
    Run(RunArgs),
    /// Inspect, rerun, export and compare stored runs
    #[command(subcommand)]
    Runs(RunsCmd),
    /// Named parameter sets executed side by side
    #[command(subcommand)]
    Configs(ConfigsCmd),
    /// Save, load or reset the session
    #[command(subcommand)]
    Session(SessionCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum DatasetsCmd {
    List,
    Show {
        dataset: String,
        /// Rows to preview
        #[arg(long, default_value_t = 5)]
        rows: usize,
    },
    /// Import a CSV file with a header row
    Import {
        file: PathBuf,
        /// Dataset name (default: file stem)
        #[arg(long)]
        name: Option<String>,
        /// Feature columns (default: every numeric column)
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
        /// Column used as a per-row display title
        #[arg(long)]
        title_column: Option<String>,
        /// Column holding integer class labels
        #[arg(long)]
        target_column: Option<String>,
        /// Expected number of clusters (required without a target)
        #[arg(long)]
        clusters: Option<usize>,
        /// Scale every feature to [0, 1]
        #[arg(long)]
        normalise: bool,
    },
    /// Generate gaussian blobs
    Generate {
        name: String,
        #[arg(long, default_value_t = 100)]
        samples: usize,
        #[arg(long, default_value_t = 2)]
        features: usize,
        #[arg(long, default_value_t = 3)]
        centers: usize,
        #[arg(long, default_value_t = 1.0)]
        std: f64,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        normalise: bool,
    },
    /// Remove a dataset, its file and its runs
    Remove { dataset: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum AlgorithmsCmd {
    List,
    Show { algorithm: String },
    /// Install a plugin file into the plugin directory and register it
    Load { file: PathBuf },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ScoresCmd {
    List,
}

/// Parameter edits shared by every command that takes parameters.
#[derive(Debug, Args, Clone, Default)]
pub struct ParamEdits {
    /// Pass a value: --set n_clusters=3
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,

    /// Pass an explicit None
    #[arg(long = "null", value_name = "NAME")]
    pub null: Vec<String>,

    /// Leave out of the call so the algorithm uses its own default
    #[arg(long = "unset", value_name = "NAME")]
    pub unset: Vec<String>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ExportArgs {
    /// Export the run as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export features and predicted labels as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    pub dataset: String,
    pub algorithm: String,
    /// Run name (default: the algorithm name)
    #[arg(long)]
    pub name: Option<String>,
    #[command(flatten)]
    pub params: ParamEdits,
    /// Score to compute; repeatable (default: all)
    #[arg(long = "score")]
    pub scores: Vec<String>,
    /// Refuse if an identical run already exists
    #[arg(long)]
    pub dedupe: bool,
    /// Print the run record as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub export: ExportArgs,
}

#[derive(Debug, Subcommand, Clone)]
pub enum RunsCmd {
    List {
        #[arg(long)]
        dataset: Option<String>,
    },
    Show {
        run: String,
        #[arg(long)]
        json: bool,
    },
    Remove {
        run: String,
    },
    /// Execute a run again with edited parameters
    Rerun {
        run: String,
        #[command(flatten)]
        params: ParamEdits,
        /// Remove the old run once the new one succeeded
        #[arg(long)]
        replace: bool,
        #[arg(long)]
        dedupe: bool,
    },
    Export {
        run: String,
        #[command(flatten)]
        export: ExportArgs,
    },
    /// Score statistics and rankings across runs (default: all)
    Compare {
        runs: Vec<String>,
        #[arg(long)]
        dataset: Option<String>,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ConfigsCmd {
    Add {
        name: String,
        algorithm: String,
        #[command(flatten)]
        params: ParamEdits,
    },
    List,
    Remove {
        config: String,
    },
    /// Execute configurations on a dataset (default: all of them)
    Run {
        dataset: String,
        #[arg(long = "config")]
        configs: Vec<String>,
        #[arg(long = "score")]
        scores: Vec<String>,
        #[arg(long)]
        dedupe: bool,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum SessionCmd {
    Save,
    Load,
    /// Drop all runs and configurations
    New {
        #[arg(long, value_enum, default_value_t = AppMode::Research)]
        mode: AppMode,
    },
    Show,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{s}`")),
    }
}

impl ParamEdits {
    pub fn to_raw(&self) -> Result<BTreeMap<String, RawParam>> {
        let mut raw = BTreeMap::new();
        let edits = self
            .set
            .iter()
            .map(|(k, v)| (k, RawParam::Text(v.clone())))
            .chain(self.null.iter().map(|k| (k, RawParam::Null)))
            .chain(self.unset.iter().map(|k| (k, RawParam::Unspecified)));
        for (name, value) in edits {
            if raw.insert(name.clone(), value).is_some() {
                bail!("parameter `{name}` is given more than once");
            }
        }
        Ok(raw)
    }
}

/// Turn any failure into the one line shown to the user.
pub fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<LabError>() {
        Some(LabError::DuplicateRun { existing }) => {
            format!("Algorithm with such parameters has already been launched ({existing})")
        }
        Some(e) if e.is_parameter_error() => format!("Invalid parameters: {e}"),
        _ => format!("{err:#}"),
    }
}

pub fn run(args: Cli) -> Result<()> {
    let paths = WorkspacePaths::resolve(args.home.clone(), args.session.clone())?;
    let mut wb = Workbench::open(paths)?;

    let restores = !matches!(
        args.command,
        Command::Session(SessionCmd::Load) | Command::Session(SessionCmd::New { .. })
    );
    if restores {
        let report = wb.restore_session()?;
        debug!(runs = report.runs, skipped = report.skipped.len(), "session restored");
    }

    let changed = match &args.command {
        Command::Datasets(cmd) => datasets(&mut wb, cmd)?,
        Command::Algorithms(cmd) => algorithms(&mut wb, cmd)?,
        Command::Scores(ScoresCmd::List) => {
            for (id, score) in wb.catalog().scores.iter() {
                let needs = if score.needs_target() { "target" } else { "data" };
                println!("{id:>4}  {:<20} needs {needs}", score.name());
            }
            false
        }
        Command::Run(run_args) => {
            run_one(&mut wb, run_args, args.auto_save)?;
            false
        }
        Command::Runs(cmd) => runs(&mut wb, cmd, args.auto_save)?,
        Command::Configs(cmd) => configs(&mut wb, cmd)?,
        Command::Session(cmd) => session(&mut wb, cmd)?,
    };
    if changed {
        if let Some(path) = orchestrator::auto_save(&wb, args.auto_save) {
            debug!(path = %path.display(), "session auto-saved");
        }
    }
    Ok(())
}

fn datasets(wb: &mut Workbench, cmd: &DatasetsCmd) -> Result<bool> {
    match cmd {
        DatasetsCmd::List => {
            for (id, ds) in wb.catalog().datasets.iter() {
                println!(
                    "{id:>4}  {:<24} {:>6} rows {:>3} features {:>3} classes{}",
                    ds.name(),
                    ds.n_samples(),
                    ds.data().n_features(),
                    ds.num_of_classes(),
                    if ds.target().is_some() { "  (target)" } else { "" }
                );
            }
            Ok(false)
        }
        DatasetsCmd::Show { dataset, rows } => {
            let ds = wb.dataset(dataset)?;
            println!("Dataset:  {}", ds.name());
            println!("Samples:  {}", ds.n_samples());
            println!("Classes:  {}", ds.num_of_classes());
            println!("Target:   {}", if ds.target().is_some() { "yes" } else { "no" });
            println!("Features: {}", ds.feature_names().join(", "));
            for (i, row) in ds.data().rows().take(*rows).enumerate() {
                let values: Vec<String> = row.iter().map(|v| format!("{v:.4}")).collect();
                let title = ds.titles().map(|t| t[i].as_str()).unwrap_or("");
                println!("  {:>4} {title:<12} {}", i + 1, values.join("  "));
            }
            Ok(false)
        }
        DatasetsCmd::Import {
            file,
            name,
            columns,
            title_column,
            target_column,
            clusters,
            normalise,
        } => {
            let table = storage::read_csv(file)
                .with_context(|| format!("read {}", file.display()))?;
            let name = match name {
                Some(n) => n.clone(),
                None => file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .context("cannot derive a dataset name from the file; pass --name")?,
            };
            let ds = storage::import(
                &table,
                &ImportOptions {
                    name,
                    columns: columns.clone(),
                    title_column: title_column.clone(),
                    target_column: target_column.clone(),
                    num_of_classes: *clusters,
                    normalise: *normalise,
                },
            )?;
            let ds_name = ds.name().to_string();
            let id = wb.add_dataset(ds)?;
            println!("Imported {ds_name} as {id}");
            Ok(false)
        }
        DatasetsCmd::Generate {
            name,
            samples,
            features,
            centers,
            std,
            seed,
            normalise,
        } => {
            let ds = storage::generate_blobs(&BlobOptions {
                name: name.clone(),
                n_samples: *samples,
                n_features: *features,
                centers: *centers,
                cluster_std: *std,
                seed: *seed,
                normalise: *normalise,
            })?;
            let id = wb.add_dataset(ds)?;
            println!("Generated {name} as {id}");
            Ok(false)
        }
        DatasetsCmd::Remove { dataset } => {
            let runs = wb.remove_dataset(dataset)?;
            println!("Removed {dataset} ({runs} run(s) dropped)");
            Ok(true)
        }
    }
}

fn algorithms(wb: &mut Workbench, cmd: &AlgorithmsCmd) -> Result<bool> {
    match cmd {
        AlgorithmsCmd::List => {
            for (id, algo) in wb.catalog().algorithms.iter() {
                println!("{id:>4}  {:<28} {}", algo.name(), algo.origin());
            }
        }
        AlgorithmsCmd::Show { algorithm } => {
            let catalog = wb.catalog();
            let algo = catalog.algorithms.get(catalog.algorithms.resolve(algorithm)?)?;
            println!("{} ({})", algo.name(), algo.origin());
            let defaults = algo.schema().render_defaults();
            for p in algo.schema().params() {
                let placeholder = match defaults.get(&p.name) {
                    Some(RawParam::Text(t)) => t.as_str(),
                    _ => "",
                };
                println!(
                    "  {:<14} {:<32} [{placeholder}] {}",
                    p.name,
                    p.kind.label(),
                    p.help.as_deref().unwrap_or("")
                );
            }
        }
        AlgorithmsCmd::Load { file } => {
            let ids = wb.load_plugin(file)?;
            for id in ids {
                let algo = wb.catalog().algorithms.get(id)?;
                println!("Loaded {} as {id}", algo.name());
            }
        }
    }
    Ok(false)
}

fn run_one(wb: &mut Workbench, args: &RunArgs, auto_save: bool) -> Result<()> {
    let id = wb.run(RunRequest {
        dataset: args.dataset.clone(),
        algorithm: args.algorithm.clone(),
        name: args.name.clone(),
        params: args.params.to_raw()?,
        scores: args.scores.clone(),
        dedupe: args.dedupe,
    })?;
    report_run(wb, id, auto_save, &args.export, args.json)
}

fn report_run(
    wb: &Workbench,
    id: crate::model::RunId,
    auto_save: bool,
    export: &ExportArgs,
    json: bool,
) -> Result<()> {
    let processed = orchestrator::process_run_completion(
        wb,
        id,
        PostRunOptions {
            auto_save,
            export_json: export.export_json.as_deref(),
            export_csv: export.export_csv.as_deref(),
        },
    )?;
    if json {
        let run = wb.executor().get(id)?;
        let record = RunRecord::from_result(wb.catalog(), run)?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        for line in processed.summary.lines {
            println!("{line}");
        }
    }
    for msg in processed.export_messages {
        eprintln!("{msg}");
    }
    if let Some(p) = processed.auto_saved_path {
        eprintln!("Saved: {}", p.display());
    }
    Ok(())
}

fn runs(wb: &mut Workbench, cmd: &RunsCmd, auto_save: bool) -> Result<bool> {
    match cmd {
        RunsCmd::List { dataset } => {
            let filter = match dataset {
                Some(d) => Some(wb.catalog().datasets.resolve(d)?),
                None => None,
            };
            for (id, run) in wb.executor().results() {
                if filter.is_some_and(|d| d != run.config().dataset) {
                    continue;
                }
                println!("{}", text_summary::run_line(wb.catalog(), id, run));
            }
            Ok(false)
        }
        RunsCmd::Show { run, json } => {
            let id = wb.resolve_run(run)?;
            let result = wb.executor().get(id)?;
            if *json {
                let record = RunRecord::from_result(wb.catalog(), result)?;
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                for line in text_summary::build_run_summary(wb.catalog(), id, result).lines {
                    println!("{line}");
                }
            }
            Ok(false)
        }
        RunsCmd::Remove { run } => {
            wb.remove_run(run)?;
            println!("Removed {run}");
            Ok(true)
        }
        RunsCmd::Rerun {
            run,
            params,
            replace,
            dedupe,
        } => {
            let id = wb.rerun(run, params.to_raw()?, *replace, *dedupe)?;
            report_run(wb, id, auto_save, &ExportArgs::default(), false)?;
            Ok(false)
        }
        RunsCmd::Export { run, export } => {
            if export.export_json.is_none() && export.export_csv.is_none() {
                bail!("nothing to export: pass --export-json and/or --export-csv");
            }
            let id = wb.resolve_run(run)?;
            if let Some(p) = export.export_json.as_deref() {
                orchestrator::export_json(wb, id, p)?;
                println!("Exported JSON: {}", p.display());
            }
            if let Some(p) = export.export_csv.as_deref() {
                orchestrator::export_csv(wb, id, p)?;
                println!("Exported CSV: {}", p.display());
            }
            Ok(false)
        }
        RunsCmd::Compare { runs, dataset } => {
            let filter = match dataset {
                Some(d) => Some(wb.catalog().datasets.resolve(d)?),
                None => None,
            };
            let ids = runs
                .iter()
                .map(|r| wb.resolve_run(r))
                .collect::<Result<Vec<_>>>()?;
            let selected = wb.executor().results().filter(|(id, run)| {
                (ids.is_empty() || ids.contains(id))
                    && filter.map_or(true, |d| d == run.config().dataset)
            });
            let stats = metrics::compare(selected);
            for line in text_summary::build_compare_summary(&stats).lines {
                println!("{line}");
            }
            Ok(false)
        }
    }
}

fn configs(wb: &mut Workbench, cmd: &ConfigsCmd) -> Result<bool> {
    match cmd {
        ConfigsCmd::Add {
            name,
            algorithm,
            params,
        } => {
            wb.add_config(name, algorithm, &params.to_raw()?)?;
            println!("Added configuration {name}");
            Ok(true)
        }
        ConfigsCmd::List => {
            let catalog = wb.catalog();
            for (id, cfg) in catalog.configs.iter() {
                let algo = catalog
                    .algorithms
                    .get(cfg.algorithm)
                    .map(|a| a.name().to_string())?;
                println!("{id:>4}  {:<20} {:<24} [{}]", cfg.name, algo, cfg.params);
            }
            Ok(false)
        }
        ConfigsCmd::Remove { config } => {
            wb.remove_config(config)?;
            println!("Removed configuration {config}");
            Ok(true)
        }
        ConfigsCmd::Run {
            dataset,
            configs,
            scores,
            dedupe,
        } => {
            let outcomes = wb.run_configs(configs, dataset, scores, *dedupe)?;
            let mut ok = 0;
            for (name, outcome) in &outcomes {
                match outcome {
                    Ok(id) => {
                        ok += 1;
                        let run = wb.executor().get(*id)?;
                        println!("{}", text_summary::run_line(wb.catalog(), *id, run));
                    }
                    Err(e) => eprintln!("{name}: {}", user_message(e)),
                }
            }
            println!("{ok}/{} configuration(s) executed", outcomes.len());
            Ok(ok > 0)
        }
    }
}

fn session(wb: &mut Workbench, cmd: &SessionCmd) -> Result<bool> {
    match cmd {
        SessionCmd::Save => {
            let path = wb.save_session()?;
            println!("Saved: {}", path.display());
            Ok(false)
        }
        SessionCmd::Load => {
            let report = wb.restore_session()?;
            if !report.has_session() {
                println!("No session stored in {}", wb.paths().session.display());
                return Ok(false);
            }
            println!(
                "Restored {} run(s) and {} configuration(s) ({} mode)",
                report.runs,
                report.configs,
                wb.mode()
            );
            for reason in &report.skipped {
                eprintln!("skipped: {reason}");
            }
            Ok(false)
        }
        SessionCmd::New { mode } => {
            wb.new_session(*mode);
            println!("Started a new {mode} session");
            Ok(true)
        }
        SessionCmd::Show => {
            println!("Session:  {}", wb.paths().session.display());
            println!("Mode:     {}", wb.mode());
            let catalog = wb.catalog();
            let mut per_dataset: BTreeMap<String, usize> = BTreeMap::new();
            for (_, run) in wb.executor().results() {
                let name = catalog
                    .datasets
                    .get(run.config().dataset)
                    .map(|d| d.name().to_string())?;
                *per_dataset.entry(name).or_insert(0) += 1;
            }
            println!("Runs:     {}", wb.executor().len());
            for (name, n) in per_dataset {
                println!("  {name:<24} {n}");
            }
            println!("Configurations: {}", catalog.configs.len());
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parameter_edits_build_tri_state_input() {
        let cli = Cli::try_parse_from([
            "cluster-lab",
            "run",
            "iris",
            "K-means",
            "--set",
            "n_clusters=3",
            "--null",
            "seed",
            "--unset",
            "tol",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let raw = args.params.to_raw().unwrap();
        assert_eq!(raw["n_clusters"], RawParam::Text("3".into()));
        assert_eq!(raw["seed"], RawParam::Null);
        assert_eq!(raw["tol"], RawParam::Unspecified);
        assert!(cli.auto_save);
    }

    #[test]
    fn conflicting_edits_are_refused() {
        let edits = ParamEdits {
            set: vec![("k".into(), "1".into())],
            null: vec!["k".into()],
            unset: Vec::new(),
        };
        assert!(edits.to_raw().is_err());
        assert!(parse_assignment("novalue").is_err());
        assert_eq!(
            parse_assignment("eps=0.5").unwrap(),
            ("eps".to_string(), "0.5".to_string())
        );
    }

    #[test]
    fn messages_for_known_failures() {
        let dup: anyhow::Error = LabError::DuplicateRun {
            existing: "#4".into(),
        }
        .into();
        assert_eq!(
            user_message(&dup),
            "Algorithm with such parameters has already been launched (#4)"
        );
        let bad: anyhow::Error = LabError::invalid("k", "`x` is not an integer").into();
        assert!(user_message(&bad).starts_with("Invalid parameters:"));
    }

    #[test]
    fn global_flags_parse_anywhere() {
        let cli = Cli::try_parse_from([
            "cluster-lab",
            "session",
            "new",
            "--mode",
            "compare",
            "--auto-save",
            "false",
            "-vv",
        ])
        .unwrap();
        assert!(!cli.auto_save);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::Session(SessionCmd::New {
                mode: AppMode::Compare
            })
        ));
    }
}
