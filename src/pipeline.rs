//! The fixed prep pipeline.
//!
//! ```text
//! colmap feature_extractor ─▶ colmap <method>_matcher ─▶ <sfm_tool> mapper ─▶ ns-process-data
//!        (database)                 (database)            (<out>/<tool>/sparse)   (<out>)
//! ```
//!
//! Steps run strictly in order, one at a time. The first failure stops the
//! run; nothing is retried or resumed.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::commands::{self, ToolCommand};
use crate::config::{MatchingMethod, PrepConfig};
use crate::progress::{ProgressReporter, StepEvent};
use crate::prompt::Prompter;
use crate::runner::{CommandRunner, RunOptions};
use crate::vocab_tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    FeatureExtraction,
    FeatureMatching,
    Mapping,
    Conversion,
}

impl StepKind {
    /// Human label, also used in prompts and errors.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::FeatureExtraction => "feature extraction",
            StepKind::FeatureMatching => "feature matching",
            StepKind::Mapping => "mapping",
            StepKind::Conversion => "dataset conversion",
        }
    }

    /// File-name friendly identifier.
    pub fn slug(&self) -> &'static str {
        match self {
            StepKind::FeatureExtraction => "feature_extraction",
            StepKind::FeatureMatching => "feature_matching",
            StepKind::Mapping => "mapping",
            StepKind::Conversion => "conversion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    pub command: ToolCommand,
}

/// Invocation-level options that are not part of the config file.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub output_dir: PathBuf,
    /// Explicit vocabulary tree (`--vocab-tree-path`).
    pub vocab_tree_path: Option<PathBuf>,
    /// Cached vocabulary tree consulted when no explicit path is given.
    pub cached_vocab_tree: Option<PathBuf>,
    pub skip_convert: bool,
    /// Write per-step logs under `<output_dir>/logs`.
    pub log: bool,
}

/// Everything a run will do, computed before anything is launched.
#[derive(Debug, Clone)]
pub struct Plan {
    pub output_dir: PathBuf,
    pub sparse_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub vocab_tree: Option<PathBuf>,
    pub steps: Vec<Step>,
}

/// Sparse model root relative to the output directory: `<sfm_tool>/sparse`.
pub fn sparse_rel(config: &PrepConfig) -> PathBuf {
    Path::new(config.sfm_tool.as_str()).join("sparse")
}

/// Build the plan for `config`. Fails before any tool runs if the vocabulary
/// tree requirement is not met.
pub fn plan(config: &PrepConfig, opts: &PlanOptions) -> Result<Plan> {
    let vocab_tree = match config.matching_method {
        MatchingMethod::VocabTree => Some(vocab_tree::resolve(
            opts.vocab_tree_path.as_deref(),
            opts.cached_vocab_tree.as_deref(),
        )?),
        _ => {
            if opts.vocab_tree_path.is_some() {
                tracing::warn!(
                    matching_method = %config.matching_method,
                    "ignoring --vocab-tree-path: only used with vocab_tree matching"
                );
            }
            None
        }
    };

    let sparse_rel = sparse_rel(config);
    let sparse_dir = opts.output_dir.join(&sparse_rel);
    // The mapper writes its first (and usually only) model as `0`.
    let model_rel = sparse_rel.join("0");

    let mut steps = vec![
        Step {
            kind: StepKind::FeatureExtraction,
            command: commands::feature_extractor(config),
        },
        Step {
            kind: StepKind::FeatureMatching,
            command: commands::feature_matcher(config, vocab_tree.as_deref()),
        },
        Step {
            kind: StepKind::Mapping,
            command: commands::mapper(config, &sparse_dir),
        },
    ];

    if !opts.skip_convert {
        steps.push(Step {
            kind: StepKind::Conversion,
            command: commands::dataset_converter(config, &opts.output_dir, &model_rel),
        });
    }

    Ok(Plan {
        output_dir: opts.output_dir.clone(),
        sparse_dir,
        log_dir: opts.log.then(|| opts.output_dir.join("logs")),
        vocab_tree,
        steps,
    })
}

impl Plan {
    /// Create whatever directories `kind` writes into: the log directory
    /// when logging, and the sparse output directory right before mapping.
    /// Safe to call repeatedly.
    pub fn prepare_step(&self, kind: StepKind) -> Result<()> {
        if let Some(log_dir) = &self.log_dir {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        }
        if kind == StepKind::Mapping {
            std::fs::create_dir_all(&self.sparse_dir).with_context(|| {
                format!(
                    "Failed to create sparse output directory: {}",
                    self.sparse_dir.display()
                )
            })?;
        }
        Ok(())
    }

    pub fn print(&self) {
        for (i, step) in self.steps.iter().enumerate() {
            println!("# {}/{} {}", i + 1, self.steps.len(), step.kind.label());
            println!("{}", step.command);
        }
    }
}

/// How [`execute`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The user declined the given step at the prompt.
    Declined(StepKind),
}

/// Run every step in order.
pub fn execute(
    plan: &Plan,
    verbose: bool,
    runner: &mut dyn CommandRunner,
    reporter: &dyn ProgressReporter,
    prompter: &mut dyn Prompter,
) -> Result<RunOutcome> {
    let total = plan.steps.len();
    for (i, step) in plan.steps.iter().enumerate() {
        let label = step.kind.label();

        if !prompter.confirm(label)? {
            tracing::info!(step = label, "declined at prompt, exiting");
            return Ok(RunOutcome::Declined(step.kind));
        }

        plan.prepare_step(step.kind)?;

        let opts = RunOptions {
            verbose,
            log_file: plan
                .log_dir
                .as_ref()
                .map(|d| d.join(format!("{}.log", step.kind.slug()))),
        };

        reporter.report(StepEvent::Started {
            step: label.to_string(),
            index: i + 1,
            total,
        });
        tracing::info!(step = label, command = %step.command, "running");

        let started = Instant::now();
        match runner.run(label, &step.command, &opts) {
            Ok(_) => reporter.report(StepEvent::Finished {
                step: label.to_string(),
                elapsed: started.elapsed(),
            }),
            Err(e) => {
                reporter.report(StepEvent::Failed {
                    step: label.to_string(),
                    elapsed: started.elapsed(),
                });
                return Err(e);
            }
        }
    }

    Ok(RunOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, ConfigFormat};
    use crate::progress::NoProgress;
    use crate::prompt::AlwaysYes;
    use crate::runner::StepOutput;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn config(sfm: &str, matching: &str) -> PrepConfig {
        let text = format!(
            "train_method = \"nerfacto\"\n\
             sfm_tool = \"{sfm}\"\n\
             matching_method = \"{matching}\"\n\
             database_path = \"db.db\"\n\
             image_dir = \"images\"\n\
             camera_model = \"OPENCV\"\n\
             use_gpu = 1\n"
        );
        parse_config(&text, ConfigFormat::Toml).unwrap()
    }

    fn opts(output_dir: &Path) -> PlanOptions {
        PlanOptions {
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        }
    }

    /// Records invocations and fails on the configured step.
    #[derive(Default)]
    struct FakeRunner {
        calls: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl CommandRunner for FakeRunner {
        fn run(&mut self, step: &str, _cmd: &ToolCommand, _opts: &RunOptions) -> Result<StepOutput> {
            self.calls.push(step.to_string());
            if self.fail_on == Some(step) {
                anyhow::bail!("{} failed (exit code 1)", step);
            }
            Ok(StepOutput::default())
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<StepEvent>>);

    impl ProgressReporter for Recorder {
        fn report(&self, event: StepEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    struct DeclineAt(&'static str);

    impl Prompter for DeclineAt {
        fn confirm(&mut self, step: &str) -> Result<bool> {
            Ok(step != self.0)
        }
    }

    #[test]
    fn plan_has_four_ordered_steps() {
        let plan = plan(&config("colmap", "exhaustive"), &opts(Path::new("out"))).unwrap();
        let kinds: Vec<_> = plan.steps.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::FeatureExtraction,
                StepKind::FeatureMatching,
                StepKind::Mapping,
                StepKind::Conversion
            ]
        );
        assert_eq!(plan.sparse_dir, PathBuf::from("out/colmap/sparse"));
        assert!(plan.vocab_tree.is_none());
        assert!(plan.log_dir.is_none());
    }

    #[test]
    fn conversion_reads_mapper_output() {
        let plan = plan(&config("glomap", "sequential"), &opts(Path::new("out"))).unwrap();
        let mapping = &plan.steps[2].command;
        let conversion = &plan.steps[3].command;

        assert_eq!(mapping.program, "glomap");
        assert_eq!(
            mapping.value_of("--output_path").unwrap(),
            Path::new("out/glomap/sparse").as_os_str()
        );
        assert_eq!(
            conversion.value_of("--colmap-model-path").unwrap(),
            Path::new("glomap/sparse/0").as_os_str()
        );
        assert_eq!(
            conversion.value_of("--output-dir").unwrap(),
            Path::new("out").as_os_str()
        );
    }

    #[test]
    fn skip_convert_drops_last_step() {
        let mut o = opts(Path::new("out"));
        o.skip_convert = true;
        let plan = plan(&config("colmap", "exhaustive"), &o).unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[2].kind, StepKind::Mapping);
    }

    #[test]
    fn vocab_tree_matching_requires_tree() {
        let cfg = config("colmap", "vocab_tree");
        assert!(plan(&cfg, &opts(Path::new("out"))).is_err());

        let mut o = opts(Path::new("out"));
        o.vocab_tree_path = Some(PathBuf::from("trees/t.bin"));
        assert!(plan(&cfg, &o).is_err());

        o.vocab_tree_path = Some(PathBuf::from("trees/t.fbow"));
        let plan = plan(&cfg, &o).unwrap();
        assert_eq!(plan.vocab_tree, Some(PathBuf::from("trees/t.fbow")));
        assert_eq!(
            plan.steps[1]
                .command
                .value_of("--VocabTreeMatching.vocab_tree_path")
                .unwrap(),
            Path::new("trees/t.fbow").as_os_str()
        );
    }

    #[test]
    fn vocab_tree_path_ignored_for_other_methods() {
        let mut o = opts(Path::new("out"));
        o.vocab_tree_path = Some(PathBuf::from("whatever.bin"));
        let plan = plan(&config("colmap", "exhaustive"), &o).unwrap();
        assert!(plan.vocab_tree.is_none());
    }

    #[test]
    fn execute_runs_all_steps_and_creates_dirs() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let mut o = opts(&out);
        o.log = true;
        let plan = plan(&config("colmap", "exhaustive"), &o).unwrap();

        let mut runner = FakeRunner::default();
        let recorder = Recorder::default();
        let outcome = execute(&plan, false, &mut runner, &recorder, &mut AlwaysYes).unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            runner.calls,
            vec!["feature extraction", "feature matching", "mapping", "dataset conversion"]
        );
        assert!(out.join("colmap").join("sparse").is_dir());
        assert!(out.join("logs").is_dir());
        assert_eq!(recorder.0.borrow().len(), 8);
    }

    #[test]
    fn failure_stops_later_steps() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(&config("colmap", "exhaustive"), &opts(tmp.path())).unwrap();

        let mut runner = FakeRunner {
            fail_on: Some("feature matching"),
            ..Default::default()
        };
        let recorder = Recorder::default();
        let err = execute(&plan, false, &mut runner, &recorder, &mut AlwaysYes).unwrap_err();

        assert!(err.to_string().contains("feature matching"));
        assert_eq!(runner.calls, vec!["feature extraction", "feature matching"]);
        let events = recorder.0.borrow();
        assert!(matches!(events.last(), Some(StepEvent::Failed { step, .. }) if step == "feature matching"));
    }

    #[test]
    fn declining_stops_cleanly() {
        let tmp = TempDir::new().unwrap();
        let plan = plan(&config("colmap", "exhaustive"), &opts(tmp.path())).unwrap();

        let mut runner = FakeRunner::default();
        let outcome =
            execute(&plan, false, &mut runner, &NoProgress, &mut DeclineAt("mapping")).unwrap();

        assert_eq!(outcome, RunOutcome::Declined(StepKind::Mapping));
        assert_eq!(runner.calls, vec!["feature extraction", "feature matching"]);
    }

    #[test]
    fn output_dirs_are_created_only_when_steps_run() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        let mut o = opts(&out);
        o.log = true;
        let plan = plan(&config("colmap", "exhaustive"), &o).unwrap();

        let mut runner = FakeRunner::default();
        execute(
            &plan,
            false,
            &mut runner,
            &NoProgress,
            &mut DeclineAt("feature extraction"),
        )
        .unwrap();
        assert!(runner.calls.is_empty());
        assert!(!out.exists());

        execute(&plan, false, &mut runner, &NoProgress, &mut DeclineAt("mapping")).unwrap();
        assert!(out.join("logs").is_dir());
        assert!(!out.join("colmap").exists());

        execute(&plan, false, &mut runner, &NoProgress, &mut AlwaysYes).unwrap();
        assert!(out.join("colmap").join("sparse").is_dir());
    }
}
