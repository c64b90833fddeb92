//! Argument construction for the external tools.
//!
//! Every invocation is built as a program plus an argument vector and handed
//! to the OS without a shell, so paths reach the tools byte-for-byte.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use crate::config::{MatchingMethod, PrepConfig, SfmTool};

/// Tolerance passed to COLMAP's global bundle adjustment during mapping.
pub const COLMAP_BA_GLOBAL_FUNCTION_TOLERANCE: &str = "1e-6";

/// A single external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `flag value` as two separate arguments.
    pub fn opt(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }

    /// The argument following `flag`, if present.
    pub fn value_of(&self, flag: &str) -> Option<&OsString> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
    }

    pub fn to_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            let s = arg.to_string_lossy();
            if s.is_empty() || s.contains(char::is_whitespace) {
                write!(f, " \"{}\"", s)?;
            } else {
                write!(f, " {}", s)?;
            }
        }
        Ok(())
    }
}

/// `colmap feature_extractor` over the configured image directory.
pub fn feature_extractor(config: &PrepConfig) -> ToolCommand {
    ToolCommand::new(&config.tools.colmap)
        .arg("feature_extractor")
        .opt("--database_path", &config.database_path)
        .opt("--image_path", &config.image_dir)
        .opt("--ImageReader.single_camera", "1")
        .opt("--ImageReader.camera_model", config.camera_model.as_str())
        .opt("--SiftExtraction.use_gpu", config.use_gpu.as_arg())
}

/// `colmap <method>_matcher`. `vocab_tree` is required for vocab-tree
/// matching and ignored otherwise.
pub fn feature_matcher(config: &PrepConfig, vocab_tree: Option<&Path>) -> ToolCommand {
    let cmd = ToolCommand::new(&config.tools.colmap)
        .arg(config.matching_method.matcher_subcommand())
        .opt("--database_path", &config.database_path)
        .opt("--SiftMatching.use_gpu", config.use_gpu.as_arg());

    match (config.matching_method, vocab_tree) {
        (MatchingMethod::VocabTree, Some(path)) => {
            cmd.opt("--VocabTreeMatching.vocab_tree_path", path)
        }
        _ => cmd,
    }
}

/// `<sfm_tool> mapper` writing the sparse reconstruction to `sparse_dir`.
pub fn mapper(config: &PrepConfig, sparse_dir: &Path) -> ToolCommand {
    let cmd = ToolCommand::new(config.tools.mapper_program(config.sfm_tool))
        .arg("mapper")
        .opt("--database_path", &config.database_path)
        .opt("--image_path", &config.image_dir)
        .opt("--output_path", sparse_dir);

    match config.sfm_tool {
        SfmTool::Colmap => cmd.arg(format!(
            "--Mapper.ba_global_function_tolerance={}",
            COLMAP_BA_GLOBAL_FUNCTION_TOLERANCE
        )),
        SfmTool::Glomap => cmd,
    }
}

/// `ns-process-data images` reusing the sparse model produced by the mapper.
///
/// `model_rel` is the model directory relative to `output_dir`, which is how
/// the converter resolves `--colmap-model-path`.
pub fn dataset_converter(config: &PrepConfig, output_dir: &Path, model_rel: &Path) -> ToolCommand {
    ToolCommand::new(&config.tools.ns_process_data)
        .arg("images")
        .opt("--data", &config.image_dir)
        .opt("--output-dir", output_dir)
        .opt("--camera-type", config.camera_model.converter_camera_type())
        .arg("--skip-colmap")
        .opt("--colmap-model-path", model_rel)
}

/// Follow-up training command suggested after a successful run.
pub fn training_hint(config: &PrepConfig, output_dir: &Path) -> ToolCommand {
    ToolCommand::new("ns-train")
        .arg(config.train_method.as_str())
        .opt("--data", output_dir)
}
