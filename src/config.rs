//! Prep configuration loading and validation.
//!
//! A prep config is a flat set of scalar options describing how a capture
//! should be turned into a training dataset. TOML is the primary format;
//! YAML is accepted for files ending in `.yaml` / `.yml`.
//!
//! ```toml
//! train_method = "nerfacto"
//! sfm_tool = "colmap"
//! matching_method = "exhaustive"
//! database_path = "data/scene/database.db"
//! image_dir = "data/scene/images"
//! camera_model = "OPENCV"
//! use_gpu = 1
//!
//! [tools]
//! colmap = "/opt/colmap/bin/colmap"
//! ```

use anyhow::{bail, Context, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Radiance-field method the prepared dataset is destined for.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrainMethod {
    Nerfacto,
    Splatfacto,
}

impl TrainMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainMethod::Nerfacto => "nerfacto",
            TrainMethod::Splatfacto => "splatfacto",
        }
    }
}

/// Tool used for the mapping stage. Feature extraction and matching always
/// run through COLMAP.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SfmTool {
    Colmap,
    Glomap,
}

impl SfmTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            SfmTool::Colmap => "colmap",
            SfmTool::Glomap => "glomap",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMethod {
    Exhaustive,
    Sequential,
    VocabTree,
}

impl MatchingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingMethod::Exhaustive => "exhaustive",
            MatchingMethod::Sequential => "sequential",
            MatchingMethod::VocabTree => "vocab_tree",
        }
    }

    /// COLMAP subcommand implementing this matching strategy.
    pub fn matcher_subcommand(&self) -> String {
        format!("{}_matcher", self.as_str())
    }
}

/// COLMAP camera model names.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraModel {
    Opencv,
    OpencvFisheye,
    Equirectangular,
    Pinhole,
    SimplePinhole,
}

impl CameraModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraModel::Opencv => "OPENCV",
            CameraModel::OpencvFisheye => "OPENCV_FISHEYE",
            CameraModel::Equirectangular => "EQUIRECTANGULAR",
            CameraModel::Pinhole => "PINHOLE",
            CameraModel::SimplePinhole => "SIMPLE_PINHOLE",
        }
    }

    /// Camera type understood by `ns-process-data --camera-type`.
    pub fn converter_camera_type(&self) -> &'static str {
        match self {
            CameraModel::OpencvFisheye => "fisheye",
            CameraModel::Equirectangular => "equirectangular",
            CameraModel::Opencv | CameraModel::Pinhole | CameraModel::SimplePinhole => {
                "perspective"
            }
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(TrainMethod, SfmTool, MatchingMethod, CameraModel);

/// GPU toggle. Accepts `0`/`1` as well as `true`/`false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuFlag(pub bool);

const GPU_FLAG_ALLOWED: &str = "allowed: 0, 1, true, false";

struct GpuFlagVisitor;

impl<'de> Visitor<'de> for GpuFlagVisitor {
    type Value = GpuFlag;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "use_gpu as 0, 1, true or false")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<GpuFlag, E> {
        Ok(GpuFlag(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<GpuFlag, E> {
        match v {
            0 => Ok(GpuFlag(false)),
            1 => Ok(GpuFlag(true)),
            other => Err(E::custom(format!(
                "invalid value for use_gpu: {} ({})",
                other, GPU_FLAG_ALLOWED
            ))),
        }
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<GpuFlag, E> {
        match v {
            0 => Ok(GpuFlag(false)),
            1 => Ok(GpuFlag(true)),
            other => Err(E::custom(format!(
                "invalid value for use_gpu: {} ({})",
                other, GPU_FLAG_ALLOWED
            ))),
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<GpuFlag, E> {
        match v.trim() {
            "0" | "false" => Ok(GpuFlag(false)),
            "1" | "true" => Ok(GpuFlag(true)),
            _ => Err(E::custom(format!(
                "invalid value for use_gpu: {:?} ({})",
                v, GPU_FLAG_ALLOWED
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for GpuFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(GpuFlagVisitor)
    }
}

impl GpuFlag {
    /// Value passed to COLMAP's `use_gpu` options.
    pub fn as_arg(&self) -> &'static str {
        if self.0 {
            "1"
        } else {
            "0"
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrepConfig {
    pub train_method: TrainMethod,
    pub sfm_tool: SfmTool,
    pub matching_method: MatchingMethod,
    pub database_path: PathBuf,
    pub image_dir: PathBuf,
    pub camera_model: CameraModel,
    pub use_gpu: GpuFlag,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Executables launched for each stage.
#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_colmap")]
    pub colmap: String,
    #[serde(default = "default_glomap")]
    pub glomap: String,
    #[serde(default = "default_ns_process_data")]
    pub ns_process_data: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            colmap: default_colmap(),
            glomap: default_glomap(),
            ns_process_data: default_ns_process_data(),
        }
    }
}

fn default_colmap() -> String {
    "colmap".to_string()
}
fn default_glomap() -> String {
    "glomap".to_string()
}
fn default_ns_process_data() -> String {
    "ns-process-data".to_string()
}

impl ToolsConfig {
    /// Executable for the mapping stage of the given SfM tool.
    pub fn mapper_program(&self, tool: SfmTool) -> &str {
        match tool {
            SfmTool::Colmap => &self.colmap,
            SfmTool::Glomap => &self.glomap,
        }
    }
}

/// On-disk config formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        }
    }
}

pub fn load_config(path: &Path) -> Result<PrepConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content, ConfigFormat::from_path(path))
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate config text.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<PrepConfig> {
    let config: PrepConfig = match format {
        ConfigFormat::Toml => toml::from_str(content).context("Failed to parse TOML config")?,
        ConfigFormat::Yaml => {
            serde_yaml::from_str(content).context("Failed to parse YAML config")?
        }
    };

    config.validate()?;
    Ok(config)
}

impl PrepConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("database_path", &self.database_path),
            ("image_dir", &self.image_dir),
        ] {
            if is_blank(&path.to_string_lossy()) {
                bail!("{} must not be empty", name);
            }
        }

        for (name, value) in [
            ("tools.colmap", &self.tools.colmap),
            ("tools.glomap", &self.tools.glomap),
            ("tools.ns_process_data", &self.tools.ns_process_data),
        ] {
            if is_blank(value) {
                bail!("{} must not be empty", name);
            }
        }

        Ok(())
    }
}

/// Empty or whitespace-only values are treated as missing.
fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Commented template written by `nerfprep init`.
pub const STARTER_CONFIG: &str = r#"# nerfprep configuration
#
# Radiance-field method the dataset is prepared for: nerfacto | splatfacto
train_method = "nerfacto"

# Mapping tool: colmap | glomap
sfm_tool = "colmap"

# Feature matching: exhaustive | sequential | vocab_tree
# vocab_tree needs --vocab-tree-path (or `nerfprep vocab-tree fetch`).
matching_method = "exhaustive"

# COLMAP database (created by feature extraction).
database_path = "data/scene/database.db"

# Directory holding the input images.
image_dir = "data/scene/images"

# OPENCV | OPENCV_FISHEYE | EQUIRECTANGULAR | PINHOLE | SIMPLE_PINHOLE
camera_model = "OPENCV"

# 1 to run SIFT extraction and matching on the GPU, 0 for CPU.
use_gpu = 1

# Optional executable overrides.
# [tools]
# colmap = "colmap"
# glomap = "glomap"
# ns_process_data = "ns-process-data"
"#;

/// Write [`STARTER_CONFIG`] to `path`, refusing to clobber an existing file
/// unless `force` is set.
pub fn write_starter_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_CONFIG: &str = r#"
train_method = "splatfacto"
sfm_tool = "glomap"
matching_method = "vocab_tree"
database_path = "scene/db.db"
image_dir = "scene/images"
camera_model = "OPENCV_FISHEYE"
use_gpu = 0
"#;

    #[test]
    fn parses_toml() {
        let cfg = parse_config(TOML_CONFIG, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.train_method, TrainMethod::Splatfacto);
        assert_eq!(cfg.sfm_tool, SfmTool::Glomap);
        assert_eq!(cfg.matching_method, MatchingMethod::VocabTree);
        assert_eq!(cfg.database_path, PathBuf::from("scene/db.db"));
        assert_eq!(cfg.image_dir, PathBuf::from("scene/images"));
        assert_eq!(cfg.camera_model, CameraModel::OpencvFisheye);
        assert_eq!(cfg.use_gpu, GpuFlag(false));
        assert_eq!(cfg.tools.colmap, "colmap");
    }

    #[test]
    fn parses_yaml() {
        let yaml = "train_method: nerfacto\n\
                    sfm_tool: colmap\n\
                    matching_method: sequential\n\
                    database_path: db.db\n\
                    image_dir: images\n\
                    camera_model: SIMPLE_PINHOLE\n\
                    use_gpu: 1\n";
        let cfg = parse_config(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(cfg.matching_method, MatchingMethod::Sequential);
        assert_eq!(cfg.camera_model, CameraModel::SimplePinhole);
        assert_eq!(cfg.use_gpu, GpuFlag(true));
    }

    #[test]
    fn missing_field_is_rejected() {
        let without_images: String = TOML_CONFIG
            .lines()
            .filter(|l| !l.starts_with("image_dir"))
            .collect::<Vec<_>>()
            .join("\n");
        let err = parse_config(&without_images, ConfigFormat::Toml).unwrap_err();
        assert!(format!("{:#}", err).contains("image_dir"));
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let bad = TOML_CONFIG.replace("\"glomap\"", "\"openmvg\"");
        let err = parse_config(&bad, ConfigFormat::Toml).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("openmvg"), "{}", msg);
        assert!(msg.contains("colmap"), "{}", msg);
    }

    #[test]
    fn use_gpu_accepts_bools_and_rejects_other_ints() {
        let as_bool = TOML_CONFIG.replace("use_gpu = 0", "use_gpu = true");
        let cfg = parse_config(&as_bool, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.use_gpu.as_arg(), "1");

        let bad = TOML_CONFIG.replace("use_gpu = 0", "use_gpu = 2");
        let msg = format!("{:#}", parse_config(&bad, ConfigFormat::Toml).unwrap_err());
        assert!(msg.contains("invalid value for use_gpu: 2"), "{}", msg);

        let as_str = TOML_CONFIG.replace("use_gpu = 0", "use_gpu = \"1\"");
        let cfg = parse_config(&as_str, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.use_gpu, GpuFlag(true));
    }

    #[test]
    fn use_gpu_word_names_field_value_and_allowed_values() {
        let toml_bad = TOML_CONFIG.replace("use_gpu = 0", "use_gpu = \"yes\"");
        let msg = format!("{:#}", parse_config(&toml_bad, ConfigFormat::Toml).unwrap_err());
        assert!(
            msg.contains("invalid value for use_gpu: \"yes\" (allowed: 0, 1, true, false)"),
            "{}",
            msg
        );

        let yaml_bad = "train_method: nerfacto\n\
                        sfm_tool: colmap\n\
                        matching_method: exhaustive\n\
                        database_path: db.db\n\
                        image_dir: images\n\
                        camera_model: OPENCV\n\
                        use_gpu: \"yes\"\n";
        let msg = format!("{:#}", parse_config(yaml_bad, ConfigFormat::Yaml).unwrap_err());
        assert!(
            msg.contains("invalid value for use_gpu: \"yes\" (allowed: 0, 1, true, false)"),
            "{}",
            msg
        );
        assert!(!msg.contains("untagged"), "{}", msg);
    }

    #[test]
    fn empty_paths_are_rejected() {
        let bad = TOML_CONFIG.replace("\"scene/db.db\"", "\"\"");
        let err = parse_config(&bad, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("database_path"));
    }

    #[test]
    fn whitespace_only_paths_are_rejected() {
        let bad = TOML_CONFIG.replace("\"scene/images\"", "\"  \"");
        let err = parse_config(&bad, ConfigFormat::Toml).unwrap_err();
        assert_eq!(err.to_string(), "image_dir must not be empty");

        let bad_tool = format!("{}\n[tools]\ncolmap = \" \"\n", TOML_CONFIG);
        let err = parse_config(&bad_tool, ConfigFormat::Toml).unwrap_err();
        assert_eq!(err.to_string(), "tools.colmap must not be empty");
    }

    #[test]
    fn tool_overrides() {
        let with_tools = format!(
            "{}\n[tools]\nglomap = \"/opt/glomap/bin/glomap\"\n",
            TOML_CONFIG
        );
        let cfg = parse_config(&with_tools, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.tools.mapper_program(SfmTool::Glomap), "/opt/glomap/bin/glomap");
        assert_eq!(cfg.tools.mapper_program(SfmTool::Colmap), "colmap");
        assert_eq!(cfg.tools.ns_process_data, "ns-process-data");
    }

    #[test]
    fn starter_config_is_valid() {
        let cfg = parse_config(STARTER_CONFIG, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.matching_method, MatchingMethod::Exhaustive);
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a")), ConfigFormat::Toml);
    }
}
