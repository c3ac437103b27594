//! Feature layer configuration

use common::{FeatureError, FeatureResult};
use serde::{Deserialize, Serialize};

use crate::matrix_profile::MatrixProfileEngine;

/// Parameters for every feature family
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// QC minimums for microstructure metrics
    #[serde(default)]
    pub qc: QcThresholds,

    #[serde(default)]
    pub vpin: VpinConfig,

    #[serde(default)]
    pub matrix_profile: MatrixProfileConfig,

    #[serde(default)]
    pub change_points: ChangePointConfig,

    #[serde(default)]
    pub hawkes: HawkesConfig,
}

impl FeatureConfig {
    /// Load from an optional TOML file layered under `FEATURES__*`
    /// environment overrides (e.g. `FEATURES__VPIN__ROLLING_BARS=20`)
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("FEATURES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: FeatureConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check parameter ranges up front so misconfiguration fails before any
    /// window is processed
    pub fn validate(&self) -> FeatureResult<()> {
        if !(self.vpin.bucket_volume.is_finite() && self.vpin.bucket_volume > 0.0) {
            return Err(FeatureError::invalid_parameter(
                "bucket_volume",
                "a positive finite number",
                self.vpin.bucket_volume,
            ));
        }
        if self.vpin.rolling_bars == 0 {
            return Err(FeatureError::invalid_parameter(
                "rolling_bars",
                "at least 1",
                self.vpin.rolling_bars,
            ));
        }
        if self.matrix_profile.subseq_length <= 1 {
            return Err(FeatureError::invalid_parameter(
                "subseq_length",
                "greater than 1",
                self.matrix_profile.subseq_length,
            ));
        }
        if self.matrix_profile.max_motifs == 0 {
            return Err(FeatureError::invalid_parameter(
                "max_motifs",
                "at least 1",
                self.matrix_profile.max_motifs,
            ));
        }
        if self.change_points.min_size < 2 {
            return Err(FeatureError::invalid_parameter(
                "min_size",
                "at least 2",
                self.change_points.min_size,
            ));
        }
        if self.hawkes.max_iter == 0 {
            return Err(FeatureError::invalid_parameter("max_iter", "at least 1", 0));
        }
        if !(self.hawkes.tol.is_finite() && self.hawkes.tol > 0.0) {
            return Err(FeatureError::invalid_parameter(
                "tol",
                "a positive finite number",
                self.hawkes.tol,
            ));
        }
        Ok(())
    }
}

/// Minimum observation counts behind each QC flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcThresholds {
    /// Quote transitions required for OFI
    #[serde(default = "default_min_obs")]
    pub min_ofi_transitions: usize,

    #[serde(default = "default_min_obs")]
    pub min_book_imbalance_obs: usize,

    /// Matched trade/quote pairs required for Kyle's lambda
    #[serde(default = "default_min_obs")]
    pub min_kyle_pairs: usize,

    #[serde(default = "default_min_obs")]
    pub min_amihud_returns: usize,

    #[serde(default = "default_min_obs")]
    pub min_spread_obs: usize,
}

impl Default for QcThresholds {
    fn default() -> Self {
        Self {
            min_ofi_transitions: 1,
            min_book_imbalance_obs: 1,
            min_kyle_pairs: 1,
            min_amihud_returns: 1,
            min_spread_obs: 1,
        }
    }
}

fn default_min_obs() -> usize {
    1
}

/// Volume bucketing for flow toxicity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpinConfig {
    /// Shares per volume bucket
    #[serde(default = "default_bucket_volume")]
    pub bucket_volume: f64,

    /// Buckets in the rolling VPIN mean
    #[serde(default = "default_rolling_bars")]
    pub rolling_bars: usize,
}

impl Default for VpinConfig {
    fn default() -> Self {
        Self {
            bucket_volume: 10_000.0,
            rolling_bars: 50,
        }
    }
}

fn default_bucket_volume() -> f64 {
    10_000.0
}

fn default_rolling_bars() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixProfileConfig {
    #[serde(default = "default_subseq_length")]
    pub subseq_length: usize,

    #[serde(default = "default_max_motifs")]
    pub max_motifs: usize,

    /// Explicit engine; `None` defers to `MATRIX_PROFILE_ENGINE` at call time
    #[serde(default)]
    pub engine: Option<MatrixProfileEngine>,
}

impl Default for MatrixProfileConfig {
    fn default() -> Self {
        Self {
            subseq_length: 32,
            max_motifs: 3,
            engine: None,
        }
    }
}

fn default_subseq_length() -> usize {
    32
}

fn default_max_motifs() -> usize {
    3
}

/// Offline segmentation and optional online detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePointConfig {
    /// Cost added per segment; larger values yield fewer breaks
    #[serde(default = "default_penalty")]
    pub penalty: f64,

    #[serde(default = "default_min_size")]
    pub min_size: usize,

    /// Keep only the breaks with the largest level deltas
    #[serde(default)]
    pub max_breaks: Option<usize>,

    #[serde(default)]
    pub use_bocpd: bool,

    /// Change probability in (0, 1), or an expected run length above 1
    #[serde(default = "default_bocpd_hazard")]
    pub bocpd_hazard: f64,

    /// Longest run length tracked; at least 1
    #[serde(default)]
    pub bocpd_max_run_length: Option<usize>,
}

impl Default for ChangePointConfig {
    fn default() -> Self {
        Self {
            penalty: 8.0,
            min_size: 10,
            max_breaks: None,
            use_bocpd: false,
            bocpd_hazard: 200.0,
            bocpd_max_run_length: None,
        }
    }
}

fn default_penalty() -> f64 {
    8.0
}

fn default_min_size() -> usize {
    10
}

fn default_bocpd_hazard() -> f64 {
    200.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HawkesConfig {
    /// Initial decay shared by every fit; `None` uses the inverse mean gap
    #[serde(default)]
    pub decay_init: Option<f64>,

    #[serde(default = "default_max_iter")]
    pub max_iter: usize,

    #[serde(default = "default_tol")]
    pub tol: f64,
}

impl Default for HawkesConfig {
    fn default() -> Self {
        Self {
            decay_init: None,
            max_iter: 200,
            tol: 1e-6,
        }
    }
}

fn default_max_iter() -> usize {
    200
}

fn default_tol() -> f64 {
    1e-6
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<FeatureConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: FeatureConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &FeatureConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    let template = "# Feature Engineering Configuration

[qc]
# Minimum observations before a metric passes QC
min_ofi_transitions = 1
min_book_imbalance_obs = 1
min_kyle_pairs = 1
min_amihud_returns = 1
min_spread_obs = 1

[vpin]
# Shares per volume bucket
bucket_volume = 10000.0

# Buckets in the rolling VPIN mean
rolling_bars = 50

[matrix_profile]
subseq_length = 32
max_motifs = 3

# \"naive\" or \"accelerated\"; leave unset to read MATRIX_PROFILE_ENGINE
# engine = \"accelerated\"

[change_points]
penalty = 8.0
min_size = 10
# max_breaks = 5
use_bocpd = false

# Probability in (0, 1) or expected run length above 1
bocpd_hazard = 200.0
# bocpd_max_run_length = 500

[hawkes]
# decay_init = 1.0
max_iter = 200
tol = 1e-6
";

    std::fs::write(path, template)?;
    Ok(())
}
