//! Command-line and environment configuration for the model lifecycle.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use moodgraph_ai::{LifecycleConfig, LoadMode, MAX_SEQ_LEN, Startup, Strategy};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Resident,
    JustInTime,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StartupArg {
    Lazy,
    Eager,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LoadModeArg {
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Directory holding checkpoints, encoders and tokenizer.json.
    #[arg(long, global = true, env = "MOODGRAPH_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Keep models resident, or load them per request.
    #[arg(long, global = true, env = "MOODGRAPH_STRATEGY", value_enum, default_value = "just-in-time")]
    pub strategy: StrategyArg,

    /// Load on first request, or before serving.
    #[arg(long, global = true, env = "MOODGRAPH_STARTUP", value_enum, default_value = "lazy")]
    pub startup: StartupArg,

    /// Quantize classifier heads to int8 after loading.
    #[arg(
        long,
        global = true,
        env = "MOODGRAPH_QUANTIZE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub quantize: bool,

    /// How to treat checkpoint weights that do not match the model.
    #[arg(long, global = true, env = "MOODGRAPH_LOAD_MODE", value_enum, default_value = "lenient")]
    pub load_mode: LoadModeArg,

    #[arg(long, global = true, env = "MOODGRAPH_HIDDEN_DIM", default_value_t = 768)]
    pub hidden_dim: usize,

    #[arg(long, global = true, env = "MOODGRAPH_MAX_LENGTH", default_value_t = MAX_SEQ_LEN)]
    pub max_length: usize,
}

impl ModelArgs {
    pub fn to_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            model_dir: self.model_dir.clone(),
            strategy: match self.strategy {
                StrategyArg::Resident => Strategy::Resident,
                StrategyArg::JustInTime => Strategy::JustInTime,
            },
            startup: match self.startup {
                StartupArg::Lazy => Startup::Lazy,
                StartupArg::Eager => Startup::Eager,
            },
            quantize: self.quantize,
            load_mode: match self.load_mode {
                LoadModeArg::Strict => LoadMode::Strict,
                LoadModeArg::Lenient => LoadMode::Lenient,
            },
            hidden_dim: self.hidden_dim,
            max_length: self.max_length,
        }
    }
}
