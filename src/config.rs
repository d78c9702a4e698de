use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::models::{ContestId, SubmissionId};

#[derive(Parser)]
#[command(name = "oj-judge", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Judge pending submissions until interrupted
    Serve {
        /// Seconds between polls for pending submissions
        #[arg(long, default_value_t = 2)]
        poll_interval: u64,
    },
    /// Judge (or rejudge) a single submission and refresh its standing
    Judge { submission_id: SubmissionId },
    /// Print the ranked standings of a contest
    Standings { contest_id: ContestId },
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub languages: Vec<LanguageConfig>,
}

#[derive(Deserialize, Debug, Default)]
pub struct DatabaseConfig {
    /// Defaults to the platform's local data directory
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug)]
pub struct JudgeConfig {
    /// Number of submissions judged concurrently
    #[serde(default = "default_workers")]
    pub workers: u8,
    /// Test cases of one submission run concurrently; defaults to the CPU count
    pub parallelism: Option<usize>,
    #[serde(default = "default_compile_timeout")]
    pub compile_timeout_secs: u64,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            parallelism: None,
            compile_timeout_secs: default_compile_timeout(),
            sandbox: SandboxConfig::default(),
        }
    }
}

fn default_workers() -> u8 {
    1
}

fn default_compile_timeout() -> u64 {
    30
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxConfig {
    /// Plain child processes under rlimits
    Process {
        #[serde(default = "default_true")]
        isolate_network: bool,
    },
    /// The `isolate` sandbox with control groups
    Isolate {
        #[serde(default = "default_box_count")]
        boxes: u32,
    },
    /// One throwaway container per run
    Docker {
        #[serde(default = "default_docker_binary")]
        binary: String,
    },
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::Process {
            isolate_network: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_box_count() -> u32 {
    16
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

#[derive(Deserialize, Debug)]
pub struct ScoringConfig {
    #[serde(default = "default_penalty")]
    pub penalty_per_attempt: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            penalty_per_attempt: default_penalty(),
        }
    }
}

fn default_penalty() -> u32 {
    crate::scoring::PENALTY_PER_ATTEMPT
}

#[derive(Deserialize, Debug, Clone)]
pub struct LanguageConfig {
    pub name: String,
    /// Source file suffix including the dot, e.g. `.cpp`
    pub suffix: String,
    #[serde(default)]
    pub naming: NamingConfig,
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    pub image: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NamingConfig {
    #[default]
    Fixed,
    PublicClass,
}
