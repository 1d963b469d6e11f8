use crate::batch::DEFAULT_WORKERS;
use crate::utils::normalize_extensions;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Csv,
    Tsv,
}

impl ReportFormat {
    pub fn delimiter(self) -> u8 {
        match self {
            ReportFormat::Csv => b',',
            ReportFormat::Tsv => b'\t',
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Tsv => "tsv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReportEncoding {
    Utf8,
    #[default]
    Utf8Bom,
    #[value(alias = "sjis")]
    #[serde(alias = "sjis")]
    ShiftJis,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub root: PathBuf,
    pub extensions: Vec<String>,
    pub excluded_exts: Vec<String>,
    pub excluded_dir: Option<PathBuf>,
    pub workers: usize,
    pub scratch_dir: PathBuf,
    pub report_format: ReportFormat,
    pub report_encoding: ReportEncoding,
    pub http_bind_address: SocketAddr,
    pub lock_release: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            extensions: normalize_extensions(DEFAULT_EXTENSIONS),
            excluded_exts: Vec::new(),
            excluded_dir: None,
            workers: DEFAULT_WORKERS,
            scratch_dir: std::env::temp_dir(),
            report_format: ReportFormat::default(),
            report_encoding: ReportEncoding::default(),
            http_bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            lock_release: true,
        }
    }
}

impl SweepConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            dir: cli_dir,
            extensions: cli_extensions,
            exclude_ext: cli_exclude_ext,
            exclude_dir: cli_exclude_dir,
            workers: cli_workers,
            scratch_dir: cli_scratch_dir,
            format: cli_format,
            encoding: cli_encoding,
            http_bind: cli_http_bind,
            skip_lock_release: cli_skip_lock_release,
            ..
        } = args.clone();

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            dir: file_dir,
            extensions: file_extensions,
            exclude_ext: file_exclude_ext,
            exclude_dir: file_exclude_dir,
            workers: file_workers,
            scratch_dir: file_scratch_dir,
            format: file_format,
            encoding: file_encoding,
            http_bind: file_http_bind,
            lock_release: file_lock_release,
        } = file_config;

        let root = cli_dir.or(file_dir).unwrap_or_else(|| PathBuf::from("."));

        let extensions = normalize_extensions(
            cli_extensions
                .or(file_extensions)
                .unwrap_or_else(|| DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()),
        );
        anyhow::ensure!(
            !extensions.is_empty(),
            "at least one file extension must be provided"
        );

        let excluded_exts =
            normalize_extensions(cli_exclude_ext.or(file_exclude_ext).unwrap_or_default());

        let excluded_dir = cli_exclude_dir
            .or(file_exclude_dir)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| {
                if dir.is_absolute() {
                    dir
                } else {
                    root.join(dir)
                }
            });

        let workers = cli_workers
            .or(file_workers)
            .unwrap_or(DEFAULT_WORKERS)
            .max(1);

        let scratch_dir = cli_scratch_dir
            .or(file_scratch_dir)
            .unwrap_or_else(std::env::temp_dir);

        let report_format = cli_format.or(file_format).unwrap_or_default();
        let report_encoding = cli_encoding.or(file_encoding).unwrap_or_default();

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(addr) => addr,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address invalid")?,
        };

        let lock_release = !cli_skip_lock_release && file_lock_release.unwrap_or(true);

        Ok(Self {
            root,
            extensions,
            excluded_exts,
            excluded_dir,
            workers,
            scratch_dir,
            report_format,
            report_encoding,
            http_bind_address,
            lock_release,
        })
    }

    pub fn ensure_root(&self) -> Result<()> {
        anyhow::ensure!(
            self.root.exists(),
            "target directory {:?} does not exist",
            self.root
        );
        anyhow::ensure!(
            self.root.is_dir(),
            "target {:?} is not a directory",
            self.root
        );
        Ok(())
    }

    /// Relative paths resolve under the configured root.
    pub fn resolve_path<P: AsRef<Path>>(&self, p: P) -> PathBuf {
        let p = p.as_ref();
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "sheet-sweep",
    about = "Bulk text search/replace across a directory of spreadsheet workbooks",
    version
)]
pub struct CliArgs {
    #[arg(long, value_name = "FILE", help = "Path to a configuration file (YAML or JSON)")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        short = 's',
        env = "SHEET_SWEEP_SEARCH",
        value_name = "TEXT",
        help = "Literal text to search for"
    )]
    pub search: Option<String>,

    #[arg(
        long,
        short = 'r',
        env = "SHEET_SWEEP_REPLACE",
        value_name = "TEXT",
        help = "Replacement text; an empty value deletes the match (omit to only search)"
    )]
    pub replace: Option<String>,

    #[arg(
        long,
        conflicts_with = "replace",
        help = "Only report matching cells, never modify a workbook"
    )]
    pub search_only: bool,

    #[arg(
        long,
        short = 'd',
        env = "SHEET_SWEEP_DIR",
        value_name = "DIR",
        help = "Directory to scan recursively (default: current directory)"
    )]
    pub dir: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_SWEEP_EXTENSIONS",
        value_name = "EXT",
        value_delimiter = ',',
        help = "Comma-separated workbook extensions to process (default: xlsx,xlsm)"
    )]
    pub extensions: Option<Vec<String>>,

    #[arg(
        long,
        env = "SHEET_SWEEP_EXCLUDE_EXT",
        value_name = "EXT",
        value_delimiter = ',',
        help = "Comma-separated extensions to skip"
    )]
    pub exclude_ext: Option<Vec<String>>,

    #[arg(
        long,
        env = "SHEET_SWEEP_EXCLUDE_DIR",
        value_name = "DIR",
        help = "Sub-directory to skip entirely (relative to --dir or absolute)"
    )]
    pub exclude_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_SWEEP_WORKERS",
        value_name = "N",
        help = "Number of files processed concurrently (default: 2)",
        value_parser = clap::value_parser!(usize)
    )]
    pub workers: Option<usize>,

    #[arg(
        long,
        env = "SHEET_SWEEP_SCRATCH_DIR",
        value_name = "DIR",
        help = "Directory for temporary save files (default: OS temp dir)"
    )]
    pub scratch_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_SWEEP_FORMAT",
        value_enum,
        value_name = "FORMAT",
        help = "Report format (csv or tsv)"
    )]
    pub format: Option<ReportFormat>,

    #[arg(
        long,
        env = "SHEET_SWEEP_ENCODING",
        value_enum,
        value_name = "ENCODING",
        help = "Report encoding (utf8, utf8-bom or shift-jis)"
    )]
    pub encoding: Option<ReportEncoding>,

    #[arg(
        long,
        env = "SHEET_SWEEP_SKIP_LOCK_RELEASE",
        help = "Do not terminate the desktop spreadsheet application before a batch"
    )]
    pub skip_lock_release: bool,

    #[arg(long, help = "Serve the HTTP API instead of running a single batch")]
    pub serve: bool,

    #[arg(
        long,
        env = "SHEET_SWEEP_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address for --serve (default: 127.0.0.1:8080)"
    )]
    pub http_bind: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    dir: Option<PathBuf>,
    extensions: Option<Vec<String>>,
    exclude_ext: Option<Vec<String>>,
    exclude_dir: Option<PathBuf>,
    workers: Option<usize>,
    scratch_dir: Option<PathBuf>,
    format: Option<ReportFormat>,
    encoding: Option<ReportEncoding>,
    http_bind: Option<SocketAddr>,
    lock_release: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
