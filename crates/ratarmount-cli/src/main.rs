//! ratarmount binary.
//!
//! Serves indexed archives as a read-only directory tree.
//!
//! ## Usage
//!
//! ```bash
//! # Mount one archive (needs the `fuse` feature)
//! ratarmount -a backup.tar mount /mnt/backup
//!
//! # Inspect without mounting
//! ratarmount -a backup.tar ls /etc
//! ratarmount -a backup.tar stat /etc/passwd
//! ratarmount -a backup.tar cat /etc/passwd --version 1
//! ratarmount -a backup.tar versions /etc/passwd
//!
//! # Several archives, each under /<file name>
//! ratarmount -a a.tar -a b.tar ls /b.tar
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ratarmount_kernel::{
    Dispatch, FileAttr, FileType, MountConfig, MountTable, VersionSelector, VfsOps,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "fuse")]
mod fuse;

/// Read-only filesystem over indexed archives.
#[derive(Parser, Debug)]
#[command(name = "ratarmount", version)]
#[command(about = "Serve indexed archives as a read-only directory tree")]
struct Cli {
    /// RON config file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Archive to serve (repeatable)
    #[arg(short = 'a', long = "archive", global = true)]
    archives: Vec<PathBuf>,

    /// Index file to use instead of searching next to the archive
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    /// Show nested archives as plain files
    #[arg(long, global = true)]
    no_recursive: bool,

    /// Idle index connections kept per archive
    #[arg(long, global = true)]
    max_idle: Option<usize>,

    /// Tokio runtime flavour: one worker or several
    #[arg(long, global = true, value_enum)]
    dispatch: Option<DispatchArg>,

    /// Log verbosity: 0 errors, 1 info, 2 debug, 3 trace
    #[arg(short, long, global = true)]
    debug: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount the archives (requires the `fuse` feature)
    Mount {
        /// Where to mount; falls back to the config's mount_point
        mount_point: Option<PathBuf>,

        /// Block until the filesystem is unmounted externally
        #[arg(short, long)]
        foreground: bool,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show attributes of a path
    Stat { path: String },
    /// Write a member to stdout
    Cat {
        path: String,

        /// 0 newest, n > 0 n-th oldest, -n n before the newest
        #[arg(long, allow_hyphen_values = true, default_value_t = 0)]
        version: i64,
    },
    /// List every stored version of a member
    Versions { path: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DispatchArg {
    Single,
    Multi,
}

impl From<DispatchArg> for Dispatch {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Single => Dispatch::Single,
            DispatchArg::Multi => Dispatch::Multi,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ratarmount: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.debug);

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ratarmount: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: u8) {
    let level = match debug {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<MountConfig> {
    let mut config = match &cli.config {
        Some(path) => MountConfig::load(path)?,
        None => MountConfig::default(),
    };

    if !cli.archives.is_empty() {
        config.sources = cli.archives.clone();
    }
    if let Some(index) = &cli.index {
        config.index = Some(index.clone());
    }
    if cli.no_recursive {
        config.recursive = false;
    }
    if let Some(max_idle) = cli.max_idle {
        config.pool.max_idle = max_idle;
    }
    if let Some(dispatch) = cli.dispatch {
        config.dispatch = dispatch.into();
    }
    if let Some(debug) = cli.debug {
        config.debug = debug;
    }
    if let Command::Mount {
        mount_point,
        foreground,
    } = &cli.command
    {
        if mount_point.is_some() {
            config.mount_point = mount_point.clone();
        }
        config.foreground |= *foreground;
    }

    config.validate()?;
    Ok(config)
}

fn runtime(dispatch: Dispatch) -> std::io::Result<tokio::runtime::Runtime> {
    match dispatch {
        Dispatch::Single => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
        Dispatch::Multi => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build(),
    }
}

fn run(command: Command, config: MountConfig) -> Result<()> {
    let rt = runtime(config.dispatch).context("failed to start runtime")?;
    let table = rt
        .block_on(MountTable::from_config(&config))
        .context("failed to open archives")?;

    let result = match command {
        Command::Mount { .. } => return mount(&rt, table, &config),
        Command::Ls { path } => rt.block_on(cmd_ls(&table, &path)),
        Command::Stat { path } => rt.block_on(cmd_stat(&table, &path)),
        Command::Cat { path, version } => {
            rt.block_on(cmd_cat(&table, &path, VersionSelector::from_raw(version)))
        }
        Command::Versions { path } => rt.block_on(cmd_versions(&table, &path)),
    };
    rt.block_on(table.close());
    result
}

#[cfg(feature = "fuse")]
fn mount(rt: &tokio::runtime::Runtime, table: MountTable, config: &MountConfig) -> Result<()> {
    let mount_point = config
        .mount_point
        .clone()
        .context("no mount point given")?;
    fuse::serve(rt, table, &mount_point, config)
}

#[cfg(not(feature = "fuse"))]
fn mount(rt: &tokio::runtime::Runtime, table: MountTable, _config: &MountConfig) -> Result<()> {
    rt.block_on(table.close());
    anyhow::bail!("this build has no FUSE support; rebuild with --features fuse")
}

fn kind_char(kind: FileType) -> char {
    match kind {
        FileType::Directory => 'd',
        FileType::Symlink => 'l',
        FileType::File => '-',
    }
}

fn mtime_secs(attr: &FileAttr) -> i64 {
    match attr.mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

async fn cmd_ls(table: &MountTable, path: &str) -> Result<()> {
    let dir = Path::new(path);
    let entries = table.readdir(dir).await?;
    let mut out = std::io::stdout().lock();
    for entry in entries {
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        let size = match table.getattr(&dir.join(&entry.name)).await {
            Ok(attr) => attr.size,
            Err(_) => 0,
        };
        writeln!(out, "{} {:>12} {}", kind_char(entry.kind), size, entry.name)?;
    }
    Ok(())
}

async fn cmd_stat(table: &MountTable, path: &str) -> Result<()> {
    let attr = table.getattr(Path::new(path)).await?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "  path: {path}")?;
    writeln!(out, "  type: {:?}", attr.kind)?;
    writeln!(out, "  size: {}", attr.size)?;
    writeln!(out, "  mode: {:o}", attr.mode)?;
    writeln!(out, " links: {}", attr.nlink)?;
    writeln!(out, "   uid: {}", attr.uid)?;
    writeln!(out, "   gid: {}", attr.gid)?;
    writeln!(out, " mtime: {}", mtime_secs(&attr))?;
    if attr.is_symlink() {
        let target = table.readlink(Path::new(path)).await?;
        writeln!(out, "target: {}", target.display())?;
    }
    Ok(())
}

async fn cmd_cat(table: &MountTable, path: &str, version: VersionSelector) -> Result<()> {
    let data = table
        .read_all(Path::new(path), version)
        .await
        .with_context(|| format!("{path} ({version})"))?;
    std::io::stdout().lock().write_all(&data)?;
    Ok(())
}

async fn cmd_versions(table: &MountTable, path: &str) -> Result<()> {
    let versions = table.versions(Path::new(path)).await?;
    let mut out = std::io::stdout().lock();
    for (i, attr) in versions.iter().enumerate() {
        writeln!(
            out,
            "{:>4} {} {:>12} {:>11} {:o}",
            i + 1,
            kind_char(attr.kind),
            attr.size,
            mtime_secs(attr),
            attr.mode
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "ratarmount",
            "-a",
            "/data/a.tar",
            "--no-recursive",
            "--max-idle",
            "2",
            "--dispatch",
            "multi",
            "cat",
            "/x",
            "--version",
            "-1",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.sources, vec![PathBuf::from("/data/a.tar")]);
        assert!(!config.recursive);
        assert_eq!(config.pool.max_idle, 2);
        assert_eq!(config.dispatch, Dispatch::Multi);
        assert!(matches!(cli.command, Command::Cat { version: -1, .. }));
    }

    #[test]
    fn test_mount_point_from_args() {
        let cli = Cli::parse_from(["ratarmount", "-a", "a.tar", "mount", "/mnt/a", "-f"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.mount_point, Some(PathBuf::from("/mnt/a")));
        assert!(config.foreground);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["ratarmount", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);

        // `cat --version` still selects a member version.
        let cli = Cli::parse_from(["ratarmount", "-a", "a.tar", "cat", "/x", "--version", "2"]);
        assert!(matches!(cli.command, Command::Cat { version: 2, .. }));
    }

    #[test]
    fn test_no_archive_is_an_error() {
        let cli = Cli::parse_from(["ratarmount", "ls"]);
        assert!(load_config(&cli).is_err());
    }
}
