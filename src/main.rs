use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::{info, LevelFilter};
use seedemu::base::BaseMerger;
use seedemu::compiler::ManifestCompiler;
use seedemu::config::{load_config, BuildConfig};
use seedemu::merge::Merger;
use seedemu::service::{ServiceMerger, WebServer};
use seedemu::snapshot::{LayerCatalog, SnapshotFormat};
use seedemu::Emulator;
use std::path::{Path, PathBuf};

/// Inspect, merge and render emulator topology snapshots
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the build configuration YAML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the layers and bindings of a snapshot
    Inspect {
        /// Snapshot file (JSON or binary)
        snapshot: PathBuf,
    },
    /// Merge two snapshots into a new one
    Merge {
        first: PathBuf,
        second: PathBuf,
        /// Output snapshot path
        #[arg(short, long)]
        output: PathBuf,
        /// Prefix applied to the second snapshot's virtual nodes
        #[arg(long)]
        vnode_prefix: Option<String>,
        /// Output encoding; defaults to the file extension, then the config
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    /// Render a snapshot and write its manifest
    Render {
        snapshot: PathBuf,
        /// Output directory for compiled artifacts
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
        /// Seed for RANDOM bindings, overriding the snapshot and config
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Json,
    Binary,
}

impl From<FormatArg> for SnapshotFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => SnapshotFormat::Json,
            FormatArg::Binary => SnapshotFormat::Binary,
        }
    }
}

fn standard_mergers() -> Vec<Box<dyn Merger>> {
    vec![Box::new(BaseMerger), Box::new(ServiceMerger::<WebServer>::new())]
}

fn load_snapshot(path: &Path) -> Result<Emulator> {
    Emulator::load(path, &LayerCatalog::standard())
        .wrap_err_with(|| format!("Failed to load snapshot '{}'", path.display()))
}

/// Output format: explicit flag, then a telling file extension, then config.
fn output_format(path: &Path, flag: Option<FormatArg>, config: &BuildConfig) -> SnapshotFormat {
    if let Some(flag) = flag {
        return flag.into();
    }
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => SnapshotFormat::Json,
        Some(_) if SnapshotFormat::from_path(path) == SnapshotFormat::Binary => SnapshotFormat::Binary,
        _ => config.snapshot.format,
    }
}

fn run(command: Command, config: &BuildConfig) -> Result<()> {
    match command {
        Command::Inspect { snapshot } => {
            let emu = load_snapshot(&snapshot)?;
            print!("{}", emu.describe());
        }
        Command::Merge {
            first,
            second,
            output,
            vnode_prefix,
            format,
        } => {
            let a = load_snapshot(&first)?;
            let b = load_snapshot(&second)?;
            let prefix = vnode_prefix.or_else(|| config.merge.vnode_prefix.clone());
            let merged = a
                .merge(b, &standard_mergers(), prefix.as_deref())
                .wrap_err("Failed to merge snapshots")?;

            let format = output_format(&output, format, config);
            merged
                .dump(&output, format, config.snapshot.compression_level)
                .wrap_err_with(|| format!("Failed to write '{}'", output.display()))?;
            info!("Merged snapshot written to {:?}", output);
        }
        Command::Render { snapshot, output, seed } => {
            let mut emu = load_snapshot(&snapshot)?;
            if let Some(seed) = seed.or(config.general.seed) {
                emu.reseed(seed);
            }
            emu.render().wrap_err("Failed to render emulator")?;
            let files = emu
                .compile(&ManifestCompiler::default(), &output)
                .wrap_err_with(|| format!("Failed to compile into '{}'", output.display()))?;

            for (vnode, node) in emu.bound_vnodes() {
                println!("{} -> {}", vnode, node);
            }
            for file in files {
                info!("Wrote {:?}", file);
            }
        }
    }
    Ok(())
}

/// Level applied when RUST_LOG is unset: the config's, else `info`.
fn default_log_level(config: Option<&BuildConfig>) -> LevelFilter {
    config
        .and_then(|config| config.general.log_level.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    // The config's own level is only known once it is loaded
    let rust_log = std::env::var_os("RUST_LOG").is_some();
    env_logger::Builder::from_env(Env::default().default_filter_or("trace")).init();
    if !rust_log {
        log::set_max_level(default_log_level(None));
    }

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => BuildConfig::default(),
    };
    if !rust_log {
        log::set_max_level(default_log_level(Some(&config)));
    }

    info!("Starting seedemu");
    run(args.command, &config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_args() {
        let args = Args::parse_from([
            "seedemu",
            "merge",
            "a.json",
            "b.json",
            "--output",
            "out.bin",
            "--vnode-prefix",
            "b_",
        ]);
        match args.command {
            Command::Merge {
                first,
                output,
                vnode_prefix,
                format,
                ..
            } => {
                assert_eq!(first, PathBuf::from("a.json"));
                assert_eq!(output, PathBuf::from("out.bin"));
                assert_eq!(vnode_prefix.as_deref(), Some("b_"));
                assert_eq!(format, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_render_defaults_and_global_config() {
        let args = Args::parse_from(["seedemu", "render", "topo.json", "--config", "build.yaml"]);
        assert_eq!(args.config, Some(PathBuf::from("build.yaml")));
        match args.command {
            Command::Render { output, seed, .. } => {
                assert_eq!(output, PathBuf::from("output"));
                assert_eq!(seed, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_default_log_level_follows_config() {
        let mut config = BuildConfig::default();
        config.general.log_level = "DEBUG".to_string();
        assert_eq!(default_log_level(Some(&config)), LevelFilter::Debug);
        assert_eq!(default_log_level(Some(&BuildConfig::default())), LevelFilter::Info);
        assert_eq!(default_log_level(None), LevelFilter::Info);
    }

    #[test]
    fn test_output_format_precedence() {
        let mut config = BuildConfig::default();
        config.snapshot.format = SnapshotFormat::Binary;

        assert_eq!(output_format(Path::new("x.bin"), Some(FormatArg::Json), &config), SnapshotFormat::Json);
        assert_eq!(output_format(Path::new("x.json"), None, &config), SnapshotFormat::Json);
        assert_eq!(output_format(Path::new("x.zst"), None, &BuildConfig::default()), SnapshotFormat::Binary);
        assert_eq!(output_format(Path::new("x.snap"), None, &config), SnapshotFormat::Binary);
    }
}
