use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use jarcache::{
    abi::CLASS_EXTENSION, load_empty, load_from, DigestNodeExtractor, Frontend, OutputAccumulator,
    OutputFile,
};
use jarcache_config::{Config, JarcacheConfig};
use miette::{Context, IntoDiagnostic};
use walkdir::WalkDir;

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// Directory holding the compiler outputs
    #[clap(required = true)]
    outputs: PathBuf,

    /// Configuration files, later files override earlier ones
    #[clap(short, long = "config")]
    config: Vec<PathBuf>,

    /// The primary archive, overrides `archive.primary`
    #[clap(long)]
    primary: Option<PathBuf>,

    /// The ABI archive, overrides `archive.abi` and enables ABI output
    #[clap(long)]
    abi: Option<PathBuf>,

    /// Ignore the previous archives and write everything from scratch
    #[clap(long)]
    full: bool,
}

pub fn sync(opt: Opt) -> miette::Result<()> {
    let config = resolve_config(&opt)?;
    let targets = config.archive_targets().ok_or_else(|| {
        miette::miette!("no primary archive configured, pass --primary or set `archive.primary`")
    })?;
    let with_abi = targets.abi.is_some();

    let accumulator = if opt.full {
        load_empty(with_abi)
    } else {
        match load_from(Some(&targets.primary), targets.abi.as_deref(), with_abi) {
            Ok(accumulator) => accumulator,
            Err(err) if err.requires_full_rebuild() => {
                tracing::warn!("{err}");
                load_empty(with_abi)
            }
            Err(err) => return Err(err).into_diagnostic(),
        }
    };

    let outputs = collect_outputs(&opt.outputs)
        .with_context(|| format!("failed to read {}", opt.outputs.display()))?;
    register_outputs(&accumulator, outputs).into_diagnostic()?;

    if !accumulator.is_changed() {
        tracing::info!("{} is up to date", targets.primary.display());
        return Ok(());
    }

    let summary = accumulator
        .write_archives(&targets, &DigestNodeExtractor, &config.write_options())
        .into_diagnostic()
        .context("failed to write the archives")?;
    tracing::info!(
        "wrote {} entries to {}",
        summary.primary.entry_count,
        summary.primary.path.display()
    );
    if let Some(abi) = summary.abi {
        tracing::info!(
            "wrote {} entries to {}",
            abi.entry_count,
            abi.path.display()
        );
    }

    Ok(())
}

/// Merges the configuration files, applies the command line overrides and
/// validates the result.
fn resolve_config(opt: &Opt) -> miette::Result<JarcacheConfig> {
    let mut config = JarcacheConfig::merge_files(&opt.config).into_diagnostic()?;
    if let Some(primary) = &opt.primary {
        config.archive.primary = Some(primary.clone());
    }
    if let Some(abi) = &opt.abi {
        config.archive.abi = Some(abi.clone());
        config.abi.enabled = Some(true);
    }
    config.validate().into_diagnostic()?;
    Ok(config)
}

/// Registers the outputs and removes everything that is no longer produced.
fn register_outputs(
    accumulator: &OutputAccumulator,
    outputs: Vec<OutputFile>,
) -> Result<(), jarcache::ArchiveError> {
    let produced: HashSet<&str> = outputs.iter().map(|output| output.path.as_str()).collect();
    let stale: Vec<String> = accumulator
        .iterate_package("", true)
        .paths()
        .iter()
        .filter(|path| !produced.contains(path.as_str()))
        .cloned()
        .collect();
    for path in &stale {
        tracing::debug!("removing stale output {path}");
        accumulator.remove(path);
    }

    for output in outputs
        .iter()
        .filter(|output| output.path.ends_with(CLASS_EXTENSION))
    {
        accumulator.register_abi_for(&output.path, &output.content)?;
    }
    accumulator.register_batch(outputs)
}

/// Reads every file below `root`.
fn collect_outputs(root: &Path) -> miette::Result<Vec<OutputFile>> {
    let mut outputs = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.into_diagnostic()?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).into_diagnostic()?;
        let path = jarcache::normalize_path(&relative.to_string_lossy());
        let content = fs_err::read(entry.path()).into_diagnostic()?;
        let output = OutputFile::new(path, content);
        outputs.push(if output.path.ends_with(".kotlin_module") {
            output.with_origin(Frontend::Kotlin)
        } else {
            output
        });
    }
    Ok(outputs)
}
