use std::path::PathBuf;

use jarcache::{ArchiveHandle, INDEX_ENTRY_NAME};
use jarcache_node_index::NodeIndexView;
use miette::{Context, IntoDiagnostic};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The archive to inspect
    #[clap(required = true)]
    archive: PathBuf,
}

pub fn inspect(opt: Opt) -> miette::Result<()> {
    let (handle, entries) = ArchiveHandle::open(&opt.archive)
        .into_diagnostic()
        .with_context(|| format!("failed to open {}", opt.archive.display()))?;

    for entry in &entries {
        println!(
            "{:>10} {:>10}  {}",
            entry.location.offset, entry.location.size, entry.name
        );
    }
    println!("{} entries", entries.len());

    if let Some(index) = entries.iter().find(|entry| entry.name == INDEX_ENTRY_NAME) {
        let bytes = handle.resolve(&index.location).into_diagnostic()?;
        let view = NodeIndexView::parse(&bytes)
            .into_diagnostic()
            .context("the node index is corrupt")?;
        println!("{} dependency graph nodes", view.len());
    }

    Ok(())
}
