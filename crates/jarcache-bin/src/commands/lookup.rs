use std::path::PathBuf;

use jarcache::{DigestNodeExtractor, NodeReader};
use miette::{Context, IntoDiagnostic};

#[derive(Debug, clap::Parser)]
pub struct Opt {
    /// The ABI archive
    #[clap(required = true)]
    archive: PathBuf,

    /// Path of the class inside the archive, e.g. `com/example/Foo.class`
    #[clap(required = true)]
    class: String,
}

pub fn lookup(opt: Opt) -> miette::Result<()> {
    let reader = NodeReader::open(&opt.archive)
        .into_diagnostic()
        .with_context(|| format!("failed to open {}", opt.archive.display()))?;

    let class = jarcache::normalize_path(&opt.class);
    let entry = reader.lookup_entry(&class).into_diagnostic()?;
    let node = reader.lookup(&class).into_diagnostic()?;
    let (Some(entry), Some(node)) = (entry, node) else {
        return Err(miette::miette!("no node for '{class}' in {}", opt.archive.display()));
    };

    println!("record offset: {}", entry.offset);
    println!("record size:   {}", entry.size);
    println!("record digest: {:016x}", entry.digest);
    match DigestNodeExtractor::decode(&node) {
        Some((node_id, digest, size)) => {
            println!("node id:       {node_id:016x}");
            println!("class digest:  {digest:016x}");
            println!("class size:    {size}");
        }
        None => println!("node:          {} bytes", node.len()),
    }

    Ok(())
}
