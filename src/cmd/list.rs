//! `depot list`

use std::path::Path;

use anyhow::Result;

use crate::cmd::load_context;

pub(crate) fn list(config: &Path) -> Result<()> {
    let ctx = load_context(config)?;

    for name in ctx.registry.names() {
        let Some(pkg) = ctx.registry.get(name) else {
            continue;
        };
        let source = pkg
            .source
            .as_deref()
            .or(pkg.url_template.as_deref())
            .unwrap_or("-");
        let manager = pkg.manager.as_deref().unwrap_or("(inferred)");
        println!("{name:<16} {manager:<16} {source}");
    }
    println!("\n{} package(s) in registry", ctx.registry.len());
    Ok(())
}
