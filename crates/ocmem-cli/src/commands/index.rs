//! `ocmem index` and `ocmem stats`: one-shot indexing and store stats.

use std::sync::Arc;

use ocmem_config::MemoryConfig;
use ocmem_core::Result;
use ocmem_engine::MemoryService;

async fn open_service(config: MemoryConfig) -> Result<Arc<MemoryService>> {
    let embedder = ocmem_embeddings::provider_from_config(&config.embedding)?;
    Ok(Arc::new(MemoryService::open(config, embedder)?))
}

pub(super) async fn cmd_index(config: MemoryConfig) -> Result<()> {
    let service = open_service(config).await?;

    for (scope, report) in service.index_all().await? {
        println!(
            "{scope}: indexed {} chunks from {} files ({} stale uris removed)",
            report.chunks, report.files, report.removed_uris
        );
    }
    println!("Done.");
    Ok(())
}

pub(super) async fn cmd_stats(config: MemoryConfig) -> Result<()> {
    let service = open_service(config).await?;

    for (scope, stats) in service.stats()? {
        println!(
            "{scope}: {} chunks, {} files, {} tokens",
            stats.total_chunks, stats.total_files, stats.total_tokens
        );
        for (kind, ks) in &stats.by_kind {
            let kind = if kind.is_empty() { "(untyped)" } else { kind };
            println!("  {kind}: {} chunks, {} tokens", ks.chunks, ks.tokens);
        }
    }
    Ok(())
}
