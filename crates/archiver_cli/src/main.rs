mod cli;
mod logging;

use std::sync::Arc;

use anyhow::Context;
use archiver_engine::{
    DirectorySink, DocumentRef, EngineConfig, ExportOrchestrator, ExportSummary, LogProgressSink,
};
use clap::Parser;
use engine_logging::{engine_info, engine_warn};

use crate::cli::{Cli, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(logging::level_for(cli.verbose), cli.log_file.as_deref());

    let config = resolve_config(&cli)?;
    engine_info!("Writing exports to {:?}", config.output_dir);
    let sink = Arc::new(DirectorySink::new(config.output_dir.clone()));
    let orchestrator =
        ExportOrchestrator::new(config, sink).with_progress(Arc::new(LogProgressSink));

    let cancel = orchestrator.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            engine_warn!("Interrupted, cancelling export");
            cancel.cancel();
        }
    });

    let summary = match cli.command {
        Command::Story { target } => orchestrator
            .export_story(&target)
            .await
            .with_context(|| format!("exporting story {target}"))?,
        Command::Document { id, title } => orchestrator
            .export_document(&id, title.as_deref())
            .await
            .with_context(|| format!("exporting document {id}"))?,
        Command::Documents { ids } => {
            let documents = ids
                .into_iter()
                .map(|id| DocumentRef {
                    label: format!("Document {id}"),
                    id,
                })
                .collect();
            orchestrator
                .export_documents(documents)
                .await
                .context("exporting documents")?
        }
    };

    println!("{}", describe(&summary));
    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if cli.no_cover {
        config.cover.enabled = false;
    }
    Ok(config)
}

fn describe(summary: &ExportSummary) -> String {
    let location = summary
        .saved_to
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| summary.filename.clone());
    let mut line = format!(
        "Saved {} ({} bytes): {} of {} fetched",
        location, summary.byte_len, summary.success_count, summary.total_units
    );
    if summary.permanent_failure_count > 0 {
        line.push_str(&format!(
            ", {} could not be retrieved",
            summary.permanent_failure_count
        ));
    }
    line
}
