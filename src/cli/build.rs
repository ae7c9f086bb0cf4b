//! `build` command: run workflows and write their nuts to disk.
//!
//! Each nut lands at `<out>/<workflow>/<version>/<name>`, referenced nuts
//! next to it under their own versions. Gzip-encoded nuts get a `.gz`
//! suffix.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use crossbeam::queue::SegQueue;
use rayon::prelude::*;

use assetflow::logger::ProgressLine;
use assetflow::nut::Nut;
use assetflow::scheduler::InlineContext;
use assetflow::{Engine, Workflow, debug, log};

use super::is_shutdown;

/// What a build wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    pub workflows: usize,
    pub files: usize,
}

/// Build every workflow (or only `only`) into `out`, in parallel.
pub fn build_all(engine: &Engine, out: &Path, only: Option<&str>, quiet: bool) -> Result<BuildReport> {
    let workflows = match only {
        Some(id) => vec![engine.workflow(id)?],
        None => engine.workflows(),
    };
    if workflows.is_empty() {
        log!("build"; "no workflow configured");
        return Ok(BuildReport::default());
    }

    let progress = (!quiet).then(|| ProgressLine::new("build", &[("workflows", workflows.len())]));
    let failures = SegQueue::new();
    let files = AtomicUsize::new(0);

    workflows.par_iter().for_each(|workflow| {
        if is_shutdown() {
            return;
        }
        match build_workflow(workflow, out) {
            Ok(count) => {
                files.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => failures.push((workflow.id().to_string(), e)),
        }
        if let Some(p) = &progress {
            p.inc("workflows");
        }
    });

    if let Some(p) = progress {
        p.finish();
    }

    let mut failed = 0;
    while let Some((id, e)) = failures.pop() {
        log!("error"; "{id}: {e:#}");
        failed += 1;
    }
    if failed > 0 {
        bail!("{failed} workflow(s) failed");
    }

    Ok(BuildReport {
        workflows: workflows.len(),
        files: files.into_inner(),
    })
}

/// Run one workflow and write its nuts; returns the number of files.
pub fn build_workflow(workflow: &Workflow, out: &Path) -> Result<usize> {
    let nuts = workflow
        .run(Arc::new(InlineContext))
        .with_context(|| format!("workflow '{}'", workflow.id()))?;

    let counts = nuts
        .par_iter()
        .map(|nut| write_nut(out, workflow.id(), nut))
        .collect::<Result<Vec<_>>>()?;
    let total: usize = counts.iter().sum();
    debug!("build"; "{}: {} file(s)", workflow.id(), total);
    Ok(total)
}

/// Where `nut` is written for `workflow_id`.
pub fn output_path(out: &Path, workflow_id: &str, nut: &Nut) -> Result<PathBuf> {
    let version = nut
        .version()
        .with_context(|| format!("version of '{}'", nut.name()))?;
    let name = nut.name().trim_start_matches('/');
    let file = match nut.content_encoding() {
        Some("gzip") => format!("{name}.gz"),
        _ => name.to_string(),
    };
    Ok(out.join(workflow_id).join(version.to_string()).join(file))
}

fn write_nut(out: &Path, workflow_id: &str, nut: &Nut) -> Result<usize> {
    let path = output_path(out, workflow_id, nut)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let execution = nut
        .transform()
        .with_context(|| format!("transforming '{}'", nut.name()))?;
    let file = fs::File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    execution
        .write_to(file)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    let mut written = 1;
    for referenced in nut.referenced() {
        written += write_nut(out, workflow_id, referenced)?;
    }
    Ok(written)
}
