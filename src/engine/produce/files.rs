//! File-tree archive producer.
//!
//! Walks every include root depth-first and appends matching files into a
//! single uncompressed tar, preserving paths relative to their root. The
//! exclusion test is plain substring containment over the full path, not a
//! glob. Unreadable walk entries are skipped with a warning, matching the
//! tolerance of a long-running nightly job; a write failure into the archive
//! itself is fatal.

use crate::engine::definition::BackupJobDefinition;
use crate::engine::function_path;
use crate::engine::produce::ArtifactSpec;
use crate::engine::result_error::error::Error;
use crate::engine::result_error::result::Result;
use crate::engine::result_error::WithFnName;
use function_name::named;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Appends `include_paths` (and, for full-system runs, an already produced
/// dump file) into one tar artifact. The folded dump is deleted after it is
/// archived; it lives on inside the tar.
#[named]
pub fn archive_files(
    definition: &BackupJobDefinition,
    run_dir: &Path,
    stamp: &str,
    fold_in: Option<&Path>,
) -> Result<ArtifactSpec> {
    let prefix = if fold_in.is_some() { "full" } else { "files" };
    let out_path = run_dir.join(format!("{prefix}_{stamp}.tar"));
    let mut builder = tar::Builder::new(BufWriter::new(File::create_new(&out_path)?));
    builder.follow_symlinks(true);

    let mut items_count = 0u64;
    let mut source_bytes = 0u64;

    for root in definition.include_paths().iter() {
        if !root.exists() {
            warn!("Skipping missing include path {:?}", root);
            continue;
        }
        debug!("Walking include path {:?}", root);
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", root, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_excluded(path, definition.exclude_patterns()) {
                trace!("Excluding {:?}", path);
                continue;
            }
            let arc_name = path.strip_prefix(root).unwrap_or(path);
            trace!("Including file {:?} -> {:?}", path, arc_name);
            builder
                .append_path_with_name(path, arc_name)
                .map_err(Error::from)
                .with_fn_name(function_path!())?;
            source_bytes += entry.metadata().map(|md| md.len()).unwrap_or(0);
            items_count += 1;
        }
    }

    if let Some(dump) = fold_in {
        let arc_name: PathBuf = dump
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("database.sql"));
        builder.append_path_with_name(dump, &arc_name)?;
        std::fs::remove_file(dump)?;
        items_count += 1;
    }

    builder
        .into_inner()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    let raw_size = std::fs::metadata(&out_path)?.len();
    info!("Archived {items_count} items ({source_bytes} source bytes) into {out_path:?}");
    Ok(ArtifactSpec {
        path: Some(out_path),
        raw_size,
        items_count,
        final_size: None,
    })
}

fn is_excluded(path: &Path, patterns: &[String]) -> bool {
    let path = path.to_string_lossy();
    patterns.iter().any(|pattern| path.contains(pattern.as_str()))
}
