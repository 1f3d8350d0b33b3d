//! Release archive packaging

use crate::core::{render_template, Job};
use crate::publish::PublishError;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Inputs for one release archive
pub struct PackageSpec<'a> {
    pub crate_name: &'a str,
    pub tag: &'a str,
    pub binaries: &'a [String],
    pub include: &'a [String],
    pub archive_template: &'a str,
}

/// Archive file stem, e.g. `engine-v1.0.0-x86_64-unknown-linux-gnu`
pub fn archive_name(spec: &PackageSpec<'_>, job: &Job) -> String {
    let mut vars = HashMap::new();
    vars.insert("crate_name".to_string(), spec.crate_name.to_string());
    vars.insert("tag".to_string(), spec.tag.to_string());
    vars.insert("target".to_string(), job.target().to_string());
    vars.insert("channel".to_string(), job.channel().to_string());
    render_template(spec.archive_template, &vars)
}

/// Location of a release binary inside a job's build output
pub fn binary_path(build_output: &Path, job: &Job, binary: &str) -> PathBuf {
    let file = if job.is_windows() {
        format!("{}.exe", binary)
    } else {
        binary.to_string()
    };
    build_output.join(job.target()).join("release").join(file)
}

/// Write `staging/<archive name>.zip` and return its path.
///
/// Every binary must exist; extra files are resolved against `workspace`.
pub fn package(
    spec: &PackageSpec<'_>,
    job: &Job,
    build_output: &Path,
    workspace: &Path,
    staging: &Path,
) -> Result<PathBuf, PublishError> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();

    for binary in spec.binaries {
        let path = binary_path(build_output, job, binary);
        if !path.is_file() {
            return Err(PublishError::MissingArtifact { path });
        }
        entries.push((file_name(&path)?, path));
    }

    for extra in spec.include {
        let path = workspace.join(extra);
        if !path.is_file() {
            return Err(PublishError::MissingArtifact { path });
        }
        entries.push((file_name(&path)?, path));
    }

    fs::create_dir_all(staging)?;
    let archive = staging.join(format!("{}.zip", archive_name(spec, job)));

    write_or_remove(&archive, &entries)?;
    Ok(archive)
}

/// Write the archive; a failed write leaves no file behind
fn write_or_remove(archive: &Path, entries: &[(String, PathBuf)]) -> Result<(), PublishError> {
    let result = write_archive(archive, entries);
    if result.is_err() {
        if let Err(e) = fs::remove_file(archive) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial archive {}: {}", archive.display(), e);
            }
        }
    }
    result
}

fn write_archive(archive: &Path, entries: &[(String, PathBuf)]) -> Result<(), PublishError> {
    let file = fs::File::create(archive)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);

    for (name, path) in entries {
        debug!("Adding {} to {}", path.display(), archive.display());
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&fs::read(path)?)?;
    }
    zip.finish()?;
    Ok(())
}

fn file_name(path: &Path) -> Result<String, PublishError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PublishError::Packaging(format!("{} has no file name", path.display())))
}
