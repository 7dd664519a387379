//! Dump file naming and stale-generation cleanup

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::errors::StoreError;
use crate::pow::algorithm::ALGORITHM_REVISION;

/// Which of the two dump families a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Cache,
    Dataset,
}

impl DumpKind {
    pub fn prefix(self) -> &'static str {
        match self {
            DumpKind::Cache => "cache",
            DumpKind::Dataset => "full",
        }
    }
}

/// `.be` on big-endian hosts, whose dumps are not interchangeable.
pub fn endian_suffix() -> &'static str {
    if cfg!(target_endian = "big") {
        ".be"
    } else {
        ""
    }
}

/// Canonical dump path: `{prefix}-R{rev}-{epoch}-{seed[..8] hex}[.be]`.
pub fn dump_path(dir: &Path, kind: DumpKind, epoch: u64, seed: &[u8; 32]) -> PathBuf {
    dir.join(format!(
        "{}-R{}-{}-{}{}",
        kind.prefix(),
        ALGORITHM_REVISION,
        epoch,
        hex::encode(&seed[..8]),
        endian_suffix()
    ))
}

#[derive(Debug, PartialEq, Eq)]
enum DumpName {
    Current { epoch: u64 },
    /// Pre-epoch naming scheme (`{prefix}-R{rev}-{seed}`)
    Legacy,
}

fn parse_dump_name(name: &str, kind: DumpKind) -> Option<DumpName> {
    let head = format!("{}-R{}-", kind.prefix(), ALGORITHM_REVISION);
    let rest = name.strip_prefix(&head)?;
    let rest = rest.strip_suffix(endian_suffix()).unwrap_or(rest);
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('-') {
        Some((epoch, seed)) if !seed.is_empty() => {
            if epoch.is_empty() || !epoch.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            epoch.parse().ok().map(|epoch| DumpName::Current { epoch })
        }
        Some(_) => None,
        None => Some(DumpName::Legacy),
    }
}

/// Outcome of a cleanup pass.
#[derive(Debug, Default)]
pub struct GcReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<StoreError>,
}

/// Delete dumps of `kind` in `dir` that fell out of the retention window.
///
/// A dump for epoch `e` survives iff `current - retention < e <= current + 2`.
/// Legacy names are always deleted; names that do not parse are left alone.
/// Per-file failures are logged and collected, never fatal.
pub fn collect_stale_dumps(dir: &Path, kind: DumpKind, current: u64, retention: u64) -> GcReport {
    let mut report = GcReport::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "[ETHASH] Cannot scan dump directory");
            return report;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(parsed) = parse_dump_name(name, kind) else {
            continue;
        };
        let path = entry.path();

        let stale = match parsed {
            DumpName::Legacy => true,
            DumpName::Current { epoch } => {
                epoch.saturating_add(retention) <= current || epoch > current.saturating_add(2)
            }
        };
        if !stale {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                match parsed {
                    DumpName::Legacy => {
                        warn!(kind = kind.prefix(), path = %path.display(), "[ETHASH] Deleted legacy dump")
                    }
                    DumpName::Current { epoch } => {
                        debug!(kind = kind.prefix(), target_epoch = epoch, path = %path.display(), "[ETHASH] Deleted stale dump")
                    }
                }
                report.removed.push(path);
            }
            Err(source) => {
                error!(kind = kind.prefix(), path = %path.display(), error = %source, "[ETHASH] Failed to delete dump");
                report
                    .failures
                    .push(StoreError::StaleFileCleanup { path, source });
            }
        }
    }
    report
}
