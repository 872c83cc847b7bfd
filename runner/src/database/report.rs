use super::{Archive, ConfigurationSnapshot, ConnectionError, WalkerKey, WalkerSummary};
use crate::parameters::ParameterSpace;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct WalkerReport {
    pub source: PathBuf,
    pub key: WalkerKey,
    pub summary: WalkerSummary,
    pub recorded: usize,
    /// a solver state is stored, the walker can be continued
    pub resumable: bool,
}

/// Walkers of one logical run, possibly spread over several archive files
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub parameters: Option<ParameterSpace>,
    pub walkers: Vec<WalkerReport>,
}

impl Report {
    pub fn best(&self) -> Option<&WalkerReport> {
        self.walkers
            .iter()
            .filter(|walker| walker.summary.best_value.is_some())
            .min_by(|a, b| {
                a.summary
                    .best_value
                    .unwrap_or(f64::INFINITY)
                    .total_cmp(&b.summary.best_value.unwrap_or(f64::INFINITY))
            })
    }

    pub fn terminated(&self) -> usize {
        self.walkers
            .iter()
            .filter(|walker| walker.summary.completion.is_terminated())
            .count()
    }

    pub fn evaluations(&self) -> u64 {
        self.walkers
            .iter()
            .map(|walker| walker.summary.evaluations)
            .sum()
    }
}

/// Read every walker of all archives, the archives have to share one parameter layout.
///
/// Archives without a configuration are skipped with a warning.
pub fn read_archives<P: AsRef<Path>>(paths: &[P]) -> Result<Report, ConnectionError> {
    let mut report = Report::default();
    let mut reference: Option<ConfigurationSnapshot> = None;

    for path in paths.iter().map(AsRef::as_ref) {
        let archive = Archive::open_read_only(path)?;

        let snapshot = match archive.load_configuration()? {
            Some(snapshot) => snapshot,
            None => {
                warn!(path = ?path, "Archive contains no configuration, skipping it");
                archive.close()?;

                continue;
            }
        };

        match &reference {
            Some(reference) => reference.validate(&snapshot.parameters)?,
            None => {
                report.parameters = Some(snapshot.parameters.clone());
                reference = Some(snapshot);
            }
        }

        for key in archive.keys()? {
            if let Some(entry) = archive.load(&key)? {
                report.walkers.push(WalkerReport {
                    source: path.to_path_buf(),
                    key,
                    recorded: entry.record.history.len(),
                    resumable: entry.state.is_some(),
                    summary: entry.record.summary,
                });
            }
        }

        debug!(path = ?path, walkers = report.walkers.len(), "Read archive");
        archive.close()?;
    }

    Ok(report)
}
