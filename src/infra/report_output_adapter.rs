use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::app::ports::ReportOutputPort;
use crate::pipeline::orchestrator::RunReport;

/// Writes the run report as pretty-printed JSON
pub struct FileReportOutputAdapter {
    path: PathBuf,
}

impl FileReportOutputAdapter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ReportOutputPort for FileReportOutputAdapter {
    async fn write_report(&self, report: &RunReport) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating report directory {}", dir.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("writing run report to {}", self.path.display()))?;
        info!("Run report written to {}", self.path.display());
        Ok(())
    }
}
