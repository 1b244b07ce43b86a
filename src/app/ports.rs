use async_trait::async_trait;

use crate::domain::{RawRecord, StoreRow, StoredRow};
use crate::error::Result;
use crate::pipeline::orchestrator::RunReport;

/// Write side of the store. One call commits one batch atomically or fails
/// as a whole.
#[async_trait]
pub trait StoreWriterPort: Send + Sync {
    async fn write_batch(&self, rows: &[StoreRow]) -> Result<()>;
}

/// Read side of the store, used only by post-load validation
#[async_trait]
pub trait StoreReaderPort: Send + Sync {
    /// Full committed dataset
    async fn fetch_all(&self) -> Result<Vec<StoredRow>>;

    async fn count(&self) -> Result<usize> {
        Ok(self.fetch_all().await?.len())
    }
}

/// Producer of raw records (the fetch stage's output). An error here is
/// fatal for the run.
pub trait RawRecordSourcePort: Send + Sync {
    fn read_all(&self) -> Result<Vec<RawRecord>>;

    fn describe(&self) -> String;
}

/// Consumer of the finished run report
#[async_trait]
pub trait ReportOutputPort: Send + Sync {
    async fn write_report(&self, report: &RunReport) -> anyhow::Result<()>;
}
