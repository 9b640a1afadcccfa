use serde::Serialize;

use crate::error::IngestError;

/// Steps of the per-file pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Validate,
    Hash,
    DedupByHash,
    ExtractMetadata,
    DedupBySameFormat,
    Convert,
    LinkSiblings,
    PlanPath,
    Place,
    Persist,
    ResolveCover,
    BestEffortConvert,
    AutoShelf,
    LogHistory,
}

impl Stage {
    /// Stages whose failure is absorbed with a fallback value. Every other
    /// stage is fatal for the file and unwinds whatever the attempt wrote.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Stage::ExtractMetadata
                | Stage::ResolveCover
                | Stage::BestEffortConvert
                | Stage::AutoShelf
                | Stage::LogHistory
        )
    }
}

/// Result of running one stage.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Ok(T),
    /// The stage failed but produced a usable fallback.
    Recovered { value: T, reason: String },
    Fatal(IngestError),
}

impl<T> StageOutcome<T> {
    /// A result with no fallback: any error is fatal.
    pub fn required<E>(result: Result<T, E>) -> Self
    where
        E: Into<IngestError>,
    {
        match result {
            Ok(value) => StageOutcome::Ok(value),
            Err(err) => StageOutcome::Fatal(err.into()),
        }
    }

    /// Map a stage result through the policy table: recoverable stages
    /// substitute `fallback`, the rest turn fatal.
    pub fn from_result<E>(stage: Stage, result: Result<T, E>, fallback: impl FnOnce() -> T) -> Self
    where
        E: Into<IngestError>,
    {
        match result {
            Ok(value) => StageOutcome::Ok(value),
            Err(err) => {
                let err = err.into();
                if stage.is_recoverable() {
                    StageOutcome::Recovered {
                        value: fallback(),
                        reason: err.to_string(),
                    }
                } else {
                    StageOutcome::Fatal(err)
                }
            }
        }
    }
}
