use serde::Serialize;
use std::sync::Mutex;

use crate::import::stage::Stage;

/// Structured progress for one import attempt, emitted on every state
/// transition. Observers only watch; pipeline decisions never depend on them.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImportEvent {
    #[serde(rename_all = "camelCase")]
    Started { file_name: String, current: usize, total: usize },
    #[serde(rename_all = "camelCase")]
    Entered { file_name: String, stage: Stage },
    #[serde(rename_all = "camelCase")]
    Recovered { file_name: String, stage: Stage, reason: String },
    #[serde(rename_all = "camelCase")]
    Skipped { file_name: String, book_id: String, reason: String },
    #[serde(rename_all = "camelCase")]
    RolledBack { file_name: String, removed_rows: usize, removed_files: usize },
    #[serde(rename_all = "camelCase")]
    Failed { file_name: String, stage: Stage, message: String },
    #[serde(rename_all = "camelCase")]
    Imported { file_name: String, book_id: String },
}

pub trait ImportObserver: Send + Sync {
    fn emit(&self, event: &ImportEvent);
}

/// Writes every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ImportObserver for LogObserver {
    fn emit(&self, event: &ImportEvent) {
        match event {
            ImportEvent::Started { file_name, current, total } => {
                log::info!("import {}/{}: {}", current, total, file_name)
            }
            ImportEvent::Entered { file_name, stage } => {
                log::debug!("{}: {:?}", file_name, stage)
            }
            ImportEvent::Recovered { file_name, stage, reason } => {
                log::warn!("{}: recovered at {:?}: {}", file_name, stage, reason)
            }
            ImportEvent::Skipped { file_name, book_id, reason } => {
                log::info!("{}: skipped ({}), existing book {}", file_name, reason, book_id)
            }
            ImportEvent::RolledBack { file_name, removed_rows, removed_files } => log::warn!(
                "{}: rolled back {} rows and {} files",
                file_name,
                removed_rows,
                removed_files
            ),
            ImportEvent::Failed { file_name, stage, message } => {
                log::error!("{}: failed at {:?}: {}", file_name, stage, message)
            }
            ImportEvent::Imported { file_name, book_id } => {
                log::info!("{}: imported as {}", file_name, book_id)
            }
        }
    }
}

/// Keeps events in memory; handy for callers that report progress afterwards.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ImportEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ImportEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ImportObserver for RecordingObserver {
    fn emit(&self, event: &ImportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
