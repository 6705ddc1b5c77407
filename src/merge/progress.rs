// Merge progress reporting

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pipeline stage of one merge run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStage {
    Analyzing,
    AutoMerging,
    ConflictResolving,
    Writing,
    Done,
}

impl std::fmt::Display for MergeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStage::Analyzing => write!(f, "analyzing"),
            MergeStage::AutoMerging => write!(f, "auto_merging"),
            MergeStage::ConflictResolving => write!(f, "conflict_resolving"),
            MergeStage::Writing => write!(f, "writing"),
            MergeStage::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeProgress {
    pub stage: MergeStage,
    /// 0-100
    pub percent: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub type ProgressCallback = Arc<dyn Fn(MergeProgress) + Send + Sync>;

/// Emits monotonically advancing stages to an optional callback
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self { callback }
    }

    pub fn report(
        &self,
        stage: MergeStage,
        percent: u8,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let message = message.into();
        log::debug!("[MergeProgress] {} {}% {}", stage, percent, message);
        if let Some(callback) = &self.callback {
            callback(MergeProgress {
                stage,
                percent: percent.min(100),
                message,
                details,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_reporter_forwards_and_clamps() {
        let seen: Arc<Mutex<Vec<MergeProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(Some(Arc::new(move |p| sink.lock().unwrap().push(p))));

        reporter.report(MergeStage::Analyzing, 10, "start", None);
        reporter.report(MergeStage::Done, 150, "end", Some(serde_json::json!({"files": 2})));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].percent, 100);
        assert_eq!(seen[1].details.as_ref().unwrap()["files"], 2);
        assert!(MergeStage::Analyzing < MergeStage::Writing);
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(
            serde_json::to_string(&MergeStage::ConflictResolving).unwrap(),
            "\"conflict_resolving\""
        );
        ProgressReporter::default().report(MergeStage::Writing, 50, "no callback", None);
    }
}
