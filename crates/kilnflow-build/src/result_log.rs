//! ビルド結果ログ
//!
//! イメージごとの結果を追記専用で記録し、実行終了時にサマリー行を書き込む。
//! `results.jsonl` の最終行が実行結果を下流に伝える唯一の手段となる。

use crate::error::{BuildError, BuildResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 結果ファイル名
pub const RESULTS_FILE: &str = "results.jsonl";

/// ターゲットの最終状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// ターゲット一つ分のビルド結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub target: String,
    pub image: String,
    pub status: OutcomeStatus,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_because: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl BuildOutcome {
    pub fn success(
        target: impl Into<String>,
        image: impl Into<String>,
        elapsed: Duration,
        image_size: Option<u64>,
        log_path: Option<PathBuf>,
    ) -> Self {
        Self {
            target: target.into(),
            image: image.into(),
            status: OutcomeStatus::Success,
            elapsed,
            image_size,
            log_path,
            error: None,
            skipped_because: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        target: impl Into<String>,
        image: impl Into<String>,
        elapsed: Duration,
        error: impl Into<String>,
        log_path: Option<PathBuf>,
    ) -> Self {
        Self {
            target: target.into(),
            image: image.into(),
            status: OutcomeStatus::Failed,
            elapsed,
            image_size: None,
            log_path,
            error: Some(error.into()),
            skipped_because: None,
            finished_at: Utc::now(),
        }
    }

    /// 一度もビルドされなかったターゲット
    pub fn skipped(
        target: impl Into<String>,
        image: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            image: image.into(),
            status: OutcomeStatus::Skipped,
            elapsed: Duration::ZERO,
            image_size: None,
            log_path: None,
            error: None,
            skipped_because: Some(reason.into()),
            finished_at: Utc::now(),
        }
    }
}

/// プッシュの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Pushed,
    Failed,
}

/// ターゲット一つ分のプッシュ結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    pub target: String,
    pub image: String,
    pub status: PushStatus,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl PushOutcome {
    pub fn pushed(target: impl Into<String>, image: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            target: target.into(),
            image: image.into(),
            status: PushStatus::Pushed,
            elapsed,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        target: impl Into<String>,
        image: impl Into<String>,
        elapsed: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            image: image.into(),
            status: PushStatus::Failed,
            elapsed,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

/// 実行全体のサマリー
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pushed: usize,
    pub push_failed: usize,
    pub cancelled: bool,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// ビルド・プッシュの失敗が一つも無いか
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.push_failed == 0
    }

    /// プロセスの終了コード
    ///
    /// ビルド失敗があれば 1。プッシュ失敗とキャンセルはサマリーに残すだけで
    /// 終了コードには影響しない。
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 { 1 } else { 0 }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum LogLine<'a> {
    Build(&'a BuildOutcome),
    Push(&'a PushOutcome),
    Summary(&'a RunSummary),
}

struct LogState {
    writer: BufWriter<File>,
    builds: Vec<BuildOutcome>,
    pushes: Vec<PushOutcome>,
    recorded: HashSet<String>,
    closed: bool,
    cancelled: bool,
}

impl LogState {
    fn write_line(&mut self, line: &LogLine<'_>) -> BuildResult<()> {
        let json = serde_json::to_string(line)
            .map_err(|e| BuildError::Io(std::io::Error::other(e)))?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// 追記専用の結果ログ
///
/// 複数のワーカーから同時に `record` しても安全。
pub struct ResultLog {
    path: PathBuf,
    started: Instant,
    state: Mutex<LogState>,
}

impl ResultLog {
    /// `{logs_dir}/results.jsonl` を作成（既存の内容は破棄）
    pub fn create(logs_dir: &Path) -> BuildResult<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(RESULTS_FILE);
        let file = File::create(&path)?;

        Ok(Self {
            path,
            started: Instant::now(),
            state: Mutex::new(LogState {
                writer: BufWriter::new(file),
                builds: Vec::new(),
                pushes: Vec::new(),
                recorded: HashSet::new(),
                closed: false,
                cancelled: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        // 書き込み中に panic したワーカーがいても記録は続ける
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// ビルド結果を記録
    pub fn record(&self, outcome: BuildOutcome) -> BuildResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(BuildError::LogClosed);
        }
        if !state.recorded.insert(outcome.target.clone()) {
            return Err(BuildError::DuplicateOutcome(outcome.target));
        }

        // 永続化に失敗してもメモリ上の記録は残す
        let written = state.write_line(&LogLine::Build(&outcome));
        state.builds.push(outcome);
        written
    }

    /// プッシュ結果を記録
    pub fn record_push(&self, outcome: PushOutcome) -> BuildResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(BuildError::LogClosed);
        }

        let written = state.write_line(&LogLine::Push(&outcome));
        state.pushes.push(outcome);
        written
    }

    /// キャンセルされた実行として印を付ける
    pub fn mark_cancelled(&self) {
        self.lock().cancelled = true;
    }

    /// 実行完了。以降の `record` は失敗する
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// 記録済みのビルド結果
    pub fn outcomes(&self) -> Vec<BuildOutcome> {
        self.lock().builds.clone()
    }

    /// 記録済みのプッシュ結果
    pub fn push_outcomes(&self) -> Vec<PushOutcome> {
        self.lock().pushes.clone()
    }

    /// サマリーを計算（`close` 後のみ）
    pub fn summarize(&self) -> BuildResult<RunSummary> {
        let state = self.lock();
        if !state.closed {
            return Err(BuildError::RunInProgress);
        }

        let mut summary = RunSummary {
            cancelled: state.cancelled,
            elapsed: self.started.elapsed(),
            ..Default::default()
        };
        for outcome in &state.builds {
            match outcome.status {
                OutcomeStatus::Success => summary.succeeded += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
            }
        }
        for push in &state.pushes {
            match push.status {
                PushStatus::Pushed => summary.pushed += 1,
                PushStatus::Failed => summary.push_failed += 1,
            }
        }

        Ok(summary)
    }

    /// サマリーを計算して最終行として書き込む
    pub fn finish(&self) -> BuildResult<RunSummary> {
        let summary = self.summarize()?;
        self.lock().write_line(&LogLine::Summary(&summary))?;
        Ok(summary)
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
