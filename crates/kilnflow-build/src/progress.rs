use indicatif::{ProgressBar, ProgressStyle};

/// 実行全体の進捗表示
pub struct RunProgress {
    progress_bar: ProgressBar,
}

impl RunProgress {
    pub fn new(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { progress_bar: pb }
    }

    /// 何も描画しない進捗 (テスト・非TTY用)
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
        }
    }

    pub fn building(&self, target: &str) {
        self.progress_bar
            .set_message(format!("building {}", target));
    }

    /// ターゲットが最終状態になった
    pub fn resolved(&self, target: &str, status: &str) {
        self.progress_bar.inc(1);
        self.progress_bar.set_message(format!("{} {}", target, status));
    }

    pub fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }
}
