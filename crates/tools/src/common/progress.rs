//! 進捗表示と Ctrl-C による中断

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use lc0_data::CancelFlag;

/// 件数付きの進捗バー（`hidden` なら何も描画しない）
pub fn progress_bar(len: u64, hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let progress = ProgressBar::new(len);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({per_sec}) {msg}")
            .context("invalid progress bar template")?,
    );
    Ok(progress)
}

/// Ctrl-C で立つ中断フラグを登録する
///
/// 処理中のファイルは最後まで処理し、次のファイルに進む前に止まる。
pub fn install_interrupt_handler() -> Result<CancelFlag> {
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted! Finishing the current file before stopping...");
        handler_flag.cancel();
    })
    .context("Failed to set Ctrl-C handler")?;
    Ok(cancel)
}

/// rayon のグローバルスレッドプールを設定する（0 = 自動）
pub fn configure_threads(threads: usize) {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to set thread count: {e}");
            });
    }
}
