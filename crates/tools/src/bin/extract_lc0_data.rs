//! extract_lc0_data - lc0 の学習データアーカイブからデータセットを作る
//!
//! 各 tar アーカイブ（`.gz` メンバーの集まり）を並列に処理し、
//! フィルタを通った局面の（12プレーン特徴量, best_q）を
//! `<アーカイブ名>_features.data` / `<アーカイブ名>_targets.data` に書き出す。
//! 既に出力があるアーカイブは処理しない。
//!
//! # 使用例
//!
//! ```bash
//! cargo run --release -p tools --bin extract_lc0_data -- \
//!   --input 'lc0/training-run1-*.tar' --output-dir data/ --threads 8
//!
//! # 設定ファイルと要約の出力
//! cargo run --release -p tools --bin extract_lc0_data -- \
//!   --input 'lc0/*.tar' --output-dir data/ --config pipeline.toml --summary extract.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use lc0_data::{
    ArchiveProcessor, ArchiveReport, ArchiveStats, DataError, FilterPolicy, MemberErrorPolicy,
    PipelineConfig, ShakmatyRules, process_archives,
};
use tools::common::inputs::expand_input_patterns;
use tools::common::progress::{configure_threads, install_interrupt_handler, progress_bar};
use tools::common::report::{print_extract_summary, write_json_summary};

/// lc0 の学習データアーカイブから特徴量/ターゲットのデータセットを作る
#[derive(Parser)]
#[command(
    name = "extract_lc0_data",
    version,
    about = "Extract filtered, deduplicated (features, target) datasets from lc0 training archives"
)]
struct Cli {
    /// 入力 tar アーカイブ（ファイルまたは glob パターン、複数指定可）
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<String>,

    /// 出力ディレクトリ
    #[arg(short, long)]
    output_dir: PathBuf,

    /// パイプライン設定ファイル（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 並列処理スレッド数（0=自動）
    #[arg(short, long)]
    threads: Option<usize>,

    /// |best_q| がこれを超える局面を除外
    #[arg(long)]
    q_threshold: Option<f32>,

    /// 駒数がこれ以下の局面を除外
    #[arg(long)]
    min_pieces: Option<u32>,

    /// 最善手が駒取りの局面も残す
    #[arg(long)]
    keep_captures: bool,

    /// 壊れた gzip メンバーがあればアーカイブ全体を失敗にする
    #[arg(long)]
    abort_on_corrupt_member: bool,

    /// メンバー末尾の端数バイトを捨てて続行する
    #[arg(long)]
    allow_truncated: bool,

    /// 既存の出力を作り直す
    #[arg(long)]
    overwrite: bool,

    /// 実行結果の JSON 要約の出力先
    #[arg(long)]
    summary: Option<PathBuf>,

    /// 進捗バーを表示しない
    #[arg(long)]
    no_progress: bool,
}

impl Cli {
    /// 設定ファイルを読み、コマンドライン引数で上書きする
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(threads) = self.threads {
            config.extract.threads = threads;
        }
        if let Some(q) = self.q_threshold {
            config.filter.q_threshold = q;
        }
        if let Some(n) = self.min_pieces {
            config.filter.min_pieces = n;
        }
        if self.keep_captures {
            config.filter.drop_captures = false;
        }
        if self.abort_on_corrupt_member {
            config.extract.member_errors = MemberErrorPolicy::Abort;
        }
        if self.allow_truncated {
            config.extract.allow_truncated = true;
        }
        if self.overwrite {
            config.extract.overwrite = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct Failure {
    archive: PathBuf,
    error: String,
}

#[derive(Serialize)]
struct Summary<'a> {
    config: &'a PipelineConfig,
    total: &'a ArchiveStats,
    archives: Vec<&'a ArchiveReport>,
    failures: Vec<Failure>,
    interrupted: bool,
}

fn main() -> Result<()> {
    tools::common::init_logging();
    let cli = Cli::parse();
    let config = cli.pipeline_config()?;

    let archives = expand_input_patterns(&cli.input)?;
    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;

    let cancel = install_interrupt_handler()?;
    configure_threads(config.extract.threads);

    eprintln!("Archives: {}", archives.len());
    eprintln!("Output directory: {}", cli.output_dir.display());
    eprintln!(
        "Filter: q_threshold={}, min_pieces={}, drop_in_check={}, drop_stalemate={}, drop_captures={}",
        config.filter.q_threshold,
        config.filter.min_pieces,
        config.filter.drop_in_check,
        config.filter.drop_stalemate,
        config.filter.drop_captures
    );
    eprintln!("Threads: {}", rayon::current_num_threads());

    let processor = ArchiveProcessor::new(
        FilterPolicy::new(config.filter.clone(), ShakmatyRules),
        config.extract.clone(),
    );
    let progress = progress_bar(archives.len() as u64, cli.no_progress)?;
    let results = process_archives(&processor, &archives, &cli.output_dir, &cancel, |archive, result| {
        progress.set_message(file_label(archive));
        match result {
            Ok(_) | Err(DataError::Cancelled(_)) => {}
            Err(e) => progress.suspend(|| log::error!("{}: {e}", archive.display())),
        }
        progress.inc(1);
    });
    progress.finish_and_clear();
    let results = results.context("Refusing to start extraction")?;

    let mut total = ArchiveStats::default();
    let mut reports = Vec::new();
    let mut failures = Vec::new();
    let mut cancelled = 0usize;
    for (archive, result) in archives.iter().zip(&results) {
        match result {
            Ok(report) => {
                total.add(&report.stats);
                reports.push(report);
            }
            Err(DataError::Cancelled(_)) => cancelled += 1,
            Err(e) => failures.push(Failure {
                archive: archive.clone(),
                error: e.to_string(),
            }),
        }
    }

    print_extract_summary(&total, failures.len());

    for f in &failures {
        eprintln!("Failed: {}: {}", f.archive.display(), f.error);
    }

    let interrupted = cancel.is_cancelled();
    let failed = failures.len();
    if let Some(path) = &cli.summary {
        write_json_summary(
            path,
            &Summary {
                config: &config,
                total: &total,
                archives: reports,
                failures,
                interrupted,
            },
        )?;
        eprintln!("Summary written to {}", path.display());
    }

    if failed > 0 {
        anyhow::bail!("{failed} archive(s) failed");
    }
    if interrupted {
        anyhow::bail!("Interrupted: {cancelled} archive(s) were not processed");
    }
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}
