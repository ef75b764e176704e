//! merge_datasets - アーカイブごとのデータセットを1つに統合する
//!
//! 入力ディレクトリの `*features.data` / `*targets.data` を名前順に読み込み、
//! 1組ごとに重複を除去しながら統合して1組のファイルに書き出す。
//! 同じ局面が複数あるときは先に読んだ組のターゲットを残す。
//!
//! # 使用例
//!
//! ```bash
//! # data/ 内の全データセットを data/features.data, data/targets.data に統合
//! cargo run --release -p tools --bin merge_datasets -- --input-dir data/
//!
//! # 先頭200組だけを使う
//! cargo run --release -p tools --bin merge_datasets -- --input-dir data/ --bounded
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use lc0_data::merge::DEFAULT_FILE_LIMIT;
use lc0_data::{DatasetPaths, MergeEngine, PipelineConfig, discover_pairs};
use tools::common::progress::{configure_threads, install_interrupt_handler, progress_bar};
use tools::common::report::{format_number, print_merge_summary, write_json_summary};

/// データセットの組を統合して重複を除去する
#[derive(Parser)]
#[command(
    name = "merge_datasets",
    version,
    about = "Merge per-archive (features, targets) datasets into one deduplicated pair"
)]
struct Cli {
    /// データセットを探すディレクトリ
    #[arg(short, long)]
    input_dir: PathBuf,

    /// 出力ディレクトリ（省略時は入力ディレクトリ）
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// 出力ファイル名の接頭辞（`<name>_features.data`）。省略時は `features.data`
    #[arg(long)]
    name: Option<String>,

    /// パイプライン設定ファイル（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 名前順で先頭から何組まで使うか
    #[arg(long, conflicts_with = "bounded")]
    limit: Option<usize>,

    /// 既定の上限（200組）で統合する
    #[arg(long)]
    bounded: bool,

    /// ソートに使うスレッド数（0=自動）
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// 既存の出力を上書きする
    #[arg(long)]
    overwrite: bool,

    /// 実行結果の JSON 要約の出力先
    #[arg(long)]
    summary: Option<PathBuf>,

    /// 進捗バーを表示しない
    #[arg(long)]
    no_progress: bool,
}

fn main() -> Result<()> {
    tools::common::init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if cli.bounded {
        config.merge.file_limit = Some(DEFAULT_FILE_LIMIT);
    } else if let Some(limit) = cli.limit {
        config.merge.file_limit = Some(limit);
    }
    config.validate()?;

    if !cli.input_dir.is_dir() {
        anyhow::bail!("Input directory not found: {}", cli.input_dir.display());
    }
    let output_dir = cli.output_dir.clone().unwrap_or_else(|| cli.input_dir.clone());
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let output = match &cli.name {
        Some(name) => DatasetPaths::with_stem(&output_dir, name),
        None => DatasetPaths::unprefixed(&output_dir),
    };
    if output.any_exists() && !cli.overwrite {
        anyhow::bail!(
            "Output already exists: {} (use --overwrite to replace it)",
            output.features.display()
        );
    }

    let cancel = install_interrupt_handler()?;
    configure_threads(cli.threads);

    let pairs = discover_pairs(&cli.input_dir, Some(&output))
        .with_context(|| format!("Failed to collect datasets in {}", cli.input_dir.display()))?;
    if pairs.is_empty() {
        anyhow::bail!("No datasets found in {}", cli.input_dir.display());
    }

    let engine = MergeEngine::new(config.merge.clone()).with_cancel(cancel);
    let selected = engine.select(&pairs).len();
    eprintln!(
        "Found {} dataset pairs, merging {}",
        format_number(pairs.len() as u64),
        format_number(selected as u64)
    );

    let progress = progress_bar(selected as u64, cli.no_progress)?;
    let stats = engine.run(&pairs, &output, |pair, stats| {
        let name = pair.features.file_name().map(|n| n.to_string_lossy().into_owned());
        progress.set_message(format!(
            "{} ({} unique)",
            name.unwrap_or_default(),
            format_number(stats.unique_samples)
        ));
        progress.inc(1);
    });
    progress.finish_and_clear();
    let stats = stats?;

    print_merge_summary(&stats);
    eprintln!("Features: {}", output.features.display());
    eprintln!("Targets:  {}", output.targets.display());

    if let Some(path) = &cli.summary {
        write_json_summary(path, &stats)?;
        eprintln!("Summary written to {}", path.display());
    }
    Ok(())
}
