//! inspect_lc0_archive - lc0 学習データアーカイブの中身を表示する
//!
//! レコードごとに局面（FEN）、最善手、評価値、フィルタの判定を表示する。
//! フィルタ条件の調整やデータ不良の調査用。
//!
//! # 使用例
//!
//! ```bash
//! cargo run -p tools --bin inspect_lc0_archive -- lc0/training-run1-20240101.tar --limit 5
//!
//! # 評価値フィールドと bitboard も表示
//! cargo run -p tools --bin inspect_lc0_archive -- run.tar --evals --planes
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use lc0_data::features::{PieceKind, Side, render_bitboard};
use lc0_data::filter::{DropCounts, DropReason};
use lc0_data::move_index::idx_to_move;
use lc0_data::{
    ArchiveReader, FilterPolicy, PipelineConfig, ShakmatyRules, V6TrainingRecord, Verdict,
    extract_features,
};
use tools::common::report::format_number;

/// lc0 学習データアーカイブのレコードとフィルタ判定を表示する
#[derive(Parser)]
#[command(name = "inspect_lc0_archive", version, about = "Dump records and filter verdicts of an lc0 training archive")]
struct Cli {
    /// 入力 tar アーカイブ
    archive: PathBuf,

    /// 表示するレコード数の上限（0=全件）。集計は常に全件
    #[arg(short, long, default_value_t = 10)]
    limit: usize,

    /// 名前にこの文字列を含むメンバーだけを対象にする
    #[arg(long)]
    member: Option<String>,

    /// 評価値フィールドをすべて表示
    #[arg(long)]
    evals: bool,

    /// 12プレーンの bitboard を表示
    #[arg(long)]
    planes: bool,

    /// パイプライン設定ファイル（フィルタ条件に使用）
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tools::common::init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let policy = FilterPolicy::new(config.filter.clone(), ShakmatyRules);
    let trailing = config.extract.trailing_data();

    let mut reader = ArchiveReader::open(&cli.archive)
        .with_context(|| format!("Failed to open {}", cli.archive.display()))?;

    let mut shown = 0usize;
    let mut total = 0u64;
    let mut kept = 0u64;
    let mut errors = 0u64;
    let mut drops = DropCounts::default();

    for member in reader.members()? {
        let member = match member {
            Ok(m) => m,
            Err(e) => {
                println!("!! {e}");
                continue;
            }
        };
        if cli.member.as_ref().is_some_and(|m| !member.name.contains(m.as_str())) {
            continue;
        }
        let chunks = member
            .records(trailing)
            .map_err(|e| e.at(&cli.archive, &member.name))?;
        println!("== {} ({} records) ==", member.name, chunks.len());

        for (i, buf) in chunks.enumerate() {
            let record = V6TrainingRecord::from_bytes(buf).map_err(|e| e.at(&cli.archive, &member.name))?;
            let features = extract_features(&record);
            let verdict = policy.evaluate(&record, &features);
            total += 1;
            match &verdict {
                Ok(Verdict::Keep) => kept += 1,
                Ok(Verdict::Drop(reason)) => drops.record(*reason),
                Err(_) => errors += 1,
            }

            if cli.limit != 0 && shown >= cli.limit {
                continue;
            }
            shown += 1;

            let best = idx_to_move(record.best_idx).unwrap_or("?");
            let played = idx_to_move(record.played_idx).unwrap_or("?");
            println!(
                "#{i} v{}/{} best_q={:+.3} best={best} ({}) played={played} visits={} pieces={} stm={} rule50={}",
                record.version,
                record.input_format,
                record.best_q,
                record.best_idx,
                record.visits,
                features.piece_count(),
                record.side_to_move_or_enpassant,
                record.rule50_count
            );
            println!("   fen: {}", features.to_board_fen());
            match verdict {
                Ok(Verdict::Keep) => println!("   verdict: keep"),
                Ok(Verdict::Drop(reason)) => println!("   verdict: drop ({})", reason.as_str()),
                Err(e) => println!("   verdict: error ({e})"),
            }
            if cli.evals {
                for (name, value) in record.eval_fields() {
                    println!("   {name:<10} {value:+.4}");
                }
            }
            if cli.planes {
                for side in Side::ALL {
                    for kind in PieceKind::ALL {
                        println!("   [{}]", kind.fen_char(side));
                        for line in render_bitboard(features.plane(side, kind)).lines() {
                            println!("   {line}");
                        }
                    }
                }
            }
        }
    }

    println!();
    println!("records: {}", format_number(total));
    println!("kept:    {}", format_number(kept));
    for reason in DropReason::ALL {
        let n = drops.get(reason);
        if n > 0 {
            println!("drop {:<20} {}", reason.as_str(), format_number(n));
        }
    }
    if errors > 0 {
        println!("rules engine errors: {}", format_number(errors));
    }
    Ok(())
}
