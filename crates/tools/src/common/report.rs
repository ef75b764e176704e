//! 実行結果の要約（標準エラー出力・JSON）

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use lc0_data::filter::DropReason;
use lc0_data::{ArchiveStats, MergeStats};
use serde::Serialize;

/// 数値を3桁区切りでフォーマット
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes = s.as_bytes();
    let mut result = String::with_capacity(s.len() + s.len() / 3);

    for (i, &b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(b as char);
    }

    result
}

/// 抽出結果の要約を表示
pub fn print_extract_summary(total: &ArchiveStats, failed: usize) {
    eprintln!();
    eprintln!("=== Extraction summary ===");
    eprintln!("Archives processed:  {}", format_number(total.archives_processed));
    eprintln!("Archives skipped:    {}", format_number(total.archives_skipped));
    eprintln!("Archives failed:     {failed}");
    eprintln!("Members read:        {}", format_number(total.members_read));
    if total.corrupt_members > 0 {
        eprintln!("Corrupt members:     {}", format_number(total.corrupt_members));
    }
    if total.discarded_trailing_bytes > 0 {
        eprintln!("Discarded bytes:     {}", format_number(total.discarded_trailing_bytes));
    }
    eprintln!("Records decoded:     {}", format_number(total.records_decoded));
    eprintln!("Dropped by filter:   {}", format_number(total.dropped_by_filter));
    for reason in DropReason::ALL {
        let n = total.drops.get(reason);
        if n > 0 {
            eprintln!("  {:<20} {}", reason.as_str(), format_number(n));
        }
    }
    if total.rules_engine_errors > 0 {
        eprintln!("Rules engine errors: {}", format_number(total.rules_engine_errors));
    }
    eprintln!("Kept:                {}", format_number(total.kept));
    eprintln!("Unique:              {}", format_number(total.unique));
}

/// 統合結果の要約を表示
pub fn print_merge_summary(stats: &MergeStats) {
    eprintln!();
    eprintln!("=== Merge summary ===");
    eprintln!(
        "Pairs merged:        {} / {}",
        format_number(stats.pairs_merged),
        format_number(stats.pairs_discovered)
    );
    eprintln!("Samples read:        {}", format_number(stats.samples_read));
    eprintln!("Duplicates removed:  {}", format_number(stats.duplicates_discarded));
    eprintln!("Unique samples:      {}", format_number(stats.unique_samples));
}

/// 要約を JSON で書き出す
pub fn write_json_summary<T: Serialize>(path: &Path, summary: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create summary file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
