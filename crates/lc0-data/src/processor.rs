//! アーカイブ単位の抽出処理
//!
//! アーカイブ → メンバー展開 → レコード復号 → フィルタ → 特徴量抽出 → 重複除去 → 書き出し。
//! アーカイブごとに独立した出力ファイルを作るので、複数アーカイブを並列に処理できる。

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveReader, MemberErrorPolicy};
use crate::cancel::CancelFlag;
use crate::dataset::{DatasetPaths, Sample, dedup_first_seen, write_dataset};
use crate::error::{DataError, DataResult};
use crate::features::{extract_features, extract_target};
use crate::filter::{DropCounts, FilterPolicy, Verdict};
use crate::record::{TrailingData, V6TrainingRecord};
use crate::rules::RulesEngine;

/// 抽出の設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractConfig {
    /// ワーカースレッド数（0 = 自動）
    pub threads: usize,
    /// 壊れたメンバーの扱い
    pub member_errors: MemberErrorPolicy,
    /// メンバー末尾の端数バイトを捨てて続行する
    pub allow_truncated: bool,
    /// 出力が既にあっても作り直す
    pub overwrite: bool,
}

impl ExtractConfig {
    pub fn trailing_data(&self) -> TrailingData {
        if self.allow_truncated {
            TrailingData::Discard
        } else {
            TrailingData::Reject
        }
    }
}

/// 抽出の集計
///
/// 1アーカイブ分としても、全アーカイブの合計としても使う。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub archives_processed: u64,
    pub archives_skipped: u64,
    pub members_read: u64,
    pub corrupt_members: u64,
    pub discarded_trailing_bytes: u64,
    pub records_decoded: u64,
    pub dropped_by_filter: u64,
    pub drops: DropCounts,
    pub rules_engine_errors: u64,
    pub kept: u64,
    pub unique: u64,
}

impl ArchiveStats {
    pub fn add(&mut self, other: &ArchiveStats) {
        self.archives_processed += other.archives_processed;
        self.archives_skipped += other.archives_skipped;
        self.members_read += other.members_read;
        self.corrupt_members += other.corrupt_members;
        self.discarded_trailing_bytes += other.discarded_trailing_bytes;
        self.records_decoded += other.records_decoded;
        self.dropped_by_filter += other.dropped_by_filter;
        self.drops.add(&other.drops);
        self.rules_engine_errors += other.rules_engine_errors;
        self.kept += other.kept;
        self.unique += other.unique;
    }
}

/// 1アーカイブの処理結果
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub archive: PathBuf,
    pub outputs: DatasetPaths,
    pub stats: ArchiveStats,
}

impl ArchiveReport {
    pub fn skipped(&self) -> bool {
        self.stats.archives_skipped > 0
    }
}

/// アーカイブ単位の処理
#[derive(Debug, Clone)]
pub struct ArchiveProcessor<R> {
    policy: FilterPolicy<R>,
    options: ExtractConfig,
}

impl<R: RulesEngine> ArchiveProcessor<R> {
    pub fn new(policy: FilterPolicy<R>, options: ExtractConfig) -> Self {
        Self { policy, options }
    }

    pub fn policy(&self) -> &FilterPolicy<R> {
        &self.policy
    }

    /// 1アーカイブを処理し、`out_dir` にデータセットを書き出す
    ///
    /// 出力が既にあれば（overwrite でない限り）何もしない。
    pub fn process(&self, archive: &Path, out_dir: &Path) -> DataResult<ArchiveReport> {
        let outputs = DatasetPaths::for_archive(out_dir, archive);
        let mut stats = ArchiveStats::default();

        if !self.options.overwrite && outputs.any_exists() {
            log::info!(
                "{} already processed ({} exists), will not run again",
                archive.display(),
                outputs.features.display()
            );
            stats.archives_skipped = 1;
            return Ok(ArchiveReport {
                archive: archive.to_path_buf(),
                outputs,
                stats,
            });
        }

        let mut reader = ArchiveReader::open(archive)?;
        let samples = self.collect_samples(&mut reader, &mut stats)?;
        stats.kept = samples.len() as u64;
        let (unique, _) = dedup_first_seen(samples);
        stats.unique = write_dataset(&outputs, &unique)?;
        stats.archives_processed = 1;

        if stats.rules_engine_errors > 0 {
            log::warn!(
                "{}: {} records skipped due to rules engine errors",
                archive.display(),
                stats.rules_engine_errors
            );
        }
        log::info!(
            "{}: decoded {}, dropped {}, kept {}, unique {}",
            archive.display(),
            stats.records_decoded,
            stats.dropped_by_filter,
            stats.kept,
            stats.unique
        );
        Ok(ArchiveReport {
            archive: archive.to_path_buf(),
            outputs,
            stats,
        })
    }

    /// アーカイブ内の全レコードをフィルタし、残ったサンプルを読み出し順に返す
    pub fn collect_samples<Rd: Read>(
        &self,
        reader: &mut ArchiveReader<Rd>,
        stats: &mut ArchiveStats,
    ) -> DataResult<Vec<Sample>> {
        let path = reader.path().to_path_buf();
        let trailing = self.options.trailing_data();
        let mut samples = Vec::new();

        for member in reader.members()? {
            let member = match member {
                Ok(member) => member,
                Err(err @ DataError::Decompression { .. }) => match self.options.member_errors {
                    MemberErrorPolicy::Skip => {
                        log::warn!("skipping corrupt member: {err}");
                        stats.corrupt_members += 1;
                        continue;
                    }
                    MemberErrorPolicy::Abort => return Err(err),
                },
                Err(err) => return Err(err),
            };
            stats.members_read += 1;

            let chunks = member.records(trailing).map_err(|e| e.at(&path, &member.name))?;
            if chunks.discarded_bytes() > 0 {
                log::warn!(
                    "{}: member {} has {} trailing bytes, discarded",
                    path.display(),
                    member.name,
                    chunks.discarded_bytes()
                );
                stats.discarded_trailing_bytes += chunks.discarded_bytes() as u64;
            }

            for buf in chunks {
                let record = V6TrainingRecord::from_bytes(buf).map_err(|e| e.at(&path, &member.name))?;
                stats.records_decoded += 1;
                let features = extract_features(&record);
                match self.policy.evaluate(&record, &features) {
                    Ok(Verdict::Keep) => samples.push(Sample {
                        features,
                        target: extract_target(&record),
                    }),
                    Ok(Verdict::Drop(reason)) => {
                        stats.dropped_by_filter += 1;
                        stats.drops.record(reason);
                    }
                    Err(e) => {
                        log::debug!("{}: {}: skipping record: {e}", path.display(), member.name);
                        stats.rules_engine_errors += 1;
                    }
                }
            }
        }
        Ok(samples)
    }
}

/// 出力先が重なるアーカイブがないことを確かめる
///
/// 別ディレクトリにある同名のアーカイブは同じ `<stem>_features.data` に書き出されるので、
/// 処理を始める前に Config エラーにする。
pub fn check_distinct_outputs(archives: &[PathBuf], out_dir: &Path) -> DataResult<()> {
    let mut seen: HashMap<PathBuf, &Path> = HashMap::with_capacity(archives.len());
    for archive in archives {
        let outputs = DatasetPaths::for_archive(out_dir, archive);
        if let Some(first) = seen.insert(outputs.features.clone(), archive.as_path()) {
            return Err(DataError::Config(format!(
                "{} and {} would both be written to {}; rename one of the archives",
                first.display(),
                archive.display(),
                outputs.features.display()
            )));
        }
    }
    Ok(())
}

/// 複数アーカイブを現在の rayon スレッドプールで並列に処理する
///
/// 出力先が重なる入力があれば何も処理せずにエラーを返す。
/// 中断要求は各アーカイブの開始前に確認する。`on_done` は1件終わるごとに
/// ワーカースレッドから呼ばれる。結果は入力と同じ順に返す。
pub fn process_archives<R, F>(
    processor: &ArchiveProcessor<R>,
    archives: &[PathBuf],
    out_dir: &Path,
    cancel: &CancelFlag,
    on_done: F,
) -> DataResult<Vec<DataResult<ArchiveReport>>>
where
    R: RulesEngine + Sync,
    F: Fn(&Path, &DataResult<ArchiveReport>) + Sync,
{
    check_distinct_outputs(archives, out_dir)?;
    Ok(archives
        .par_iter()
        .map(|archive| {
            let result = cancel
                .check(format!("processing {}", archive.display()))
                .and_then(|()| processor.process(archive, out_dir));
            on_done(archive, &result);
            result
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::read_dataset;
    use crate::features::{FeatureVector, store_features};
    use crate::filter::{DropReason, FilterConfig};
    use crate::move_index::move_to_idx;
    use crate::record::{RECORD_SIZE, encode_all};
    use crate::rules::ShakmatyRules;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";
    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR";

    fn record_for(board_fen: &str, best_move: &str, best_q: f32) -> V6TrainingRecord {
        let mut record = V6TrainingRecord::default();
        store_features(&mut record, &FeatureVector::from_board_fen(board_fen).unwrap());
        record.best_idx = move_to_idx(best_move).unwrap();
        record.best_q = best_q;
        record
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn write_archive(path: &Path, members: &[(&str, Vec<u8>)]) {
        let mut builder = tar::Builder::new(std::fs::File::create(path).unwrap());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        builder.finish().unwrap();
    }

    fn processor(options: ExtractConfig) -> ArchiveProcessor<ShakmatyRules> {
        ArchiveProcessor::new(FilterPolicy::new(FilterConfig::default(), ShakmatyRules), options)
    }

    #[test]
    fn test_keep_drop_and_dedup() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("run1.tar");
        let records = [
            record_for(START, "e2e4", 0.1),
            record_for(START, "e2e4", 0.95),
            record_for(START, "d2d4", -0.2),
        ];
        write_archive(&archive, &[("game1.gz", gzip(&encode_all(&records)))]);

        let report = processor(ExtractConfig::default()).process(&archive, dir.path()).unwrap();
        assert_eq!(report.stats.records_decoded, 3);
        assert_eq!(report.stats.dropped_by_filter, 1);
        assert_eq!(report.stats.drops.get(DropReason::ExtremeEvaluation), 1);
        assert_eq!(report.stats.kept, 2);
        assert_eq!(report.stats.unique, 1);

        let samples = read_dataset(&report.outputs).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].target, 0.1);
        assert!(report.outputs.features.ends_with("run1_features.data"));
    }

    #[test]
    fn test_output_sorted_by_features() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("run2.tar");
        let records = [record_for(START, "e2e4", 0.1), record_for(AFTER_E4, "d2d4", 0.2)];
        write_archive(&archive, &[("g.gz", gzip(&encode_all(&records)))]);

        let report = processor(ExtractConfig::default()).process(&archive, dir.path()).unwrap();
        let samples = read_dataset(&report.outputs).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].features < samples[1].features);
    }

    #[test]
    fn test_existing_outputs_are_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("run.tar");
        write_archive(&archive, &[("g.gz", gzip(&encode_all(&[record_for(START, "e2e4", 0.1)])))]);

        let first = processor(ExtractConfig::default()).process(&archive, dir.path()).unwrap();
        assert!(!first.skipped());
        let second = processor(ExtractConfig::default()).process(&archive, dir.path()).unwrap();
        assert!(second.skipped());
        assert_eq!(second.stats.records_decoded, 0);

        let forced = ExtractConfig {
            overwrite: true,
            ..ExtractConfig::default()
        };
        let third = processor(forced).process(&archive, dir.path()).unwrap();
        assert_eq!(third.stats.unique, 1);
    }

    #[test]
    fn test_corrupt_member_policy() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("mixed.tar");
        write_archive(
            &archive,
            &[
                ("broken.gz", b"garbage".to_vec()),
                ("good.gz", gzip(&encode_all(&[record_for(START, "e2e4", 0.1)]))),
            ],
        );

        let report = processor(ExtractConfig::default()).process(&archive, dir.path()).unwrap();
        assert_eq!(report.stats.corrupt_members, 1);
        assert_eq!(report.stats.members_read, 1);
        assert_eq!(report.stats.unique, 1);

        let abort = ExtractConfig {
            member_errors: MemberErrorPolicy::Abort,
            overwrite: true,
            ..ExtractConfig::default()
        };
        let err = processor(abort).process(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, DataError::Decompression { .. }));
    }

    #[test]
    fn test_truncated_member() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("short.tar");
        let mut bytes = encode_all(&[record_for(START, "e2e4", 0.1)]);
        bytes.extend_from_slice(&[0u8; 100]);
        write_archive(&archive, &[("g.gz", gzip(&bytes))]);

        let err = processor(ExtractConfig::default()).process(&archive, dir.path()).unwrap_err();
        match err {
            DataError::Format { expected, actual, .. } => {
                assert_eq!(expected, RECORD_SIZE as u64);
                assert_eq!(actual, (RECORD_SIZE + 100) as u64);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!DatasetPaths::for_archive(dir.path(), &archive).any_exists());

        let lenient = ExtractConfig {
            allow_truncated: true,
            ..ExtractConfig::default()
        };
        let report = processor(lenient).process(&archive, dir.path()).unwrap();
        assert_eq!(report.stats.discarded_trailing_bytes, 100);
        assert_eq!(report.stats.unique, 1);
    }

    #[test]
    fn test_rules_errors_are_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("nokings.tar");
        // 玉のない局面はルールエンジンが拒否する
        let record = record_for("8/pppppppp/8/8/8/8/PPPPPPPP/8", "a2a3", 0.0);
        write_archive(&archive, &[("g.gz", gzip(&encode_all(&[record])))]);

        let report = processor(ExtractConfig::default()).process(&archive, dir.path()).unwrap();
        assert_eq!(report.stats.rules_engine_errors, 1);
        assert_eq!(report.stats.unique, 0);
    }

    #[test]
    fn test_parallel_driver_and_cancel() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let archives: Vec<PathBuf> = (0..4)
            .map(|i| {
                let path = dir.path().join(format!("a{i}.tar"));
                write_archive(&path, &[("g.gz", gzip(&encode_all(&[record_for(START, "e2e4", 0.1)])))]);
                path
            })
            .collect();

        let p = processor(ExtractConfig::default());
        let done = std::sync::atomic::AtomicUsize::new(0);
        let results = process_archives(&p, &archives, out.path(), &CancelFlag::new(), |_, _| {
            done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(done.into_inner(), 4);
        let mut total = ArchiveStats::default();
        for r in &results {
            total.add(&r.as_ref().unwrap().stats);
        }
        assert_eq!(total.archives_processed, 4);
        assert_eq!(total.unique, 4);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let results = process_archives(&p, &archives, out.path(), &cancel, |_, _| {}).unwrap();
        assert!(results.iter().all(|r| matches!(r, Err(DataError::Cancelled(_)))));
    }

    #[test]
    fn test_same_name_archives_are_rejected_before_processing() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let archives: Vec<PathBuf> = [("d1", START, 0.1), ("d2", AFTER_E4, 0.2)]
            .iter()
            .map(|(sub, fen, q)| {
                let sub = dir.path().join(sub);
                std::fs::create_dir(&sub).unwrap();
                let path = sub.join("run.tar");
                write_archive(&path, &[("g.gz", gzip(&encode_all(&[record_for(fen, "d2d4", *q)])))]);
                path
            })
            .collect();

        let p = processor(ExtractConfig::default());
        let err = process_archives(&p, &archives, out.path(), &CancelFlag::new(), |_, _| {
            panic!("no archive should be processed");
        })
        .unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
        let msg = err.to_string();
        assert!(msg.contains("d1") && msg.contains("d2"), "{msg}");
        assert!(!DatasetPaths::for_archive(out.path(), &archives[0]).any_exists());

        // 1件だけなら重ならない
        assert!(check_distinct_outputs(&archives[..1], out.path()).is_ok());
    }
}
