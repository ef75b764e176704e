//! 複数データセットの統合と重複除去
//!
//! ファイル組を1つずつ読み込み、そのたびに重複を除去した蓄積へ併合する。
//! 蓄積は常にソート済み・重複なしに保つので、ピークメモリは
//! 「ユニークなサンプル数 + 1組分」で抑えられる。
//! 同じ特徴量が複数あるときは併合順で先に現れたターゲットを残す。

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::dataset::{
    DatasetPaths, FEATURES_SUFFIX, Sample, TARGETS_SUFFIX, dataset_len, dedup_first_seen,
    read_dataset, write_dataset,
};
use crate::error::{DataError, DataResult};

/// 件数を制限して統合するときの既定ファイル数
pub const DEFAULT_FILE_LIMIT: usize = 200;

/// 統合の設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// 先頭から何組まで使うか（None なら全部）
    pub file_limit: Option<usize>,
}

/// 統合の集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub pairs_discovered: u64,
    pub pairs_merged: u64,
    pub samples_read: u64,
    pub duplicates_discarded: u64,
    pub unique_samples: u64,
}

/// ディレクトリ内のデータセットの組を探す
///
/// `*features.data` と `*targets.data` を接頭辞で対応づけ、名前順に返す。
/// 片方しかないファイルがあれば Mismatch。`exclude` に一致するファイル（統合の出力先）と、
/// 接頭辞なしの `features.data` / `targets.data`（以前の統合結果）は除く。
pub fn discover_pairs(dir: &Path, exclude: Option<&DatasetPaths>) -> DataResult<Vec<DatasetPaths>> {
    let excluded: Vec<PathBuf> = exclude
        .into_iter()
        .flat_map(|p| [&p.features, &p.targets])
        .filter_map(|p| fs::canonicalize(p).ok())
        .collect();

    let mut prefixes: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for (suffix, is_features) in [(FEATURES_SUFFIX, true), (TARGETS_SUFFIX, false)] {
        for path in list_matching(dir, suffix)? {
            let canonical = fs::canonicalize(&path).ok();
            if canonical.is_some_and(|c| excluded.contains(&c)) {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let Some(prefix) = name.strip_suffix(suffix) else {
                continue;
            };
            // 接頭辞なしの組は以前の統合結果
            if prefix.is_empty() {
                log::info!("skipping earlier merge output {}", path.display());
                continue;
            }
            let slot = prefixes.entry(prefix.to_string()).or_default();
            if is_features {
                slot.0 = Some(path);
            } else {
                slot.1 = Some(path);
            }
        }
    }

    let mut pairs = Vec::with_capacity(prefixes.len());
    for (prefix, pair) in prefixes {
        match pair {
            (Some(features), Some(targets)) => pairs.push(DatasetPaths { features, targets }),
            (Some(path), None) | (None, Some(path)) => {
                return Err(DataError::Mismatch {
                    path,
                    detail: format!("dataset {prefix:?} has no matching partner file"),
                    expected: 2,
                    actual: 1,
                });
            }
            (None, None) => {}
        }
    }
    Ok(pairs)
}

fn list_matching(dir: &Path, suffix: &str) -> DataResult<Vec<PathBuf>> {
    let pattern = format!("{}/*{}", glob::Pattern::escape(&dir.to_string_lossy()), suffix);
    let paths = glob::glob(&pattern).map_err(|e| DataError::Config(format!("bad pattern {pattern}: {e}")))?;
    let mut out = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            DataError::io(path, e.into_error())
        })?;
        if path.is_file() {
            out.push(path);
        }
    }
    Ok(out)
}

/// ソート済み・重複なしのサンプル集合
#[derive(Debug, Default)]
pub struct DedupAccumulator {
    samples: Vec<Sample>,
}

impl DedupAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// バッチを併合し、捨てた重複の数を返す
    ///
    /// 既存の要素とバッチの要素が衝突したら既存側を残す。
    pub fn absorb(&mut self, batch: Vec<Sample>) -> u64 {
        let (batch, mut duplicates) = dedup_first_seen(batch);
        if self.samples.is_empty() {
            self.samples = batch;
            return duplicates;
        }

        let existing = std::mem::take(&mut self.samples);
        let mut merged = Vec::with_capacity(existing.len() + batch.len());
        let mut old = existing.into_iter().peekable();
        let mut new = batch.into_iter().peekable();
        loop {
            let order = match (old.peek(), new.peek()) {
                (Some(a), Some(b)) => Some(a.features.cmp(&b.features)),
                _ => None,
            };
            match order {
                Some(Ordering::Less) => merged.extend(old.next()),
                Some(Ordering::Greater) => merged.extend(new.next()),
                Some(Ordering::Equal) => {
                    merged.extend(old.next());
                    new.next();
                    duplicates += 1;
                }
                None => {
                    merged.extend(old);
                    merged.extend(new);
                    break;
                }
            }
        }
        self.samples = merged;
        duplicates
    }
}

/// 統合処理
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    config: MergeConfig,
    cancel: CancelFlag,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 制限を適用した処理対象
    pub fn select<'a>(&self, pairs: &'a [DatasetPaths]) -> &'a [DatasetPaths] {
        match self.config.file_limit {
            Some(limit) if limit < pairs.len() => &pairs[..limit],
            _ => pairs,
        }
    }

    /// 全組を併合して蓄積を返す（書き出しはしない）
    ///
    /// 読み込み前に全組のサイズを検証する。`on_pair` は1組併合するごとに呼ばれる。
    pub fn accumulate(
        &self,
        pairs: &[DatasetPaths],
        mut on_pair: impl FnMut(&DatasetPaths, &MergeStats),
    ) -> DataResult<(DedupAccumulator, MergeStats)> {
        let selected = self.select(pairs);
        let mut stats = MergeStats {
            pairs_discovered: pairs.len() as u64,
            ..MergeStats::default()
        };

        for pair in selected {
            dataset_len(pair)?;
        }

        let mut acc = DedupAccumulator::new();
        for pair in selected {
            self.cancel.check(format!("merging {}", pair.features.display()))?;
            let batch = read_dataset(pair)?;
            stats.samples_read += batch.len() as u64;
            stats.duplicates_discarded += acc.absorb(batch);
            stats.pairs_merged += 1;
            stats.unique_samples = acc.len() as u64;
            log::debug!(
                "merged {} ({} unique so far)",
                pair.features.display(),
                stats.unique_samples
            );
            on_pair(pair, &stats);
        }
        Ok((acc, stats))
    }

    /// 併合して `output` に書き出す
    pub fn run(
        &self,
        pairs: &[DatasetPaths],
        output: &DatasetPaths,
        on_pair: impl FnMut(&DatasetPaths, &MergeStats),
    ) -> DataResult<MergeStats> {
        let (acc, stats) = self.accumulate(pairs, on_pair)?;
        self.cancel.check(format!("writing {}", output.features.display()))?;
        write_dataset(output, acc.samples())?;
        log::info!(
            "wrote {} unique samples from {} pairs to {}",
            stats.unique_samples,
            stats.pairs_merged,
            output.features.display()
        );
        Ok(stats)
    }
}
