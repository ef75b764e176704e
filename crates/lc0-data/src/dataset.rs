//! 特徴量ファイル / ターゲットファイルの組の読み書き
//!
//! - 特徴量ファイル: 12 × u64（ネイティブエンディアン）をサンプル数だけ連結
//! - ターゲットファイル: f32（ネイティブエンディアン）をサンプル数だけ連結
//!
//! 書き込みは一時ファイルに行い、両方そろってから rename で置き換える。

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, NativeEndian, WriteBytesExt};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{DataError, DataResult};
use crate::features::{FEATURE_BYTES, FeatureVector, NUM_PLANES};

/// 特徴量ファイル名の末尾
pub const FEATURES_SUFFIX: &str = "features.data";
/// ターゲットファイル名の末尾
pub const TARGETS_SUFFIX: &str = "targets.data";

const TARGET_BYTES: usize = 4;
const TMP_EXTENSION: &str = "tmp";
const WRITER_BUF_CAP: usize = 4 * 1024 * 1024;

/// 学習サンプル（特徴量とターゲット）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub features: FeatureVector,
    pub target: f32,
}

/// 対になる2ファイルのパス
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DatasetPaths {
    pub features: PathBuf,
    pub targets: PathBuf,
}

impl DatasetPaths {
    pub fn new(features: impl Into<PathBuf>, targets: impl Into<PathBuf>) -> Self {
        Self {
            features: features.into(),
            targets: targets.into(),
        }
    }

    /// `<dir>/<stem>_features.data` と `<dir>/<stem>_targets.data`
    pub fn with_stem(dir: &Path, stem: &str) -> Self {
        Self::new(
            dir.join(format!("{stem}_{FEATURES_SUFFIX}")),
            dir.join(format!("{stem}_{TARGETS_SUFFIX}")),
        )
    }

    /// 接頭辞なしの `<dir>/features.data` と `<dir>/targets.data`
    pub fn unprefixed(dir: &Path) -> Self {
        Self::new(dir.join(FEATURES_SUFFIX), dir.join(TARGETS_SUFFIX))
    }

    /// アーカイブに対応する出力パス（拡張子を1つ落としたファイル名を使う）
    pub fn for_archive(out_dir: &Path, archive: &Path) -> Self {
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        Self::with_stem(out_dir, &stem)
    }

    /// どちらかが既に存在するか
    pub fn any_exists(&self) -> bool {
        self.features.exists() || self.targets.exists()
    }

    fn temporary(&self) -> Self {
        Self::new(tmp_path(&self.features), tmp_path(&self.targets))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TMP_EXTENSION);
    PathBuf::from(name)
}

/// データセットの書き込み
///
/// [`DatasetWriter::finish`] を呼ばずに破棄すると一時ファイルは削除され、
/// 出力先には何も残らない。
#[must_use = "call .finish() to move the outputs into place"]
pub struct DatasetWriter {
    paths: DatasetPaths,
    tmp: DatasetPaths,
    features: Option<BufWriter<File>>,
    targets: Option<BufWriter<File>>,
    count: u64,
    committed: bool,
}

impl DatasetWriter {
    pub fn create(paths: &DatasetPaths) -> DataResult<Self> {
        let tmp = paths.temporary();
        let open = |path: &Path| -> DataResult<BufWriter<File>> {
            let file = File::create(path).map_err(|e| DataError::io(path, e))?;
            Ok(BufWriter::with_capacity(WRITER_BUF_CAP, file))
        };
        let features = open(&tmp.features)?;
        let targets = match open(&tmp.targets) {
            Ok(w) => w,
            Err(e) => {
                let _ = fs::remove_file(&tmp.features);
                return Err(e);
            }
        };
        Ok(Self {
            paths: paths.clone(),
            tmp,
            features: Some(features),
            targets: Some(targets),
            count: 0,
            committed: false,
        })
    }

    pub fn write_sample(&mut self, sample: &Sample) -> DataResult<()> {
        if let Some(w) = self.features.as_mut() {
            for &word in &sample.features.0 {
                w.write_u64::<NativeEndian>(word)
                    .map_err(|e| DataError::io(&self.tmp.features, e))?;
            }
        }
        if let Some(w) = self.targets.as_mut() {
            w.write_f32::<NativeEndian>(sample.target)
                .map_err(|e| DataError::io(&self.tmp.targets, e))?;
        }
        self.count += 1;
        Ok(())
    }

    /// 書き込み済みのサンプル数
    pub fn count(&self) -> u64 {
        self.count
    }

    /// フラッシュして出力先に移動する
    pub fn finish(mut self) -> DataResult<u64> {
        for (writer, path) in [
            (self.features.take(), &self.tmp.features),
            (self.targets.take(), &self.tmp.targets),
        ] {
            if let Some(writer) = writer {
                let file = writer.into_inner().map_err(|e| DataError::io(path, e.into_error()))?;
                file.sync_all().map_err(|e| DataError::io(path, e))?;
            }
        }
        fs::rename(&self.tmp.targets, &self.paths.targets)
            .map_err(|e| DataError::io(&self.paths.targets, e))?;
        // 片方だけ残ると次回の抽出で「処理済み」扱いになるので、組ごと消す
        if let Err(e) = fs::rename(&self.tmp.features, &self.paths.features) {
            let _ = fs::remove_file(&self.paths.targets);
            let _ = fs::remove_file(&self.paths.features);
            return Err(DataError::io(&self.paths.features, e));
        }
        self.committed = true;
        Ok(self.count)
    }
}

impl Drop for DatasetWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.features = None;
        self.targets = None;
        let _ = fs::remove_file(&self.tmp.features);
        let _ = fs::remove_file(&self.tmp.targets);
    }
}

/// サンプル列を書き出す
pub fn write_dataset(paths: &DatasetPaths, samples: &[Sample]) -> DataResult<u64> {
    let mut writer = DatasetWriter::create(paths)?;
    for sample in samples {
        writer.write_sample(sample)?;
    }
    let written = writer.finish()?;
    if written != samples.len() as u64 {
        return Err(DataError::Mismatch {
            path: paths.features.clone(),
            detail: "written sample count differs from input".to_string(),
            expected: samples.len() as u64,
            actual: written,
        });
    }
    Ok(written)
}

/// ファイルサイズから件数を検証して返す
///
/// - 特徴量ファイルが 8 の倍数でない → Format
/// - u64 の個数が 12 の倍数でない → Mismatch
/// - ターゲットファイルが 4 の倍数でない → Format
/// - 両者の件数が違う → Mismatch
pub fn validate_sizes(paths: &DatasetPaths, features_bytes: u64, targets_bytes: u64) -> DataResult<u64> {
    if features_bytes % 8 != 0 {
        return Err(DataError::Format {
            path: paths.features.clone(),
            detail: "feature file is not a whole number of u64 words".to_string(),
            expected: 8,
            actual: features_bytes,
        });
    }
    let words = features_bytes / 8;
    if words % NUM_PLANES as u64 != 0 {
        return Err(DataError::Mismatch {
            path: paths.features.clone(),
            detail: format!("{words} u64 words do not form whole 12-plane feature vectors"),
            expected: words.next_multiple_of(NUM_PLANES as u64),
            actual: words,
        });
    }
    if targets_bytes % TARGET_BYTES as u64 != 0 {
        return Err(DataError::Format {
            path: paths.targets.clone(),
            detail: "target file is not a whole number of f32 values".to_string(),
            expected: TARGET_BYTES as u64,
            actual: targets_bytes,
        });
    }
    let samples = words / NUM_PLANES as u64;
    let targets = targets_bytes / TARGET_BYTES as u64;
    if samples != targets {
        return Err(DataError::Mismatch {
            path: paths.targets.clone(),
            detail: format!(
                "target count does not match feature count of {}",
                paths.features.display()
            ),
            expected: samples,
            actual: targets,
        });
    }
    Ok(samples)
}

/// ファイルを読まずにサイズだけで件数を得る
pub fn dataset_len(paths: &DatasetPaths) -> DataResult<u64> {
    let len = |path: &Path| -> DataResult<u64> {
        fs::metadata(path).map(|m| m.len()).map_err(|e| DataError::io(path, e))
    };
    validate_sizes(paths, len(&paths.features)?, len(&paths.targets)?)
}

/// データセットを読み込む
pub fn read_dataset(paths: &DatasetPaths) -> DataResult<Vec<Sample>> {
    let features = fs::read(&paths.features).map_err(|e| DataError::io(&paths.features, e))?;
    let targets = fs::read(&paths.targets).map_err(|e| DataError::io(&paths.targets, e))?;
    let n = validate_sizes(paths, features.len() as u64, targets.len() as u64)? as usize;

    let samples = features
        .chunks_exact(FEATURE_BYTES)
        .zip(targets.chunks_exact(TARGET_BYTES))
        .map(|(f, t)| {
            let mut words = [0u64; NUM_PLANES];
            NativeEndian::read_u64_into(f, &mut words);
            Sample {
                features: FeatureVector(words),
                target: NativeEndian::read_f32(t),
            }
        })
        .collect::<Vec<_>>();
    debug_assert_eq!(samples.len(), n);
    Ok(samples)
}

/// 特徴量が同じサンプルを除去する（最初に現れたものを残す）
///
/// 結果は特徴量の辞書式昇順に並ぶ。戻り値の2つ目は捨てた件数。
pub fn dedup_first_seen(mut samples: Vec<Sample>) -> (Vec<Sample>, u64) {
    let before = samples.len();
    // 安定ソートなので同じ特徴量の中では元の順序が保たれる
    samples.par_sort_by(|a, b| a.features.cmp(&b.features));
    samples.dedup_by(|later, kept| later.features == kept.features);
    let removed = (before - samples.len()) as u64;
    (samples, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fv(seed: u64) -> FeatureVector {
        FeatureVector(std::array::from_fn(|i| seed.wrapping_mul(31).wrapping_add(i as u64)))
    }

    fn sample(seed: u64, target: f32) -> Sample {
        Sample {
            features: fv(seed),
            target,
        }
    }

    #[test]
    fn test_paths_for_archive() {
        let paths = DatasetPaths::for_archive(Path::new("/out"), Path::new("/in/training-run1-20240101.tar"));
        assert_eq!(paths.features, PathBuf::from("/out/training-run1-20240101_features.data"));
        assert_eq!(paths.targets, PathBuf::from("/out/training-run1-20240101_targets.data"));
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let paths = DatasetPaths::with_stem(dir.path(), "x");
        let samples = vec![sample(1, 0.5), sample(2, -0.25)];
        assert_eq!(write_dataset(&paths, &samples).unwrap(), 2);

        assert_eq!(fs::metadata(&paths.features).unwrap().len(), 2 * 96);
        assert_eq!(fs::metadata(&paths.targets).unwrap().len(), 2 * 4);
        assert_eq!(read_dataset(&paths).unwrap(), samples);
        assert_eq!(dataset_len(&paths).unwrap(), 2);
        assert!(!paths.temporary().features.exists());
    }

    #[test]
    fn test_empty_dataset() {
        let dir = TempDir::new().unwrap();
        let paths = DatasetPaths::with_stem(dir.path(), "empty");
        write_dataset(&paths, &[]).unwrap();
        assert!(paths.any_exists());
        assert!(read_dataset(&paths).unwrap().is_empty());
    }

    #[test]
    fn test_abandoned_writer_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let paths = DatasetPaths::with_stem(dir.path(), "x");
        {
            let mut writer = DatasetWriter::create(&paths).unwrap();
            writer.write_sample(&sample(1, 0.0)).unwrap();
        }
        assert!(!paths.any_exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_commit_leaves_no_lone_targets() {
        let dir = TempDir::new().unwrap();
        let paths = DatasetPaths::with_stem(dir.path(), "x");
        // 特徴量の出力先をディレクトリにして rename を失敗させる
        fs::create_dir(&paths.features).unwrap();
        fs::write(paths.features.join("keep"), b"x").unwrap();

        let err = write_dataset(&paths, &[sample(1, 0.5)]).unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
        assert!(!paths.targets.exists());
        assert!(!paths.temporary().features.exists());
        assert!(!paths.temporary().targets.exists());
    }

    #[test]
    fn test_validate_sizes() {
        let paths = DatasetPaths::new("f", "t");
        assert_eq!(validate_sizes(&paths, 96 * 3, 12).unwrap(), 3);
        assert!(matches!(validate_sizes(&paths, 95, 4), Err(DataError::Format { .. })));
        assert!(matches!(validate_sizes(&paths, 88, 4), Err(DataError::Mismatch { .. })));
        assert!(matches!(validate_sizes(&paths, 96, 5), Err(DataError::Format { .. })));
        match validate_sizes(&paths, 96 * 2, 12) {
            Err(DataError::Mismatch { expected, actual, .. }) => {
                assert_eq!((expected, actual), (2, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_read_rejects_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let paths = DatasetPaths::with_stem(dir.path(), "bad");
        fs::write(&paths.features, vec![0u8; 96 * 2]).unwrap();
        fs::write(&paths.targets, vec![0u8; 4]).unwrap();
        let err = read_dataset(&paths).unwrap_err();
        assert!(matches!(err, DataError::Mismatch { expected: 2, actual: 1, .. }));
        assert!(err.to_string().contains("bad_targets.data"));
    }

    #[test]
    fn test_dedup_keeps_first_and_sorts() {
        let samples = vec![sample(3, 0.1), sample(1, 0.2), sample(3, 0.9), sample(2, 0.3), sample(1, 0.8)];
        let (unique, removed) = dedup_first_seen(samples);
        assert_eq!(removed, 2);
        assert_eq!(unique.len(), 3);
        assert!(unique.windows(2).all(|w| w[0].features < w[1].features));
        let target_of = |seed| unique.iter().find(|s| s.features == fv(seed)).unwrap().target;
        assert_eq!(target_of(1), 0.2);
        assert_eq!(target_of(3), 0.1);
    }
}
