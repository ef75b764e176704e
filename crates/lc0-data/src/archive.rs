//! tar アーカイブからの gzip メンバーの読み出し
//!
//! lc0 の学習データは `training-run*.tar` の中に、対局ごとの `.gz` ファイル
//! （8356バイトのレコードを連結して gzip 圧縮したもの）を並べた形で配布される。
//! 通常ファイル以外のメンバーと `.gz` で終わらないメンバーは読み飛ばす。

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};
use crate::record::{RecordChunks, RecordError, TrailingData, split_records};

/// 圧縮メンバーの拡張子
pub const MEMBER_SUFFIX: &str = ".gz";

const READER_BUF_CAP: usize = 1024 * 1024; // 1 MiB

/// 壊れたメンバーの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberErrorPolicy {
    /// 警告を出して次のメンバーへ
    #[default]
    Skip,
    /// アーカイブ全体を失敗にする
    Abort,
}

/// 展開済みのメンバー
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveMember {
    /// レコード単位のバッファ列
    pub fn records(&self, trailing: TrailingData) -> Result<RecordChunks<'_>, RecordError> {
        split_records(&self.data, trailing)
    }
}

/// tar アーカイブのリーダー
pub struct ArchiveReader<R: Read> {
    path: PathBuf,
    archive: tar::Archive<R>,
}

impl ArchiveReader<BufReader<File>> {
    /// ファイルを開く
    pub fn open(path: impl AsRef<Path>) -> DataResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| DataError::io(path, e))?;
        Ok(Self::from_reader(path, BufReader::with_capacity(READER_BUF_CAP, file)))
    }
}

impl<R: Read> ArchiveReader<R> {
    /// 任意のリーダーから作る（`path` はエラー表示用）
    pub fn from_reader(path: impl Into<PathBuf>, reader: R) -> Self {
        Self {
            path: path.into(),
            archive: tar::Archive::new(reader),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `.gz` メンバーを順に展開する
    ///
    /// メンバーの展開失敗は `DataError::Decompression` として1件ずつ返し、
    /// 続けて次のメンバーを読める。tar 自体の破損は `DataError::Io` を返して終了する。
    pub fn members(&mut self) -> DataResult<Members<'_, R>> {
        let entries = self.archive.entries().map_err(|e| DataError::io(&self.path, e))?;
        Ok(Members {
            path: &self.path,
            entries,
            done: false,
        })
    }
}

/// [`ArchiveReader::members`] のイテレータ
pub struct Members<'a, R: 'a + Read> {
    path: &'a Path,
    entries: tar::Entries<'a, R>,
    done: bool,
}

impl<R: Read> Members<'_, R> {
    fn fail(&mut self, source: std::io::Error) -> Option<DataResult<ArchiveMember>> {
        self.done = true;
        Some(Err(DataError::io(self.path, source)))
    }
}

impl<R: Read> Iterator for Members<'_, R> {
    type Item = DataResult<ArchiveMember>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return self.fail(e),
            };
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = match entry.path() {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(e) => return self.fail(e),
            };
            if !name.ends_with(MEMBER_SUFFIX) {
                log::trace!("skipping non-gzip member {name}");
                continue;
            }

            let mut data = Vec::new();
            let mut decoder = MultiGzDecoder::new(entry);
            return Some(match decoder.read_to_end(&mut data) {
                Ok(_) => Ok(ArchiveMember { name, data }),
                Err(source) => Err(DataError::Decompression {
                    path: self.path.to_path_buf(),
                    member: name,
                    source,
                }),
            });
        }
    }
}
