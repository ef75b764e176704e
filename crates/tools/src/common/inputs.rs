//! 入力パス・globパターンの展開

use std::path::PathBuf;

use anyhow::{Context, Result};
use glob::glob;

/// ファイルパスまたは glob パターンのリストを実在するファイルのリストに展開する
///
/// 結果は重複を除いてソートされる。どのファイルにも一致しないパターンはエラー。
pub fn expand_input_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for pattern in patterns {
        let path = PathBuf::from(pattern);
        if path.is_file() {
            files.push(path);
            continue;
        }

        let matches: Vec<_> = glob(pattern)
            .with_context(|| format!("Invalid glob pattern: {pattern}"))?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect();

        if matches.is_empty() {
            anyhow::bail!("No files found matching pattern: {pattern}");
        }
        files.extend(matches);
    }

    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_expand_files_and_patterns() {
        let tmp = TempDir::new().unwrap();
        for name in ["b.tar", "a.tar", "c.txt"] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }
        let explicit = tmp.path().join("a.tar").to_string_lossy().into_owned();
        let pattern = format!("{}/*.tar", tmp.path().display());
        let files = expand_input_patterns(&[pattern, explicit]).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.tar", "b.tar"]);
    }

    #[test]
    fn test_no_match_is_error() {
        let tmp = TempDir::new().unwrap();
        let pattern = format!("{}/*.tar", tmp.path().display());
        let err = expand_input_patterns(&[pattern]).unwrap_err();
        assert!(err.to_string().contains("No files found"));
    }
}
