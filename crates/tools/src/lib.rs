//! lc0 学習データ処理ツール群の共通部分

pub mod common;
