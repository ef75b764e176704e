//! CLI 共通ユーティリティ

pub mod inputs;
pub mod progress;
pub mod report;

/// ログ出力を初期化（RUST_LOG 未指定なら info）
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
