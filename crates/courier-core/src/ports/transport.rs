//! Transport port - メッセージの送信手段（SIM スロットごとに1つ）
//!
//! 送信は fire-and-forget。結果は後から `TransportReport` として
//! チャネルに流れてくる（相関トークン = `LeaseClaim`: task id + リース世代）。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::lease::LeaseClaim;

/// 送信依頼（分割済み）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// 相関トークン。結果レポートにそのまま載って返ってくる
    pub token: LeaseClaim,
    pub destination: String,
    /// 1件なら単発、2件以上ならマルチパート
    pub parts: Vec<String>,
}

/// 1パート分の送信結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportReport {
    pub token: LeaseClaim,
    pub part: usize,
    /// プラットフォームの結果コード（`ResultCode` 参照）
    pub code: i32,
}

/// 同期的な送信拒否
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport rejected message: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

pub type ReportSender = mpsc::UnboundedSender<TransportReport>;
pub type ReportReceiver = mpsc::UnboundedReceiver<TransportReport>;

/// 結果レポート用のチャネルを作る
///
/// 送信側は Transport 実装に、受信側は ResultListener に渡す。
pub fn report_channel() -> (ReportSender, ReportReceiver) {
    mpsc::unbounded_channel()
}

/// Transport は1つの送信チャネル（SIM スロット）
///
/// # 設計原則
/// - `send` は結果を待たない（受け付けたら即 `Ok`）
/// - 結果は構築時に受け取った `ReportSender` に流す
pub trait Transport: Send + Sync {
    /// スロット番号
    fn slot(&self) -> usize;

    /// 現在使えるか
    fn is_active(&self) -> bool;

    fn send(&self, request: SendRequest) -> Result<(), TransportError>;
}

/// タスクごとに使う Transport を選ぶ
pub trait TransportSelector: Send + Sync {
    /// `preferred` のスロットが使えればそれ、無ければ最初のアクティブなもの
    fn select(&self, preferred: Option<usize>) -> Option<Arc<dyn Transport>>;
}
