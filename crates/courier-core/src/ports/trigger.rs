//! TriggerSource port - ポーリングのきっかけ
//!
//! 本番では分単位の定期実行、テストでは手動発火。
//! ストアの watch による push 通知は PollLoop 側で扱う。

use async_trait::async_trait;

#[async_trait]
pub trait TriggerSource: Send {
    /// 次のトリガーまで待つ
    async fn next_tick(&mut self);
}
