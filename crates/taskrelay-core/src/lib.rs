//! taskrelay-core
//!
//! HTTP task gateway and delivery worker around a durable task broker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, outcome, errors）
//! - **ports**: 抽象化レイヤー（Broker / DeliverySource, Clock, IdGenerator）
//! - **queue**: InMemoryBroker（開発・テスト用の broker 実装）と retry policy
//! - **payload**: broker に載せる task payload の codec
//! - **propagation**: W3C trace context / request id の伝搬
//! - **gateway**: enqueue / cancel の業務ロジック
//! - **api**: axum の HTTP surface
//! - **delivery**: 配送 worker（HTTP forward handler, runtime, worker pool）
//! - **telemetry**: tracing-subscriber の初期化
//!
//! リクエストの流れ:
//!
//! ```text
//! POST /tasks -> api -> gateway -> Broker::enqueue
//!                                      |
//!            target <- delivery <- DeliverySource::lease
//! ```

pub mod api;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod payload;
pub mod ports;
pub mod propagation;
pub mod queue;
pub mod telemetry;

pub use error::RelayError;
