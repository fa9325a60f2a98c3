//! Ports - 抽象化レイヤー
//!
//! 外部システム（broker, 時刻, ID 採番）へのインターフェースを定義し、
//! 実装の詳細を隠蔽します。

pub mod broker;
pub mod clock;
pub mod id_generator;

pub use self::broker::{Broker, DeliverySource, EnqueueOptions, TaskInfo, TaskLease};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
