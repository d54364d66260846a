//! ストリーム受信: TCP接続管理とスレッド間のフレーム受け渡し

pub mod handoff;
pub mod receiver;

pub use handoff::LatestSlot;
pub use receiver::{Backoff, ConnectionState, MocapReceiver};
