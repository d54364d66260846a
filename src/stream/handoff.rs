//! 単一スロットのlatest-wins受け渡しキュー
//!
//! 受信スレッド（プロデューサ1）とドライブループ（コンシューマ1）の間で
//! 最新フレームだけを受け渡す。満杯時は保留中の値を破棄してから挿入する
//! ので、プロデューサは決してブロックせず、コンシューマは常に最新を見る。

use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct Inner<T> {
    value: Option<T>,
    last_put: Option<Instant>,
}

#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: None,
                last_put: None,
            }),
        }
    }

    /// 値を挿入する。保留中の値があれば破棄される（latest wins）
    pub fn put(&self, value: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.value = Some(value);
        inner.last_put = Some(Instant::now());
    }

    /// 保留中の値を取り出す。空ならNone。呼び出し側をブロックしない
    pub fn take(&self) -> Option<T> {
        self.inner.lock().unwrap().value.take()
    }

    /// 最後にputされた時刻（鮮度判定用）
    pub fn last_put(&self) -> Option<Instant> {
        self.inner.lock().unwrap().last_put
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_returns_none() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        assert_eq!(slot.take(), None);
        assert!(slot.last_put().is_none());
    }

    #[test]
    fn test_put_take_round_trip() {
        let slot = LatestSlot::new();
        slot.put(7);
        assert_eq!(slot.take(), Some(7));
        // takeで排出済み、バックログなし
        assert_eq!(slot.take(), None);
    }

    /// N回連続でputしても、takeが返すのは最後の値だけ
    #[test]
    fn test_latest_wins() {
        let slot = LatestSlot::new();
        for i in 0..100 {
            slot.put(i);
        }
        assert_eq!(slot.take(), Some(99));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_last_put_updates() {
        let slot = LatestSlot::new();
        assert!(slot.last_put().is_none());
        slot.put(1);
        let t1 = slot.last_put().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        slot.put(2);
        let t2 = slot.last_put().unwrap();
        assert!(t2 > t1);
        // takeしてもタイムスタンプは残る（鮮度は接続性と別の観測値）
        slot.take();
        assert_eq!(slot.last_put(), Some(t2));
    }

    #[test]
    fn test_single_producer_single_consumer() {
        use std::sync::Arc;
        let slot = Arc::new(LatestSlot::new());
        let producer_slot = Arc::clone(&slot);
        let producer = std::thread::spawn(move || {
            for i in 0..1000u64 {
                producer_slot.put(i);
            }
        });
        let mut last_seen = None;
        loop {
            if let Some(v) = slot.take() {
                // 値は単調増加（並べ替え・重複なし、ドロップのみ）
                if let Some(prev) = last_seen {
                    assert!(v > prev, "saw {} after {}", v, prev);
                }
                last_seen = Some(v);
                if v == 999 {
                    break;
                }
            }
            if producer.is_finished() && slot.take().is_none() {
                break;
            }
        }
        producer.join().unwrap();
    }
}
