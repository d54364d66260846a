//! ランドマーク位置の指数移動平均フィルタ

use std::collections::HashMap;

use nalgebra::Vector3;

/// 新規サンプルの重み。大きいほど追従が速く、ジッタが残る
pub const SMOOTH_ALPHA: f32 = 0.6;

/// ランドマークインデックスごとの単チャネルEMA
///
/// 状態は1リターゲットセッションのスコープ。セッション再開時にreset()する
#[derive(Debug)]
pub struct LandmarkSmoother {
    alpha: f32,
    last: HashMap<usize, Vector3<f32>>,
}

impl Default for LandmarkSmoother {
    fn default() -> Self {
        Self::new(SMOOTH_ALPHA)
    }
}

impl LandmarkSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            last: HashMap::new(),
        }
    }

    /// `smoothed = prev * (1 - α) + raw * α`
    /// 初回サンプルはそのまま採用する（シード。初回は平滑化しない）
    pub fn smooth(&mut self, index: usize, raw: Vector3<f32>) -> Vector3<f32> {
        let smoothed = match self.last.get(&index) {
            Some(prev) => prev * (1.0 - self.alpha) + raw * self.alpha,
            None => raw,
        };
        self.last.insert(index, smoothed);
        smoothed
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}
