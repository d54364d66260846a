//! ランドマーク座標からの方向・IK計算
//!
//! 座標変換と基準軸(0,1,0)の選択は正面カメラ＋Tポーズ前提の経験則。
//! IK・方向計算はこの式を前提に調整されているため、式は変更しないこと。

use nalgebra::{UnitQuaternion, UnitVector3, Vector3};

// MediaPipe Poseのランドマークインデックス（固定の解剖学的ID）
pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const LEFT_KNEE: usize = 25;
pub const RIGHT_KNEE: usize = 26;

/// 上半身推定に必要な最小ランドマーク数（インデックス0〜16）
pub const MIN_POSE_LANDMARKS: usize = 17;
/// 下半身・体幹の推定にはヒップ・膝のインデックスまで必要
pub const MIN_LOWER_BODY_LANDMARKS: usize = RIGHT_KNEE + 1;

/// 方向ベクトルがゼロとみなされる閾値
const MIN_DIRECTION_LEN: f32 = 1e-6;
/// IKの三角形を可解に保つためのクランプ余裕
const IK_CLAMP_MARGIN: f32 = 1e-3;

/// 正規化画像座標のランドマークを作業空間ベクトルへ変換する
///
/// xを中心化して[-1,1]へ、yは画像座標が下向きなので反転、
/// zは奥行きの符号をターゲットの前方規約に合わせて反転する
pub fn landmark_to_vec(lm: Vector3<f32>) -> Vector3<f32> {
    Vector3::new((lm.x - 0.5) * 2.0, (0.5 - lm.y) * 2.0, -lm.z)
}

/// p0→p1の方向へ基準軸(0,1,0)を向ける回転を求める
///
/// 方向が得られない（2点が一致する）場合はNone。基準軸と方向の外積が
/// ゼロ（整列または正反対）の場合は単位回転を返す。正反対のケースを
/// 180°回転にしないのは既知の単純化であり、ここでは扱いを変えない。
pub fn direction_rotation(p0: Vector3<f32>, p1: Vector3<f32>) -> Option<UnitQuaternion<f32>> {
    let dir = p1 - p0;
    if dir.norm() < MIN_DIRECTION_LEN {
        return None;
    }
    let dir = dir.normalize();

    let reference = Vector3::new(0.0, 1.0, 0.0);
    let axis = reference.cross(&dir);
    if axis.norm() < MIN_DIRECTION_LEN {
        return Some(UnitQuaternion::identity());
    }
    let angle = reference.angle(&dir);
    Some(UnitQuaternion::from_axis_angle(
        &UnitVector3::new_normalize(axis),
        angle,
    ))
}

/// 2ボーンIK: 中間関節（肘・膝）の位置を閉形式で求める
///
/// rootからtargetへの距離を可解区間 [|L1-L2|+ε, L1+L2-ε] にクランプし、
/// 余弦定理で root→target 方向に沿った関節までの距離
/// `a = (L1² - L2² + d²) / (2d)` を計算する。反復なしで一意に決まる。
/// rootとtargetが一致する場合はNone（ゼロ除算を避け、ボーンは据え置き）。
pub fn two_bone_ik(
    root: Vector3<f32>,
    target: Vector3<f32>,
    l1: f32,
    l2: f32,
) -> Option<Vector3<f32>> {
    let d = (target - root).norm();
    if d < MIN_DIRECTION_LEN {
        return None;
    }
    let lo = (l1 - l2).abs() + IK_CLAMP_MARGIN;
    let hi = (l1 + l2 - IK_CLAMP_MARGIN).max(MIN_DIRECTION_LEN);
    // クランプ余裕より短いボーンでは lo > hi に逆転しうる。
    // min/maxの連鎖は逆転区間でも常に正の値に落ちる
    let d_clamped = d.max(lo).min(hi);

    let dir = (target - root).normalize();
    let a = (l1 * l1 - l2 * l2 + d_clamped * d_clamped) / (2.0 * d_clamped);
    Some(root + dir * a)
}
