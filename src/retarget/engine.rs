//! リターゲットエンジン本体
//!
//! 1フレーム分のポーズデータをボーンマップ・キャリブレーションと突き合わせ、
//! リグのボーン回転（とルート並進）を更新する。リグ状態エラーはその呼び出し
//! 全体を中断して呼び出し元へ返すが、ボーン単位の失敗はログに残して
//! 残りのボーンの処理を続ける。

use log::{debug, warn};
use nalgebra::{UnitQuaternion, Vector3};

use crate::protocol::{JointId, MocapMode, PoseFrame};
use crate::retarget::bone_map::{BoneMap, CalibrationStore};
use crate::retarget::landmark::{self, direction_rotation, landmark_to_vec, two_bone_ik};
use crate::retarget::smooth::{LandmarkSmoother, SMOOTH_ALPHA};
use crate::rig::{Rig, RigError};

pub struct RetargetEngine {
    map: BoneMap,
    calibration: CalibrationStore,
    smoother: LandmarkSmoother,
    mode: MocapMode,
}

impl RetargetEngine {
    pub fn new(map: BoneMap) -> Self {
        Self {
            map,
            calibration: CalibrationStore::new(),
            smoother: LandmarkSmoother::new(SMOOTH_ALPHA),
            mode: MocapMode::default(),
        }
    }

    /// 適用モード。フレーム自身のmodeフィールドは参考値で、こちらが優先される
    pub fn set_mode(&mut self, mode: MocapMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> MocapMode {
        self.mode
    }

    pub fn bone_map(&self) -> &BoneMap {
        &self.map
    }

    pub fn bone_map_mut(&mut self) -> &mut BoneMap {
        &mut self.map
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    /// リグの現在ポーズをゼロ点として取り込む。戻り値は取得ボーン数
    pub fn calibrate<R: Rig + ?Sized>(&mut self, rig: &R) -> Result<usize, RigError> {
        self.calibration.capture(rig, &self.map)
    }

    /// セッション再開時の状態リセット（平滑化フィルタを初期化し直す）
    pub fn reset_session(&mut self) {
        self.smoother.reset();
    }

    /// 1フレームをリグへ適用する
    ///
    /// リグが編集不能なら何も変更せずにエラーを返す。それ以外の失敗は
    /// ボーン単位で、1本の失敗が他のボーンの適用を妨げることはない。
    pub fn apply<R: Rig + ?Sized>(&mut self, rig: &mut R, frame: &PoseFrame) -> Result<(), RigError> {
        if !rig.is_pose_editable() {
            return Err(RigError::NotEditable);
        }

        // ランドマーク経路は回転経路とは独立・加算的
        if let Some(landmarks) = &frame.landmarks {
            self.apply_landmarks(rig, &landmarks.pose);
        }

        match self.mode {
            MocapMode::WholeBody => self.apply_whole_body(rig, frame),
            MocapMode::HandsOnly => self.apply_hands_only(rig, frame),
        }
        Ok(())
    }

    // --- Quaternion path ---

    fn apply_whole_body<R: Rig + ?Sized>(&self, rig: &mut R, frame: &PoseFrame) {
        // ルート（Hips）の並進を先に処理する
        if let (Some(bone), Some(sample)) = (self.map.get(JointId::Hips), frame.joint(JointId::Hips))
        {
            if let Some(location) = sample.location {
                if let Err(e) = rig.set_translation(bone, location) {
                    warn!("failed to set root translation on '{}': {}", bone, e);
                }
            }
        }

        for (joint, bone) in self.map.iter() {
            if let Some(sample) = frame.joint(joint) {
                if let Some(rotation) = sample.rotation {
                    self.set_calibrated_rotation(rig, bone, rotation);
                }
            }
        }
    }

    fn apply_hands_only<R: Rig + ?Sized>(&self, rig: &mut R, frame: &PoseFrame) {
        for (joint, bone) in self.map.iter() {
            if !joint.is_hand_joint() {
                continue;
            }
            if let Some(sample) = frame.joint(joint) {
                if let Some(rotation) = sample.rotation {
                    self.set_calibrated_rotation(rig, bone, rotation);
                }
            }
        }
    }

    /// キャリブレーションオフセットを前合成して書き込む: `q_cal ∘ q_in`
    fn set_calibrated_rotation<R: Rig + ?Sized>(
        &self,
        rig: &mut R,
        bone: &str,
        rotation: UnitQuaternion<f32>,
    ) {
        let composed = self.calibration.offset(bone) * rotation;
        if let Err(e) = rig.set_rotation(bone, composed) {
            warn!("failed to apply rotation to bone '{}': {}", bone, e);
        }
    }

    // --- Landmark path ---

    /// ランドマーク列から上半身（IK）と体幹・脚（方向）を推定して適用する
    fn apply_landmarks<R: Rig + ?Sized>(&mut self, rig: &mut R, pose: &[Vector3<f32>]) {
        if pose.len() < landmark::MIN_POSE_LANDMARKS {
            debug!("landmark set too small ({} points), discarded", pose.len());
            return;
        }

        // 肩〜手首は平滑化してから作業空間へ
        let ls = self.smoothed(landmark::LEFT_SHOULDER, pose);
        let rs = self.smoothed(landmark::RIGHT_SHOULDER, pose);
        let lw = self.smoothed(landmark::LEFT_WRIST, pose);
        let rw = self.smoothed(landmark::RIGHT_WRIST, pose);

        // 腕は2ボーンIK: 肩→手首を到達目標に肘位置を解く
        self.apply_arm_ik(rig, JointId::LeftShoulder, JointId::LeftElbow, ls, lw);
        self.apply_arm_ik(rig, JointId::RightShoulder, JointId::RightElbow, rs, rw);

        // 脚・体幹にはヒップ以降のインデックスが必要
        if pose.len() < landmark::MIN_LOWER_BODY_LANDMARKS {
            return;
        }

        let hip_l = landmark_to_vec(pose[landmark::LEFT_HIP]);
        let hip_r = landmark_to_vec(pose[landmark::RIGHT_HIP]);
        let knee_l = landmark_to_vec(pose[landmark::LEFT_KNEE]);
        let knee_r = landmark_to_vec(pose[landmark::RIGHT_KNEE]);
        let nose = landmark_to_vec(pose[landmark::NOSE]);
        let hips_mid = (hip_l + hip_r) / 2.0;
        let neck_mid = (ls + rs) / 2.0;

        // 脚: ヒップ→膝の方向を大腿ボーンへ
        self.apply_segment_direction(rig, JointId::LeftUpLeg, hip_l, knee_l);
        self.apply_segment_direction(rig, JointId::RightUpLeg, hip_r, knee_r);

        // 体幹・頭部
        self.apply_segment_direction(rig, JointId::Hips, hips_mid, ls);
        self.apply_segment_direction(rig, JointId::Spine, hips_mid, neck_mid);
        self.apply_segment_direction(rig, JointId::Neck, neck_mid, nose);
        self.apply_segment_direction(rig, JointId::Head, neck_mid, nose);
    }

    fn smoothed(&mut self, index: usize, pose: &[Vector3<f32>]) -> Vector3<f32> {
        self.smoother.smooth(index, landmark_to_vec(pose[index]))
    }

    /// 片腕のIK適用。ボーンが解決できない・到達目標が退化している場合は
    /// そのセグメントをスキップする（エラーにはしない）
    fn apply_arm_ik<R: Rig + ?Sized>(
        &self,
        rig: &mut R,
        upper_joint: JointId,
        lower_joint: JointId,
        root: Vector3<f32>,
        target: Vector3<f32>,
    ) {
        let Some(upper) = self.map.resolve(rig, upper_joint) else {
            return;
        };
        let Some(lower) = self.map.resolve(rig, lower_joint) else {
            return;
        };
        let (Ok(l1), Ok(l2)) = (rig.rest_length(&upper), rig.rest_length(&lower)) else {
            return;
        };
        let Some(joint_pos) = two_bone_ik(root, target, l1, l2) else {
            return;
        };

        self.set_bone_direction(rig, &upper, root, joint_pos);
        self.set_bone_direction(rig, &lower, joint_pos, target);
    }

    /// ジョイント名を解決してp0→p1の方向を向かせる。解決不能ならスキップ
    fn apply_segment_direction<R: Rig + ?Sized>(
        &self,
        rig: &mut R,
        joint: JointId,
        p0: Vector3<f32>,
        p1: Vector3<f32>,
    ) {
        if let Some(bone) = self.map.resolve(rig, joint) {
            self.set_bone_direction(rig, &bone, p0, p1);
        }
    }

    fn set_bone_direction<R: Rig + ?Sized>(
        &self,
        rig: &mut R,
        bone: &str,
        p0: Vector3<f32>,
        p1: Vector3<f32>,
    ) {
        if let Some(rotation) = direction_rotation(p0, p1) {
            self.set_calibrated_rotation(rig, bone, rotation);
        }
    }
}
