//! ジョイント→ボーンのマッピングとキャリブレーションオフセットの保持

use std::collections::HashMap;

use log::{debug, info};
use nalgebra::UnitQuaternion;

use crate::protocol::JointId;
use crate::rig::{Rig, RigError};

// --- Bone map ---

/// モキャップジョイント名 → リグボーン名の対応表
///
/// ジョイントごとに1エントリ（重複挿入は後勝ち）。適用順は意味を持たないが、
/// 挿入順は表示用に保持する。
#[derive(Debug, Clone, Default)]
pub struct BoneMap {
    entries: Vec<(JointId, String)>,
}

impl BoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// マッピングを追加する。同じジョイントへの再挿入は位置を保ったまま上書き
    pub fn insert(&mut self, joint: JointId, bone: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(j, _)| *j == joint) {
            entry.1 = bone.to_string();
        } else {
            self.entries.push((joint, bone.to_string()));
        }
    }

    pub fn get(&self, joint: JointId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(j, _)| *j == joint)
            .map(|(_, b)| b.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (JointId, &str)> {
        self.entries.iter().map(|(j, b)| (*j, b.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// ジョイントに対応するリグボーン名を解決する
    ///
    /// 明示マッピングを最優先し、無ければ左右サフィックスの命名規約
    /// （`.L` / `_L` / `_left` など）を総当たりし、最後にベース名の
    /// 大文字小文字無視の部分一致まで落ちる。全滅ならNone（そのセグメント
    /// はこのフレームではスキップされる。エラーではない）。
    pub fn resolve<R: Rig + ?Sized>(&self, rig: &R, joint: JointId) -> Option<String> {
        if let Some(bone) = self.get(joint) {
            return Some(bone.to_string());
        }

        let name = joint.name();
        let (base, side_names): (&str, &[&str]) = if let Some(rest) = name.strip_prefix("Left") {
            (rest, &[".L", "_L", "_left", " L"])
        } else if let Some(rest) = name.strip_prefix("Right") {
            (rest, &[".R", "_R", "_right", " R"])
        } else {
            (name, &["", ".L", ".R", "_L", "_R"])
        };

        let mut candidates = Vec::new();
        for side in side_names {
            candidates.push(format!("{}{}", base, side));
            candidates.push(format!("Upper{}{}", base, side));
            candidates.push(format!("upper_{}{}", base.to_lowercase(), side));
        }
        for c in &candidates {
            if rig.has_bone(c) {
                return Some(c.clone());
            }
        }

        // 最終手段: ベース名を含む最初のボーン
        let base_lower = base.to_lowercase();
        rig.bone_names()
            .into_iter()
            .find(|b| b.to_lowercase().contains(&base_lower))
    }
}

/// mixamorig系リグ向けの自動マッピング
///
/// ベストエフォートの補助機能。完全一致を優先し、無ければプレフィックスを
/// 落とした部分一致で探す。リグに存在するボーンだけを採用する。
pub fn auto_map_mixamorig<R: Rig + ?Sized>(rig: &R) -> BoneMap {
    const WANTED: [(JointId, &str); 14] = [
        (JointId::Hips, "mixamorig:Hips"),
        (JointId::Spine, "mixamorig:Spine"),
        (JointId::Neck, "mixamorig:Neck"),
        (JointId::Head, "mixamorig:Head"),
        (JointId::LeftShoulder, "mixamorig:LeftShoulder"),
        (JointId::LeftElbow, "mixamorig:LeftForeArm"),
        (JointId::LeftWrist, "mixamorig:LeftHand"),
        (JointId::RightShoulder, "mixamorig:RightShoulder"),
        (JointId::RightElbow, "mixamorig:RightForeArm"),
        (JointId::RightWrist, "mixamorig:RightHand"),
        (JointId::LeftUpLeg, "mixamorig:LeftUpLeg"),
        (JointId::LeftLeg, "mixamorig:LeftLeg"),
        (JointId::RightUpLeg, "mixamorig:RightUpLeg"),
        (JointId::RightLeg, "mixamorig:RightLeg"),
    ];

    let bone_names = rig.bone_names();
    let mut map = BoneMap::new();
    for (joint, pattern) in WANTED {
        let found = if rig.has_bone(pattern) {
            Some(pattern.to_string())
        } else {
            // プレフィックスを落として部分一致
            let short = pattern.rsplit(':').next().unwrap_or(pattern).to_lowercase();
            bone_names
                .iter()
                .find(|b| b.to_lowercase().contains(&short))
                .cloned()
        };
        if let Some(bone) = found {
            map.insert(joint, &bone);
        }
    }

    if map.is_empty() {
        info!("auto-map: no compatible mixamorig bones found in rig");
    } else {
        info!("auto-mapped {} bones", map.len());
    }
    map
}

// --- Calibration store ---

/// ボーンごとのキャリブレーションオフセット
///
/// 各ボーンのキャリブレーション時点の回転の逆数を保持する。これを受信回転に
/// 前合成することで、キャリブレーション時のポーズが実効ゼロになる。
/// エントリが無いボーンは未キャリブレーション（受信回転をそのまま適用）。
#[derive(Debug, Clone, Default)]
pub struct CalibrationStore {
    offsets: HashMap<String, UnitQuaternion<f32>>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 現在のポーズをゼロ点として取り込む
    ///
    /// マップ中の各ボーンの現在回転の逆数を保存する。毎回全消去してから
    /// 再取得するため、古いオフセットは残らない。リグが編集不能なら既存
    /// オフセットに触れずにエラーを返す（部分更新は起きない）。
    pub fn capture<R: Rig + ?Sized>(&mut self, rig: &R, map: &BoneMap) -> Result<usize, RigError> {
        if !rig.is_pose_editable() {
            return Err(RigError::NotEditable);
        }

        // 途中でエラーが出ても既存オフセットを壊さないよう、
        // 新しいマップを組み上げてから成功時にのみ差し替える
        let mut offsets = HashMap::new();
        for (_, bone) in map.iter() {
            match rig.rotation(bone) {
                Ok(rotation) => {
                    offsets.insert(bone.to_string(), rotation.inverse());
                }
                Err(RigError::MissingBone(_)) => {
                    debug!("calibration: bone '{}' not in rig, skipped", bone);
                }
                Err(e) => return Err(e),
            }
        }
        let captured = offsets.len();
        self.offsets = offsets;
        info!("calibration stored offsets for {} bones", captured);
        Ok(captured)
    }

    /// ボーンのオフセット。未キャリブレーションなら単位回転
    pub fn offset(&self, bone: &str) -> UnitQuaternion<f32> {
        self.offsets
            .get(bone)
            .copied()
            .unwrap_or_else(UnitQuaternion::identity)
    }

    pub fn is_calibrated(&self, bone: &str) -> bool {
        self.offsets.contains_key(bone)
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::MemoryRig;
    use nalgebra::Vector3;

    fn quat_eq(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> bool {
        a.angle_to(b) < 1e-5
    }

    #[test]
    fn test_bone_map_last_write_wins() {
        let mut map = BoneMap::new();
        map.insert(JointId::Spine, "spine_01");
        map.insert(JointId::Hips, "pelvis");
        map.insert(JointId::Spine, "spine_02");
        assert_eq!(map.get(JointId::Spine), Some("spine_02"));
        assert_eq!(map.len(), 2);
        // 上書きしても挿入順は変わらない
        let order: Vec<JointId> = map.iter().map(|(j, _)| j).collect();
        assert_eq!(order, vec![JointId::Spine, JointId::Hips]);
    }

    #[test]
    fn test_resolve_prefers_explicit_mapping() {
        let mut rig = MemoryRig::new();
        rig.add_bone("my_arm", 0.3);
        rig.add_bone("Shoulder.L", 0.2);
        let mut map = BoneMap::new();
        map.insert(JointId::LeftShoulder, "my_arm");
        assert_eq!(
            map.resolve(&rig, JointId::LeftShoulder),
            Some("my_arm".to_string())
        );
    }

    #[test]
    fn test_resolve_side_suffix_fallback() {
        let mut rig = MemoryRig::new();
        rig.add_bone("Shoulder.L", 0.2);
        rig.add_bone("Shoulder_R", 0.2);
        let map = BoneMap::new();
        assert_eq!(
            map.resolve(&rig, JointId::LeftShoulder),
            Some("Shoulder.L".to_string())
        );
        assert_eq!(
            map.resolve(&rig, JointId::RightShoulder),
            Some("Shoulder_R".to_string())
        );
    }

    #[test]
    fn test_resolve_substring_fallback_and_miss() {
        let mut rig = MemoryRig::new();
        rig.add_bone("chr_spine_main", 0.3);
        let map = BoneMap::new();
        assert_eq!(
            map.resolve(&rig, JointId::Spine),
            Some("chr_spine_main".to_string())
        );
        // 解決不能 → None（スキップ扱い）
        assert_eq!(map.resolve(&rig, JointId::Head), None);
    }

    #[test]
    fn test_auto_map_mixamorig_exact_and_partial() {
        let mut rig = MemoryRig::new();
        rig.add_bone("mixamorig:Hips", 0.1);
        rig.add_bone("mixamorig:Spine", 0.3);
        rig.add_bone("Char_LeftForeArm_jnt", 0.25);
        let map = auto_map_mixamorig(&rig);
        assert_eq!(map.get(JointId::Hips), Some("mixamorig:Hips"));
        assert_eq!(map.get(JointId::Spine), Some("mixamorig:Spine"));
        assert_eq!(map.get(JointId::LeftElbow), Some("Char_LeftForeArm_jnt"));
        assert_eq!(map.get(JointId::Head), None);
    }

    #[test]
    fn test_calibration_stores_inverse() {
        let mut rig = MemoryRig::new();
        rig.add_bone("Spine", 0.3);
        let r = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.7);
        rig.set_rotation("Spine", r).unwrap();

        let mut map = BoneMap::new();
        map.insert(JointId::Spine, "Spine");

        let mut cal = CalibrationStore::new();
        assert_eq!(cal.capture(&rig, &map).unwrap(), 1);
        assert!(quat_eq(&cal.offset("Spine"), &r.inverse()));
        // 未登録ボーンは単位回転
        assert!(quat_eq(&cal.offset("Other"), &UnitQuaternion::identity()));
    }

    #[test]
    fn test_calibration_idempotent() {
        let mut rig = MemoryRig::new();
        rig.add_bone("Head", 0.1);
        rig.set_rotation(
            "Head",
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.4),
        )
        .unwrap();
        let mut map = BoneMap::new();
        map.insert(JointId::Head, "Head");

        let mut cal = CalibrationStore::new();
        cal.capture(&rig, &map).unwrap();
        let first = cal.offset("Head");
        cal.capture(&rig, &map).unwrap();
        assert!(quat_eq(&cal.offset("Head"), &first));
    }

    #[test]
    fn test_calibration_rejects_non_editable_rig() {
        let mut rig = MemoryRig::new();
        rig.add_bone("Spine", 0.3);
        rig.set_rotation(
            "Spine",
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 1.0),
        )
        .unwrap();
        let mut map = BoneMap::new();
        map.insert(JointId::Spine, "Spine");

        let mut cal = CalibrationStore::new();
        cal.capture(&rig, &map).unwrap();
        assert!(cal.is_calibrated("Spine"));

        // 編集不能になったら失敗し、既存オフセットは無傷のまま
        rig.set_editable(false);
        assert_eq!(cal.capture(&rig, &map), Err(RigError::NotEditable));
        assert!(cal.is_calibrated("Spine"));
    }

    /// rotation()が途中で失敗しても、取得済みの既存オフセットは無傷で残る
    #[test]
    fn test_calibration_failure_preserves_previous_offsets() {
        // 特定ボーンの回転読み出しだけが失敗するリグ
        struct LockedBoneRig {
            inner: MemoryRig,
            locked: String,
        }
        impl Rig for LockedBoneRig {
            fn is_pose_editable(&self) -> bool {
                self.inner.is_pose_editable()
            }
            fn has_bone(&self, name: &str) -> bool {
                self.inner.has_bone(name)
            }
            fn bone_names(&self) -> Vec<String> {
                self.inner.bone_names()
            }
            fn rotation(&self, name: &str) -> Result<UnitQuaternion<f32>, RigError> {
                if name == self.locked {
                    return Err(RigError::NotEditable);
                }
                self.inner.rotation(name)
            }
            fn set_rotation(
                &mut self,
                name: &str,
                rotation: UnitQuaternion<f32>,
            ) -> Result<(), RigError> {
                self.inner.set_rotation(name, rotation)
            }
            fn set_translation(
                &mut self,
                name: &str,
                translation: Vector3<f32>,
            ) -> Result<(), RigError> {
                self.inner.set_translation(name, translation)
            }
            fn rest_length(&self, name: &str) -> Result<f32, RigError> {
                self.inner.rest_length(name)
            }
        }

        let mut inner = MemoryRig::new();
        inner.add_bone("Spine", 0.3);
        inner.add_bone("Head", 0.1);
        let r = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.6);
        inner.set_rotation("Spine", r).unwrap();
        let mut rig = LockedBoneRig {
            inner,
            locked: String::new(),
        };

        let mut map = BoneMap::new();
        map.insert(JointId::Spine, "Spine");

        let mut cal = CalibrationStore::new();
        cal.capture(&rig, &map).unwrap();
        assert!(quat_eq(&cal.offset("Spine"), &r.inverse()));

        // ポーズを変え、2本目の読み出しで失敗させる
        rig.inner
            .set_rotation("Spine", UnitQuaternion::identity())
            .unwrap();
        map.insert(JointId::Head, "Head");
        rig.locked = "Head".to_string();
        assert_eq!(cal.capture(&rig, &map), Err(RigError::NotEditable));

        // 失敗した取り込みは一切反映されない（古いオフセットのまま）
        assert!(quat_eq(&cal.offset("Spine"), &r.inverse()));
        assert!(!cal.is_calibrated("Head"));
    }

    #[test]
    fn test_calibration_skips_missing_bones() {
        let mut rig = MemoryRig::new();
        rig.add_bone("Spine", 0.3);
        let mut map = BoneMap::new();
        map.insert(JointId::Spine, "Spine");
        map.insert(JointId::Head, "NoSuchBone");

        let mut cal = CalibrationStore::new();
        assert_eq!(cal.capture(&rig, &map).unwrap(), 1);
        assert!(cal.is_calibrated("Spine"));
        assert!(!cal.is_calibrated("NoSuchBone"));
    }
}
