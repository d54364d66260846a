//! リグ抽象。ホスト所有のスケルトンへの最小限のケイパビリティを注入する

use nalgebra::{UnitQuaternion, Vector3};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RigError {
    /// リグがポーズ編集可能な状態にない（apply/calibrateはこの呼び出しのみ中断）
    #[error("rig is not in a pose-editable state")]
    NotEditable,
    #[error("rig has no bone named '{0}'")]
    MissingBone(String),
}

/// 名前付きボーンを持つポーズ編集可能なリグ
///
/// エンジンが触るのはこのインターフェースだけ。ホストのシーン表現や
/// スケジューラには依存しない（フェイクリグでテスト可能にするため）。
pub trait Rig {
    /// ポーズ編集可能な状態か。falseの間はボーンを変更してはならない
    fn is_pose_editable(&self) -> bool;

    fn has_bone(&self, name: &str) -> bool;

    /// リグ内の全ボーン名（定義順）
    fn bone_names(&self) -> Vec<String>;

    /// 現在のローカル回転
    fn rotation(&self, name: &str) -> Result<UnitQuaternion<f32>, RigError>;

    fn set_rotation(&mut self, name: &str, rotation: UnitQuaternion<f32>) -> Result<(), RigError>;

    /// ローカル並進の設定（ルートボーン用）
    fn set_translation(&mut self, name: &str, translation: Vector3<f32>) -> Result<(), RigError>;

    /// バインドポーズでのボーン長（固定値）
    fn rest_length(&self, name: &str) -> Result<f32, RigError>;
}

// --- In-memory rig ---

#[derive(Debug, Clone)]
struct BoneState {
    rotation: UnitQuaternion<f32>,
    translation: Vector3<f32>,
    rest_length: f32,
}

/// メモリ上のリグ実装。テストとドライババイナリで使用する
#[derive(Debug, Default)]
pub struct MemoryRig {
    // 定義順を保持（名前解決のフォールバック検索が順序依存のため）
    names: Vec<String>,
    bones: std::collections::HashMap<String, BoneState>,
    editable: bool,
}

impl MemoryRig {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            bones: std::collections::HashMap::new(),
            editable: true,
        }
    }

    pub fn add_bone(&mut self, name: &str, rest_length: f32) {
        if !self.bones.contains_key(name) {
            self.names.push(name.to_string());
        }
        self.bones.insert(
            name.to_string(),
            BoneState {
                rotation: UnitQuaternion::identity(),
                translation: Vector3::zeros(),
                rest_length,
            },
        );
    }

    pub fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    pub fn translation(&self, name: &str) -> Result<Vector3<f32>, RigError> {
        self.bones
            .get(name)
            .map(|b| b.translation)
            .ok_or_else(|| RigError::MissingBone(name.to_string()))
    }

    fn bone(&self, name: &str) -> Result<&BoneState, RigError> {
        self.bones
            .get(name)
            .ok_or_else(|| RigError::MissingBone(name.to_string()))
    }

    fn bone_mut(&mut self, name: &str) -> Result<&mut BoneState, RigError> {
        self.bones
            .get_mut(name)
            .ok_or_else(|| RigError::MissingBone(name.to_string()))
    }
}

impl Rig for MemoryRig {
    fn is_pose_editable(&self) -> bool {
        self.editable
    }

    fn has_bone(&self, name: &str) -> bool {
        self.bones.contains_key(name)
    }

    fn bone_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn rotation(&self, name: &str) -> Result<UnitQuaternion<f32>, RigError> {
        Ok(self.bone(name)?.rotation)
    }

    fn set_rotation(&mut self, name: &str, rotation: UnitQuaternion<f32>) -> Result<(), RigError> {
        self.bone_mut(name)?.rotation = rotation;
        Ok(())
    }

    fn set_translation(&mut self, name: &str, translation: Vector3<f32>) -> Result<(), RigError> {
        self.bone_mut(name)?.translation = translation;
        Ok(())
    }

    fn rest_length(&self, name: &str) -> Result<f32, RigError> {
        Ok(self.bone(name)?.rest_length)
    }
}
