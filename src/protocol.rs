//! Wire protocol for the mocap stream: one JSON object per `\n`-terminated line.
//!
//! Self-contained: no imports from other live_mocap modules. Decoding is
//! tolerant per joint (a bad rotation/location array drops that field, not
//! the frame) and strict per line (unparsable JSON fails the whole line).

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// クォータニオンの「ゼロノルム」判定閾値。これ未満は回転なしとして扱う
const MIN_QUAT_NORM: f32 = 1e-6;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Line is not a JSON object; the caller discards exactly this line.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

// --- Mocap mode ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MocapMode {
    #[default]
    WholeBody,
    HandsOnly,
}

impl MocapMode {
    /// Wire value → mode. Unknown strings fall back to WHOLE_BODY.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "HANDS_ONLY" => Self::HandsOnly,
            _ => Self::WholeBody,
        }
    }
}

// --- Joint identifiers ---

/// 既知のモキャップジョイント名の閉じた集合
///
/// 未知のジョイント名はデコード時に無視される（オープンなマップに
/// 取り込まない）。インデックスは固定テーブルとして使用する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum JointId {
    Hips = 0,
    Spine = 1,
    Chest = 2,
    Neck = 3,
    Head = 4,
    LeftShoulder = 5,
    LeftElbow = 6,
    LeftWrist = 7,
    RightShoulder = 8,
    RightElbow = 9,
    RightWrist = 10,
    LeftUpLeg = 11,
    LeftLeg = 12,
    LeftFoot = 13,
    RightUpLeg = 14,
    RightLeg = 15,
    RightFoot = 16,
    LeftHand = 17,
    LeftHandThumb1 = 18,
    LeftHandIndex1 = 19,
    LeftHandMiddle1 = 20,
    LeftHandRing1 = 21,
    LeftHandPinky1 = 22,
    RightHand = 23,
    RightHandThumb1 = 24,
    RightHandIndex1 = 25,
    RightHandMiddle1 = 26,
    RightHandRing1 = 27,
    RightHandPinky1 = 28,
}

/// HANDS_ONLYモードで適用対象となるジョイント名キーワード
/// （ソーススケルトンの命名規約に合わせ大文字小文字を区別する）
const HAND_FILTER: [&str; 7] = [
    "Hand", "Finger", "Thumb", "Index", "Middle", "Ring", "Pinky",
];

impl JointId {
    pub const COUNT: usize = 29;

    pub const ALL: [JointId; Self::COUNT] = [
        Self::Hips,
        Self::Spine,
        Self::Chest,
        Self::Neck,
        Self::Head,
        Self::LeftShoulder,
        Self::LeftElbow,
        Self::LeftWrist,
        Self::RightShoulder,
        Self::RightElbow,
        Self::RightWrist,
        Self::LeftUpLeg,
        Self::LeftLeg,
        Self::LeftFoot,
        Self::RightUpLeg,
        Self::RightLeg,
        Self::RightFoot,
        Self::LeftHand,
        Self::LeftHandThumb1,
        Self::LeftHandIndex1,
        Self::LeftHandMiddle1,
        Self::LeftHandRing1,
        Self::LeftHandPinky1,
        Self::RightHand,
        Self::RightHandThumb1,
        Self::RightHandIndex1,
        Self::RightHandMiddle1,
        Self::RightHandRing1,
        Self::RightHandPinky1,
    ];

    /// ワイヤ上のジョイント名
    pub fn name(self) -> &'static str {
        match self {
            Self::Hips => "Hips",
            Self::Spine => "Spine",
            Self::Chest => "Chest",
            Self::Neck => "Neck",
            Self::Head => "Head",
            Self::LeftShoulder => "LeftShoulder",
            Self::LeftElbow => "LeftElbow",
            Self::LeftWrist => "LeftWrist",
            Self::RightShoulder => "RightShoulder",
            Self::RightElbow => "RightElbow",
            Self::RightWrist => "RightWrist",
            Self::LeftUpLeg => "LeftUpLeg",
            Self::LeftLeg => "LeftLeg",
            Self::LeftFoot => "LeftFoot",
            Self::RightUpLeg => "RightUpLeg",
            Self::RightLeg => "RightLeg",
            Self::RightFoot => "RightFoot",
            Self::LeftHand => "LeftHand",
            Self::LeftHandThumb1 => "LeftHandThumb1",
            Self::LeftHandIndex1 => "LeftHandIndex1",
            Self::LeftHandMiddle1 => "LeftHandMiddle1",
            Self::LeftHandRing1 => "LeftHandRing1",
            Self::LeftHandPinky1 => "LeftHandPinky1",
            Self::RightHand => "RightHand",
            Self::RightHandThumb1 => "RightHandThumb1",
            Self::RightHandIndex1 => "RightHandIndex1",
            Self::RightHandMiddle1 => "RightHandMiddle1",
            Self::RightHandRing1 => "RightHandRing1",
            Self::RightHandPinky1 => "RightHandPinky1",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }

    /// HANDS_ONLYモードの対象かどうか（名前にハンド系キーワードを含む）
    pub fn is_hand_joint(self) -> bool {
        let name = self.name();
        HAND_FILTER.iter().any(|kw| name.contains(kw))
    }
}

// --- Decoded frame ---

/// 単一ジョイントのサンプル。回転・位置それぞれ欠損しうる
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSample {
    /// 正規化済み回転（ノルムがほぼゼロの回転は欠損扱い）
    pub rotation: Option<UnitQuaternion<f32>>,
    pub location: Option<Vector3<f32>>,
}

/// MediaPipe由来のランドマーク集合（画像空間で正規化済み、位置インデックス固定）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkSet {
    pub pose: Vec<Vector3<f32>>,
    pub left_hand: Vec<Vector3<f32>>,
    pub right_hand: Vec<Vector3<f32>>,
}

impl LandmarkSet {
    pub fn is_empty(&self) -> bool {
        self.pose.is_empty() && self.left_hand.is_empty() && self.right_hand.is_empty()
    }
}

/// デコード済みの1フレーム。構築後は不変
#[derive(Debug, Clone, PartialEq)]
pub struct PoseFrame {
    /// ワイヤ上のモード指定（参考値。エンジンは外部設定のモードに従う）
    pub mode: MocapMode,
    joints: [Option<JointSample>; JointId::COUNT],
    pub landmarks: Option<LandmarkSet>,
}

impl PoseFrame {
    pub fn empty() -> Self {
        Self {
            mode: MocapMode::default(),
            joints: [None; JointId::COUNT],
            landmarks: None,
        }
    }

    pub fn joint(&self, id: JointId) -> Option<&JointSample> {
        self.joints[id as usize].as_ref()
    }

    pub fn set_joint(&mut self, id: JointId, sample: JointSample) {
        self.joints[id as usize] = Some(sample);
    }

    /// フレームに含まれるジョイント数
    pub fn joint_count(&self) -> usize {
        self.joints.iter().filter(|j| j.is_some()).count()
    }
}

// --- Decoding ---

/// Decode one newline-delimited wire message.
///
/// Per-joint leniency: a rotation array of length != 4 or a location array of
/// length != 3 drops that field only. Unknown joint names are ignored. An
/// unparsable line yields `DecodeError::Malformed` and the caller keeps
/// parsing from the next newline.
pub fn decode(line: &str) -> Result<PoseFrame, DecodeError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::Malformed("frame is not a JSON object".to_string()))?;

    let mut frame = PoseFrame::empty();

    if let Some(mode) = obj.get("mode").and_then(Value::as_str) {
        frame.mode = MocapMode::from_wire(mode);
    }

    if let Some(joints) = obj.get("joints").and_then(Value::as_object) {
        for (name, entry) in joints {
            let Some(id) = JointId::from_name(name) else {
                continue; // 未知のジョイント名は無視
            };
            let Some(entry) = entry.as_object() else {
                continue;
            };
            let sample = JointSample {
                rotation: entry.get("rotation_wzxy").and_then(quat_wxyz),
                location: entry.get("location").and_then(vec3),
            };
            if sample.rotation.is_some() || sample.location.is_some() {
                frame.set_joint(id, sample);
            }
        }
    }

    if let Some(mp) = obj.get("mediapipe").and_then(Value::as_object) {
        let mut set = LandmarkSet::default();
        if let Some(pose) = mp.get("pose").and_then(Value::as_array) {
            set.pose = pose.iter().filter_map(vec3).collect();
        }
        if let Some(hands) = mp.get("hands").and_then(Value::as_object) {
            if let Some(left) = hands.get("left").and_then(Value::as_array) {
                set.left_hand = left.iter().filter_map(vec3).collect();
            }
            if let Some(right) = hands.get("right").and_then(Value::as_array) {
                set.right_hand = right.iter().filter_map(vec3).collect();
            }
        }
        if !set.is_empty() {
            frame.landmarks = Some(set);
        }
    }

    Ok(frame)
}

/// [x, y, z] 配列 → Vector3。長さ不一致や非数値はNone
fn vec3(value: &Value) -> Option<Vector3<f32>> {
    let arr = value.as_array()?;
    if arr.len() != 3 {
        return None;
    }
    let x = arr[0].as_f64()? as f32;
    let y = arr[1].as_f64()? as f32;
    let z = arr[2].as_f64()? as f32;
    Some(Vector3::new(x, y, z))
}

/// [w, x, y, z] 配列 → 単位クォータニオン。長さ不一致・ゼロノルムはNone
fn quat_wxyz(value: &Value) -> Option<UnitQuaternion<f32>> {
    let arr = value.as_array()?;
    if arr.len() != 4 {
        return None;
    }
    let w = arr[0].as_f64()? as f32;
    let x = arr[1].as_f64()? as f32;
    let y = arr[2].as_f64()? as f32;
    let z = arr[3].as_f64()? as f32;
    let q = Quaternion::new(w, x, y, z);
    if q.norm() < MIN_QUAT_NORM {
        return None; // ほぼゼロノルム → 回転なし
    }
    Some(UnitQuaternion::from_quaternion(q))
}

// --- Line framing ---

/// 受信バイト列を改行区切りの行に組み立てるバッファ
///
/// recv境界をまたいで分割・結合されたメッセージを扱う。接続ごとに
/// 作り直すこと（再接続時に半端なバイトを持ち越さないため）。
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// 完結した1行を取り出す。改行が無ければNone（残りは保持）
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let rest = self.buf.split_off(pos + 1);
        let mut line = std::mem::replace(&mut self.buf, rest);
        line.pop(); // '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
