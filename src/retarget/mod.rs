//! リターゲット: ボーンマッピング・キャリブレーション・適用ロジック

pub mod bone_map;
pub mod engine;
pub mod landmark;
pub mod smooth;

pub use bone_map::{auto_map_mixamorig, BoneMap, CalibrationStore};
pub use engine::RetargetEngine;
pub use smooth::LandmarkSmoother;
