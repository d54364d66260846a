use anyhow::Result;
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::protocol::{JointId, MocapMode};
use crate::retarget::BoneMap;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub retarget: RetargetConfig,
    /// ジョイント→ボーンの明示マッピング
    #[serde(default)]
    pub mapping: Vec<MappingEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    /// モキャップサーバーのアドレス
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetargetConfig {
    /// 適用モード ("WHOLE_BODY" / "HANDS_ONLY")
    #[serde(default)]
    pub mode: MocapMode,
    /// マッピングが空のときmixamorig自動マッピングを試みる
    #[serde(default = "default_auto_map")]
    pub auto_map: bool,
    /// データ鮮度のしきい値（ミリ秒）
    #[serde(default = "default_freshness_ms")]
    pub freshness_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MappingEntry {
    /// モキャップ側のジョイント名
    pub joint: String,
    /// リグ側のボーン名
    pub bone: String,
}

fn default_ip() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 9763 }
fn default_auto_map() -> bool { true }
fn default_freshness_ms() -> u64 { 1000 }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
        }
    }
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            mode: MocapMode::default(),
            auto_map: default_auto_map(),
            freshness_ms: default_freshness_ms(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 読めなければデフォルト設定で起動する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("config load failed ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// マッピングテーブルをBoneMapへ変換する。未知のジョイント名は警告して無視
    pub fn bone_map(&self) -> BoneMap {
        let mut map = BoneMap::new();
        for entry in &self.mapping {
            match JointId::from_name(&entry.joint) {
                Some(joint) => map.insert(joint, &entry.bone),
                None => warn!("mapping: unknown joint name '{}', skipped", entry.joint),
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.network.ip, "127.0.0.1");
        assert_eq!(config.network.port, 9763);
        assert_eq!(config.retarget.mode, MocapMode::WholeBody);
        assert!(config.retarget.auto_map);
        assert!(config.mapping.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [network]
            ip = "192.168.1.20"
            port = 7004

            [retarget]
            mode = "HANDS_ONLY"
            auto_map = false

            [[mapping]]
            joint = "Spine"
            bone = "spine_01"

            [[mapping]]
            joint = "Hips"
            bone = "pelvis"
            "#,
        )
        .unwrap();
        assert_eq!(config.network.port, 7004);
        assert_eq!(config.retarget.mode, MocapMode::HandsOnly);
        let map = config.bone_map();
        assert_eq!(map.get(JointId::Spine), Some("spine_01"));
        assert_eq!(map.get(JointId::Hips), Some("pelvis"));
    }

    #[test]
    fn test_unknown_joint_in_mapping_skipped() {
        let config: Config = toml::from_str(
            r#"
            [[mapping]]
            joint = "Tail"
            bone = "tail_01"

            [[mapping]]
            joint = "Head"
            bone = "head"
            "#,
        )
        .unwrap();
        let map = config.bone_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(JointId::Head), Some("head"));
    }
}
