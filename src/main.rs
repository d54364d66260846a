use anyhow::Result;
use std::io::{self, BufRead};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use live_mocap::config::Config;
use live_mocap::protocol::MocapMode;
use live_mocap::retarget::{auto_map_mixamorig, RetargetEngine};
use live_mocap::rig::MemoryRig;
use live_mocap::stream::MocapReceiver;

const CONFIG_PATH: &str = "config.toml";
const DRIVE_HZ: f64 = 60.0;

/// デモ用のmixamorig互換リグを組み立てる
fn build_demo_rig() -> MemoryRig {
    let mut rig = MemoryRig::new();
    let bones: [(&str, f32); 14] = [
        ("mixamorig:Hips", 0.10),
        ("mixamorig:Spine", 0.30),
        ("mixamorig:Neck", 0.10),
        ("mixamorig:Head", 0.15),
        ("mixamorig:LeftShoulder", 0.28),
        ("mixamorig:LeftForeArm", 0.26),
        ("mixamorig:LeftHand", 0.18),
        ("mixamorig:RightShoulder", 0.28),
        ("mixamorig:RightForeArm", 0.26),
        ("mixamorig:RightHand", 0.18),
        ("mixamorig:LeftUpLeg", 0.42),
        ("mixamorig:LeftLeg", 0.40),
        ("mixamorig:RightUpLeg", 0.42),
        ("mixamorig:RightLeg", 0.40),
    ];
    for (name, length) in bones {
        rig.add_bone(name, length);
    }
    rig
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Live Mocap Retargeter ===");
    println!("接続先: {}:{}", config.network.ip, config.network.port);
    println!("モード: {:?}", config.retarget.mode);
    println!();
    println!("コマンド:");
    println!("  c - キャリブレーション (現在ポーズをゼロ点にする)");
    println!("  m - モード切替 (WHOLE_BODY / HANDS_ONLY)");
    println!("  s - 状態表示");
    println!("  q - 終了");
    println!();

    let mut rig = build_demo_rig();

    let mut map = config.bone_map();
    if map.is_empty() && config.retarget.auto_map {
        map = auto_map_mixamorig(&rig);
    }
    println!("マッピング: {} bones", map.len());

    let mut engine = RetargetEngine::new(map);
    engine.set_mode(config.retarget.mode);

    let mut receiver = MocapReceiver::new(&config.network.ip, config.network.port);
    receiver.start();

    // stdinは専用スレッドで読み、ドライブループをブロックしない
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if cmd_tx.send(line.trim().to_string()).is_err() {
                break;
            }
        }
    });

    let frame_duration = Duration::from_secs_f64(1.0 / DRIVE_HZ);
    let freshness = Duration::from_millis(config.retarget.freshness_ms);

    // FPS計測
    let mut applied_count = 0u32;
    let mut status_timer = Instant::now();

    loop {
        let loop_start = Instant::now();

        match cmd_rx.try_recv() {
            Ok(cmd) => match cmd.as_str() {
                "q" => break,
                "c" => match engine.calibrate(&rig) {
                    Ok(n) => println!("キャリブレーション完了: {} bones", n),
                    Err(e) => println!("キャリブレーション失敗: {}", e),
                },
                "m" => {
                    let next = match engine.mode() {
                        MocapMode::WholeBody => MocapMode::HandsOnly,
                        MocapMode::HandsOnly => MocapMode::WholeBody,
                    };
                    engine.set_mode(next);
                    println!("モード: {:?}", next);
                }
                "s" => {
                    println!(
                        "state={} fresh={} mapped={}",
                        receiver.state(),
                        receiver.is_data_fresh(freshness),
                        engine.bone_map().len()
                    );
                }
                "" => {}
                other => println!("不明なコマンド: {}", other),
            },
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => break,
        }

        if let Some(frame) = receiver.latest_frame() {
            match engine.apply(&mut rig, &frame) {
                Ok(()) => applied_count += 1,
                Err(e) => log::warn!("frame apply failed: {}", e),
            }
        }

        if status_timer.elapsed() >= Duration::from_secs(1) {
            log::info!(
                "state={} fresh={} applied_fps={}",
                receiver.state(),
                receiver.is_data_fresh(freshness),
                applied_count
            );
            applied_count = 0;
            status_timer = Instant::now();
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    receiver.stop();
    println!("終了しました");
    Ok(())
}
