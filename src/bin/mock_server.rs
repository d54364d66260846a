//! Mock mocap server: streams synthetic newline-delimited JSON frames
//! over TCP at ~60 Hz. Useful for exercising the receiver and retarget
//! paths without a real capture pipeline.

use anyhow::Result;
use serde_json::json;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use live_mocap::config::Config;
use live_mocap::retarget::landmark;

const CONFIG_PATH: &str = "config.toml";
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// 時刻tに応じて揺らした1フレーム分のJSONを生成する
fn generate_frame(t: f32) -> String {
    let sway = (t * 1.5).sin() * 0.1;
    let curl = ((t * 3.0).sin() * 0.5 + 0.5) * 0.2;
    let bob = (t * 2.0).sin() * 0.005;

    // 正面カメラ想定の簡易ランドマーク（肩・肘・手首が左右に振れる）
    let wave = (t * 2.0).sin() * 0.1;
    let mut pose = vec![[0.5f32, 0.5, 0.0]; 33];
    pose[landmark::NOSE] = [0.5, 0.2, 0.0];
    pose[landmark::LEFT_SHOULDER] = [0.4, 0.35, 0.0];
    pose[landmark::RIGHT_SHOULDER] = [0.6, 0.35, 0.0];
    pose[landmark::LEFT_ELBOW] = [0.3, 0.45 + wave, 0.0];
    pose[landmark::RIGHT_ELBOW] = [0.7, 0.45 - wave, 0.0];
    pose[landmark::LEFT_WRIST] = [0.25, 0.55 + wave, 0.0];
    pose[landmark::RIGHT_WRIST] = [0.75, 0.55 - wave, 0.0];
    pose[landmark::LEFT_HIP] = [0.45, 0.6, 0.0];
    pose[landmark::RIGHT_HIP] = [0.55, 0.6, 0.0];
    pose[landmark::LEFT_KNEE] = [0.45, 0.8, 0.0];
    pose[landmark::RIGHT_KNEE] = [0.55, 0.8, 0.0];

    let frame = json!({
        "mode": "WHOLE_BODY",
        "joints": {
            "Hips": {
                "location": [0.0, 0.0, 1.0 + bob],
                "rotation_wzxy": [1.0, 0.0, 0.0, 0.0],
            },
            "Spine": {"rotation_wzxy": [0.9, 0.05, 0.1 + sway, 0.0]},
            "RightShoulder": {"rotation_wzxy": [0.99, 0.0, 0.0, 0.1]},
            "LeftShoulder": {"rotation_wzxy": [0.99, 0.0, 0.0, -0.1]},
            "RightHandIndex1": {"rotation_wzxy": [0.99, 0.0, 0.0, curl]},
            "LeftHandIndex1": {"rotation_wzxy": [0.99, 0.0, 0.0, -curl]},
        },
        "mediapipe": {
            "pose": pose,
            "hands": {},
        },
    });
    let mut line = frame.to_string();
    line.push('\n');
    line
}

/// 1クライアントへの送信ループ。切断で終了する
fn handle_client(mut stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    println!("クライアント接続: {}", peer);

    let start = Instant::now();
    loop {
        let line = generate_frame(start.elapsed().as_secs_f32());
        if stream.write_all(line.as_bytes()).is_err() {
            break;
        }
        thread::sleep(FRAME_INTERVAL);
    }
    println!("クライアント切断: {}", peer);
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);

    let addr = format!("{}:{}", config.network.ip, config.network.port);
    let listener = TcpListener::bind(&addr)?;
    println!("Mock Mocap Server started on {}", addr);
    println!("クライアントの接続を待っています... (Ctrl+Cで終了)");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                thread::spawn(move || handle_client(stream));
            }
            Err(e) => eprintln!("accept error: {}", e),
        }
    }
    Ok(())
}
