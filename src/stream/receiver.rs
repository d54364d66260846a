//! モキャップストリーム受信スレッド
//!
//! TCPソケットのライフサイクル（接続・指数バックオフ付き再接続・受信
//! バッファの行フレーミング）を専有スレッドで回し、デコード済みフレームを
//! latest-winsスロット経由でドライブループへ渡す。エラーはスレッド境界を
//! 越えず、ポーリング可能な接続状態にのみ反映される。

use std::fmt;
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::protocol::{self, LineBuffer, PoseFrame};
use crate::stream::handoff::LatestSlot;

/// 接続試行のタイムアウト
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// 受信ループの1回あたりreadタイムアウト。停止シグナルの観測間隔を兼ねる
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// 1回のrecvで読む最大バイト数
const READ_CHUNK: usize = 4096;
/// stop()がスレッド終了を待つ猶予時間。超えたら放置する
const STOP_GRACE: Duration = Duration::from_secs(1);
/// 想定外のI/Oエラー後、再接続までの小休止
const ERROR_PAUSE: Duration = Duration::from_secs(1);

// --- Connection state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

// --- Reconnect backoff ---

/// 再接続の指数バックオフ: 1秒から連続失敗ごとに倍増、上限8秒、成功でリセット
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
}

const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(8);

impl Backoff {
    pub fn new() -> Self {
        Self {
            delay: BACKOFF_FLOOR,
        }
    }

    /// 今回スリープすべき時間を返し、次回分を倍増させる
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = (self.delay * 2).min(BACKOFF_CEILING);
        current
    }

    pub fn reset(&mut self) {
        self.delay = BACKOFF_FLOOR;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

// --- Receiver ---

/// 受信スレッドと共有する状態
struct Shared {
    running: AtomicBool,
    state: Mutex<ConnectionState>,
    slot: LatestSlot<PoseFrame>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}

/// TCPモキャップストリームの受信機
///
/// `start()`で専有スレッドを起動し、以降は`latest_frame()`/`state()`の
/// 非ブロッキングアクセサだけで読み出す。ドライブループを待たせない。
pub struct MocapReceiver {
    addr: String,
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MocapReceiver {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", ip, port),
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                state: Mutex::new(ConnectionState::Disconnected),
                slot: LatestSlot::new(),
            }),
            handle: None,
        }
    }

    /// 受信スレッドを起動する。起動済みなら何もしない
    pub fn start(&mut self) {
        if self.shared.running.load(Ordering::SeqCst) {
            debug!("receiver already running");
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let addr = self.addr.clone();
        info!("receiver starting for {}", addr);
        self.handle = Some(thread::spawn(move || run_listener(&addr, &shared)));
    }

    /// 受信スレッドに停止を通知し、猶予時間だけ終了を待つ
    ///
    /// 猶予内に終わらないスレッドは放置する（呼び出し側をハングさせない）。
    /// どの経路でも最終状態はDISCONNECTED。何度呼んでも安全
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + STOP_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("receiver thread did not stop within grace period; abandoning");
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// 保留中の最新フレームを取り出す。非ブロッキング
    pub fn latest_frame(&self) -> Option<PoseFrame> {
        self.shared.slot.take()
    }

    /// 接続状態のスナップショット。非ブロッキング
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// データ鮮度: 直近max_age以内にフレームを受信したか
    /// （接続状態とは独立の観測値）
    pub fn is_data_fresh(&self, max_age: Duration) -> bool {
        self.shared
            .slot
            .last_put()
            .map(|t| t.elapsed() <= max_age)
            .unwrap_or(false)
    }
}

impl Drop for MocapReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

// --- Receive loop (runs on the receiver thread) ---

fn run_listener(addr: &str, shared: &Shared) {
    let mut backoff = Backoff::new();

    while shared.running.load(Ordering::SeqCst) {
        // 1. 接続フェーズ
        shared.set_state(ConnectionState::Connecting);
        let stream = match try_connect(addr) {
            Ok(stream) => {
                backoff.reset();
                shared.set_state(ConnectionState::Connected);
                info!("connected to {}", addr);
                stream
            }
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                shared.set_state(ConnectionState::Reconnecting);
                sleep_while_running(shared, backoff.next_delay());
                continue;
            }
        };

        // 2. 受信フェーズ。接続ごとにバッファを作り直す
        //    （切断時の半端なバイトを再接続後に持ち越さない）
        receive_until_disconnect(stream, shared);
    }

    shared.set_state(ConnectionState::Disconnected);
    info!("receiver thread ended");
}

fn try_connect(addr: &str) -> std::io::Result<TcpStream> {
    let sock_addr: SocketAddr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "address resolution"))?;
    let stream = TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(stream)
}

/// 接続中の受信ループ。戻るのは切断・エラー・停止シグナルのときだけ
fn receive_until_disconnect(mut stream: TcpStream, shared: &Shared) {
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    while shared.running.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => {
                // 相手側のクローズ → 即時再接続へ
                info!("peer closed connection; reconnecting");
                shared.set_state(ConnectionState::Reconnecting);
                return;
            }
            Ok(n) => {
                buffer.push(&chunk[..n]);
                drain_lines(&mut buffer, shared);
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                // 期待されたreadタイムアウト。停止シグナル確認のため周回する
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                info!("connection reset by peer; reconnecting");
                shared.set_state(ConnectionState::Reconnecting);
                return;
            }
            Err(e) => {
                // 想定外のI/Oエラー: 可視化のためERRORにしてから再接続へ
                warn!("socket error during stream: {}", e);
                shared.set_state(ConnectionState::Error);
                sleep_while_running(shared, ERROR_PAUSE);
                return;
            }
        }
    }
}

/// バッファ内の完結した行をすべてデコードしてスロットへ流す
/// デコード失敗はその1行のみ破棄し、接続は維持する
fn drain_lines(buffer: &mut LineBuffer, shared: &Shared) {
    while let Some(line) = buffer.next_line() {
        if line.trim().is_empty() {
            continue;
        }
        match protocol::decode(&line) {
            Ok(frame) => shared.slot.put(frame),
            Err(e) => {
                let head: String = line.chars().take(50).collect();
                warn!("discarding invalid frame line ({}): {}", e, head);
            }
        }
    }
}

/// 停止シグナルを観測しながらスリープする
fn sleep_while_running(shared: &Shared, total: Duration) {
    let deadline = Instant::now() + total;
    while shared.running.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50).min(total));
    }
}
