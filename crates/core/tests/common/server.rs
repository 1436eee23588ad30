//! Network fixtures speaking the `git://` protocol.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// A `git daemon` serving every repository under a directory, with push
/// enabled.
pub struct GitDaemon {
    child: Child,
    port: u16,
}

impl GitDaemon {
    /// Start a daemon rooted at `base`. `None` when `git` is unavailable.
    pub fn serve(base: &Path) -> Option<Self> {
        let port = free_port();
        let child = Command::new("git")
            .arg("daemon")
            .arg("--reuseaddr")
            .arg("--export-all")
            .arg("--enable=receive-pack")
            .arg("--informative-errors")
            .arg(format!("--base-path={}", base.display()))
            .arg("--listen=127.0.0.1")
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        let mut daemon = Self { child, port };

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if TcpStream::connect(("127.0.0.1", port)).is_ok() {
                return Some(daemon);
            }
            if let Ok(Some(_)) = daemon.child.try_wait() {
                return None;
            }
            thread::sleep(Duration::from_millis(50));
        }
        let _ = daemon.child.kill();
        None
    }

    pub fn url(&self, repo: &str) -> String {
        format!("git://127.0.0.1:{}/{}", self.port, repo)
    }
}

impl Drop for GitDaemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A fake upload-pack server that advertises one branch and then streams
/// progress messages without ever sending a pack.
pub struct StallingServer {
    pub url: String,
    /// Receives once the first progress message has been sent.
    pub transferring: mpsc::Receiver<()>,
}

impl StallingServer {
    pub fn start(branch: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let branch = branch.to_string();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let _ = serve_stalled_fetch(&mut stream, &branch, &tx);
        });

        Self {
            url: format!("git://127.0.0.1:{}/stalled.git", port),
            transferring: rx,
        }
    }
}

fn serve_stalled_fetch(
    stream: &mut TcpStream,
    branch: &str,
    transferring: &mpsc::Sender<()>,
) -> std::io::Result<()> {
    const TIP: &str = "0123456789abcdef0123456789abcdef01234567";

    // git-upload-pack request line
    read_pkt(stream)?;

    write_pkt(stream, format!("{} HEAD\0side-band-64k\n", TIP).as_bytes())?;
    write_pkt(stream, format!("{} refs/heads/{}\n", TIP, branch).as_bytes())?;
    stream.write_all(b"0000")?;

    // wants, flush, then "done"
    loop {
        let pkt = read_pkt(stream)?;
        if pkt.starts_with(b"done") {
            break;
        }
    }
    write_pkt(stream, b"NAK\n")?;

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut signalled = false;
    while Instant::now() < deadline {
        write_pkt(stream, b"\x02Counting objects...\r")?;
        if !signalled {
            let _ = transferring.send(());
            signalled = true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

fn write_pkt(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(format!("{:04x}", data.len() + 4).as_bytes())?;
    stream.write_all(data)?;
    stream.flush()
}

/// Read one pkt-line; a flush packet yields an empty payload.
fn read_pkt(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let len = std::str::from_utf8(&header)
        .ok()
        .and_then(|hex| usize::from_str_radix(hex, 16).ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad pkt-line"))?;
    if len <= 4 {
        return Ok(Vec::new());
    }
    let mut payload = vec![0u8; len - 4];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
