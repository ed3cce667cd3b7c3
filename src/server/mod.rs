//! The TCP line-protocol server.
//!
//! Requests and responses are framed identically: a big-endian u32 payload
//! size followed by that many payload bytes. A request payload is a UTF-8
//! command line tokenized into command + arguments, honoring single- and
//! double-quoted tokens. Each connection gets its own thread and a long
//! read deadline; the accept loop polls a shutdown flag so the process can
//! stop cleanly.

pub mod commands;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::engine::KilnDb;
use crate::error::Result;

/// Idle connections are dropped after this long without a request.
const READ_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);

/// Upper bound on a single request frame.
const MAX_FRAME: u32 = 64 * 1024 * 1024;

pub struct Server {
    db: Arc<KilnDb>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Open the database and prepare a server for it.
    pub fn new(config: Config) -> Result<Server> {
        let db = Arc::new(KilnDb::open(config)?);
        Ok(Server {
            db,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn db(&self) -> &Arc<KilnDb> {
        &self.db
    }

    /// A flag that stops the accept loop when set (e.g. from a signal
    /// handler).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Accept and serve connections until the shutdown flag is set, then
    /// close the database.
    pub fn serve(&self) -> Result<()> {
        let addr = &self.db.config().addr;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(%addr, "kilndb is running, ready to accept connections");

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "client connected");
                    let db = Arc::clone(&self.db);
                    std::thread::spawn(move || {
                        if let Err(err) = handle_conn(&db, stream) {
                            tracing::debug!(%peer, "connection closed: {err}");
                        }
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    tracing::warn!("accept failed: {err}");
                }
            }
        }

        tracing::info!("shutting down");
        self.db.close()
    }
}

fn handle_conn(db: &KilnDb, mut stream: TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_nonblocking(false)?;

    loop {
        let Some(payload) = read_frame(&mut stream)? else {
            return Ok(()); // client hung up
        };
        let line = String::from_utf8_lossy(&payload);
        let tokens = tokenize(&line);

        let reply = match tokens.split_first() {
            None => "command not found".to_string(),
            Some((cmd, args)) => dispatch(db, cmd, args),
        };
        write_frame(&mut stream, reply.as_bytes())?;
    }
}

/// Run one command, catching panics at the boundary.
fn dispatch(db: &KilnDb, cmd: &str, args: &[String]) -> String {
    let outcome = catch_unwind(AssertUnwindSafe(|| commands::execute(db, cmd, args)));
    match outcome {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => format!("err: {err}"),
        Err(_) => {
            tracing::error!(cmd, "panic while handling command");
            "err: internal error".to_string()
        }
    }
}

/// Read one `[u32 BE size][payload]` frame. None on clean EOF.
fn read_frame(r: &mut impl Read) -> std::io::Result<Option<Vec<u8>>> {
    let mut size_buf = [0u8; 4];
    match r.read_exact(&mut size_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let size = u32::from_be_bytes(size_buf);
    if size == 0 {
        return Ok(Some(Vec::new()));
    }
    if size > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    let mut payload = vec![0u8; size as usize];
    r.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Write one `[u32 BE size][payload]` frame.
fn write_frame(w: &mut impl Write, payload: &[u8]) -> std::io::Result<()> {
    w.write_all(&(payload.len() as u32).to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Split a command line into tokens with the leftmost-first semantics of
/// the pattern `'.*?'|".*?"|\S+`: at a quote character, the shortest
/// same-line quoted run is one token, delimiters included; otherwise a
/// token is a maximal run of non-whitespace. A quote with no closing mate
/// on the same line is just the start of an ordinary token.
pub fn tokenize(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            let rest = &chars[i + 1..];
            let closing = rest.iter().position(|&x| x == c);
            let newline = rest.iter().position(|&x| x == '\n');
            if let Some(end) = closing {
                // A quoted token cannot span lines.
                if newline.map_or(true, |nl| end < nl) {
                    let end = i + 1 + end;
                    tokens.push(chars[i..=end].iter().collect());
                    i = end + 1;
                    continue;
                }
            }
        }
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        tokens.push(chars[start..i].iter().collect());
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("set foo bar"), vec!["set", "foo", "bar"]);
        // Quoted runs are single tokens, delimiters and all.
        assert_eq!(
            tokenize("set greeting 'hello world'"),
            vec!["set", "greeting", "'hello world'"]
        );
        assert_eq!(
            tokenize("set greeting \"hello world\""),
            vec!["set", "greeting", "\"hello world\""]
        );
        assert_eq!(tokenize("  get   foo  "), vec!["get", "foo"]);
        assert_eq!(tokenize(""), Vec::<String>::new());
        assert_eq!(tokenize("set k ''"), vec!["set", "k", "''"]);
        // A quote mid-word is just part of the word, and an unclosed quote
        // starts an ordinary token.
        assert_eq!(tokenize("set don't worry"), vec!["set", "don't", "worry"]);
        assert_eq!(tokenize("get 'oops"), vec!["get", "'oops"]);
        // The shortest quoted run wins; the remainder is its own token.
        assert_eq!(tokenize("'a'b"), vec!["'a'", "b"]);
    }

    #[test]
    fn test_frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").expect("write");
        assert_eq!(&buf[0..4], &[0, 0, 0, 5]);

        let mut r = buf.as_slice();
        assert_eq!(read_frame(&mut r).expect("read"), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut r).expect("eof"), None);
    }

    #[test]
    fn test_frame_rejects_oversize() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(read_frame(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_server_round_trip_over_socket() {
        let dir = TempDir::new().expect("temp dir");
        let server = Server::new(Config::new(dir.path()).addr("127.0.0.1:0")).expect("server");

        // Bind manually on an ephemeral port to learn the address, then
        // drive one connection through the real handler.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let db = Arc::clone(server.db());
        let worker = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let _ = handle_conn(&db, stream);
        });

        let mut client = TcpStream::connect(addr).expect("connect");
        write_frame(&mut client, b"set greeting 'hello world'").expect("send");
        assert_eq!(
            read_frame(&mut client).expect("reply"),
            Some(b"OK".to_vec())
        );

        // The quoted argument was stored as matched, quotes included.
        write_frame(&mut client, b"get greeting").expect("send");
        assert_eq!(
            read_frame(&mut client).expect("reply"),
            Some(b"'hello world'".to_vec())
        );

        write_frame(&mut client, b"get missing").expect("send");
        assert_eq!(
            read_frame(&mut client).expect("reply"),
            Some(b"<nil>".to_vec())
        );

        write_frame(&mut client, b"bogus").expect("send");
        assert_eq!(
            read_frame(&mut client).expect("reply"),
            Some(b"command not found".to_vec())
        );

        drop(client);
        worker.join().expect("worker");
    }
}
