//! Buffered loading from an unbounded input stream.
//!
//! A worker thread owns the stream and reads fixed-size chunks, handing each
//! chunk to the UI side over a channel. The UI side keeps the chunks in a
//! queue bounded by the configured byte cap, either stopping the read at the
//! cap ("head" mode) or discarding from the queue front while reading on
//! ("tail" mode, like `tail -f` on a growing file). Mode and cap can change
//! while the worker is running; it picks the new parameters up before its
//! next read.
//!
//! Whole chunks only on the background path: the queue front is never split
//! while reading, only the final copy-out truncates it exactly to the cap.

use std::collections::VecDeque;
use std::io::Read;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};

/// Read granularity of the worker.
pub const LOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Keep the first `cap` bytes and stop reading.
    Head,
    /// Keep reading forever, retaining the last `cap` bytes.
    Tail,
}

#[derive(Debug)]
enum WorkerCmd {
    Start { mode: LoadMode, target: u64 },
    Reconfigure { mode: LoadMode, target: u64 },
    Pause,
}

/// Messages from the worker to the UI loop.
#[derive(Debug)]
pub enum LoadEvent {
    Data(Vec<u8>),
    /// `eof` distinguishes end-of-stream from a voluntary stop at the head
    /// target; `error` carries the read error text, if any.
    Complete { eof: bool, error: Option<String> },
}

fn worker_loop<R: Read>(mut stream: R, cmd_rx: Receiver<WorkerCmd>, ev_tx: Sender<LoadEvent>) {
    let mut mode = LoadMode::Head;
    let mut target: u64 = 0;
    let mut done: u64 = 0;
    let mut active = false;

    loop {
        // apply every command that arrived since the last read; block for
        // the next command while paused
        loop {
            let cmd = if active {
                match cmd_rx.try_recv() {
                    Ok(cmd) => cmd,
                    Err(crossbeam_channel::TryRecvError::Empty) => break,
                    Err(crossbeam_channel::TryRecvError::Disconnected) => return,
                }
            } else {
                match cmd_rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => return,
                }
            };
            match cmd {
                WorkerCmd::Start {
                    mode: m,
                    target: t,
                } => {
                    mode = m;
                    target = t;
                    done = 0;
                    active = true;
                }
                WorkerCmd::Reconfigure {
                    mode: m,
                    target: t,
                } => {
                    if active {
                        mode = m;
                        target = t;
                        if mode == LoadMode::Head && done >= target {
                            active = false;
                            let _ = ev_tx.send(LoadEvent::Complete {
                                eof: false,
                                error: None,
                            });
                        }
                    }
                }
                WorkerCmd::Pause => active = false,
            }
        }
        if !active {
            continue;
        }

        let want = if mode == LoadMode::Head {
            ((target - done).min(LOAD_CHUNK_SIZE as u64)) as usize
        } else {
            LOAD_CHUNK_SIZE
        };
        let mut buf = vec![0u8; want];
        match stream.read(&mut buf) {
            Ok(0) => {
                active = false;
                let _ = ev_tx.send(LoadEvent::Complete {
                    eof: true,
                    error: None,
                });
            }
            Ok(n) => {
                buf.truncate(n);
                done += n as u64;
                if ev_tx.send(LoadEvent::Data(buf)).is_err() {
                    return;
                }
                if mode == LoadMode::Head && done >= target {
                    active = false;
                    let _ = ev_tx.send(LoadEvent::Complete {
                        eof: false,
                        error: None,
                    });
                }
            }
            Err(e) => {
                active = false;
                let _ = ev_tx.send(LoadEvent::Complete {
                    eof: true,
                    error: Some(e.to_string()),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------

/// UI-side chunk queue, bounded by the cap according to the load mode.
#[derive(Debug)]
pub struct LoadBuffer {
    queue: VecDeque<Vec<u8>>,
    read_total: u64,
    buffered: u64,
    mode: LoadMode,
    cap: u64,
}

impl LoadBuffer {
    pub fn new(mode: LoadMode, cap: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            read_total: 0,
            buffered: 0,
            mode,
            cap,
        }
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    pub fn read_total(&self) -> u64 {
        self.read_total
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered
    }

    pub fn push_chunk(&mut self, data: Vec<u8>) {
        self.read_total += data.len() as u64;
        self.buffered += data.len() as u64;
        self.queue.push_back(data);
        self.limit_data(false);
    }

    pub fn reconfigure(&mut self, mode: LoadMode, cap: u64) {
        self.mode = mode;
        self.cap = cap;
        self.limit_data(false);
    }

    /// Discard queue data beyond the cap in tail mode. Whole chunks are
    /// unhooked from the front; the remainder is cut out of the leading
    /// chunk only when `exact` is requested.
    pub fn limit_data(&mut self, exact: bool) {
        if self.mode != LoadMode::Tail || self.read_total < self.cap {
            return;
        }
        let mut rest = self.buffered.saturating_sub(self.cap);
        while rest > 0 {
            let Some(front_len) = self.queue.front().map(|c| c.len() as u64) else {
                break;
            };
            if front_len > rest {
                break;
            }
            self.queue.pop_front();
            self.buffered -= front_len;
            rest -= front_len;
        }
        if exact && rest > 0 {
            if let Some(front) = self.queue.front_mut() {
                front.drain(..rest as usize);
                self.buffered -= rest;
            }
        }
    }

    /// Hand out the buffered content as one contiguous byte vector. Tail
    /// mode delivers exactly the last `cap` bytes the worker emitted (or
    /// everything when less was read); head mode at most the first `cap`.
    pub fn take_data(&mut self) -> Vec<u8> {
        self.limit_data(true);
        let mut out = Vec::with_capacity(self.buffered.min(self.cap) as usize);
        let mut rest = self.cap;
        while rest > 0 {
            let Some(mut chunk) = self.queue.pop_front() else {
                break;
            };
            let unhooked = chunk.len() as u64;
            if unhooked > rest {
                chunk.truncate(rest as usize);
            }
            self.buffered -= unhooked;
            rest -= chunk.len() as u64;
            out.extend_from_slice(&chunk);
        }
        out
    }
}

// ---------------------------------------------------------------------------

/// Coordinator pairing the worker thread with the buffer, mirroring the
/// worker's activity state so reconfiguration can restart it when needed.
pub struct PipeLoader {
    cmd_tx: Sender<WorkerCmd>,
    events: Receiver<LoadEvent>,
    buffer: LoadBuffer,
    worker_active: bool,
    eof: bool,
    error: Option<String>,
}

impl PipeLoader {
    /// Spawn the reader thread and start loading.
    pub fn start<R: Read + Send + 'static>(stream: R, mode: LoadMode, cap: u64) -> Self {
        let (cmd_tx, cmd_rx) = unbounded();
        let (ev_tx, ev_rx) = unbounded();
        thread::Builder::new()
            .name("pipe-loader".into())
            .spawn(move || worker_loop(stream, cmd_rx, ev_tx))
            .expect("failed to spawn pipe loader thread");

        let loader = Self {
            cmd_tx,
            events: ev_rx,
            buffer: LoadBuffer::new(mode, cap),
            worker_active: true,
            eof: false,
            error: None,
        };
        let _ = loader.cmd_tx.send(WorkerCmd::Start { mode, target: cap });
        debug!(target: "load.pipe", ?mode, cap, "loader_started");
        loader
    }

    /// Channel to poll from the event loop.
    pub fn events(&self) -> &Receiver<LoadEvent> {
        &self.events
    }

    /// Feed one worker event into the buffer. Returns true when loading
    /// finished (end of stream, error, or head target reached).
    pub fn handle_event(&mut self, ev: LoadEvent) -> bool {
        match ev {
            LoadEvent::Data(chunk) => {
                self.buffer.push_chunk(chunk);
                false
            }
            LoadEvent::Complete { eof, error } => {
                self.worker_active = false;
                self.eof |= eof;
                if let Some(e) = error {
                    warn!(target: "load.pipe", error = %e, "read_error");
                    self.error = Some(e);
                }
                // a reconfiguration may have crossed with the completion
                self.update_worker();
                true
            }
        }
    }

    /// Change mode or cap while loading; the worker is reconfigured or
    /// restarted as appropriate.
    pub fn reconfigure(&mut self, mode: LoadMode, cap: u64) {
        self.buffer.reconfigure(mode, cap);
        self.update_worker();
    }

    fn update_worker(&mut self) {
        if self.eof {
            return;
        }
        let mode = self.buffer.mode();
        let cap = self.buffer.cap();
        if self.worker_active {
            let _ = self.cmd_tx.send(WorkerCmd::Reconfigure { mode, target: cap });
        } else if mode == LoadMode::Tail {
            let _ = self.cmd_tx.send(WorkerCmd::Start { mode, target: cap });
            self.worker_active = true;
        } else if self.buffer.buffered_bytes() < cap {
            let _ = self.cmd_tx.send(WorkerCmd::Start {
                mode,
                target: cap - self.buffer.buffered_bytes(),
            });
            self.worker_active = true;
        }
    }

    pub fn pause(&mut self) {
        if self.worker_active {
            let _ = self.cmd_tx.send(WorkerCmd::Pause);
            self.worker_active = false;
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The buffer is complete when the stream ended or head mode reached
    /// its cap.
    pub fn is_ready(&self) -> bool {
        self.eof
            || (self.buffer.mode() == LoadMode::Head
                && self.buffer.buffered_bytes() >= self.buffer.cap())
    }

    pub fn read_total(&self) -> u64 {
        self.buffer.read_total()
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffer.buffered_bytes()
    }

    pub fn take_data(&mut self) -> Vec<u8> {
        self.buffer.take_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn drain_until_complete(loader: &mut PipeLoader) {
        for _ in 0..1000 {
            let ev = loader
                .events
                .recv_timeout(Duration::from_secs(5))
                .expect("worker went silent");
            if loader.handle_event(ev) {
                return;
            }
        }
        panic!("no completion event");
    }

    #[test]
    fn tail_mode_drops_whole_chunks_from_front() {
        // cap 100, three 60-byte chunks: the queue keeps two whole chunks
        let mut buf = LoadBuffer::new(LoadMode::Tail, 100);
        buf.push_chunk(vec![b'a'; 60]);
        assert_eq!(buf.buffered_bytes(), 60);
        buf.push_chunk(vec![b'b'; 60]);
        assert_eq!(buf.buffered_bytes(), 120);
        buf.push_chunk(vec![b'c'; 60]);
        assert_eq!(buf.buffered_bytes(), 120);
        assert_eq!(buf.read_total(), 180);

        // exact copy-out delivers the last 100 of the 180 emitted bytes
        let data = buf.take_data();
        assert_eq!(data.len(), 100);
        assert_eq!(&data[..40], &[b'b'; 40][..]);
        assert_eq!(&data[40..], &[b'c'; 60][..]);
    }

    #[test]
    fn tail_cap_invariant_bounded_by_chunk_size() {
        let mut buf = LoadBuffer::new(LoadMode::Tail, 1000);
        for i in 0..50 {
            buf.push_chunk(vec![i as u8; 333]);
            assert!(buf.buffered_bytes() <= 1000 + 333);
        }
    }

    #[test]
    fn head_mode_keeps_first_bytes_only() {
        let mut buf = LoadBuffer::new(LoadMode::Head, 100);
        buf.push_chunk(vec![b'x'; 80]);
        buf.push_chunk(vec![b'y'; 80]);
        // head mode never discards from the front
        assert_eq!(buf.buffered_bytes(), 160);
        let data = buf.take_data();
        assert_eq!(data.len(), 100);
        assert_eq!(&data[..80], &[b'x'; 80][..]);
        assert_eq!(&data[80..], &[b'y'; 20][..]);
    }

    #[test]
    fn worker_head_mode_stops_at_target() {
        let stream = Cursor::new(vec![7u8; 500_000]);
        let mut loader = PipeLoader::start(stream, LoadMode::Head, 100_000);
        drain_until_complete(&mut loader);
        assert!(!loader.is_eof(), "head stop is not end-of-stream");
        assert!(loader.is_ready());
        assert_eq!(loader.read_total(), 100_000);
        assert_eq!(loader.take_data().len(), 100_000);
    }

    #[test]
    fn worker_tail_mode_reads_to_eof_and_trims() {
        let mut content = vec![0u8; 200_000];
        let tail_marker = content.len() - 1;
        content[tail_marker] = 42;
        let mut loader = PipeLoader::start(Cursor::new(content), LoadMode::Tail, 50_000);
        drain_until_complete(&mut loader);
        assert!(loader.is_eof());
        assert_eq!(loader.read_total(), 200_000);
        assert!(loader.buffered_bytes() <= 50_000 + LOAD_CHUNK_SIZE as u64);

        let data = loader.take_data();
        assert_eq!(data.len(), 50_000);
        assert_eq!(*data.last().unwrap(), 42, "data is the stream tail");
    }

    #[test]
    fn shrinking_head_cap_below_read_completes() {
        // a reader that never ends: first chunk delivered, then blocks on
        // a channel-backed stream; shrinking the cap must complete anyway
        struct SlowReader(crossbeam_channel::Receiver<Vec<u8>>, Option<Vec<u8>>);
        impl Read for SlowReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if let Some(data) = self.1.take() {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    return Ok(n);
                }
                match self.0.recv() {
                    Ok(data) => {
                        let n = data.len().min(buf.len());
                        buf[..n].copy_from_slice(&data[..n]);
                        Ok(n)
                    }
                    Err(_) => Ok(0),
                }
            }
        }

        let (_feed_tx, feed_rx) = unbounded::<Vec<u8>>();
        let stream = SlowReader(feed_rx, Some(vec![1u8; 10_000]));
        let mut loader = PipeLoader::start(stream, LoadMode::Head, 1_000_000);

        // first data event arrives, then the worker blocks in read
        let ev = loader
            .events
            .recv_timeout(Duration::from_secs(5))
            .expect("no first chunk");
        loader.handle_event(ev);
        assert_eq!(loader.buffered_bytes(), 10_000);

        loader.reconfigure(LoadMode::Head, 5_000);
        // the worker cannot see the command while blocked, but the buffer
        // is already complete from the UI's point of view
        assert!(loader.is_ready());
        assert_eq!(loader.take_data().len(), 5_000);
    }
}
