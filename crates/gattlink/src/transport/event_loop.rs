//! Process-wide event loop
//!
//! One worker thread serves every connection: it polls the bearers, feeds
//! inbound PDUs to their channels, and runs jobs submitted from application
//! threads. The loop is shared through [`acquire`]; each [`Arc`] handle is a
//! reference, and dropping the last one stops and joins the worker. A new
//! loop is only started once the previous worker has exited, so at most one
//! runs at a time.
//!
//! Channels never leave the worker thread, so they need no locking. Only the
//! command queue is shared.

use super::PduSocket;
use crate::att::{AttChannel, AttError, ATT_MAX_MTU};
use crate::error::{TransportError, TransportResult};
use log::{debug, error, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

/// Upper bound on one poll, so transaction timeouts are noticed
const POLL_INTERVAL_MS: libc::c_int = 1000;

pub(crate) type ConnectionId = u64;

/// Work executed on the loop thread against one connection's channel
pub(crate) type Job = Box<dyn FnOnce(&mut AttChannel) + Send>;

pub(crate) enum Command {
    Attach {
        id: ConnectionId,
        socket: Arc<dyn PduSocket>,
        mtu: u16,
    },
    Run {
        id: ConnectionId,
        job: Job,
    },
    Detach {
        id: ConnectionId,
        done: mpsc::Sender<()>,
    },
}

struct Shared {
    commands: Mutex<VecDeque<Command>>,
    stop: AtomicBool,
    wake_rx: RawFd,
    wake_tx: RawFd,
}

impl Shared {
    fn wake(&self) {
        let byte = 1u8;
        // A full pipe already guarantees a wakeup
        unsafe {
            libc::write(self.wake_tx, &byte as *const u8 as *const libc::c_void, 1);
        }
    }

    fn drain_wake(&self) {
        let mut sink = [0u8; 64];
        while unsafe {
            libc::read(
                self.wake_rx,
                sink.as_mut_ptr() as *mut libc::c_void,
                sink.len(),
            )
        } > 0
        {}
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_rx);
            libc::close(self.wake_tx);
        }
    }
}

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

struct SlotState {
    current: Weak<EventLoop>,
    /// Worker threads that have not returned yet
    workers: usize,
    /// Most workers ever alive at once
    peak: usize,
}

/// Where the process-wide loop is published
pub(crate) struct LoopSlot {
    state: Mutex<SlotState>,
    retired: Condvar,
}

impl LoopSlot {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                current: Weak::new(),
                workers: 0,
                peak: 0,
            }),
            retired: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference on the loop, starting it if no connection holds one.
    ///
    /// While the previous loop is still being joined the caller waits for
    /// its worker to exit. A worker thread never waits, since it may be the
    /// one being retired.
    pub(crate) fn acquire(&'static self) -> TransportResult<Arc<EventLoop>> {
        let mut state = self.lock();
        loop {
            if let Some(running) = state.current.upgrade() {
                return Ok(running);
            }
            if state.workers == 0 || ON_WORKER.with(Cell::get) {
                break;
            }
            trace!("Waiting for the previous event loop to stop");
            state = self
                .retired
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        // Counted before the spawn; the worker's retirement needs this lock
        state.workers += 1;
        state.peak = state.peak.max(state.workers);
        let started = match EventLoop::start(self) {
            Ok(started) => Arc::new(started),
            Err(err) => {
                state.workers -= 1;
                return Err(err);
            }
        };
        state.current = Arc::downgrade(&started);
        trace!("{} event loop worker(s) alive, peak {}", state.workers, state.peak);
        self.retired.notify_all();
        Ok(started)
    }

    fn retire(&self) {
        let mut state = self.lock();
        state.workers = state.workers.saturating_sub(1);
        self.retired.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn workers(&self) -> (usize, usize) {
        let state = self.lock();
        (state.workers, state.peak)
    }
}

static SHARED_LOOP: LoopSlot = LoopSlot::new();

/// Take a reference on the shared loop, starting it if no connection holds one.
pub(crate) fn acquire() -> TransportResult<Arc<EventLoop>> {
    SHARED_LOOP.acquire()
}

/// Handle on the shared worker
pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

/// Marks the worker gone when `run` returns, even by panic
struct Retiring(&'static LoopSlot);

impl Drop for Retiring {
    fn drop(&mut self) {
        self.0.retire();
    }
}

impl EventLoop {
    fn start(slot: &'static LoopSlot) -> TransportResult<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }
        let shared = Arc::new(Shared {
            commands: Mutex::new(VecDeque::new()),
            stop: AtomicBool::new(false),
            wake_rx: fds[0],
            wake_tx: fds[1],
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("gattlink-loop".into())
            .spawn(move || {
                let _retiring = Retiring(slot);
                ON_WORKER.with(|flag| flag.set(true));
                run(worker_shared)
            })
            .map_err(TransportError::Socket)?;
        let worker_id = worker.thread().id();
        info!("Started shared event loop");

        Ok(Self {
            shared,
            worker: Some(worker),
            worker_id,
        })
    }

    /// Queue a command for the worker
    pub(crate) fn submit(&self, command: Command) -> TransportResult<()> {
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(TransportError::LoopStopped);
        }
        self.shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(command);
        self.shared.wake();
        Ok(())
    }

    /// Whether the caller is running on the worker thread
    pub(crate) fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake();
        if let Some(worker) = self.worker.take() {
            if self.is_worker_thread() {
                // The last connection went away inside a callback; the
                // worker sees the stop flag once the callback returns.
                debug!("Event loop released from its own thread");
                return;
            }
            if worker.join().is_err() {
                error!("Event loop worker panicked");
            }
        }
        info!("Stopped shared event loop");
    }
}

struct Attached {
    /// `None` once the bearer has failed; the channel stays to answer jobs
    socket: Option<Arc<dyn PduSocket>>,
    channel: AttChannel,
}

impl Attached {
    fn close(&mut self, err: AttError) {
        self.socket = None;
        self.channel.fail_all(err);
    }
}

fn run(shared: Arc<Shared>) {
    let mut connections: HashMap<ConnectionId, Attached> = HashMap::new();
    let mut buf = vec![0u8; ATT_MAX_MTU as usize];

    while !shared.stop.load(Ordering::Acquire) {
        let mut fds = vec![libc::pollfd {
            fd: shared.wake_rx,
            events: libc::POLLIN,
            revents: 0,
        }];
        let mut ids = Vec::with_capacity(connections.len());
        for (id, conn) in &connections {
            if let Some(socket) = &conn.socket {
                fds.push(libc::pollfd {
                    fd: socket.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                });
                ids.push(*id);
            }
        }

        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_INTERVAL_MS) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!("Event loop poll failed: {}", err);
            break;
        }
        if fds[0].revents & libc::POLLIN != 0 {
            shared.drain_wake();
        }

        for (pfd, id) in fds[1..].iter().zip(&ids) {
            if pfd.revents == 0 {
                continue;
            }
            let Some(conn) = connections.get_mut(id) else {
                continue;
            };
            if pfd.revents & libc::POLLIN != 0 {
                read_socket(*id, conn, &mut buf);
            } else if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
                warn!("Connection {} hung up", id);
                conn.close(AttError::Disconnected);
            }
        }

        let commands: Vec<Command> = shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for command in commands {
            execute(&mut connections, command);
        }

        let now = Instant::now();
        for conn in connections.values_mut() {
            if conn.channel.check_timeout(now) {
                conn.socket = None;
            }
        }
    }

    debug!("Event loop exiting with {} connection(s)", connections.len());
    // Dropping the channels fails whatever is still pending
    drop(connections);
}

fn read_socket(id: ConnectionId, conn: &mut Attached, buf: &mut [u8]) {
    let Some(socket) = conn.socket.clone() else {
        return;
    };
    match socket.recv_pdu(buf) {
        Ok(0) => {
            info!("Connection {} closed by peer", id);
            conn.close(AttError::Disconnected);
        }
        Ok(len) => conn.channel.handle_pdu(&buf[..len]),
        Err(err)
            if err.kind() == io::ErrorKind::WouldBlock
                || err.kind() == io::ErrorKind::Interrupted => {}
        Err(err) => {
            error!("Connection {} read failed: {}", id, err);
            conn.close(AttError::from(err));
        }
    }
}

fn execute(connections: &mut HashMap<ConnectionId, Attached>, command: Command) {
    match command {
        Command::Attach { id, socket, mtu } => {
            trace!("Attaching connection {}", id);
            let channel = AttChannel::new(Box::new(Arc::clone(&socket)), mtu);
            connections.insert(
                id,
                Attached {
                    socket: Some(socket),
                    channel,
                },
            );
        }
        Command::Run { id, job } => match connections.get_mut(&id) {
            Some(conn) => job(&mut conn.channel),
            None => warn!("Dropping job for unknown connection {}", id),
        },
        Command::Detach { id, done } => {
            trace!("Detaching connection {}", id);
            // Channel drop fails pending requests, socket drop closes the fd
            drop(connections.remove(&id));
            let _ = done.send(());
        }
    }
}
