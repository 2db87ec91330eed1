//! The audio thread driver.
//!
//! [`AudioThread::spawn`] moves a [`Scheduler`] onto a named OS thread. The
//! thread loops: run a tick, work out how long it may sleep, then wait on its
//! command channel for at most that long. At most one command runs between
//! two ticks, and the scheduler needs no locking.
//!
//! Control happens through the returned [`AudioThreadHandle`]. Each request
//! carries a one-shot reply channel and blocks until the thread has applied
//! it. A [`ThreadWaker`] can be cloned into client-facing code to cut a
//! sleep short when new samples arrive.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::JoinHandle;

use cadence_core::{DeviceIdx, Direction, StreamId};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::device::IoDevice;
use crate::dump::ThreadSnapshot;
use crate::monitor::ThreadCounters;
use crate::scheduler::Scheduler;
use crate::stream::ClientStream;
use crate::{Error, Result};

/// Requests served by the audio thread between ticks.
enum Command {
    AddOpenDev(Box<dyn IoDevice>, Sender<Result<()>>),
    RemoveOpenDev(Direction, DeviceIdx, Sender<()>),
    IsDevOpen(Direction, DeviceIdx, Sender<bool>),
    AddStream(Box<dyn ClientStream>, Vec<DeviceIdx>, Sender<Result<()>>),
    DisconnectStream(StreamId, Option<DeviceIdx>, Sender<()>),
    DrainStream(StreamId, Sender<u64>),
    Dump(Sender<ThreadSnapshot>),
    Wake,
    Stop,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::AddOpenDev(..) => "add_open_dev",
            Command::RemoveOpenDev(..) => "rm_open_dev",
            Command::IsDevOpen(..) => "is_dev_open",
            Command::AddStream(..) => "add_stream",
            Command::DisconnectStream(..) => "disconnect_stream",
            Command::DrainStream(..) => "drain_stream",
            Command::Dump(..) => "dump",
            Command::Wake => "wake",
            Command::Stop => "stop",
        }
    }
}

/// Apply one command. Breaks when the thread should exit.
///
/// A dropped reply receiver only means the caller stopped waiting, so send
/// failures are ignored.
fn handle_command(scheduler: &mut Scheduler, cmd: Command) -> ControlFlow<()> {
    tracing::trace!(command = cmd.name(), "audio thread command");
    match cmd {
        Command::AddOpenDev(dev, reply) => {
            let _ = reply.send(scheduler.add_open_dev(dev));
        }
        Command::RemoveOpenDev(dir, idx, reply) => {
            scheduler.rm_open_dev(dir, idx);
            let _ = reply.send(());
        }
        Command::IsDevOpen(dir, idx, reply) => {
            let _ = reply.send(scheduler.is_dev_open(dir, idx));
        }
        Command::AddStream(stream, devices, reply) => {
            let _ = reply.send(scheduler.append_stream(stream.as_ref(), &devices));
        }
        Command::DisconnectStream(id, dev, reply) => {
            scheduler.remove_stream(id, dev);
            let _ = reply.send(());
        }
        Command::DrainStream(id, reply) => {
            let _ = reply.send(scheduler.drain_stream(id));
        }
        Command::Dump(reply) => {
            let _ = reply.send(scheduler.dump());
        }
        Command::Wake => {}
        Command::Stop => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

fn run_loop(mut scheduler: Scheduler, commands: Receiver<Command>) {
    tracing::info!("audio thread started");
    loop {
        scheduler.run();
        let sleep = scheduler.next_sleep();
        scheduler.check_busyloop(sleep);

        let cmd = match sleep {
            Some(timeout) => match commands.recv_timeout(timeout) {
                Ok(cmd) => cmd,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match commands.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        if handle_command(&mut scheduler, cmd).is_break() {
            break;
        }
    }
    tracing::info!(ticks = scheduler.counters().ticks(), "audio thread stopped");
}

/// Spawns audio threads.
#[derive(Debug)]
pub struct AudioThread;

impl AudioThread {
    /// Start `scheduler` on a new thread named after its config.
    pub fn spawn(scheduler: Scheduler) -> Result<AudioThreadHandle> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let counters = scheduler.counters();
        let name = scheduler.config().thread_name.clone();

        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(scheduler, rx))?;

        tracing::debug!(thread = %name, "audio thread spawned");
        Ok(AudioThreadHandle {
            tx,
            join: Some(join),
            counters,
        })
    }
}

/// Cheap, cloneable handle that wakes the audio thread.
#[derive(Debug, Clone)]
pub struct ThreadWaker {
    tx: Sender<Command>,
}

impl ThreadWaker {
    /// Cut the current sleep short.
    pub fn wake(&self) -> Result<()> {
        self.tx.send(Command::Wake).map_err(|_| Error::ThreadGone)
    }
}

/// Owner-side control of a running audio thread.
///
/// Dropping the handle stops the thread and joins it.
pub struct AudioThreadHandle {
    tx: Sender<Command>,
    join: Option<JoinHandle<()>>,
    counters: Arc<ThreadCounters>,
}

impl AudioThreadHandle {
    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(make(reply_tx))
            .map_err(|_| Error::ThreadGone)?;
        reply_rx.recv().map_err(|_| Error::ThreadGone)
    }

    /// Hand an open device to the thread.
    pub fn add_open_dev(&self, dev: Box<dyn IoDevice>) -> Result<()> {
        self.request(|reply| Command::AddOpenDev(dev, reply))?
    }

    /// Take a device out of the thread.
    pub fn rm_open_dev(&self, dir: Direction, idx: DeviceIdx) -> Result<()> {
        self.request(|reply| Command::RemoveOpenDev(dir, idx, reply))
    }

    /// Whether a device is open on the thread.
    pub fn is_dev_open(&self, dir: Direction, idx: DeviceIdx) -> Result<bool> {
        self.request(|reply| Command::IsDevOpen(dir, idx, reply))
    }

    /// Attach a stream to the listed devices.
    pub fn add_stream(&self, stream: Box<dyn ClientStream>, devices: &[DeviceIdx]) -> Result<()> {
        let devices = devices.to_vec();
        self.request(|reply| Command::AddStream(stream, devices, reply))?
    }

    /// Detach a stream from one device, or from all when `dev` is `None`.
    pub fn disconnect_stream(&self, id: StreamId, dev: Option<DeviceIdx>) -> Result<()> {
        self.request(|reply| Command::DisconnectStream(id, dev, reply))
    }

    /// Start draining a playback stream; see [`Scheduler::drain_stream`].
    pub fn drain_stream(&self, id: StreamId) -> Result<u64> {
        self.request(|reply| Command::DrainStream(id, reply))
    }

    /// Snapshot the thread's state.
    pub fn dump(&self) -> Result<ThreadSnapshot> {
        self.request(Command::Dump)
    }

    /// A waker for client-facing code.
    pub fn waker(&self) -> ThreadWaker {
        ThreadWaker {
            tx: self.tx.clone(),
        }
    }

    /// Counters published by the thread.
    pub fn counters(&self) -> &ThreadCounters {
        &self.counters
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        // The thread may already be gone; joining reports how it ended.
        let _ = self.tx.send(Command::Stop);
        join.join().map_err(|_| Error::ThreadGone)
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "audio thread ended abnormally");
        }
    }
}

impl std::fmt::Debug for AudioThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioThreadHandle")
            .field("running", &self.join.is_some())
            .field("ticks", &self.counters.ticks())
            .finish_non_exhaustive()
    }
}
