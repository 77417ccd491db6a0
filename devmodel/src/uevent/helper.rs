//! Launching the user-space helper program.
//!
//! Requests go to one worker thread over a channel, so an emitter never blocks on process
//! creation. In [HelperWait::Exec] mode the emitter gets a reply channel and waits, outside of
//! its locks, until the worker reports whether the program started. Spawned children are reaped
//! by the worker.
use crate::{
    debug_ex,
    error::{Error, Result},
};
use log::warn;
use spin::Mutex;
use std::{
    io,
    process::{Child, Command},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::Duration,
};

/// How far an emitter waits for the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HelperWait {
    /// Wait until the program was started, and report launch failures.
    #[default]
    Exec,
    /// Queue the launch and return immediately.
    NoWait,
}

const HELPER_HOME: &str = "HOME=/";
const HELPER_PATH: &str = "PATH=/sbin:/bin:/usr/sbin:/usr/bin";
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Environment entries every helper invocation receives on top of the event's own.
pub(crate) const HELPER_ENV: [&str; 2] = [HELPER_HOME, HELPER_PATH];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperRequest {
    pub program: String,
    pub subsystem: String,
    pub env: Vec<String>,
}

impl HelperRequest {
    /// The command line `program subsystem` with exactly the event's environment.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.subsystem).env_clear();
        for var in &self.env {
            if let Some((key, value)) = var.split_once('=') {
                cmd.env(key, value);
            }
        }
        cmd
    }
}

type Reply = Sender<core::result::Result<(), io::ErrorKind>>;

struct Job {
    request: HelperRequest,
    reply: Option<Reply>,
}

pub struct HelperWorker {
    tx: Mutex<Option<Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HelperWorker {
    pub fn start() -> io::Result<HelperWorker> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name("uevent-helper".into())
            .spawn(move || run(rx))?;
        Ok(HelperWorker {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queue a launch. In [HelperWait::Exec] mode the returned receiver yields the outcome.
    pub fn submit(
        &self,
        request: HelperRequest,
        wait: HelperWait,
    ) -> Result<Option<Receiver<core::result::Result<(), io::ErrorKind>>>> {
        let (reply, outcome) = match wait {
            HelperWait::NoWait => (None, None),
            HelperWait::Exec => {
                let (tx, rx) = mpsc::channel();
                (Some(tx), Some(rx))
            }
        };
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(Error::HelperUnavailable)?;
        tx.send(Job { request, reply })
            .map_err(|_| Error::HelperUnavailable)?;
        Ok(outcome)
    }

    /// Stop accepting requests and wait for queued launches and running children.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        let thread = self.thread.lock().take();
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            warn!("uevent helper worker panicked");
        }
    }
}

impl Drop for HelperWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wait for the outcome of an [HelperWait::Exec] submission.
pub fn wait_exec(outcome: Receiver<core::result::Result<(), io::ErrorKind>>) -> Result<()> {
    match outcome.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(kind)) => Err(Error::HelperSpawn(kind)),
        Err(_) => Err(Error::HelperUnavailable),
    }
}

fn run(rx: Receiver<Job>) {
    let mut children: Vec<Child> = Vec::new();
    loop {
        match rx.recv_timeout(REAP_INTERVAL) {
            Ok(job) => launch(job, &mut children),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        reap(&mut children);
    }
    for mut child in children {
        if let Err(err) = child.wait() {
            warn!("uevent helper: wait failed: {}", err);
        }
    }
}

fn launch(job: Job, children: &mut Vec<Child>) {
    let Job { request, reply } = job;
    let outcome = match request.command().spawn() {
        Ok(child) => {
            debug_ex!(
                "uevent helper: started {} {} (pid {})",
                request.program,
                request.subsystem,
                child.id()
            );
            children.push(child);
            Ok(())
        }
        Err(err) => {
            warn!(
                "uevent helper: failed to start {}: {}",
                request.program, err
            );
            Err(err.kind())
        }
    };
    if let Some(reply) = reply {
        // The emitter may have given up waiting.
        let _ = reply.send(outcome);
    }
}

fn reap(children: &mut Vec<Child>) {
    children.retain_mut(|child| match child.try_wait() {
        Ok(Some(status)) => {
            debug_ex!("uevent helper: pid {} exited with {}", child.id(), status);
            false
        }
        Ok(None) => true,
        Err(err) => {
            warn!("uevent helper: try_wait failed: {}", err);
            false
        }
    });
}
