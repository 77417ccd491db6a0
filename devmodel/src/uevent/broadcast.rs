//! Fan-out of events to in-process listeners.
//!
//! Every listener owns a bounded queue. Sending never blocks: a full queue loses the message for
//! that listener only, and a listener that went away is pruned on the next send.
use super::Action;
use crate::debug_ex;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;
use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError, sync_channel},
    time::Duration,
};

/// One event as seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeventMessage {
    pub action: Action,
    pub devpath: String,
    pub seqnum: u64,
    /// Every `KEY=value` variable, `SEQNUM` included.
    pub env: Vec<String>,
}

impl UeventMessage {
    /// Wire form: `action@devpath`, then each variable, each NUL-terminated.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            self.devpath.len() + 16 + self.env.iter().map(|var| var.len() + 1).sum::<usize>(),
        );
        buf.extend_from_slice(self.action.as_str().as_bytes());
        buf.push(b'@');
        buf.extend_from_slice(self.devpath.as_bytes());
        buf.push(0);
        for var in &self.env {
            buf.extend_from_slice(var.as_bytes());
            buf.push(0);
        }
        buf
    }

    /// Parse the wire form produced by [encode](Self::encode).
    pub fn decode(buf: &[u8]) -> Option<UeventMessage> {
        let text = core::str::from_utf8(buf).ok()?;
        let mut parts = text.strip_suffix('\0')?.split('\0');
        let (action, devpath) = parts.next()?.split_once('@')?;
        let env: Vec<String> = parts.map(String::from).collect();
        let seqnum = env
            .iter()
            .find_map(|var| var.strip_prefix("SEQNUM="))?
            .parse()
            .ok()?;
        Some(UeventMessage {
            action: action.parse().ok()?,
            devpath: devpath.to_string(),
            seqnum,
            env,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|var| {
            let (name, value) = var.split_once('=')?;
            (name == key).then_some(value)
        })
    }
}

pub struct UeventListener {
    rx: Receiver<UeventMessage>,
}

impl UeventListener {
    /// Block until the next message. `None` once the emitter is gone.
    pub fn recv(&self) -> Option<UeventMessage> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<UeventMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<UeventMessage> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<UeventMessage> {
        self.rx.try_iter().collect()
    }
}

pub struct UeventBroadcast {
    subscribers: Mutex<Vec<SyncSender<UeventMessage>>>,
    backlog: usize,
    dropped: AtomicU64,
}

impl UeventBroadcast {
    pub fn new(backlog: usize) -> UeventBroadcast {
        UeventBroadcast {
            subscribers: Mutex::new(Vec::new()),
            backlog: backlog.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> UeventListener {
        let (tx, rx) = sync_channel(self.backlog);
        self.subscribers.lock().push(tx);
        UeventListener { rx }
    }

    pub fn send(&self, msg: &UeventMessage) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug_ex!("uevent: listener queue full, seqnum {} dropped", msg.seqnum);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn listeners(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Messages lost to full queues since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(seqnum: u64) -> UeventMessage {
        UeventMessage {
            action: Action::Add,
            devpath: "/devices/disk0".into(),
            seqnum,
            env: vec![
                "ACTION=add".into(),
                "DEVPATH=/devices/disk0".into(),
                format!("SEQNUM={}", seqnum),
            ],
        }
    }

    #[test]
    fn wire_format() {
        let msg = message(7);
        let wire = msg.encode();
        assert!(wire.starts_with(b"add@/devices/disk0\0ACTION=add\0"));
        assert!(wire.ends_with(b"SEQNUM=7\0"));
        assert_eq!(UeventMessage::decode(&wire), Some(msg));
        assert_eq!(UeventMessage::decode(b"add@/x"), None);
    }

    #[test]
    fn full_queue_drops_and_keeps_listener() {
        let bus = UeventBroadcast::new(1);
        let listener = bus.subscribe();
        bus.send(&message(1));
        bus.send(&message(2));
        assert_eq!(bus.dropped(), 1);
        assert_eq!(listener.try_recv().map(|m| m.seqnum), Some(1));
        assert!(listener.try_recv().is_none());
        bus.send(&message(3));
        assert_eq!(listener.drain().len(), 1);
    }

    #[test]
    fn closed_listener_is_pruned() {
        let bus = UeventBroadcast::new(4);
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.listeners(), 2);
        bus.send(&message(1));
        assert_eq!(bus.listeners(), 1);
        assert_eq!(kept.recv().unwrap().get("SEQNUM"), Some("1"));
    }
}
