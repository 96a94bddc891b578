//! Durable FIFO of payloads waiting for the peer.
//!
//! Persisted in the process-local directory so queued transfers survive a
//! restart of the process. An unreadable file is moved aside to
//! `outbox.json.corrupt` rather than overwritten.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::payload::Payload;
use crate::error::Result;
use crate::store::atomic_write;

pub const OUTBOX_FILE: &str = "outbox.json";
pub const CORRUPT_OUTBOX_FILE: &str = "outbox.json.corrupt";

pub struct Outbox {
    path: PathBuf,
    queue: Mutex<VecDeque<Payload>>,
}

impl Outbox {
    /// Open the outbox in `dir`, restoring anything queued by a previous run
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(OUTBOX_FILE);
        let queue = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<VecDeque<Payload>>(&bytes) {
                Ok(queue) => {
                    if !queue.is_empty() {
                        log::info!("Restored {} queued durable transfers", queue.len());
                    }
                    queue
                }
                Err(e) => {
                    let aside = dir.join(CORRUPT_OUTBOX_FILE);
                    match std::fs::rename(&path, &aside) {
                        Ok(()) => log::warn!(
                            "Unreadable outbox {} ({}); moved to {}",
                            path.display(),
                            e,
                            aside.display()
                        ),
                        Err(rename_err) => log::error!(
                            "Unreadable outbox {} ({}) could not be moved aside: {}",
                            path.display(),
                            e,
                            rename_err
                        ),
                    }
                    VecDeque::new()
                }
            },
            Err(_) => VecDeque::new(),
        };

        Self {
            path,
            queue: Mutex::new(queue),
        }
    }

    fn persist(&self, queue: &VecDeque<Payload>) -> Result<()> {
        let bytes = serde_json::to_vec(queue)?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    /// Append to the back of the queue and persist
    pub fn enqueue(&self, payload: Payload) -> Result<()> {
        let mut queue = self.queue.lock();
        queue.push_back(payload);
        if let Err(e) = self.persist(&queue) {
            queue.pop_back();
            return Err(e);
        }
        Ok(())
    }

    /// Oldest queued payload, left in place
    pub fn front(&self) -> Option<Payload> {
        self.queue.lock().front().cloned()
    }

    /// Remove the front entry if it is still `id`
    pub fn acknowledge(&self, id: Uuid) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.front().map(|p| p.id) == Some(id) {
            queue.pop_front();
            self.persist(&queue)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::payload::PayloadBody;
    use crate::merge::DeviceId;

    #[test]
    fn test_fifo_and_acknowledge() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path());
        let first = Payload::new(DeviceId::new(), PayloadBody::Ping);
        let second = Payload::new(DeviceId::new(), PayloadBody::RequestFullState);

        outbox.enqueue(first.clone()).unwrap();
        outbox.enqueue(second.clone()).unwrap();
        assert_eq!(outbox.front().unwrap().id, first.id);

        // acknowledging something other than the front is a no-op
        outbox.acknowledge(second.id).unwrap();
        assert_eq!(outbox.len(), 2);

        outbox.acknowledge(first.id).unwrap();
        assert_eq!(outbox.front().unwrap().id, second.id);
    }

    #[test]
    fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let payload = Payload::new(DeviceId::new(), PayloadBody::Ping);
        {
            let outbox = Outbox::open(dir.path());
            outbox.enqueue(payload.clone()).unwrap();
        }

        let reopened = Outbox::open(dir.path());
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.front().unwrap(), payload);
    }

    #[test]
    fn test_corrupt_outbox_is_kept_aside() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OUTBOX_FILE), b"[{").unwrap();

        let outbox = Outbox::open(dir.path());
        assert!(outbox.is_empty());
        assert_eq!(
            std::fs::read(dir.path().join(CORRUPT_OUTBOX_FILE)).unwrap(),
            b"[{"
        );

        // new entries do not touch the preserved bytes
        outbox
            .enqueue(Payload::new(DeviceId::new(), PayloadBody::Ping))
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join(CORRUPT_OUTBOX_FILE)).unwrap(),
            b"[{"
        );
        assert_eq!(Outbox::open(dir.path()).len(), 1);
    }
}
