use commonware_codec::Encode;
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use futures::stream::{self, BoxStream, StreamExt};
use keel_types::{EventEntry, ModuleId, Origin};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::warn;

/// Root of a log with no entries.
pub fn empty_root() -> Digest {
    Sha256::new().finalize()
}

/// Fold one committed entry into a rolling events root.
pub fn fold_root(root: &Digest, entry: &EventEntry) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(root.as_ref());
    hasher.update(&entry.encode());
    hasher.finalize()
}

fn read(entries: &RwLock<Vec<EventEntry>>) -> RwLockReadGuard<'_, Vec<EventEntry>> {
    match entries.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("event log lock poisoned; continuing with inner value");
            poisoned.into_inner()
        }
    }
}

fn write(entries: &RwLock<Vec<EventEntry>>) -> RwLockWriteGuard<'_, Vec<EventEntry>> {
    match entries.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("event log lock poisoned; continuing with inner value");
            poisoned.into_inner()
        }
    }
}

/// Ordered log of committed events.
///
/// Entries appended while a call executes are staged and only become visible to readers
/// once the runtime publishes them, after the call's state has been committed. Sequence
/// numbers are assigned at append time and stay gapless because staged entries are always
/// either published or truncated away together with their checkpoint.
pub struct EventLog {
    committed: Arc<RwLock<Vec<EventEntry>>>,
    pending: Vec<EventEntry>,
    notify: watch::Sender<u64>,
    root: Digest,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::restore(Vec::new())
    }

    /// Rebuild a log from previously committed entries.
    pub fn restore(entries: Vec<EventEntry>) -> Self {
        let root = entries.iter().fold(empty_root(), |root, entry| fold_root(&root, entry));
        let (notify, _) = watch::channel(entries.len() as u64);
        Self {
            committed: Arc::new(RwLock::new(entries)),
            pending: Vec::new(),
            notify,
            root,
        }
    }

    /// Stage an event and return the sequence number it will carry once published.
    pub(crate) fn append(&mut self, origin: Origin, module: ModuleId, payload: Vec<u8>) -> u64 {
        let sequence = self.next_sequence();
        self.pending.push(EventEntry {
            sequence,
            origin,
            module,
            payload,
        });
        sequence
    }

    /// Position to [EventLog::truncate] back to when a nested checkpoint is discarded.
    pub(crate) fn mark(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn truncate(&mut self, mark: usize) {
        self.pending.truncate(mark);
    }

    pub(crate) fn pending(&self) -> &[EventEntry] {
        &self.pending
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Make staged entries visible and wake subscribers.
    pub(crate) fn publish(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let staged = std::mem::take(&mut self.pending);
        let len = {
            let mut committed = write(&self.committed);
            for entry in staged {
                self.root = fold_root(&self.root, &entry);
                committed.push(entry);
            }
            committed.len() as u64
        };
        self.notify.send_replace(len);
    }

    /// Sequence number the next appended event will receive.
    pub fn next_sequence(&self) -> u64 {
        self.len() + self.pending.len() as u64
    }

    /// Number of committed entries.
    pub fn len(&self) -> u64 {
        read(&self.committed).len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rolling digest over every committed entry.
    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn reader(&self) -> EventReader {
        EventReader {
            committed: self.committed.clone(),
            notify: self.notify.subscribe(),
        }
    }
}

/// Read-only, cloneable handle to committed events.
#[derive(Clone)]
pub struct EventReader {
    committed: Arc<RwLock<Vec<EventEntry>>>,
    notify: watch::Receiver<u64>,
}

impl EventReader {
    pub fn get(&self, sequence: u64) -> Option<EventEntry> {
        let index = usize::try_from(sequence).ok()?;
        read(&self.committed).get(index).cloned()
    }

    pub fn len(&self) -> u64 {
        read(&self.committed).len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries with sequence `>= start` committed at the time of the call.
    pub fn iter_from(&self, start: u64) -> impl Iterator<Item = EventEntry> {
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        let entries = read(&self.committed)
            .get(start..)
            .map(<[EventEntry]>::to_vec)
            .unwrap_or_default();
        entries.into_iter()
    }

    /// Every entry with sequence `>= start`, including ones committed in the future.
    ///
    /// The stream waits for new commits once it has caught up and ends only after the
    /// [EventLog] it was created from is dropped and every committed entry was yielded.
    pub fn stream_from(&self, start: u64) -> BoxStream<'static, EventEntry> {
        stream::unfold((self.clone(), start), |(mut reader, cursor)| async move {
            loop {
                if let Some(entry) = reader.get(cursor) {
                    return Some((entry, (reader, cursor + 1)));
                }
                if reader.notify.changed().await.is_err() {
                    let entry = reader.get(cursor)?;
                    return Some((entry, (reader, cursor + 1)));
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn module() -> ModuleId {
        ModuleId::from_name("value-setter")
    }

    fn commit(log: &mut EventLog, tx: u64, payloads: &[u8]) {
        for payload in payloads {
            log.append(Origin::Transaction(tx), module(), vec![*payload]);
        }
        log.publish();
    }

    #[test]
    fn staged_entries_are_invisible_until_published() {
        let mut log = EventLog::new();
        let reader = log.reader();
        assert_eq!(log.append(Origin::Genesis, module(), vec![1]), 0);
        assert_eq!(log.append(Origin::Genesis, module(), vec![2]), 1);
        assert_eq!(reader.len(), 0);
        assert_eq!(log.next_sequence(), 2);

        log.publish();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.get(1).map(|entry| entry.payload), Some(vec![2]));
    }

    #[test]
    fn truncate_releases_sequence_numbers() {
        let mut log = EventLog::new();
        log.append(Origin::Transaction(0), module(), vec![1]);
        let mark = log.mark();
        log.append(Origin::Transaction(0), module(), vec![2]);
        log.truncate(mark);
        assert_eq!(log.append(Origin::Transaction(0), module(), vec![3]), 1);

        log.truncate(0);
        log.publish();
        assert!(log.is_empty());
        assert_eq!(log.root(), empty_root());
    }

    #[test]
    fn root_matches_restored_log() {
        let mut log = EventLog::new();
        commit(&mut log, 0, &[1, 2]);
        commit(&mut log, 1, &[3]);

        let entries: Vec<_> = log.reader().iter_from(0).collect();
        let restored = EventLog::restore(entries);
        assert_eq!(restored.root(), log.root());
        assert_eq!(restored.next_sequence(), 3);
    }

    #[test]
    fn iter_from_past_end_is_empty() {
        let mut log = EventLog::new();
        commit(&mut log, 0, &[1, 2, 3]);
        let reader = log.reader();
        assert_eq!(reader.iter_from(2).map(|e| e.sequence).collect::<Vec<_>>(), vec![2]);
        assert_eq!(reader.iter_from(10).count(), 0);
        assert_eq!(reader.iter_from(u64::MAX).count(), 0);
    }

    #[test]
    fn stream_from_resumes_without_gaps() {
        let mut log = EventLog::new();
        commit(&mut log, 0, &[10, 11, 12]);
        let reader = log.reader();

        // Consume a prefix, then resume from where the consumer left off.
        let first: Vec<u64> = block_on(
            reader
                .stream_from(0)
                .take(2)
                .map(|entry| entry.sequence)
                .collect::<Vec<_>>(),
        );
        assert_eq!(first, vec![0, 1]);

        commit(&mut log, 1, &[13]);
        drop(log);

        let rest: Vec<u64> = block_on(
            reader
                .stream_from(2)
                .map(|entry| entry.sequence)
                .collect::<Vec<_>>(),
        );
        assert_eq!(rest, vec![2, 3]);
    }

    #[test]
    fn stream_from_waits_for_future_commits() {
        let mut log = EventLog::new();
        let reader = log.reader();
        let handle = std::thread::spawn(move || {
            block_on(reader.stream_from(1).take(2).collect::<Vec<_>>())
        });

        commit(&mut log, 0, &[1]);
        commit(&mut log, 1, &[2, 3]);

        let entries = handle.join().expect("subscriber thread");
        assert_eq!(
            entries
                .iter()
                .map(|entry| (entry.sequence, entry.origin))
                .collect::<Vec<_>>(),
            vec![(1, Origin::Transaction(1)), (2, Origin::Transaction(1))]
        );
    }
}
