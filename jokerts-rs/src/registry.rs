//! Discovered programs (services).
//!
//! Writers build a modified copy of the list and swap it in under the
//! write lock; readers clone the current `Arc`, so a snapshot is always a
//! fully formed list.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;

/// One elementary stream of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElementaryStream {
    pub pid: u16,
    pub stream_type: u8,
}

/// A service carried by the transport stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Program {
    /// Service ID / program number.
    pub number: u16,
    /// Service name; may arrive well after the program is first seen.
    pub name: Option<String>,
    pub provider: Option<String>,
    pub service_type: Option<u8>,
    /// ATSC major/minor channel number.
    pub virtual_channel: Option<(u16, u16)>,
    pub pmt_pid: Option<u16>,
    pub has_video: bool,
    pub has_audio: bool,
    /// Elementary streams, unique by PID, in order of first appearance.
    pub streams: Vec<ElementaryStream>,
}

impl Program {
    pub fn new(number: u16) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    /// Replace the stream list, keeping the first entry for each PID.
    pub fn set_streams<I>(&mut self, streams: I)
    where
        I: IntoIterator<Item = ElementaryStream>,
    {
        self.streams.clear();
        for es in streams {
            if !self.streams.iter().any(|s| s.pid == es.pid) {
                self.streams.push(es);
            }
        }
    }
}

/// Notification invoked after a program's name changed.
pub type NameCallback = Arc<dyn Fn(&Program) + Send + Sync>;

#[derive(Default)]
pub struct ProgramRegistry {
    programs: RwLock<Arc<Vec<Program>>>,
    name_callback: RwLock<Option<NameCallback>>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name_callback(&self, callback: Option<NameCallback>) {
        *self.name_callback.write() = callback;
    }

    /// Find or create program `number` and apply `update` to it.
    ///
    /// Returns `true` if the registry changed. An update that leaves every
    /// field as it was is a no-op: no copy is published and no
    /// notification fires.
    pub fn upsert<F>(&self, number: u16, update: F) -> bool
    where
        F: FnOnce(&mut Program),
    {
        let mut guard = self.programs.write();
        let index = guard.iter().position(|p| p.number == number);

        let mut candidate = match index {
            Some(i) => guard[i].clone(),
            None => Program::new(number),
        };
        update(&mut candidate);
        candidate.number = number;

        let old_name = match index {
            Some(i) if guard[i] == candidate => return false,
            Some(i) => guard[i].name.clone(),
            None => None,
        };
        let name_changed = candidate.name.is_some() && candidate.name != old_name;

        let list = Arc::make_mut(&mut *guard);
        match index {
            Some(i) => list[i] = candidate.clone(),
            None => {
                debug!("[ProgramRegistry] new program {}", number);
                list.push(candidate.clone());
            }
        }
        drop(guard);

        if name_changed {
            info!(
                "[ProgramRegistry] program {} is \"{}\"",
                number,
                candidate.name.as_deref().unwrap_or_default()
            );
            let callback = self.name_callback.read().clone();
            if let Some(callback) = callback {
                callback(&candidate);
            }
        }
        true
    }

    /// Consistent copy of the program list, in order of discovery.
    pub fn snapshot(&self) -> Arc<Vec<Program>> {
        Arc::clone(&self.programs.read())
    }

    pub fn get(&self, number: u16) -> Option<Program> {
        self.programs.read().iter().find(|p| p.number == number).cloned()
    }

    pub fn len(&self) -> usize {
        self.programs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn apply_service(p: &mut Program) {
        p.name = Some("NHK G".to_string());
        p.service_type = Some(0x01);
        p.has_video = true;
    }

    #[test]
    fn test_upsert_idempotent() {
        let registry = ProgramRegistry::new();
        registry.upsert(0x0400, |p| p.pmt_pid = Some(0x100));
        assert!(registry.upsert(0x0101, apply_service));
        let before = registry.snapshot();

        assert!(!registry.upsert(0x0101, apply_service));
        let after = registry.snapshot();

        assert_eq!(after.len(), 2);
        assert_eq!(before, after);
        // nothing republished
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after[0].number, 0x0400);
        assert_eq!(after[1].number, 0x0101);
    }

    #[test]
    fn test_snapshot_not_affected_by_later_updates() {
        let registry = ProgramRegistry::new();
        registry.upsert(1, |p| p.name = Some("one".into()));
        let snap = registry.snapshot();

        registry.upsert(1, |p| p.name = Some("uno".into()));
        assert_eq!(snap[0].name.as_deref(), Some("one"));
        assert_eq!(registry.get(1).unwrap().name.as_deref(), Some("uno"));
    }

    #[test]
    fn test_name_callback_only_on_change() {
        let registry = ProgramRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.set_name_callback(Some(Arc::new(move |p: &Program| {
            assert_eq!(p.number, 7);
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        registry.upsert(7, |p| p.pmt_pid = Some(0x200));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        registry.upsert(7, |p| p.name = Some("Seven".into()));
        registry.upsert(7, |p| p.name = Some("Seven".into()));
        registry.upsert(7, |p| p.has_audio = true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        registry.upsert(7, |p| p.name = Some("Seven HD".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_number_cannot_be_rewritten() {
        let registry = ProgramRegistry::new();
        registry.upsert(5, |p| p.number = 9);
        assert!(registry.get(5).is_some());
        assert!(registry.get(9).is_none());
    }

    #[test]
    fn test_set_streams_dedups() {
        let mut p = Program::new(1);
        p.set_streams([
            ElementaryStream { pid: 0x111, stream_type: 0x02 },
            ElementaryStream { pid: 0x112, stream_type: 0x0F },
            ElementaryStream { pid: 0x111, stream_type: 0x1B },
        ]);
        assert_eq!(p.streams.len(), 2);
        assert_eq!(p.streams[0].stream_type, 0x02);
    }
}
