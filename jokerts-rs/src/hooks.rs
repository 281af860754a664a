//! Per-PID packet hooks.
//!
//! The table holds weak references only: a hook stays registered for as
//! long as its owner keeps the `Arc` alive, and dead entries are pruned on
//! the next packet for their PID.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};

use jokerts_psi::pid;

use crate::error::EngineError;
use crate::registry::{Program, ProgramRegistry};

/// Handler fed with every packet of the PIDs it is registered on.
///
/// Runs on the producer thread and must return quickly.
pub trait PacketHook: Send {
    fn on_packet(&mut self, pid: u16, packet: &[u8], ctx: &mut HookContext<'_>);
}

pub type SharedHook = Arc<Mutex<dyn PacketHook>>;

/// What a hook may touch while handling a packet.
pub struct HookContext<'a> {
    table: &'a HookTable,
    registry: &'a ProgramRegistry,
    hook: &'a SharedHook,
}

impl HookContext<'_> {
    /// Find or create a program and update it. See [`ProgramRegistry::upsert`].
    pub fn upsert_program<F>(&mut self, number: u16, update: F) -> bool
    where
        F: FnOnce(&mut Program),
    {
        self.registry.upsert(number, update)
    }

    pub fn programs(&self) -> Arc<Vec<Program>> {
        self.registry.snapshot()
    }

    /// Register the running hook on another PID as well.
    pub fn attach(&mut self, pid: u16) -> Result<(), EngineError> {
        self.table.register(pid, self.hook)
    }

    /// Remove the running hook from `pid`; other hooks are left alone.
    pub fn detach(&mut self, pid: u16) -> bool {
        self.table.unregister_if(pid, self.hook)
    }
}

/// PID → hook mapping, at most one hook per PID.
#[derive(Default)]
pub struct HookTable {
    hooks: RwLock<HashMap<u16, Weak<Mutex<dyn PacketHook>>>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `hook` on `pid`, replacing any previous hook.
    pub fn register(&self, pid: u16, hook: &SharedHook) -> Result<(), EngineError> {
        if pid > pid::MAX {
            return Err(EngineError::InvalidPid(pid));
        }
        let previous = self.hooks.write().insert(pid, Arc::downgrade(hook));
        if let Some(previous) = previous {
            if !Weak::ptr_eq(&previous, &Arc::downgrade(hook)) {
                debug!("[HookTable] PID 0x{:04X}: replacing previous hook", pid);
            }
        } else {
            debug!("[HookTable] PID 0x{:04X}: hook registered", pid);
        }
        Ok(())
    }

    /// Returns `true` if a hook was removed.
    pub fn unregister(&self, pid: u16) -> bool {
        self.hooks.write().remove(&pid).is_some()
    }

    fn unregister_if(&self, pid: u16, hook: &SharedHook) -> bool {
        let mut hooks = self.hooks.write();
        let target = Arc::downgrade(hook);
        match hooks.get(&pid) {
            Some(current) if Weak::ptr_eq(current, &target) => {
                hooks.remove(&pid);
                debug!("[HookTable] PID 0x{:04X}: hook detached", pid);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    /// PIDs with a live hook, ascending.
    pub fn registered_pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = self
            .hooks
            .read()
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(&pid, _)| pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Run the hook registered on `pid`, if any. Returns `true` if one ran.
    ///
    /// No table lock is held while the hook runs, so hooks may attach and
    /// detach PIDs from inside `on_packet`.
    pub fn dispatch(&self, pid: u16, packet: &[u8], registry: &ProgramRegistry) -> bool {
        let weak = match self.hooks.read().get(&pid) {
            Some(w) => w.clone(),
            None => return false,
        };

        let Some(hook) = weak.upgrade() else {
            let mut hooks = self.hooks.write();
            if hooks.get(&pid).is_some_and(|w| w.strong_count() == 0) {
                hooks.remove(&pid);
                trace!("[HookTable] PID 0x{:04X}: pruned dropped hook", pid);
            }
            return false;
        };

        let mut ctx = HookContext {
            table: self,
            registry,
            hook: &hook,
        };
        hook.lock().on_packet(pid, packet, &mut ctx);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        /// Opaque context handed over at registration.
        context: &'static str,
        seen: Vec<(u16, Vec<u8>, &'static str)>,
    }

    impl PacketHook for Recorder {
        fn on_packet(&mut self, pid: u16, packet: &[u8], _ctx: &mut HookContext<'_>) {
            self.seen.push((pid, packet.to_vec(), self.context));
        }
    }

    fn packet_on(pid: u16) -> [u8; 188] {
        let mut p = [0xFFu8; 188];
        p[0] = 0x47;
        p[1] = (pid >> 8) as u8 & 0x1F;
        p[2] = pid as u8;
        p[3] = 0x10;
        p
    }

    fn recorder(context: &'static str) -> Arc<Mutex<Recorder>> {
        Arc::new(Mutex::new(Recorder {
            context,
            seen: Vec::new(),
        }))
    }

    #[test]
    fn test_hook_isolation() {
        let table = HookTable::new();
        let registry = ProgramRegistry::new();
        let hook = recorder("sdt-session");
        let shared: SharedHook = hook.clone();
        table.register(0x11, &shared).unwrap();

        let p11 = packet_on(0x11);
        let p12 = packet_on(0x12);
        assert!(table.dispatch(0x11, &p11, &registry));
        assert!(!table.dispatch(0x12, &p12, &registry));

        let recorded = hook.lock();
        let seen = &recorded.seen;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 0x11);
        assert_eq!(seen[0].1, p11.to_vec());
        assert_eq!(seen[0].2, "sdt-session");
    }

    #[test]
    fn test_register_replaces() {
        let table = HookTable::new();
        let registry = ProgramRegistry::new();
        let first = recorder("first");
        let second = recorder("second");
        let a: SharedHook = first.clone();
        let b: SharedHook = second.clone();
        table.register(0x100, &a).unwrap();
        table.register(0x100, &b).unwrap();

        table.dispatch(0x100, &packet_on(0x100), &registry);
        assert!(first.lock().seen.is_empty());
        assert_eq!(second.lock().seen.len(), 1);

        assert!(table.unregister(0x100));
        assert!(!table.dispatch(0x100, &packet_on(0x100), &registry));
    }

    #[test]
    fn test_invalid_pid_rejected() {
        let table = HookTable::new();
        let hook: SharedHook = recorder("x");
        assert!(matches!(table.register(0x2000, &hook), Err(EngineError::InvalidPid(0x2000))));
    }

    #[test]
    fn test_dropped_hook_pruned() {
        let table = HookTable::new();
        let registry = ProgramRegistry::new();
        {
            let hook: SharedHook = recorder("gone");
            table.register(0x20, &hook).unwrap();
            assert_eq!(table.registered_pids(), vec![0x20]);
        }
        assert!(table.registered_pids().is_empty());
        assert!(!table.dispatch(0x20, &packet_on(0x20), &registry));
        assert!(table.hooks.read().is_empty());
    }

    struct Follower;

    impl PacketHook for Follower {
        fn on_packet(&mut self, pid: u16, _packet: &[u8], ctx: &mut HookContext<'_>) {
            if pid == 0 {
                ctx.attach(0x101).unwrap();
                ctx.upsert_program(1, |p| p.pmt_pid = Some(0x101));
            } else {
                ctx.detach(0x101);
            }
        }
    }

    #[test]
    fn test_attach_and_detach_from_hook() {
        let table = HookTable::new();
        let registry = ProgramRegistry::new();
        let hook: SharedHook = Arc::new(Mutex::new(Follower));
        table.register(0, &hook).unwrap();

        table.dispatch(0, &packet_on(0), &registry);
        assert_eq!(table.registered_pids(), vec![0, 0x101]);
        assert_eq!(registry.get(1).unwrap().pmt_pid, Some(0x101));

        assert!(table.dispatch(0x101, &packet_on(0x101), &registry));
        assert_eq!(table.registered_pids(), vec![0]);
    }
}
