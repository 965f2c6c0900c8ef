//! Tracking of the single connected central.
//!
//! The tracker owns one clone of the connection handle while the link is up.
//! Holding the clone is the ownership reference; dropping it releases the link.
//! Every transition bumps a generation counter so that work started for one
//! connection can tell, through a [`Lease`], that its connection is gone.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// Proof that a connection was current when the lease was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    generation: u32,
}

struct Slot<C> {
    current: Option<C>,
    generation: u32,
}

pub struct ConnectionTracker<M: RawMutex, C> {
    slot: Mutex<M, RefCell<Slot<C>>>,
}

impl<M: RawMutex, C: Clone> ConnectionTracker<M, C> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                current: None,
                generation: 0,
            })),
        }
    }

    /// Connection event from the stack. A non-zero `status` is a failed attempt.
    ///
    /// Returns whether the connection is now tracked.
    pub fn on_connected(&self, conn: C, status: u8) -> bool {
        if status != 0 {
            error!("Connection failed (err {})", status);
            return false;
        }

        let superseded = self.slot.lock(|slot| {
            let mut slot = slot.borrow_mut();
            slot.generation = slot.generation.wrapping_add(1);
            slot.current.replace(conn)
        });
        if superseded.is_some() {
            warn!("New connection supersedes the tracked one");
        }
        drop(superseded);

        info!("Device connected");
        true
    }

    /// Disconnection event from the stack. The reason is only logged.
    ///
    /// Returns the released handle, if one was tracked.
    pub fn on_disconnected(&self, reason: u8) -> Option<C> {
        info!("Device disconnected (reason {})", reason);

        self.slot.lock(|slot| {
            let mut slot = slot.borrow_mut();
            let released = slot.current.take();
            if released.is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            released
        })
    }

    pub fn state(&self) -> LinkState {
        if self.is_connected() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock(|slot| slot.borrow().current.is_some())
    }

    /// A new reference to the current connection.
    pub fn current(&self) -> Option<C> {
        self.slot.lock(|slot| slot.borrow().current.clone())
    }

    /// The current connection together with a lease bound to its lifetime.
    pub fn lease(&self) -> Option<(C, Lease)> {
        self.slot.lock(|slot| {
            let slot = slot.borrow();
            slot.current.clone().map(|conn| {
                (
                    conn,
                    Lease {
                        generation: slot.generation,
                    },
                )
            })
        })
    }

    /// Whether the connection behind `lease` is still the tracked one.
    pub fn is_live(&self, lease: &Lease) -> bool {
        self.slot.lock(|slot| {
            let slot = slot.borrow();
            slot.current.is_some() && slot.generation == lease.generation
        })
    }
}

impl<M: RawMutex, C: Clone> Default for ConnectionTracker<M, C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    use super::*;

    type Tracker = ConnectionTracker<CriticalSectionRawMutex, Rc<u8>>;

    #[test]
    fn connect_then_disconnect() {
        let tracker = Tracker::new();
        assert_eq!(tracker.state(), LinkState::Disconnected);

        let peer = Rc::new(1);
        assert!(tracker.on_connected(peer.clone(), 0));
        assert_eq!(tracker.state(), LinkState::Connected);
        assert_eq!(Rc::strong_count(&peer), 2);
        assert_eq!(tracker.current().as_deref(), Some(&1));

        let released = tracker.on_disconnected(0x13);
        assert_eq!(released.as_deref(), Some(&1));
        drop(released);
        assert_eq!(Rc::strong_count(&peer), 1);
        assert_eq!(tracker.state(), LinkState::Disconnected);
        assert!(tracker.current().is_none());
    }

    #[test]
    fn failed_connect_stores_nothing() {
        let tracker = Tracker::new();
        let peer = Rc::new(7);
        assert!(!tracker.on_connected(peer.clone(), 5));
        assert_eq!(tracker.state(), LinkState::Disconnected);
        assert_eq!(Rc::strong_count(&peer), 1);

        assert!(tracker.on_disconnected(0x08).is_none());
        assert_eq!(tracker.state(), LinkState::Disconnected);
    }

    #[test]
    fn reconnect_tracks_newest_peer() {
        let tracker = Tracker::new();
        tracker.on_connected(Rc::new(1), 0);
        tracker.on_disconnected(0x13);
        tracker.on_connected(Rc::new(2), 0);
        assert_eq!(tracker.current().as_deref(), Some(&2));
    }

    #[test]
    fn connect_while_connected_supersedes() {
        let tracker = Tracker::new();
        let first = Rc::new(1);
        tracker.on_connected(first.clone(), 0);
        tracker.on_connected(Rc::new(2), 0);
        assert_eq!(Rc::strong_count(&first), 1);
        assert_eq!(tracker.current().as_deref(), Some(&2));
    }

    #[test]
    fn lease_dies_with_its_connection() {
        let tracker = Tracker::new();
        assert!(tracker.lease().is_none());

        tracker.on_connected(Rc::new(1), 0);
        let (_, lease) = tracker.lease().unwrap();
        assert!(tracker.is_live(&lease));

        tracker.on_disconnected(0x13);
        assert!(!tracker.is_live(&lease));

        tracker.on_connected(Rc::new(2), 0);
        assert!(!tracker.is_live(&lease));
        let (_, fresh) = tracker.lease().unwrap();
        assert!(tracker.is_live(&fresh));
    }

    #[test]
    fn supersede_invalidates_lease() {
        let tracker = Tracker::new();
        tracker.on_connected(Rc::new(1), 0);
        let (_, lease) = tracker.lease().unwrap();
        tracker.on_connected(Rc::new(2), 0);
        assert!(!tracker.is_live(&lease));
    }
}
