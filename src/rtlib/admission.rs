use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Condvar, Mutex},
};

use tracing::{debug, info};

use crate::visibility::VisibilitySet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TicketState {
    Queued,
    Granted,
    Cancelled,
}

#[derive(Debug)]
struct Ticket {
    path: String,
    server_key: String,
    limit: usize,
    state: TicketState,
}

#[derive(Default)]
struct State {
    next_id: u64,
    queue: VecDeque<u64>,
    tickets: HashMap<u64, Ticket>,
    active_server: Option<String>,
    active: usize,
    max: usize,
}

/// Observability snapshot, never blocks beyond the state lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionStatus {
    pub active_server: Option<String>,
    pub active: usize,
    pub max: usize,
    pub queued: usize,
}

/// Process-wide gate bounding concurrent remote thumbnail operations.
///
/// Requests are serviced FIFO per server and only one server owns the active
/// slot window at a time; pending requests for a different server wait until
/// the current server's granted batch drains completely. This trades
/// cross-server parallelism for reduced connection churn.
pub struct AdmissionController {
    state: Mutex<State>,
    cvar: Condvar,
    visibility: Arc<VisibilitySet>,
}

impl AdmissionController {
    pub fn new(visibility: Arc<VisibilitySet>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cvar: Condvar::new(),
            visibility,
        }
    }

    /// Grants as many queued requests as the active window allows. Invisible
    /// requests reaching the queue front are cancelled instead of granted.
    fn pump(&self, st: &mut State) {
        loop {
            let Some(&front_id) = st.queue.front() else {
                break;
            };
            let (path, server_key, limit) = {
                let t = &st.tickets[&front_id];
                (t.path.clone(), t.server_key.clone(), t.limit)
            };
            if !self.visibility.is_visible(&path) {
                st.queue.pop_front();
                if let Some(t) = st.tickets.get_mut(&front_id) {
                    t.state = TicketState::Cancelled;
                }
                debug!("skipping invisible queued path {path}");
                continue;
            }
            if st.active == 0 {
                if st.active_server.as_deref() != Some(server_key.as_str()) {
                    info!("active server switches to {server_key}");
                }
                st.active_server = Some(server_key.clone());
                st.max = limit.max(1);
            }
            let same_server = st.active_server.as_deref() == Some(server_key.as_str());
            if same_server && st.active < st.max {
                st.queue.pop_front();
                if let Some(t) = st.tickets.get_mut(&front_id) {
                    t.state = TicketState::Granted;
                }
                st.active += 1;
                debug!(
                    "granted {path} on {server_key}, active {}/{}",
                    st.active, st.max
                );
                continue;
            }
            // at capacity, or a different server must wait for the drain
            break;
        }
    }

    /// Registers interest and blocks the calling task until a slot is granted
    /// (`true`) or the request is cancelled while still queued (`false`).
    /// A path that is already queued is rejected immediately.
    pub fn queue_thumbnail(&self, path: &str, server_key: &str, limit: usize) -> bool {
        let mut st = self.state.lock().unwrap();
        let duplicate = st
            .queue
            .iter()
            .any(|id| st.tickets[id].path == path && st.tickets[id].state == TicketState::Queued);
        if duplicate {
            debug!("{path} already queued");
            return false;
        }
        let id = st.next_id;
        st.next_id += 1;
        st.tickets.insert(
            id,
            Ticket {
                path: path.to_string(),
                server_key: server_key.to_string(),
                limit,
                state: TicketState::Queued,
            },
        );
        st.queue.push_back(id);
        self.pump(&mut st);
        self.cvar.notify_all();
        loop {
            match st.tickets[&id].state {
                TicketState::Queued => {
                    st = self.cvar.wait(st).unwrap();
                }
                TicketState::Granted => {
                    st.tickets.remove(&id);
                    return true;
                }
                TicketState::Cancelled => {
                    st.tickets.remove(&id);
                    return false;
                }
            }
        }
    }

    /// Frees the slot of one granted request. Must be called exactly once per
    /// `queue_thumbnail` that returned `true`; see [`AdmissionController::admit`]
    /// for the structural variant.
    pub fn release_connection(&self) {
        let mut st = self.state.lock().unwrap();
        st.active = st.active.saturating_sub(1);
        self.pump(&mut st);
        self.cvar.notify_all();
    }

    /// Cooperative cancellation of a still-queued request. No-op when the
    /// path is unknown, already granted, or already released.
    pub fn remove_thumbnail_from_queue(&self, path: &str) {
        let mut st = self.state.lock().unwrap();
        let queued_id = st
            .queue
            .iter()
            .copied()
            .find(|id| st.tickets[id].path == path);
        if let Some(id) = queued_id {
            st.queue.retain(|other| *other != id);
            if let Some(t) = st.tickets.get_mut(&id) {
                t.state = TicketState::Cancelled;
            }
            debug!("removed {path} from queue");
            self.pump(&mut st);
            self.cvar.notify_all();
        }
    }

    /// Cancels every queued request and resets counters, e.g. when the app
    /// resets all connections.
    pub fn clear_all(&self) {
        let mut st = self.state.lock().unwrap();
        let ids = std::mem::take(&mut st.queue);
        for id in ids {
            if let Some(t) = st.tickets.get_mut(&id) {
                t.state = TicketState::Cancelled;
            }
        }
        st.active = 0;
        st.active_server = None;
        self.cvar.notify_all();
    }

    pub fn get_status(&self) -> AdmissionStatus {
        let st = self.state.lock().unwrap();
        AdmissionStatus {
            active_server: st.active_server.clone(),
            active: st.active,
            max: st.max,
            queued: st.queue.len(),
        }
    }

    /// Scoped admission: the returned guard releases the slot on drop, so a
    /// granted slot cannot leak on any exit path.
    pub fn admit(&self, path: &str, server_key: &str, limit: usize) -> Option<AdmissionGuard<'_>> {
        if self.queue_thumbnail(path, server_key, limit) {
            Some(AdmissionGuard { ctrl: self })
        } else {
            None
        }
    }
}

pub struct AdmissionGuard<'a> {
    ctrl: &'a AdmissionController,
}
impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.ctrl.release_connection();
    }
}
