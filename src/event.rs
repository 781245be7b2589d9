use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Delivery policy of an [`EventChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Each event wakes at most one waiter.
    Unicast,
    /// Each event wakes every current waiter.
    Broadcast,
}

/// A delivered event. `num_missed` counts earlier events that were
/// overwritten before anyone received them.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub value: T,
    pub num_missed: u64,
}

struct Pending<T> {
    value: T,
    time: Instant,
    seq: u64,
    delivered: bool,
    look_back_claimed: bool,
}

struct State<T> {
    pending: Option<Pending<T>>,
    missed: u64,
    seq: u64,
}

/// Condition-variable channel carrying the latest event only.
///
/// A waiter arriving shortly after an event fired can still receive it by
/// passing a look-back age; any given event satisfies at most one such late
/// waiter. Events are not queued: dispatching over an undelivered event
/// replaces it and bumps the missed counter.
pub struct EventChannel<T: Clone> {
    channel_type: ChannelType,
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T: Clone> EventChannel<T> {
    pub fn new(channel_type: ChannelType) -> Self {
        Self {
            channel_type,
            state: Mutex::new(State {
                pending: None,
                missed: 0,
                seq: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// Publishes `value`, waking waiters per the channel type.
    pub fn dispatch_event(&self, value: T) {
        let mut state = self.state.lock().expect("channel lock");
        if let Some(previous) = &state.pending {
            if !previous.delivered {
                state.missed += 1;
            }
        }
        state.seq += 1;
        let seq = state.seq;
        state.pending = Some(Pending {
            value,
            time: Instant::now(),
            seq,
            delivered: false,
            look_back_claimed: false,
        });
        drop(state);
        match self.channel_type {
            ChannelType::Unicast => self.condvar.notify_one(),
            ChannelType::Broadcast => self.condvar.notify_all(),
        }
    }

    /// Waits up to `timeout` for an event. An event no older than
    /// `look_back` satisfies the wait immediately, once.
    pub fn wait_for_event(&self, timeout: Duration, look_back: Duration) -> Option<Event<T>> {
        let mut state = self.state.lock().expect("channel lock");

        if let Some(pending) = state.pending.as_mut() {
            if !pending.look_back_claimed && pending.time.elapsed() <= look_back {
                pending.look_back_claimed = true;
                return Some(Self::deliver(&mut state, self.channel_type));
            }
        }

        let start_seq = state.seq;
        let deadline = Instant::now() + timeout;
        loop {
            let fresh = state
                .pending
                .as_ref()
                .map_or(false, |pending| pending.seq > start_seq);
            if fresh {
                return Some(Self::deliver(&mut state, self.channel_type));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(state, deadline - now)
                .expect("channel lock");
            state = guard;
        }
    }

    fn deliver(state: &mut State<T>, channel_type: ChannelType) -> Event<T> {
        let num_missed = state.missed;
        state.missed = 0;
        let value = match channel_type {
            // A unicast event is consumed by its one receiver.
            ChannelType::Unicast => state.pending.take().expect("pending event").value,
            // A broadcast event stays pending so every woken waiter reads it.
            ChannelType::Broadcast => {
                let pending = state.pending.as_mut().expect("pending event");
                pending.delivered = true;
                pending.value.clone()
            }
        };
        Event { value, num_missed }
    }
}
