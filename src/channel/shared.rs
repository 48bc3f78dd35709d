//! Channel state and the send/receive arms.
//!
//! One lock guards the buffer, both waiter queues and the closed flag.
//! Blocked senders park with their value; a receiver that finds one takes
//! the value directly (rendezvous) or moves it into the buffer it just
//! freed a slot in (bounded). Blocked receivers park with an empty slot that
//! a sender fills before claiming them.

use super::error::SendError;
use super::waiter::{Arm, Claim, Token};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct SendWaiter<T> {
    id: u64,
    token: Arc<Token>,
    arm: usize,
    // Only the owner empties this, and only while its token is busy.
    value: Option<T>,
}

struct RecvWaiter<T> {
    id: u64,
    token: Arc<Token>,
    arm: usize,
    slot: Arc<Mutex<Option<T>>>,
}

pub(crate) struct ChanState<T> {
    buffer: VecDeque<T>,
    senders: VecDeque<SendWaiter<T>>,
    receivers: VecDeque<RecvWaiter<T>>,
    closed: bool,
    sender_count: usize,
    receiver_count: usize,
    next_waiter: u64,
}

impl<T> ChanState<T> {
    fn next_id(&mut self) -> u64 {
        self.next_waiter += 1;
        self.next_waiter
    }

    /// Claims the first blocked sender not owned by `me` and takes its value.
    fn take_from_senders(&mut self, me: &Arc<Token>) -> Option<T> {
        let mut i = 0;
        while i < self.senders.len() {
            let waiter = &self.senders[i];
            if Arc::ptr_eq(&waiter.token, me) {
                i += 1;
                continue;
            }
            match waiter.token.try_claim(waiter.arm) {
                Claim::Claimed => {
                    let mut waiter = self.senders.remove(i)?;
                    let value = waiter.value.take();
                    waiter.token.wake();
                    if value.is_some() {
                        return value;
                    }
                }
                Claim::Busy => i += 1,
                Claim::Gone => {
                    self.senders.remove(i);
                }
            }
        }
        None
    }

    /// Hands `value` to the first claimable blocked receiver. Leaves it in
    /// place if there is none.
    fn give_to_receiver(&mut self, me: &Arc<Token>, value: &mut Option<T>) -> bool {
        let mut i = 0;
        while i < self.receivers.len() && value.is_some() {
            let waiter = &self.receivers[i];
            if Arc::ptr_eq(&waiter.token, me) {
                i += 1;
                continue;
            }
            let mut slot = waiter.slot.lock();
            *slot = value.take();
            match waiter.token.try_claim(waiter.arm) {
                Claim::Claimed => {
                    drop(slot);
                    if let Some(waiter) = self.receivers.remove(i) {
                        waiter.token.wake();
                    }
                    return true;
                }
                Claim::Busy => {
                    *value = slot.take();
                    i += 1;
                }
                Claim::Gone => {
                    *value = slot.take();
                    drop(slot);
                    self.receivers.remove(i);
                }
            }
        }
        false
    }

    /// After a pop freed a buffer slot, pulls the oldest blocked sender in.
    fn refill(&mut self, me: &Arc<Token>, capacity: usize) {
        if self.closed || self.buffer.len() >= capacity {
            return;
        }
        if let Some(value) = self.take_from_senders(me) {
            self.buffer.push_back(value);
        }
    }

    fn remove_sender(&mut self, id: Option<u64>) -> Option<T> {
        let id = id?;
        let pos = self.senders.iter().position(|w| w.id == id)?;
        self.senders.remove(pos).and_then(|mut w| w.value.take())
    }

    fn sender_value(&mut self, id: Option<u64>) -> Option<T> {
        let id = id?;
        self.senders
            .iter_mut()
            .find(|w| w.id == id)
            .and_then(|w| w.value.take())
    }

    fn restore_sender_value(&mut self, id: u64, value: T) -> Option<T> {
        match self.senders.iter_mut().find(|w| w.id == id) {
            Some(waiter) => {
                waiter.value = Some(value);
                None
            }
            None => Some(value),
        }
    }

    fn remove_receiver(&mut self, id: Option<u64>) {
        if let Some(id) = id {
            self.receivers.retain(|w| w.id != id);
        }
    }

    fn tokens(&self) -> Vec<Arc<Token>> {
        self.senders
            .iter()
            .map(|w| Arc::clone(&w.token))
            .chain(self.receivers.iter().map(|w| Arc::clone(&w.token)))
            .collect()
    }

    fn refuses_sends(&self) -> bool {
        self.closed || self.receiver_count == 0
    }
}

pub(crate) struct Chan<T> {
    state: Mutex<ChanState<T>>,
    capacity: usize,
}

impl<T> Chan<T> {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChanState {
                buffer: VecDeque::with_capacity(capacity.min(1024)),
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
                closed: false,
                sender_count: 1,
                receiver_count: 1,
                next_waiter: 0,
            }),
            capacity,
        })
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Marks the channel closed and wakes every waiter. Waiters stay queued
    /// and withdraw themselves when they observe the flag.
    pub(crate) fn close(&self) -> bool {
        let tokens = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.tokens()
        };
        for token in tokens {
            token.wake();
        }
        true
    }

    pub(crate) fn add_sender(&self) {
        self.state.lock().sender_count += 1;
    }

    /// Returns true if this was the last sender.
    pub(crate) fn drop_sender(&self) -> bool {
        let mut state = self.state.lock();
        state.sender_count -= 1;
        state.sender_count == 0
    }

    pub(crate) fn add_receiver(&self) {
        self.state.lock().receiver_count += 1;
    }

    /// Wakes blocked senders after the last receiver went away.
    pub(crate) fn drop_receiver(&self) -> bool {
        let tokens = {
            let mut state = self.state.lock();
            state.receiver_count -= 1;
            if state.receiver_count > 0 {
                return false;
            }
            state.buffer.clear();
            state.senders.iter().map(|w| Arc::clone(&w.token)).collect::<Vec<_>>()
        };
        for token in tokens {
            token.wake();
        }
        true
    }

    /// Puts back a value a dropped receive had already been handed.
    fn restore(&self, value: T) {
        let mut state = self.state.lock();
        if state.receiver_count == 0 {
            return;
        }
        let mut value = Some(value);
        let nobody = Token::new();
        if state.give_to_receiver(&nobody, &mut value) {
            return;
        }
        if let Some(value) = value {
            state.buffer.push_front(value);
        }
    }
}

/// Receive on one channel.
pub(crate) struct RecvArm<T> {
    chan: Arc<Chan<T>>,
    slot: Arc<Mutex<Option<T>>>,
    waiter: Option<u64>,
    output: Option<Option<T>>,
}

impl<T> RecvArm<T> {
    pub(crate) fn new(chan: Arc<Chan<T>>) -> Self {
        Self {
            chan,
            slot: Arc::new(Mutex::new(None)),
            waiter: None,
            output: None,
        }
    }

    /// `Some(Some(v))` received, `Some(None)` closed, `None` not complete.
    pub(crate) fn take(&mut self) -> Option<Option<T>> {
        self.output.take()
    }
}

impl<T> Arm for RecvArm<T> {
    fn attempt(&mut self, token: &Arc<Token>, index: usize, register: bool) -> bool {
        let mut state = self.chan.state.lock();
        if let Some(value) = state.buffer.pop_front() {
            state.refill(token, self.chan.capacity);
            state.remove_receiver(self.waiter.take());
            self.output = Some(Some(value));
            return true;
        }
        if !state.closed {
            if let Some(value) = state.take_from_senders(token) {
                state.remove_receiver(self.waiter.take());
                self.output = Some(Some(value));
                return true;
            }
        }
        if state.closed {
            state.remove_receiver(self.waiter.take());
            self.output = Some(None);
            return true;
        }
        if register && self.waiter.is_none() {
            let id = state.next_id();
            state.receivers.push_back(RecvWaiter {
                id,
                token: Arc::clone(token),
                arm: index,
                slot: Arc::clone(&self.slot),
            });
            self.waiter = Some(id);
        }
        false
    }

    fn claimed(&mut self) {
        self.waiter = None;
        self.output = Some(self.slot.lock().take());
    }

    fn cancel(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.chan.state.lock().remove_receiver(Some(id));
        }
    }

    fn revert(&mut self) {
        if let Some(Some(value)) = self.output.take() {
            self.chan.restore(value);
        }
    }
}

/// Send one value on one channel.
pub(crate) struct SendArm<T> {
    chan: Arc<Chan<T>>,
    value: Option<T>,
    waiter: Option<u64>,
    output: Option<Result<(), SendError<T>>>,
}

impl<T> SendArm<T> {
    pub(crate) fn new(chan: Arc<Chan<T>>, value: T) -> Self {
        Self {
            chan,
            value: Some(value),
            waiter: None,
            output: None,
        }
    }

    pub(crate) fn take(&mut self) -> Option<Result<(), SendError<T>>> {
        self.output.take()
    }

    /// The value, if the arm never completed.
    pub(crate) fn into_value(mut self) -> Option<T> {
        self.cancel_registration();
        self.value.take()
    }

    fn cancel_registration(&mut self) {
        if let Some(id) = self.waiter.take() {
            let recovered = self.chan.state.lock().remove_sender(Some(id));
            if recovered.is_some() {
                self.value = recovered;
            }
        }
    }
}

impl<T> Arm for SendArm<T> {
    fn attempt(&mut self, token: &Arc<Token>, index: usize, register: bool) -> bool {
        let mut state = self.chan.state.lock();
        let mut value = self.value.take().or_else(|| state.sender_value(self.waiter));
        if value.is_none() {
            return false;
        }

        if state.refuses_sends() {
            let _ = state.remove_sender(self.waiter.take());
            if let Some(value) = value {
                self.output = Some(Err(SendError(value)));
            }
            return true;
        }

        if state.give_to_receiver(token, &mut value) {
            let _ = state.remove_sender(self.waiter.take());
            self.output = Some(Ok(()));
            return true;
        }

        if state.buffer.len() < self.chan.capacity {
            if let Some(value) = value.take() {
                state.buffer.push_back(value);
            }
            let _ = state.remove_sender(self.waiter.take());
            self.output = Some(Ok(()));
            return true;
        }

        let Some(value) = value else {
            return false;
        };
        match self.waiter {
            Some(id) => {
                if let Some(orphan) = state.restore_sender_value(id, value) {
                    self.waiter = None;
                    self.value = Some(orphan);
                }
            }
            None if register => {
                let id = state.next_id();
                state.senders.push_back(SendWaiter {
                    id,
                    token: Arc::clone(token),
                    arm: index,
                    value: Some(value),
                });
                self.waiter = Some(id);
            }
            None => self.value = Some(value),
        }
        false
    }

    fn claimed(&mut self) {
        self.waiter = None;
        self.output = Some(Ok(()));
    }

    fn cancel(&mut self) {
        self.cancel_registration();
    }

    fn revert(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::waiter::try_once;

    #[test]
    fn buffered_send_then_recv() {
        let chan = Chan::<u32>::new(2);
        let mut send = SendArm::new(Arc::clone(&chan), 5);
        assert!(try_once(&mut send));
        assert!(matches!(send.take(), Some(Ok(()))));
        assert_eq!(chan.len(), 1);

        let mut recv = RecvArm::new(Arc::clone(&chan));
        assert!(try_once(&mut recv));
        assert_eq!(recv.take(), Some(Some(5)));
    }

    #[test]
    fn rendezvous_try_send_without_receiver_is_not_ready() {
        let chan = Chan::<u32>::new(0);
        let mut send = SendArm::new(Arc::clone(&chan), 1);
        assert!(!try_once(&mut send));
        assert_eq!(send.into_value(), Some(1));
    }

    #[test]
    fn closed_channel_drains_then_reports_closed() {
        let chan = Chan::<u32>::new(4);
        for v in [1, 2] {
            let mut send = SendArm::new(Arc::clone(&chan), v);
            assert!(try_once(&mut send));
        }
        assert!(chan.close());
        assert!(!chan.close());

        let mut out = Vec::new();
        loop {
            let mut recv = RecvArm::new(Arc::clone(&chan));
            assert!(try_once(&mut recv));
            match recv.take() {
                Some(Some(v)) => out.push(v),
                _ => break,
            }
        }
        assert_eq!(out, vec![1, 2]);

        let mut send = SendArm::new(Arc::clone(&chan), 3);
        assert!(try_once(&mut send));
        assert!(matches!(send.take(), Some(Err(SendError(3)))));
    }

    #[test]
    fn restore_puts_value_at_front() {
        let chan = Chan::<u32>::new(4);
        let mut send = SendArm::new(Arc::clone(&chan), 2);
        assert!(try_once(&mut send));
        chan.restore(1);
        let mut recv = RecvArm::new(Arc::clone(&chan));
        assert!(try_once(&mut recv));
        assert_eq!(recv.take(), Some(Some(1)));
    }
}
