// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! An event scheduling framework based on epoll
use crate::error::*;
use crate::timer::Timer;
use crate::{Epoll, EventState, EventType, Source};
use nix::sys::signal::SigSet;
use nix::sys::signalfd::{siginfo, SfdFlags, SignalFd};
use snafu::ResultExt;
use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;

/// epoll token of the shared timerfd, source tokens are addresses and never 0
const TIMER_TOKEN: u64 = 0;

/// An event scheduling framework based on epoll
#[derive(Debug)]
pub struct Events {
    data: RefCell<EventsData>,
}

impl Events {
    /// create event
    pub fn new() -> Result<Events> {
        Ok(Events {
            data: RefCell::new(EventsData::new()?),
        })
    }

    /// for all: add source which implement Source trait
    pub fn add_source(&self, source: Rc<dyn Source>) -> Result<i32> {
        self.data.borrow_mut().add_source(source)
    }

    /// for all: check if the source exists
    pub fn has_source(&self, source: Rc<dyn Source>) -> bool {
        self.data.borrow().has_source(source)
    }

    /// for all: delete source, a pending dispatch of it is dropped
    pub fn del_source(&self, source: Rc<dyn Source>) -> Result<i32> {
        self.data.borrow_mut().del_source(source)
    }

    /// for all: set the source enabled state
    ///
    /// Timer sources are armed when they go from Off to On/OneShot and fire
    /// once per arming.
    pub fn set_enabled(&self, source: Rc<dyn Source>, state: EventState) -> Result<i32> {
        self.data.borrow_mut().set_enabled(source, state)
    }

    /// for all: current state of the source, None if it was never added
    pub fn state(&self, source: Rc<dyn Source>) -> Option<EventState> {
        self.data
            .borrow()
            .source_state(source.token())
            .map(|s| s.state)
    }

    /// for all: exit event loop
    pub fn set_exit(&self) {
        self.data.borrow_mut().set_exit()
    }

    /// for all: whether set_exit was called
    pub fn is_exit(&self) -> bool {
        self.data.borrow().exit()
    }

    /// for all: CLOCK_MONOTONIC in usec
    pub fn now(&self) -> u64 {
        self.data.borrow().timer.now()
    }

    /// for all: Scheduling once, processing an event
    ///
    /// timeout is in milliseconds, -1 waits until something happens.
    pub fn run(&self, timeout: i32) -> Result<i32> {
        if self.data.borrow().exit() {
            return Ok(0);
        }

        let timeout = match self.data.borrow_mut().prepare()? {
            true => 0,
            false => timeout,
        };
        self.data.borrow_mut().wait(timeout)?;

        self.dispatch()?;
        Ok(0)
    }

    /// for all: Process the event in a loop until exiting actively
    pub fn rloop(&self) -> Result<i32> {
        loop {
            if self.data.borrow().exit() {
                return Ok(0);
            }
            self.run(-1i32)?;
        }
    }

    /// private: Fetch the highest priority event processing on the pending queue
    fn dispatch(&self) -> Result<i32> {
        if self.data.borrow().exit() {
            return Ok(0);
        }

        let top = match self.data.borrow_mut().pending_pop() {
            None => return Ok(0),
            Some(v) => v,
        };
        let state = match self.data.borrow().source_state(top.token()) {
            None => return Ok(0),
            Some(v) => v.state,
        };

        match state {
            EventState::Off => {}
            EventState::On if top.event_type() != EventType::TimerMonotonic => {
                top.dispatch(self);
            }
            EventState::On | EventState::OneShot => {
                self.data
                    .borrow_mut()
                    .set_enabled(top.clone(), EventState::Off)?;

                top.dispatch(self);
            }
        }
        Ok(0)
    }

    /// for signal: read the signal content when signal source emit
    pub fn read_signals(&self) -> Option<siginfo> {
        self.data.borrow_mut().read_signals()
    }

    /// drop every source, breaking reference cycles through dispatch targets
    pub fn clear(&self) {
        self.data.borrow_mut().clear();
    }
}

#[derive(Debug, Clone)]
pub(crate) struct State {
    state: EventState,
    in_pending: bool,
}

impl Default for State {
    fn default() -> State {
        State {
            state: EventState::Off,
            in_pending: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EventsData {
    poller: Epoll,
    exit: bool,
    sources: HashMap<u64, Rc<dyn Source>>,
    state: HashMap<u64, State>,
    pending: BinaryHeap<Rc<dyn Source>>,
    signalfd: SignalFd,
    signal_token: Option<u64>,
    timer: Timer,
}

// the declaration "pub(self)" is for identification only.
impl EventsData {
    pub(self) fn new() -> Result<EventsData> {
        let mut poller = Epoll::new()?;
        let timer = Timer::new()?;
        poller.register(timer.fd(), libc::EPOLLIN as u32, TIMER_TOKEN)?;

        Ok(Self {
            poller,
            exit: false,
            sources: HashMap::new(),
            state: HashMap::new(),
            pending: BinaryHeap::new(),
            signalfd: SignalFd::with_flags(
                &SigSet::empty(),
                SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC,
            )
            .context(NixSnafu)?,
            signal_token: None,
            timer,
        })
    }

    pub(self) fn add_source(&mut self, source: Rc<dyn Source>) -> Result<i32> {
        let token = source.token();
        if self.sources.contains_key(&token) {
            return Ok(0);
        }

        if source.event_type() == EventType::Signal
            && self.sources.values().any(|s| s.event_type() == EventType::Signal)
        {
            return Err(Error::Other {
                word: "only one signal source is supported",
            });
        }

        self.sources.insert(token, source);
        // default state
        self.state.insert(token, State::default());

        Ok(0)
    }

    pub(self) fn has_source(&self, source: Rc<dyn Source>) -> bool {
        self.sources.contains_key(&source.token())
    }

    pub(self) fn del_source(&mut self, source: Rc<dyn Source>) -> Result<i32> {
        self.source_offline(&source)?;

        let token = source.token();
        self.sources.remove(&token);
        self.state.remove(&token);

        Ok(0)
    }

    pub(self) fn set_enabled(&mut self, source: Rc<dyn Source>, state: EventState) -> Result<i32> {
        let token = source.token();
        let current = match self.state.get(&token) {
            None => {
                return Err(Error::Other {
                    word: "source not found",
                })
            }
            Some(v) => v.state,
        };
        if current == state {
            return Ok(0);
        }

        match state {
            EventState::On | EventState::OneShot => {
                if current == EventState::Off {
                    self.source_online(&source)?;
                }
            }
            EventState::Off => {
                self.source_offline(&source)?;
            }
        }

        if let Some(current) = self.state.get_mut(&token) {
            current.state = state;
        }

        Ok(0)
    }

    /// when set to on, register events to the listening queue
    pub(self) fn source_online(&mut self, source: &Rc<dyn Source>) -> Result<i32> {
        let token = source.token();

        match source.event_type() {
            EventType::Io => {
                self.poller
                    .register(source.fd(), source.epoll_event(), token)?;
            }
            EventType::Signal => {
                let mut mask = SigSet::empty();
                for sig in source.signals() {
                    mask.add(sig);
                }
                mask.thread_block().context(NixSnafu)?;
                self.signalfd.set_mask(&mask).context(NixSnafu)?;
                self.poller
                    .register(self.signalfd.as_raw_fd(), libc::EPOLLIN as u32, token)?;
                self.signal_token = Some(token);
            }
            EventType::TimerMonotonic => {
                self.timer.arm(token, source.time_relative());
            }
        }

        Ok(0)
    }

    /// move the event out of the listening queue
    pub(self) fn source_offline(&mut self, source: &Rc<dyn Source>) -> Result<i32> {
        // unneed unregister when source is already Offline
        match self.state.get(&source.token()) {
            Some(current) if current.state != EventState::Off => {}
            _ => return Ok(0),
        }

        match source.event_type() {
            EventType::Io => {
                self.poller.unregister(source.fd())?;
            }
            EventType::Signal => {
                self.poller.unregister(self.signalfd.as_raw_fd())?;
                self.signal_token = None;
            }
            EventType::TimerMonotonic => {
                self.timer.disarm(source.token());
            }
        }

        Ok(0)
    }

    /// read the signal content when signal source emit
    pub(self) fn read_signals(&mut self) -> Option<siginfo> {
        self.signalfd.read_signal().unwrap_or(None)
    }

    /// queue expired timers and program the timerfd for the rest
    ///
    /// returns true if something is already pending
    pub(self) fn prepare(&mut self) -> Result<bool> {
        self.push_expired_timers();
        self.timer.program()?;
        Ok(!self.pending.is_empty())
    }

    /// Wait for the event event through poller
    /// And add the corresponding events to the pending queue
    pub(self) fn wait(&mut self, timeout: i32) -> Result<()> {
        let events = self.poller.poll(timeout)?;

        for event in events.iter() {
            let token = event.u64;
            if token == TIMER_TOKEN {
                self.timer.flush();
                continue;
            }
            if let Some(source) = self.sources.get(&token).cloned() {
                self.pending_push(source);
            }
        }

        self.push_expired_timers();
        Ok(())
    }

    fn push_expired_timers(&mut self) {
        let now = self.timer.now();
        while let Some(token) = self.timer.pop_expired(now) {
            if let Some(source) = self.sources.get(&token).cloned() {
                self.pending_push(source);
            }
        }
    }

    pub(self) fn pending_pop(&mut self) -> Option<Rc<dyn Source>> {
        let top = self.pending.pop()?;
        if let Some(state) = self.state.get_mut(&top.token()) {
            state.in_pending = false;
        }
        Some(top)
    }

    pub(self) fn pending_push(&mut self, source: Rc<dyn Source>) {
        if let Some(current) = self.state.get_mut(&source.token()) {
            if !current.in_pending {
                self.pending.push(source);
                current.in_pending = true;
            }
        }
    }

    pub(self) fn source_state(&self, token: u64) -> Option<State> {
        self.state.get(&token).cloned()
    }

    pub(self) fn set_exit(&mut self) {
        self.exit = true;
    }

    pub(self) fn exit(&self) -> bool {
        self.exit
    }

    fn clear(&mut self) {
        let online: Vec<Rc<dyn Source>> = self.sources.values().cloned().collect();
        for source in online {
            let _ = self.source_offline(&source);
        }
        self.sources.clear();
        self.pending.clear();
        self.state.clear();
    }
}
