//! In-memory tap driver
//!
//! [`MemoryTap`] behaves like a capture driver without touching a real
//! interface. Frames are injected per adapter and direction; directions the
//! adapter mode tunnels are queued for the filter and signal its packet
//! event, the rest bypass the filter and are delivered immediately. Every
//! frame that reaches the stack or the wire is counted; the first
//! [`DEFAULT_FRAME_LOG_LIMIT`] of them are also kept for inspection.
//!
//! Fault injection and stall gates let tests exercise failure handling and
//! backpressure.

use crate::error::PlatformError;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use pktq_core::pipeline::BatchView;
use pktq_core::{
    AdapterHandle, AdapterInfo, AdapterMode, Direction, DirectionFlags, EventHandle,
    IntermediateBuffer, Result as CoreResult, TapDriver, MAX_ETHER_FRAME,
};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Frames kept per sink unless [`MemoryTap::set_frame_log_limit`] says otherwise
pub const DEFAULT_FRAME_LOG_LIMIT: usize = 4096;

/// Where an injected packet ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sink {
    /// Protocol stack of the host
    Stack,
    /// Network wire
    Wire,
}

/// What [`MemoryTap::inject`] did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injected {
    /// Queued for the filter
    Queued,
    /// Delivered straight to its destination; the direction is not tunnelled
    Bypassed,
    /// Discarded because the adapter queue was full
    Overflowed,
}

/// One frame handed to the stack or the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Adapter it went through
    pub adapter: AdapterHandle,
    /// Direction flags it carried
    pub direction: Direction,
    /// Frame contents
    pub frame: Bytes,
    /// Delivered without passing through the filter
    pub bypassed: bool,
}

#[derive(Debug, Default)]
struct Port {
    mode: AdapterMode,
    pending: VecDeque<(DirectionFlags, Bytes)>,
}

#[derive(Debug)]
struct EventSlot {
    adapter: AdapterHandle,
    signalled: bool,
}

#[derive(Debug, Default)]
struct Faults {
    enumeration: bool,
    reads: usize,
    stack_sends: usize,
    wire_sends: usize,
    accept_limit: Option<usize>,
}

#[derive(Debug, Default)]
struct SinkLog {
    delivered: usize,
    bypassed: usize,
    frames: Vec<Delivery>,
}

#[derive(Debug)]
struct TapState {
    adapters: Vec<AdapterInfo>,
    friendly_names: HashMap<String, String>,
    ports: HashMap<AdapterHandle, Port>,
    events: HashMap<EventHandle, EventSlot>,
    next_handle: u64,
    stack: SinkLog,
    wire: SinkLog,
    frame_log_limit: usize,
    queue_limit: Option<usize>,
    overflowed: usize,
    stalled_stack: bool,
    stalled_wire: bool,
    waiting_stack: usize,
    waiting_wire: usize,
    faults: Faults,
}

impl Default for TapState {
    fn default() -> Self {
        Self {
            adapters: Vec::new(),
            friendly_names: HashMap::new(),
            ports: HashMap::new(),
            events: HashMap::new(),
            next_handle: 0,
            stack: SinkLog::default(),
            wire: SinkLog::default(),
            frame_log_limit: DEFAULT_FRAME_LOG_LIMIT,
            queue_limit: None,
            overflowed: 0,
            stalled_stack: false,
            stalled_wire: false,
            waiting_stack: 0,
            waiting_wire: 0,
            faults: Faults::default(),
        }
    }
}

impl TapState {
    fn port(&mut self, adapter: AdapterHandle) -> Result<&mut Port, PlatformError> {
        self.ports
            .get_mut(&adapter)
            .ok_or(PlatformError::AdapterNotFound(adapter))
    }

    fn event(&mut self, event: EventHandle) -> Result<&mut EventSlot, PlatformError> {
        self.events
            .get_mut(&event)
            .ok_or(PlatformError::EventNotFound(event))
    }

    fn signal(&mut self, adapter: AdapterHandle) {
        for slot in self.events.values_mut() {
            if slot.adapter == adapter {
                slot.signalled = true;
            }
        }
    }

    fn log(&self, sink: Sink) -> &SinkLog {
        match sink {
            Sink::Stack => &self.stack,
            Sink::Wire => &self.wire,
        }
    }

    fn record(&mut self, sink: Sink, delivery: Delivery) {
        let limit = self.frame_log_limit;
        let log = match sink {
            Sink::Stack => &mut self.stack,
            Sink::Wire => &mut self.wire,
        };
        log.delivered += 1;
        if delivery.bypassed {
            log.bypassed += 1;
        }
        if log.frames.len() < limit {
            log.frames.push(delivery);
        }
    }

    fn stalled(&self, sink: Sink) -> bool {
        match sink {
            Sink::Stack => self.stalled_stack,
            Sink::Wire => self.stalled_wire,
        }
    }

    fn waiting(&mut self, sink: Sink) -> &mut usize {
        match sink {
            Sink::Stack => &mut self.waiting_stack,
            Sink::Wire => &mut self.waiting_wire,
        }
    }

    fn failing_sends(&mut self, sink: Sink) -> &mut usize {
        match sink {
            Sink::Stack => &mut self.faults.stack_sends,
            Sink::Wire => &mut self.faults.wire_sends,
        }
    }
}

/// Simulated tap driver
#[derive(Debug, Default)]
pub struct MemoryTap {
    state: Mutex<TapState>,
    changed: Condvar,
}

impl MemoryTap {
    /// Create a tap with no adapters
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter and return its handle
    pub fn add_adapter(&self, name: impl Into<String>, mac: [u8; 6], mtu: u16) -> AdapterHandle {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = AdapterHandle(0x1000 + state.next_handle);
        let name = name.into();
        debug!(%handle, %name, "Added simulated adapter");

        state.adapters.push(AdapterInfo {
            handle,
            name,
            mac,
            medium: 0,
            mtu,
        });
        state.ports.insert(handle, Port::default());
        handle
    }

    /// Register a display name returned by friendly-name lookups
    pub fn set_friendly_name(&self, raw_name: impl Into<String>, friendly: impl Into<String>) {
        self.state
            .lock()
            .friendly_names
            .insert(raw_name.into(), friendly.into());
    }

    /// Feed a frame into an adapter
    ///
    /// Tunnelled directions are queued for the filter, or dropped when the
    /// adapter queue is at its [limit](Self::set_queue_limit). Other
    /// directions go straight to their destination.
    pub fn inject(
        &self,
        adapter: AdapterHandle,
        direction: Direction,
        frame: impl Into<Bytes>,
    ) -> Result<Injected, PlatformError> {
        let frame = frame.into();
        if frame.len() > MAX_ETHER_FRAME {
            return Err(PlatformError::FrameTooLarge {
                len: frame.len(),
                max: MAX_ETHER_FRAME,
            });
        }

        let mut state = self.state.lock();
        let queue_limit = state.queue_limit.unwrap_or(usize::MAX);
        let port = state.port(adapter)?;
        let tunnel = match direction {
            Direction::Outbound => AdapterMode::SENT_TUNNEL,
            Direction::Inbound => AdapterMode::RECV_TUNNEL,
        };

        if port.mode.contains(tunnel) {
            if port.pending.len() >= queue_limit {
                state.overflowed += 1;
                return Ok(Injected::Overflowed);
            }
            port.pending.push_back((direction.device_flags(), frame));
            state.signal(adapter);
            self.changed.notify_all();
            return Ok(Injected::Queued);
        }

        let sink = match direction {
            Direction::Outbound => Sink::Wire,
            Direction::Inbound => Sink::Stack,
        };
        state.record(
            sink,
            Delivery {
                adapter,
                direction,
                frame,
                bypassed: true,
            },
        );
        self.changed.notify_all();
        Ok(Injected::Bypassed)
    }

    /// Frames queued for the filter on `adapter`
    pub fn pending(&self, adapter: AdapterHandle) -> usize {
        self.state
            .lock()
            .ports
            .get(&adapter)
            .map_or(0, |port| port.pending.len())
    }

    /// Recorded frames delivered to `sink`, oldest first
    ///
    /// Only the first frames up to the frame log limit are kept; use
    /// [`delivered`](Self::delivered) for the full count.
    pub fn deliveries(&self, sink: Sink) -> Vec<Delivery> {
        self.state.lock().log(sink).frames.clone()
    }

    /// Number of frames delivered to `sink` so far
    pub fn delivered(&self, sink: Sink) -> usize {
        self.state.lock().log(sink).delivered
    }

    /// Number of frames that reached `sink` without passing the filter
    pub fn bypassed(&self, sink: Sink) -> usize {
        self.state.lock().log(sink).bypassed
    }

    /// Frames dropped because an adapter queue was full
    pub fn overflowed(&self) -> usize {
        self.state.lock().overflowed
    }

    /// Keep at most `limit` delivered frames per sink; 0 keeps only counters
    pub fn set_frame_log_limit(&self, limit: usize) {
        let mut state = self.state.lock();
        state.frame_log_limit = limit;
        state.stack.frames.truncate(limit);
        state.wire.frames.truncate(limit);
    }

    /// Cap the frames queued for the filter per adapter; `None` is unbounded
    pub fn set_queue_limit(&self, limit: Option<usize>) {
        self.state.lock().queue_limit = limit;
    }

    /// Wait until at least `count` frames reached `sink`
    pub fn wait_for_deliveries(&self, sink: Sink, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.log(sink).delivered < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.log(sink).delivered >= count;
            }
        }
        true
    }

    /// Make batch sends to `sink` block until [`resume`](Self::resume)
    pub fn stall(&self, sink: Sink) {
        let mut state = self.state.lock();
        match sink {
            Sink::Stack => state.stalled_stack = true,
            Sink::Wire => state.stalled_wire = true,
        }
    }

    /// Release a stall gate
    pub fn resume(&self, sink: Sink) {
        let mut state = self.state.lock();
        match sink {
            Sink::Stack => state.stalled_stack = false,
            Sink::Wire => state.stalled_wire = false,
        }
        self.changed.notify_all();
    }

    /// Batch sends currently blocked on a stall gate
    pub fn waiting_senders(&self, sink: Sink) -> usize {
        *self.state.lock().waiting(sink)
    }

    /// Fail the next adapter enumeration
    pub fn fail_enumeration(&self) {
        self.state.lock().faults.enumeration = true;
    }

    /// Fail the next `count` batched reads
    pub fn fail_reads(&self, count: usize) {
        self.state.lock().faults.reads = count;
    }

    /// Fail the next `count` batch sends to `sink`
    pub fn fail_sends(&self, sink: Sink, count: usize) {
        *self.state.lock().failing_sends(sink) = count;
    }

    /// Accept at most `limit` packets per batch send
    pub fn limit_batch_accept(&self, limit: Option<usize>) {
        self.state.lock().faults.accept_limit = limit;
    }

    fn wait_while_stalled(&self, sink: Sink, state: &mut MutexGuard<'_, TapState>) {
        if !state.stalled(sink) {
            return;
        }
        trace!(?sink, "Batch send stalled");
        *state.waiting(sink) += 1;
        self.changed.notify_all();
        while state.stalled(sink) {
            self.changed.wait(state);
        }
        *state.waiting(sink) -= 1;
    }

    fn send_batch(
        &self,
        sink: Sink,
        adapter: AdapterHandle,
        buffers: &[IntermediateBuffer],
        batch: &[usize],
    ) -> Result<usize, PlatformError> {
        let mut state = self.state.lock();
        self.wait_while_stalled(sink, &mut state);
        state.port(adapter)?;

        let failing = state.failing_sends(sink);
        if *failing > 0 {
            *failing -= 1;
            return Err(PlatformError::InjectionError(format!(
                "simulated {sink:?} send failure"
            )));
        }

        let limit = state.faults.accept_limit.unwrap_or(usize::MAX);
        let mut accepted = 0;
        for buffer in BatchView::new(buffers, batch).iter().take(limit) {
            state.record(sink, delivery(adapter, buffer));
            accepted += 1;
        }
        self.changed.notify_all();
        Ok(accepted)
    }

    fn send_single(
        &self,
        sink: Sink,
        adapter: AdapterHandle,
        buffer: &IntermediateBuffer,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.port(adapter)?;
        state.record(sink, delivery(adapter, buffer));
        self.changed.notify_all();
        Ok(())
    }
}

fn delivery(adapter: AdapterHandle, buffer: &IntermediateBuffer) -> Delivery {
    Delivery {
        adapter,
        direction: buffer.direction(),
        frame: Bytes::copy_from_slice(buffer.data()),
        bypassed: false,
    }
}

impl TapDriver for MemoryTap {
    fn enumerate_adapters(&self) -> CoreResult<Vec<AdapterInfo>> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.faults.enumeration) {
            return Err(PlatformError::EnumerationFailed("simulated failure".into()).into());
        }
        Ok(state.adapters.clone())
    }

    fn resolve_friendly_name(&self, raw_name: &str) -> Option<String> {
        self.state.lock().friendly_names.get(raw_name).cloned()
    }

    fn set_adapter_mode(&self, adapter: AdapterHandle, mode: AdapterMode) -> CoreResult<()> {
        self.state.lock().port(adapter)?.mode = mode;
        Ok(())
    }

    fn get_adapter_mode(&self, adapter: AdapterHandle) -> CoreResult<AdapterMode> {
        Ok(self.state.lock().port(adapter)?.mode)
    }

    fn register_packet_event(&self, adapter: AdapterHandle) -> CoreResult<EventHandle> {
        let mut state = self.state.lock();
        let signalled = !state.port(adapter)?.pending.is_empty();
        state.next_handle += 1;
        let event = EventHandle(state.next_handle);
        state.events.insert(event, EventSlot { adapter, signalled });
        Ok(event)
    }

    fn release_packet_event(
        &self,
        _adapter: AdapterHandle,
        event: EventHandle,
    ) -> CoreResult<()> {
        let mut state = self.state.lock();
        state
            .events
            .remove(&event)
            .ok_or(PlatformError::EventNotFound(event))?;
        self.changed.notify_all();
        Ok(())
    }

    fn wait_event(&self, event: EventHandle, timeout: Option<Duration>) -> CoreResult<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        loop {
            if state.event(event)?.signalled {
                return Ok(true);
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return Ok(state.event(event)?.signalled);
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    fn reset_event(&self, event: EventHandle) -> CoreResult<()> {
        self.state.lock().event(event)?.signalled = false;
        Ok(())
    }

    fn read_batch(
        &self,
        adapter: AdapterHandle,
        buffers: &mut [IntermediateBuffer],
    ) -> CoreResult<usize> {
        let mut state = self.state.lock();
        if state.faults.reads > 0 {
            state.faults.reads -= 1;
            return Err(PlatformError::CaptureError("simulated read failure".into()).into());
        }

        let port = state.port(adapter)?;
        let mut read = 0;
        for buffer in buffers.iter_mut() {
            let Some((flags, frame)) = port.pending.pop_front() else {
                break;
            };
            buffer.fill(flags, &frame)?;
            read += 1;
        }

        // Frames left behind keep the event signalled
        if !port.pending.is_empty() {
            state.signal(adapter);
        }
        Ok(read)
    }

    fn send_batch_to_stack(
        &self,
        adapter: AdapterHandle,
        buffers: &[IntermediateBuffer],
        batch: &[usize],
    ) -> CoreResult<usize> {
        Ok(self.send_batch(Sink::Stack, adapter, buffers, batch)?)
    }

    fn send_batch_to_wire(
        &self,
        adapter: AdapterHandle,
        buffers: &[IntermediateBuffer],
        batch: &[usize],
    ) -> CoreResult<usize> {
        Ok(self.send_batch(Sink::Wire, adapter, buffers, batch)?)
    }

    fn send_single_to_stack(
        &self,
        adapter: AdapterHandle,
        buffer: &IntermediateBuffer,
    ) -> CoreResult<()> {
        Ok(self.send_single(Sink::Stack, adapter, buffer)?)
    }

    fn send_single_to_wire(
        &self,
        adapter: AdapterHandle,
        buffer: &IntermediateBuffer,
    ) -> CoreResult<()> {
        Ok(self.send_single(Sink::Wire, adapter, buffer)?)
    }

    fn flush_adapter_queue(&self, adapter: AdapterHandle) -> CoreResult<()> {
        let mut state = self.state.lock();
        let port = state.port(adapter)?;
        let flushed = port.pending.len();
        port.pending.clear();
        debug!(%adapter, flushed, "Flushed adapter queue");
        Ok(())
    }
}
