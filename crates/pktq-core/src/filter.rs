//! Filter controller
//!
//! [`QueuedPacketFilter`] owns the adapter snapshot, the block queues and
//! the stage workers of one filtering session, and is the only place the
//! [`FilterState`] changes.

use crate::adapter::NetworkAdapter;
use crate::classify::{Classifiers, PacketClassifier};
use crate::config::FilterConfig;
use crate::driver::{AdapterInfo, TapDriver};
use crate::error::{Error, Result};
use crate::packet::IntermediateBuffer;
use crate::pipeline::stages::{run_stage, StageContext};
use crate::pipeline::{
    BlockQueues, CancelSource, PacketBlock, PipelineStats, PoolCensus, Stage, StatsSnapshot,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Lifecycle state of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterState {
    /// No session running
    Stopped,
    /// Session resources are being acquired
    Starting,
    /// Stage workers are running
    Running,
    /// Cancellation is being signalled
    Stopping,
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterState::Stopped => "stopped",
            FilterState::Starting => "starting",
            FilterState::Running => "running",
            FilterState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Adapter snapshot, replaced wholesale on reconfigure
type AdapterList = Arc<[Arc<NetworkAdapter>]>;

struct Session {
    adapter: Arc<NetworkAdapter>,
    cancel: CancelSource,
    workers: Vec<JoinHandle<()>>,
}

/// Builder for [`QueuedPacketFilter`]
pub struct FilterBuilder {
    driver: Arc<dyn TapDriver>,
    inbound: Option<Arc<dyn PacketClassifier>>,
    outbound: Option<Arc<dyn PacketClassifier>>,
    config: FilterConfig,
    adapters: Option<Vec<AdapterInfo>>,
}

impl FilterBuilder {
    /// Classifier for received packets
    pub fn inbound<C: PacketClassifier + 'static>(mut self, classifier: C) -> Self {
        self.inbound = Some(Arc::new(classifier));
        self
    }

    /// Classifier for sent packets
    pub fn outbound<C: PacketClassifier + 'static>(mut self, classifier: C) -> Self {
        self.outbound = Some(Arc::new(classifier));
        self
    }

    /// Pipeline sizing
    pub fn config(mut self, config: FilterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an already discovered adapter list instead of enumerating
    pub fn adapters(mut self, adapters: Vec<AdapterInfo>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    /// Validate the configuration and build the adapter snapshot
    pub fn build(self) -> Result<QueuedPacketFilter> {
        self.config.validate()?;

        let infos = match self.adapters {
            Some(infos) => infos,
            None => enumerate(self.driver.as_ref())?,
        };
        let adapters = snapshot(self.driver.as_ref(), infos);
        debug!(adapters = adapters.len(), "Filter initialized");

        Ok(QueuedPacketFilter {
            queues: BlockQueues::new(self.config.pool_size),
            classifiers: Classifiers::new(self.inbound, self.outbound),
            config: self.config,
            adapters: RwLock::new(adapters),
            state: Mutex::new(FilterState::Stopped),
            session: Mutex::new(None),
            selected: RwLock::new(None),
            stats: Arc::new(PipelineStats::new()),
            driver: self.driver,
        })
    }
}

fn enumerate(driver: &dyn TapDriver) -> Result<Vec<AdapterInfo>> {
    driver
        .enumerate_adapters()
        .map_err(|e| Error::Enumeration(e.to_string()))
}

fn snapshot(driver: &dyn TapDriver, infos: Vec<AdapterInfo>) -> AdapterList {
    infos
        .into_iter()
        .map(|info| Arc::new(NetworkAdapter::new(driver, info)))
        .collect()
}

/// Queued packet filter for one adapter at a time
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use pktq_core::{AdapterHandle, Direction, IntermediateBuffer, QueuedPacketFilter, TapDriver, Verdict};
/// # fn demo(driver: Arc<dyn TapDriver>) -> pktq_core::Result<()> {
/// let filter = QueuedPacketFilter::builder(driver)
///     .inbound(|_: AdapterHandle, _: Direction, _: &mut IntermediateBuffer| Verdict::Pass)
///     .build()?;
///
/// filter.start(0)?;
/// // ...
/// filter.stop()?;
/// filter.join();
/// filter.release()?;
/// # Ok(())
/// # }
/// ```
pub struct QueuedPacketFilter {
    driver: Arc<dyn TapDriver>,
    classifiers: Classifiers,
    config: FilterConfig,
    adapters: RwLock<AdapterList>,
    state: Mutex<FilterState>,
    session: Mutex<Option<Session>>,
    selected: RwLock<Option<Arc<NetworkAdapter>>>,
    queues: BlockQueues,
    stats: Arc<PipelineStats>,
}

impl QueuedPacketFilter {
    /// Start building a filter on top of `driver`
    pub fn builder(driver: Arc<dyn TapDriver>) -> FilterBuilder {
        FilterBuilder {
            driver,
            inbound: None,
            outbound: None,
            config: FilterConfig::default(),
            adapters: None,
        }
    }

    /// Start filtering on the adapter at `adapter_index`
    ///
    /// Allocates the block pool, registers the packet event, sets the
    /// adapter mode and spawns the four stage workers. On failure every
    /// acquired resource is given back and the filter stays stopped.
    pub fn start(&self, adapter_index: usize) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != FilterState::Stopped {
                return Err(Error::IllegalState("not stopped"));
            }
            *state = FilterState::Starting;
        }

        match self.start_session(adapter_index) {
            Ok(session) => {
                info!(
                    adapter = %session.adapter.friendly_name(),
                    pool_size = self.config.pool_size,
                    packets_per_block = self.config.packets_per_block,
                    mode = ?session.adapter.mode(),
                    "Filter started"
                );
                *self.selected.write() = Some(Arc::clone(&session.adapter));
                *self.session.lock() = Some(session);
                *self.state.lock() = FilterState::Running;
                Ok(())
            }
            Err(e) => {
                warn!(adapter_index, error = %e, "Filter start failed");
                *self.state.lock() = FilterState::Stopped;
                Err(e)
            }
        }
    }

    fn start_session(&self, adapter_index: usize) -> Result<Session> {
        let adapter = {
            let adapters = self.adapters.read();
            adapters
                .get(adapter_index)
                .cloned()
                .ok_or(Error::InvalidAdapter {
                    index: adapter_index,
                    count: adapters.len(),
                })?
        };

        // Leftovers of a session that was stopped but never released
        self.join();
        if let Some(previous) = self.session.lock().take() {
            previous.adapter.release(self.driver.as_ref());
        }
        let stale = self.queues.drain_all();
        if stale > 0 {
            debug!(blocks = stale, "Dropped stale blocks");
        }
        self.queues.reset_held();
        self.stats.reset();

        for _ in 0..self.config.pool_size {
            let block = PacketBlock::new(adapter.handle(), self.config.packets_per_block);
            if self.queues.capture.sender().try_send(block).is_err() {
                self.queues.drain_all();
                return Err(Error::IllegalState("capture queue full"));
            }
        }

        if let Err(e) = self.acquire(&adapter) {
            self.queues.drain_all();
            adapter.release(self.driver.as_ref());
            return Err(e);
        }

        let cancel = CancelSource::new();
        match self.spawn_workers(&adapter, &cancel) {
            Ok(workers) => Ok(Session {
                adapter,
                cancel,
                workers,
            }),
            Err(e) => {
                self.queues.drain_all();
                self.queues.reset_held();
                adapter.release(self.driver.as_ref());
                Err(e)
            }
        }
    }

    fn acquire(&self, adapter: &NetworkAdapter) -> Result<()> {
        adapter.set_packet_event(self.driver.as_ref())?;
        adapter.set_mode(self.driver.as_ref(), self.classifiers.adapter_mode())
    }

    fn spawn_workers(
        &self,
        adapter: &Arc<NetworkAdapter>,
        cancel: &CancelSource,
    ) -> Result<Vec<JoinHandle<()>>> {
        let queues = &self.queues;
        let wiring: [(Stage, &Receiver<PacketBlock>, &Sender<PacketBlock>); 4] = [
            (Stage::Capture, queues.capture.receiver(), queues.classify.sender()),
            (Stage::Classify, queues.classify.receiver(), queues.stack.sender()),
            (Stage::StackInjection, queues.stack.receiver(), queues.wire.sender()),
            (Stage::WireInjection, queues.wire.receiver(), queues.capture.sender()),
        ];

        let mut workers = Vec::with_capacity(wiring.len());
        for (stage, input, output) in wiring {
            let ctx = StageContext {
                driver: Arc::clone(&self.driver),
                adapter: Arc::clone(adapter),
                classifiers: self.classifiers.clone(),
                stats: Arc::clone(&self.stats),
                held: queues.held_counter(),
                cancel: cancel.token(),
                poll_interval: self.config.event_poll_interval(),
            };
            let input = input.clone();
            let output = output.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.config.thread_name_prefix, stage.name()))
                .spawn(move || run_stage(stage, &ctx, &input, &output));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    cancel.cancel();
                    join_all(workers);
                    return Err(Error::Spawn {
                        stage: stage.name(),
                        source,
                    });
                }
            }
        }
        Ok(workers)
    }

    /// Signal the stage workers to stop
    ///
    /// Returns once cancellation is signalled; use [`join`](Self::join) to
    /// wait for the workers to exit.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != FilterState::Running {
            return Err(Error::IllegalState("not running"));
        }
        *state = FilterState::Stopping;

        if let Some(session) = self.session.lock().as_ref() {
            session.cancel.cancel();
        }

        *state = FilterState::Stopped;
        info!("Filter stopped");
        Ok(())
    }

    /// Wait for the workers of the last session to exit
    ///
    /// Blocks until [`stop`](Self::stop) is called if the filter is running.
    pub fn join(&self) {
        let workers = match self.session.lock().as_mut() {
            Some(session) => std::mem::take(&mut session.workers),
            None => return,
        };
        join_all(workers);
    }

    /// Re-enumerate adapters and replace the adapter snapshot
    pub fn reconfigure(&self) -> Result<()> {
        let state = self.state.lock();
        if *state != FilterState::Stopped {
            return Err(Error::IllegalState("not stopped"));
        }

        let adapters = snapshot(self.driver.as_ref(), enumerate(self.driver.as_ref())?);
        info!(adapters = adapters.len(), "Adapters reconfigured");
        *self.adapters.write() = adapters;
        *self.selected.write() = None;
        drop(state);
        Ok(())
    }

    /// Release the session's adapter resources and empty every queue
    ///
    /// Joins any workers still winding down, clears the adapter mode,
    /// releases the packet event and flushes the driver's adapter queue.
    /// Returns the number of blocks reclaimed from the queues.
    pub fn release(&self) -> Result<usize> {
        let state = self.state.lock();
        if matches!(*state, FilterState::Running | FilterState::Starting) {
            return Err(Error::IllegalState("filter is running"));
        }

        self.join();
        if let Some(session) = self.session.lock().take() {
            session.adapter.release(self.driver.as_ref());
            if let Err(e) = self.driver.flush_adapter_queue(session.adapter.handle()) {
                warn!(adapter = %session.adapter.friendly_name(), error = %e, "Failed to flush adapter queue");
            }
        }

        let reclaimed = self.queues.drain_all();
        self.queues.reset_held();
        drop(state);

        debug!(blocks = reclaimed, "Filter released");
        Ok(reclaimed)
    }

    /// Send one packet up the protocol stack of the selected adapter
    pub fn insert_packet_to_stack(&self, buffer: &IntermediateBuffer) -> Result<()> {
        let adapter = self.require_selected()?;
        self.driver.send_single_to_stack(adapter.handle(), buffer)
    }

    /// Send one packet out on the wire of the selected adapter
    pub fn insert_packet_to_wire(&self, buffer: &IntermediateBuffer) -> Result<()> {
        let adapter = self.require_selected()?;
        self.driver.send_single_to_wire(adapter.handle(), buffer)
    }

    fn require_selected(&self) -> Result<Arc<NetworkAdapter>> {
        self.selected_adapter()
            .ok_or(Error::IllegalState("no adapter selected"))
    }

    /// Display names of the discovered adapters
    pub fn interface_names(&self) -> Vec<String> {
        self.adapters
            .read()
            .iter()
            .map(|adapter| adapter.friendly_name().to_string())
            .collect()
    }

    /// Hardware addresses of the discovered adapters
    pub fn interface_hw_list(&self) -> Vec<String> {
        self.adapters
            .read()
            .iter()
            .map(|adapter| adapter.info().mac_string())
            .collect()
    }

    /// Current adapter snapshot
    pub fn interfaces(&self) -> Arc<[Arc<NetworkAdapter>]> {
        self.adapters.read().clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> FilterState {
        *self.state.lock()
    }

    /// Adapter chosen by the last successful start
    pub fn selected_adapter(&self) -> Option<Arc<NetworkAdapter>> {
        self.selected.read().clone()
    }

    /// Pipeline counters of the current session
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Where the pool's blocks are right now
    pub fn pool_census(&self) -> PoolCensus {
        self.queues.census()
    }

    /// Active configuration
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
}

impl fmt::Debug for QueuedPacketFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedPacketFilter")
            .field("state", &self.state())
            .field("classifiers", &self.classifiers)
            .field("config", &self.config)
            .field("adapters", &self.adapters.read().len())
            .finish()
    }
}

impl Drop for QueuedPacketFilter {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().as_ref() {
            session.cancel.cancel();
        }
        self.join();
        if let Some(session) = self.session.get_mut().take() {
            session.adapter.release(self.driver.as_ref());
        }
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().unwrap_or("worker").to_string();
        if worker.join().is_err() {
            warn!(thread = %name, "Stage worker panicked");
        }
    }
}
