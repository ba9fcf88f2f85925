//! Traffic simulation over the in-memory tap

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use pktq_core::{
    AdapterHandle, Direction, FilterConfig, IntermediateBuffer, PacketClassifier, Verdict,
    MAX_ETHER_FRAME,
};
use pktq_platform::MemoryTap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const ETHER_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: [u8; 2] = [0x08, 0x00];

/// Byte the random policy keys its verdict on
const VERDICT_TAG_OFFSET: usize = ETHER_HEADER_LEN;

/// NDISWAN pseudo adapters every simulated host has
const WAN_ADAPTERS: &[&str] = &[
    "\\DEVICE\\NDISWANIP",
    "\\DEVICE\\NDISWANIPV6",
    "\\DEVICE\\NDISWANBH",
];

/// How a simulated classifier decides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerdictPolicy {
    /// No classifier: the direction bypasses the filter
    None,
    /// Always pass
    Pass,
    /// Always drop
    Drop,
    /// Always redirect
    Redirect,
    /// Pick a verdict per frame
    Random,
}

impl VerdictPolicy {
    /// Classifier implementing this policy, if any
    pub fn classifier(self) -> Option<PolicyClassifier> {
        match self {
            VerdictPolicy::None => None,
            policy => Some(PolicyClassifier(policy)),
        }
    }
}

/// Classifier backed by a [`VerdictPolicy`]
#[derive(Debug, Clone, Copy)]
pub struct PolicyClassifier(VerdictPolicy);

impl PacketClassifier for PolicyClassifier {
    fn classify(
        &self,
        _adapter: AdapterHandle,
        _direction: Direction,
        buffer: &mut IntermediateBuffer,
    ) -> Verdict {
        match self.0 {
            VerdictPolicy::None | VerdictPolicy::Pass => Verdict::Pass,
            VerdictPolicy::Drop => Verdict::Drop,
            VerdictPolicy::Redirect => Verdict::Redirect,
            VerdictPolicy::Random => match buffer.data().get(VERDICT_TAG_OFFSET).map(|b| b % 3) {
                Some(1) => Verdict::Drop,
                Some(2) => Verdict::Redirect,
                _ => Verdict::Pass,
            },
        }
    }
}

/// Simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Pipeline sizing
    pub filter: FilterConfig,
    /// Simulated Ethernet adapters, in addition to the NDISWAN ones
    pub adapters: usize,
    /// Adapter the filter is started on
    pub adapter_index: usize,
    /// Frames to inject
    pub packets: u64,
    /// Frames injected between yields
    pub burst: usize,
    /// Share of frames injected as sent, 0.0 to 1.0
    pub outbound_ratio: f64,
    /// Smallest generated frame
    pub min_frame: usize,
    /// Largest generated frame
    pub max_frame: usize,
    /// Policy for received frames
    pub inbound: VerdictPolicy,
    /// Policy for sent frames
    pub outbound: VerdictPolicy,
    /// RNG seed; random when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Give up waiting for the pipeline to drain after this many seconds
    pub timeout_secs: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            adapters: 2,
            adapter_index: 0,
            packets: 10_000,
            burst: 64,
            outbound_ratio: 0.5,
            min_frame: 60,
            max_frame: MAX_ETHER_FRAME,
            inbound: VerdictPolicy::Pass,
            outbound: VerdictPolicy::Pass,
            seed: None,
            timeout_secs: 30,
        }
    }
}

impl SimulationConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read simulation config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse simulation config: {}", path.display()))
    }

    /// Check every setting
    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        if self.adapters == 0 {
            bail!("adapters must be at least 1");
        }
        if self.adapter_index >= self.adapter_count() {
            bail!(
                "adapter_index {} out of range ({} adapters)",
                self.adapter_index,
                self.adapter_count()
            );
        }
        if self.burst == 0 {
            bail!("burst must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.outbound_ratio) {
            bail!("outbound_ratio must be between 0.0 and 1.0");
        }
        if self.min_frame <= ETHER_HEADER_LEN || self.min_frame > self.max_frame {
            bail!(
                "min_frame must be above {ETHER_HEADER_LEN} and not exceed max_frame"
            );
        }
        if self.max_frame > MAX_ETHER_FRAME {
            bail!("max_frame must not exceed {MAX_ETHER_FRAME}");
        }
        Ok(())
    }

    /// Adapters on the simulated tap, NDISWAN included
    pub fn adapter_count(&self) -> usize {
        self.adapters + WAN_ADAPTERS.len()
    }
}

/// Build a tap with `ethernet` simulated Ethernet adapters plus the NDISWAN ones
pub fn build_tap(ethernet: usize) -> Arc<MemoryTap> {
    let tap = MemoryTap::new();
    for index in 0..ethernet {
        let raw = format!("\\DEVICE\\{{SIM-ETH-{index:04}}}");
        tap.add_adapter(raw.as_str(), simulated_mac(index), 1500);
        tap.set_friendly_name(raw, format!("Simulated Ethernet {}", index + 1));
    }
    for (index, raw) in WAN_ADAPTERS.iter().enumerate() {
        tap.add_adapter(*raw, simulated_mac(0x80 + index), 1480);
    }
    // Reports read the delivery counters, frames are never inspected
    tap.set_frame_log_limit(0);
    Arc::new(tap)
}

fn simulated_mac(index: usize) -> [u8; 6] {
    let [hi, lo] = (index as u16).to_be_bytes();
    [0x02, 0x70, 0x6b, 0x71, hi, lo]
}

/// Random frame generator
pub struct Traffic {
    rng: StdRng,
    outbound_ratio: f64,
    min_frame: usize,
    max_frame: usize,
    host: [u8; 6],
}

impl Traffic {
    /// Generator for the given settings, sending from `host`
    pub fn new(config: &SimulationConfig, host: [u8; 6]) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            outbound_ratio: config.outbound_ratio,
            min_frame: config.min_frame,
            max_frame: config.max_frame,
            host,
        }
    }

    /// Next frame and the direction it travels
    pub fn next_frame(&mut self) -> (Direction, Vec<u8>) {
        let direction = if self.rng.gen_bool(self.outbound_ratio) {
            Direction::Outbound
        } else {
            Direction::Inbound
        };

        let len = self.rng.gen_range(self.min_frame..=self.max_frame);
        let mut frame = vec![0u8; len];
        let peer = [0x02, 0x00, 0x5e, 0x00, 0x53, self.rng.gen()];
        let (dst, src) = match direction {
            Direction::Outbound => (peer, self.host),
            Direction::Inbound => (self.host, peer),
        };
        frame[..6].copy_from_slice(&dst);
        frame[6..12].copy_from_slice(&src);
        frame[12..ETHER_HEADER_LEN].copy_from_slice(&ETHERTYPE_IPV4);
        self.rng.fill(&mut frame[ETHER_HEADER_LEN..]);

        (direction, frame)
    }
}
