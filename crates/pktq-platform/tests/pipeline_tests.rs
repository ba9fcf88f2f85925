//! End-to-end tests running the queued packet filter over `MemoryTap`

use pktq_core::{
    AdapterHandle, AdapterMode, Direction, FilterConfig, FilterState, IntermediateBuffer,
    PassThrough, QueuedPacketFilter, TapDriver, Verdict,
};
use pktq_platform::{Injected, MemoryTap, Sink};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SETTLE: Duration = Duration::from_secs(5);

fn config(pool_size: usize, packets_per_block: usize) -> FilterConfig {
    FilterConfig {
        pool_size,
        packets_per_block,
        event_poll_interval_ms: 5,
        ..Default::default()
    }
}

fn tap() -> (Arc<MemoryTap>, AdapterHandle) {
    let tap = Arc::new(MemoryTap::new());
    let handle = tap.add_adapter("\\DEVICE\\{4D36E972-E325-11CE}", [0x02, 0, 0, 0, 0, 1], 1500);
    tap.set_friendly_name("\\DEVICE\\{4D36E972-E325-11CE}", "Ethernet 0");
    (tap, handle)
}

fn frame(seq: u8) -> Vec<u8> {
    let mut frame = vec![0u8; 64];
    frame[0] = seq;
    frame
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn pass(_: AdapterHandle, _: Direction, _: &mut IntermediateBuffer) -> Verdict {
    Verdict::Pass
}

fn drop_all(_: AdapterHandle, _: Direction, _: &mut IntermediateBuffer) -> Verdict {
    Verdict::Drop
}

fn redirect(_: AdapterHandle, _: Direction, _: &mut IntermediateBuffer) -> Verdict {
    Verdict::Redirect
}

#[test]
fn test_inbound_pass_outbound_drop() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .outbound(drop_all)
        .config(config(4, 8))
        .build()
        .unwrap();
    assert_eq!(filter.interface_names(), vec!["Ethernet 0"]);

    filter.start(0).unwrap();
    assert_eq!(filter.state(), FilterState::Running);

    for seq in 0..5 {
        assert_eq!(
            tap.inject(handle, Direction::Inbound, frame(seq)).unwrap(),
            Injected::Queued
        );
        assert_eq!(
            tap.inject(handle, Direction::Outbound, frame(100 + seq)).unwrap(),
            Injected::Queued
        );
    }

    assert!(tap.wait_for_deliveries(Sink::Stack, 5, SETTLE));
    assert!(wait_until(|| {
        let stats = filter.stats();
        stats.packets_dropped == 5 && stats.packets_to_stack == 5
    }));

    let stack = tap.deliveries(Sink::Stack);
    assert_eq!(stack.len(), 5);
    assert!(stack.iter().all(|d| !d.bypassed && d.direction == Direction::Inbound));
    assert_eq!(tap.delivered(Sink::Wire), 0);

    let stats = filter.stats();
    assert_eq!(stats.packets_captured, 10);
    assert_eq!(stats.packets_to_stack, 5);
    assert_eq!(stats.packets_to_wire, 0);
    assert_eq!(stats.packets_lost, 0);

    filter.stop().unwrap();
    filter.join();
    assert_eq!(filter.pool_census().total(), 4);
    assert_eq!(filter.release().unwrap(), 4);
    assert!(tap.get_adapter_mode(handle).unwrap().is_empty());
}

#[test]
fn test_capture_order_preserved() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(3, 4))
        .build()
        .unwrap();
    filter.start(0).unwrap();

    for seq in 0..40 {
        tap.inject(handle, Direction::Inbound, frame(seq)).unwrap();
    }
    assert!(tap.wait_for_deliveries(Sink::Stack, 40, SETTLE));

    let order: Vec<u8> = tap
        .deliveries(Sink::Stack)
        .iter()
        .map(|d| d.frame[0])
        .collect();
    assert_eq!(order, (0..40).collect::<Vec<u8>>());

    filter.stop().unwrap();
    filter.join();
    filter.release().unwrap();
}

#[test]
fn test_redirect_reverses_path() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(redirect)
        .outbound(redirect)
        .config(config(2, 8))
        .build()
        .unwrap();
    filter.start(0).unwrap();

    tap.inject(handle, Direction::Outbound, frame(1)).unwrap();
    tap.inject(handle, Direction::Inbound, frame(2)).unwrap();

    assert!(tap.wait_for_deliveries(Sink::Stack, 1, SETTLE));
    assert!(tap.wait_for_deliveries(Sink::Wire, 1, SETTLE));
    assert_eq!(tap.deliveries(Sink::Stack)[0].frame[0], 1);
    assert_eq!(tap.deliveries(Sink::Wire)[0].frame[0], 2);
    assert!(wait_until(|| filter.stats().packets_redirected == 2));

    filter.stop().unwrap();
    filter.join();
    filter.release().unwrap();
}

#[test]
fn test_untunnelled_direction_bypasses_filter() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .outbound(drop_all)
        .config(config(2, 8))
        .build()
        .unwrap();
    filter.start(0).unwrap();

    assert_eq!(
        tap.inject(handle, Direction::Inbound, frame(9)).unwrap(),
        Injected::Bypassed
    );
    let stack = tap.deliveries(Sink::Stack);
    assert_eq!(stack.len(), 1);
    assert!(stack[0].bypassed);

    filter.stop().unwrap();
    filter.join();
    filter.release().unwrap();
}

#[test]
fn test_supplied_pass_through_tunnels_direction() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(PassThrough)
        .config(config(2, 8))
        .build()
        .unwrap();
    filter.start(0).unwrap();
    assert_eq!(tap.get_adapter_mode(handle).unwrap(), AdapterMode::RECV_TUNNEL);

    assert_eq!(
        tap.inject(handle, Direction::Inbound, frame(3)).unwrap(),
        Injected::Queued
    );
    assert!(tap.wait_for_deliveries(Sink::Stack, 1, SETTLE));
    assert_eq!(tap.bypassed(Sink::Stack), 0);
    assert!(wait_until(|| filter.stats().packets_to_stack == 1));

    filter.stop().unwrap();
    filter.join();
    filter.release().unwrap();
}

/// Verdict encoded in the second byte of frames built by `tagged_frame`
fn by_tag(_: AdapterHandle, _: Direction, buffer: &mut IntermediateBuffer) -> Verdict {
    match buffer.data()[1] {
        0 => Verdict::Pass,
        1 => Verdict::Drop,
        _ => Verdict::Redirect,
    }
}

fn tagged_frame(tag: u8) -> Vec<u8> {
    let mut frame = frame(0);
    frame[1] = tag;
    frame
}

#[test]
fn test_random_verdicts_reach_expected_sinks() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(by_tag)
        .outbound(by_tag)
        .config(config(3, 8))
        .build()
        .unwrap();
    filter.start(0).unwrap();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (mut to_stack, mut to_wire, mut dropped) = (0, 0, 0u64);
    for _ in 0..300 {
        let outbound = rng.gen_bool(0.5);
        let tag = rng.gen_range(0..3u8);
        match (tag, outbound) {
            (1, _) => dropped += 1,
            (0, true) | (2, false) => to_wire += 1,
            _ => to_stack += 1,
        }
        let direction = if outbound {
            Direction::Outbound
        } else {
            Direction::Inbound
        };
        tap.inject(handle, direction, tagged_frame(tag)).unwrap();
    }

    assert!(tap.wait_for_deliveries(Sink::Stack, to_stack, SETTLE));
    assert!(tap.wait_for_deliveries(Sink::Wire, to_wire, SETTLE));
    assert!(wait_until(|| filter.stats().packets_dropped == dropped));

    filter.stop().unwrap();
    filter.join();
    assert_eq!(tap.delivered(Sink::Stack), to_stack);
    assert_eq!(tap.delivered(Sink::Wire), to_wire);
    assert_eq!(filter.stats().packets_captured, 300);
    filter.release().unwrap();
}

#[test]
fn test_pool_census_stable_under_stalled_stack() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(4, 4))
        .build()
        .unwrap();
    tap.stall(Sink::Stack);
    filter.start(0).unwrap();

    let injecting = AtomicBool::new(true);
    let injected = thread::scope(|s| {
        let feeder = s.spawn(|| {
            let mut sent = 0usize;
            while injecting.load(Ordering::SeqCst) {
                tap.inject(handle, Direction::Inbound, frame(sent as u8)).unwrap();
                sent += 1;
                thread::sleep(Duration::from_micros(200));
            }
            sent
        });

        // One block stuck in the stack send, the rest queued behind it
        assert!(wait_until(|| {
            let census = filter.pool_census();
            tap.waiting_senders(Sink::Stack) == 1 && census.stack == 3 && census.held == 1
        }));
        for _ in 0..50 {
            let census = filter.pool_census();
            assert_eq!(census.total(), 4);
            assert_eq!(census.queued(), 3);
            assert_eq!(census.capture, 0);
            thread::sleep(Duration::from_millis(1));
        }

        injecting.store(false, Ordering::SeqCst);
        feeder.join().unwrap()
    });

    tap.resume(Sink::Stack);
    assert!(tap.wait_for_deliveries(Sink::Stack, injected, SETTLE));

    filter.stop().unwrap();
    filter.join();
    assert_eq!(filter.pool_census().total(), 4);
    assert_eq!(filter.release().unwrap(), 4);
}

#[test]
fn test_stalled_wire_blocks_capture() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .outbound(pass)
        .config(config(2, 4))
        .build()
        .unwrap();
    tap.stall(Sink::Wire);

    // Three blocks' worth of traffic for a pool of two, queued before the
    // first wake-up so every read fills a whole block
    tap.set_adapter_mode(handle, AdapterMode::SENT_TUNNEL).unwrap();
    for seq in 0..12 {
        tap.inject(handle, Direction::Outbound, frame(seq)).unwrap();
    }
    filter.start(0).unwrap();

    assert!(wait_until(|| {
        tap.waiting_senders(Sink::Wire) == 1 && filter.stats().packets_captured == 8
    }));
    // Give capture a chance to misbehave
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(filter.stats().packets_captured, 8);
    assert_eq!(tap.pending(handle), 4);
    assert_eq!(tap.delivered(Sink::Wire), 0);
    let census = filter.pool_census();
    assert_eq!(census.capture, 0);
    assert_eq!(census.total(), 2);

    tap.resume(Sink::Wire);
    assert!(tap.wait_for_deliveries(Sink::Wire, 12, SETTLE));
    assert_eq!(tap.pending(handle), 0);

    filter.stop().unwrap();
    filter.join();
    assert_eq!(filter.pool_census().total(), 2);
    filter.release().unwrap();
}

#[test]
fn test_failed_batches_are_counted_not_retried() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(2, 8))
        .build()
        .unwrap();
    tap.fail_sends(Sink::Stack, 1);
    filter.start(0).unwrap();

    tap.inject(handle, Direction::Inbound, frame(1)).unwrap();
    assert!(wait_until(|| filter.stats().stack_send_failures == 1));

    tap.inject(handle, Direction::Inbound, frame(2)).unwrap();
    assert!(tap.wait_for_deliveries(Sink::Stack, 1, SETTLE));
    assert!(wait_until(|| filter.stats().packets_to_stack == 1));

    let stats = filter.stats();
    assert_eq!(stats.packets_lost, 1);
    assert_eq!(stats.packets_to_stack, 1);
    assert_eq!(tap.deliveries(Sink::Stack)[0].frame[0], 2);

    filter.stop().unwrap();
    filter.join();
    filter.release().unwrap();
}

#[test]
fn test_read_failure_recovers() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(2, 8))
        .build()
        .unwrap();
    tap.fail_reads(1);
    filter.start(0).unwrap();

    tap.inject(handle, Direction::Inbound, frame(1)).unwrap();
    assert!(wait_until(|| filter.stats().read_failures == 1));

    // The frame is still queued; the next arrival wakes capture for both
    tap.inject(handle, Direction::Inbound, frame(2)).unwrap();
    assert!(tap.wait_for_deliveries(Sink::Stack, 2, SETTLE));

    filter.stop().unwrap();
    filter.join();
    filter.release().unwrap();
}

#[test]
fn test_stop_twice_keeps_pool() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(4, 4))
        .build()
        .unwrap();
    filter.start(0).unwrap();
    for seq in 0..10 {
        tap.inject(handle, Direction::Inbound, frame(seq)).unwrap();
    }

    filter.stop().unwrap();
    assert!(filter.stop().unwrap_err().is_illegal_state());

    filter.join();
    let census = filter.pool_census();
    assert_eq!(census.total(), 4);
    assert_eq!(census.held, 0);
}

#[test]
fn test_restart_after_release() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(2, 4))
        .build()
        .unwrap();

    for round in 0..3u8 {
        filter.start(0).unwrap();
        tap.inject(handle, Direction::Inbound, frame(round)).unwrap();
        assert!(tap.wait_for_deliveries(Sink::Stack, usize::from(round) + 1, SETTLE));
        filter.stop().unwrap();
        filter.join();
        assert_eq!(filter.release().unwrap(), 2);
    }
}

#[test]
fn test_release_flushes_adapter_queue() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(1, 4))
        .build()
        .unwrap();
    tap.stall(Sink::Stack);
    tap.set_adapter_mode(handle, AdapterMode::RECV_TUNNEL).unwrap();
    for seq in 0..8 {
        tap.inject(handle, Direction::Inbound, frame(seq)).unwrap();
    }
    filter.start(0).unwrap();
    assert!(wait_until(|| tap.waiting_senders(Sink::Stack) == 1));
    assert_eq!(tap.pending(handle), 4);

    filter.stop().unwrap();
    tap.resume(Sink::Stack);
    filter.join();
    filter.release().unwrap();
    assert_eq!(tap.pending(handle), 0);
}

#[test]
fn test_reconfigure_picks_up_new_adapters() {
    let (tap, _) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone()).build().unwrap();
    assert_eq!(filter.interfaces().len(), 1);

    tap.add_adapter("\\DEVICE\\NDISWANIPV6", [0; 6], 1500);
    filter.reconfigure().unwrap();
    assert_eq!(
        filter.interface_names(),
        vec!["Ethernet 0", "WAN Network Interface (IPv6)"]
    );

    tap.fail_enumeration();
    assert!(filter.reconfigure().is_err());
    assert_eq!(filter.interfaces().len(), 2);
}

#[test]
fn test_manual_injection() {
    let (tap, handle) = tap();
    let filter = QueuedPacketFilter::builder(tap.clone())
        .inbound(pass)
        .config(config(1, 1))
        .build()
        .unwrap();
    filter.start(0).unwrap();

    let buffer = IntermediateBuffer::from_frame(Direction::Outbound, &frame(7)).unwrap();
    filter.insert_packet_to_wire(&buffer).unwrap();
    filter.insert_packet_to_stack(&buffer).unwrap();

    assert_eq!(tap.deliveries(Sink::Wire)[0].frame[0], 7);
    assert_eq!(tap.deliveries(Sink::Stack)[0].adapter, handle);

    filter.stop().unwrap();
    filter.join();
    filter.release().unwrap();
}
