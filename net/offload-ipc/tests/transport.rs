mod common;

use std::sync::Arc;

use common::{harness, pattern, Recorder};
use offload_ipc::{
    AckTimeoutPolicy, Channel, ChannelFlags, ChannelManager, CrossCoreRef, Error, FlowStatus,
    HeapWindow, Platform, SlotState, TransportConfig, WireMessage,
};
use soc_hal::{Coherent, Doorbell, SpinDelay};

fn quick_timeouts(policy: AckTimeoutPolicy) -> TransportConfig {
    TransportConfig {
        ack_poll_limit: 50,
        ack_poll_interval_us: 1,
        ack_timeout_policy: policy,
        ..TransportConfig::default()
    }
}

#[test]
fn stalled_worker_seventeen_packets() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;

    for seq in 0..15 {
        host.submit_outgoing(1, &[&pattern(seq, 60)]).unwrap();
        assert_eq!(host.mailbox().observe_ack(), Some(FlowStatus::Ok));
    }
    host.submit_outgoing(1, &[&pattern(15, 60)]).unwrap();
    assert_eq!(device.queue().free_count(), 4);
    assert_eq!(host.mailbox().observe_ack(), Some(FlowStatus::QueueLow));

    assert_eq!(host.submit_outgoing(1, &[&pattern(16, 60)]), Err(Error::Backpressure));
    assert!(host.flags().contains(ChannelFlags::TX_STALLED));
    assert_eq!(device.queue().in_use_count(), 16);
    assert_eq!(host.buffer_usage().in_peer_use, 16);

    // worker resumes
    assert_eq!(device.run_dispatch(), 16);
    assert_eq!(device.queue().free_count(), 20);
    assert_eq!(host.buffer_usage().in_peer_use, 0);

    // the pending ack still says QueueLow; the sender backs off once
    host.submit_outgoing(1, &[&pattern(16, 60)]).unwrap();
    assert_eq!(host.mailbox().peer_flow(), FlowStatus::QueueLow);
    assert!(host.flags().contains(ChannelFlags::PEER_QUEUE_LOW));
    assert_eq!(host.mailbox().observe_ack(), Some(FlowStatus::Ok));

    host.submit_outgoing(1, &[&pattern(17, 60)]).unwrap();
    assert_eq!(host.mailbox().peer_flow(), FlowStatus::Ok);
    assert!(!host.flags().contains(ChannelFlags::PEER_QUEUE_LOW));
    device.run_dispatch();

    let delivered = h.device_stack.packets();
    assert_eq!(delivered.len(), 18);
    for (seq, (channel, bytes)) in delivered.iter().enumerate() {
        assert_eq!(*channel, 1);
        assert_eq!(*bytes, pattern(seq, 60));
    }
    assert_eq!(host.stats().snapshot().queue_low_backoffs, 1);
    assert_eq!(device.stats().snapshot().queue_low_acks, 1);
}

#[test]
fn inactive_interface_frees_send_slot_without_queueing() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;
    assert!(!device.is_interface_active(3));

    assert_eq!(host.submit_outgoing(3, &[b"dropped"]), Ok(()));
    assert_eq!(device.queue().in_use_count(), 0);
    assert_eq!(host.buffer_usage().in_peer_use, 0);
    assert_eq!(host.mailbox().state(), SlotState::Acknowledged);
    assert_eq!(device.stats().snapshot().inactive_discards, 1);
    assert_eq!(h.device_stack.count(), 0);
}

#[test]
fn inactive_interface_on_host_still_releases() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;
    device.set_interface_active(3, true);

    device.submit_outgoing(3, &[b"nobody listens"]).unwrap();
    assert_eq!(device.buffer_usage().in_peer_use, 1);
    host.run_dispatch();
    device.run_dispatch();

    assert_eq!(device.buffer_usage().in_peer_use, 0);
    assert_eq!(h.host_stack.count(), 0);
    let snap = host.stats().snapshot();
    assert_eq!(snap.inactive_discards, 1);
    assert_eq!(snap.releases_sent, 1);
}

#[test]
fn device_to_host_round_trip() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;

    for seq in 0..5 {
        device
            .submit_outgoing(1, &[&pattern(seq, 14), &pattern(seq + 100, 300)])
            .unwrap();
    }
    assert_eq!(device.buffer_usage().in_peer_use, 5);
    assert_eq!(host.run_dispatch(), 5);
    assert_eq!(device.run_dispatch(), 5);
    assert_eq!(device.buffer_usage().in_peer_use, 0);

    let delivered = h.host_stack.packets();
    for (seq, (_, bytes)) in delivered.iter().enumerate() {
        let mut expected = pattern(seq, 14);
        expected.extend(pattern(seq + 100, 300));
        assert_eq!(*bytes, expected);
    }
    assert_eq!(host.stats().snapshot().releases_sent, 5);
}

#[test]
fn payload_survives_every_size() {
    let config = TransportConfig {
        buffer_size: 96,
        ..TransportConfig::default()
    };
    let h = harness(config);
    let host = &h.pair.host;
    let device = &h.pair.device;

    for len in 1..=96 {
        let payload = pattern(len, len);
        let (head, tail) = payload.split_at(len / 3);
        host.submit_outgoing(1, &[head, tail]).unwrap();
        device.run_dispatch();
        device.submit_outgoing(1, &[&payload]).unwrap();
        host.run_dispatch();
        device.run_dispatch();
    }

    let to_device = h.device_stack.packets();
    let to_host = h.host_stack.packets();
    assert_eq!(to_device.len(), 96);
    for (i, ((_, a), (_, b))) in to_device.iter().zip(to_host.iter()).enumerate() {
        let len = i + 1;
        assert_eq!(*a, pattern(len, len));
        assert_eq!(*b, pattern(len, len));
    }
    assert_eq!(
        host.submit_outgoing(1, &[&[0u8; 97]]),
        Err(Error::PayloadTooLarge { len: 97, capacity: 96 })
    );
}

#[test]
fn duplicate_release_frees_once() {
    let config = TransportConfig {
        receive_pool_depth: 2,
        ..TransportConfig::default()
    };
    let h = harness(config);
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.pair.mute_device_doorbell(true);
    device.submit_outgoing(1, &[b"once"]).unwrap();
    h.pair.mute_device_doorbell(false);
    let lent = host.on_doorbell().unwrap();
    assert_eq!(lent.event(), offload_ipc::EventKind::ReceivePackets);

    host.run_dispatch();
    device.run_dispatch();
    assert_eq!(device.buffer_usage().in_peer_use, 0);

    // both buffers go out again before the stale release arrives
    device.submit_outgoing(1, &[b"a"]).unwrap();
    device.submit_outgoing(1, &[b"b"]).unwrap();
    assert_eq!(device.buffer_usage().in_peer_use, 2);
    assert_eq!(device.submit_outgoing(1, &[b"c"]), Err(Error::Backpressure));

    // References carry no generation, so a stale release frees the buffer
    // it now names. A second copy must not free anything more.
    host.send_message(WireMessage::released(lent.buffer_ref(), 1)).unwrap();
    device.run_dispatch();
    host.send_message(WireMessage::released(lent.buffer_ref(), 1)).unwrap();
    device.run_dispatch();

    let snap = device.stats().snapshot();
    assert_eq!(snap.duplicate_releases, 1);
    assert_eq!(device.buffer_usage().in_peer_use, 1);
}

#[test]
fn release_after_release_is_counted_not_freed() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.pair.mute_device_doorbell(true);
    device.submit_outgoing(1, &[b"x"]).unwrap();
    h.pair.mute_device_doorbell(false);
    let lent = host.on_doorbell().unwrap();
    host.run_dispatch();
    device.run_dispatch();

    for _ in 0..3 {
        host.send_message(WireMessage::released(lent.buffer_ref(), 1)).unwrap();
    }
    device.run_dispatch();

    assert_eq!(device.stats().snapshot().duplicate_releases, 3);
    assert_eq!(device.buffer_usage().in_peer_use, 0);
    for _ in 0..16 {
        device.submit_outgoing(1, &[b"y"]).unwrap();
    }
    assert_eq!(device.submit_outgoing(1, &[b"z"]), Err(Error::Backpressure));
}

#[test]
fn unacknowledged_send_is_rejected() {
    let h = harness(quick_timeouts(AckTimeoutPolicy::Reject));
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.pair.mute_host_doorbell(true);
    host.submit_outgoing(1, &[b"first"]).unwrap();
    assert_eq!(host.mailbox().state(), SlotState::Posted);
    assert_eq!(host.submit_outgoing(1, &[b"second"]), Err(Error::Backpressure));

    let snap = host.stats().snapshot();
    assert_eq!(snap.ack_timeouts, 1);
    assert_eq!(snap.tx_backpressure, 1);
    assert_eq!(snap.messages_sent, 1);
    assert_eq!(host.buffer_usage().in_peer_use, 1);

    // the peer wakes up and finds the first message intact
    h.pair.mute_host_doorbell(false);
    device.on_doorbell();
    device.run_dispatch();
    assert_eq!(h.device_stack.packets(), vec![(1, b"first".to_vec())]);
    assert_eq!(host.buffer_usage().in_peer_use, 0);
    host.submit_outgoing(1, &[b"third"]).unwrap();
}

#[test]
fn force_post_overwrites_and_leaks_the_slot() {
    let h = harness(quick_timeouts(AckTimeoutPolicy::ForcePost));
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.pair.mute_host_doorbell(true);
    host.submit_outgoing(1, &[b"first"]).unwrap();
    assert_eq!(host.submit_outgoing(1, &[b"second"]), Ok(()));
    h.pair.mute_host_doorbell(false);

    device.on_doorbell();
    device.run_dispatch();
    assert_eq!(h.device_stack.packets(), vec![(1, b"second".to_vec())]);

    let snap = host.stats().snapshot();
    assert_eq!(snap.ack_timeouts, 1);
    assert_eq!(snap.forced_posts, 1);
    // the overwritten message's slot is never released
    assert_eq!(host.buffer_usage().in_peer_use, 1);
}

#[test]
fn device_memory_shortage_reaches_host() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.device_stack.set_out_of_memory(true);
    host.submit_outgoing(1, &[b"lost"]).unwrap();
    device.run_dispatch();
    assert_eq!(host.buffer_usage().in_peer_use, 0);

    host.run_dispatch();
    assert!(host.flags().contains(ChannelFlags::PEER_MEMORY_SHORT));
    assert_eq!(host.stats().snapshot().memory_shortages, 1);
    let snap = device.stats().snapshot();
    assert_eq!(snap.native_alloc_failures, 1);
    assert_eq!(snap.memory_shortages, 1);

    h.device_stack.set_out_of_memory(false);
    host.submit_outgoing(1, &[b"kept"]).unwrap();
    assert!(!host.flags().contains(ChannelFlags::PEER_MEMORY_SHORT));
    device.run_dispatch();
    assert_eq!(h.device_stack.packets(), vec![(1, b"kept".to_vec())]);
}

#[test]
fn host_memory_shortage_still_releases() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.host_stack.set_out_of_memory(true);
    device.submit_outgoing(1, &[b"frame"]).unwrap();
    host.run_dispatch();
    device.run_dispatch();

    assert_eq!(h.host_stack.count(), 0);
    assert_eq!(device.buffer_usage().in_peer_use, 0);
    assert_eq!(host.stats().snapshot().native_alloc_failures, 1);
}

#[test]
fn transmit_ready_after_backpressure() {
    let config = TransportConfig {
        send_pool_depth: 2,
        ..TransportConfig::default()
    };
    let h = harness(config);
    let host = &h.pair.host;
    let device = &h.pair.device;
    h.pair.set_interface_active(2, true);

    host.submit_outgoing(1, &[b"a"]).unwrap();
    host.submit_outgoing(2, &[b"b"]).unwrap();
    assert_eq!(host.submit_outgoing(2, &[b"c"]), Err(Error::Backpressure));
    host.poll_transmit_capacity();
    assert!(h.host_stack.ready.lock().is_empty());

    device.run_dispatch();
    host.poll_transmit_capacity();
    assert_eq!(*h.host_stack.ready.lock(), vec![2]);
    assert!(!host.flags().contains(ChannelFlags::TX_STALLED));

    host.poll_transmit_capacity();
    assert_eq!(h.host_stack.ready.lock().len(), 1);
}

#[test]
fn deferred_sends_wait_for_the_dispatch_task() {
    let config = TransportConfig {
        send_dispatch_depth: 2,
        ..TransportConfig::default()
    };
    let h = harness(config);
    let host = &h.pair.host;
    let device = &h.pair.device;

    device.defer_outgoing(1, &[b"one"]).unwrap();
    device.defer_outgoing(1, &[b"two"]).unwrap();
    assert_eq!(device.defer_outgoing(1, &[b"three"]), Err(Error::Backpressure));
    assert_eq!(device.buffer_usage().in_peer_use, 2);
    assert_eq!(host.queue().in_use_count(), 0);

    assert_eq!(device.run_send_dispatch(), 2);
    host.run_dispatch();
    device.run_dispatch();
    assert_eq!(
        h.host_stack.packets(),
        vec![(1, b"one".to_vec()), (1, b"two".to_vec())]
    );
    assert_eq!(device.buffer_usage().in_peer_use, 0);
}

#[test]
fn device_queue_overflow_frees_the_send_slot() {
    let config = TransportConfig {
        queue_depth: 4,
        queue_warning: 1,
        send_pool_depth: 8,
        ..TransportConfig::default()
    };
    let h = harness(config);
    let host = &h.pair.host;
    let device = &h.pair.device;

    // device worker stalled: the fifth transmit finds no queue node
    for seq in 0..5 {
        host.submit_outgoing(1, &[&pattern(seq, 40)]).unwrap();
    }
    assert_eq!(device.stats().snapshot().queue_drops, 1);
    assert_eq!(host.buffer_usage().in_peer_use, 4);

    assert_eq!(device.run_dispatch(), 4);
    assert_eq!(host.buffer_usage().in_peer_use, 0);

    // the cursor comes round to the dropped packet's slot more than once
    for seq in 5..25 {
        host.submit_outgoing(1, &[&pattern(seq, 40)]).unwrap();
        device.run_dispatch();
    }
    let delivered: Vec<Vec<u8>> = h.device_stack.packets().into_iter().map(|(_, bytes)| bytes).collect();
    let expected: Vec<Vec<u8>> = (0..25).filter(|&seq| seq != 4).map(|seq| pattern(seq, 40)).collect();
    assert_eq!(delivered, expected);
}

#[test]
fn host_queue_overflow_still_returns_receive_buffers() {
    let config = TransportConfig {
        queue_depth: 2,
        queue_warning: 1,
        ..TransportConfig::default()
    };
    let h = harness(config);
    let host = &h.pair.host;
    let device = &h.pair.device;

    for seq in 0..4 {
        device.submit_outgoing(1, &[&pattern(seq, 50)]).unwrap();
    }
    assert_eq!(host.stats().snapshot().queue_drops, 2);
    assert_eq!(device.buffer_usage().in_peer_use, 4);

    assert_eq!(host.run_dispatch(), 2);
    // the releases for the dropped packets were parked from the interrupt
    assert_eq!(host.run_send_dispatch(), 2);
    device.run_dispatch();

    assert_eq!(device.buffer_usage().in_peer_use, 0);
    assert_eq!(
        h.host_stack.packets(),
        vec![(1, pattern(0, 50)), (1, pattern(1, 50))]
    );
    let snap = host.stats().snapshot();
    assert_eq!(snap.releases_sent, 4);
    assert_eq!(snap.release_failures, 0);
    // the device queue is just as small, so two releases were freed in its
    // interrupt handler instead of queued
    assert_eq!(device.stats().snapshot().queue_drops, 2);
    assert_eq!(device.stats().snapshot().duplicate_releases, 0);
}

/// Overwrite the payload length recorded in the header `r` points at
fn corrupt_length(r: CrossCoreRef) {
    // header words: state, len, channel_index
    unsafe { ((r.to_raw() + 4) as *mut u32).write_volatile(u32::MAX) };
}

#[test]
fn corrupt_receive_length_still_releases() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.pair.mute_device_doorbell(true);
    device.submit_outgoing(1, &[b"mangled"]).unwrap();
    h.pair.mute_device_doorbell(false);
    let lent = host.on_doorbell().unwrap();
    corrupt_length(lent.buffer_ref());

    host.run_dispatch();
    device.run_dispatch();
    assert_eq!(h.host_stack.count(), 0);
    assert_eq!(device.buffer_usage().in_peer_use, 0);
    assert_eq!(host.stats().snapshot().releases_sent, 1);
}

#[test]
fn corrupt_transmit_length_still_frees_the_slot() {
    let h = harness(TransportConfig::default());
    let host = &h.pair.host;
    let device = &h.pair.device;

    h.pair.mute_host_doorbell(true);
    host.submit_outgoing(1, &[b"mangled"]).unwrap();
    h.pair.mute_host_doorbell(false);
    let sent = device.on_doorbell().unwrap();
    corrupt_length(sent.buffer_ref());

    device.run_dispatch();
    assert_eq!(h.device_stack.count(), 0);
    assert_eq!(host.buffer_usage().in_peer_use, 0);

    host.submit_outgoing(1, &[b"intact"]).unwrap();
    device.run_dispatch();
    assert_eq!(h.device_stack.packets(), vec![(1, b"intact".to_vec())]);
}

#[test]
fn shutdown_gives_back_parked_buffers() {
    let h = harness(TransportConfig::default());
    let device = &h.pair.device;

    device.defer_outgoing(1, &[b"parked"]).unwrap();
    device.shutdown();
    assert_eq!(device.buffer_usage().in_peer_use, 0);
    assert!(!device.flags().contains(ChannelFlags::UP));
    assert_eq!(device.submit_outgoing(1, &[b"late"]), Err(Error::NotInitialized));

    device.init().unwrap();
    assert_eq!(device.init(), Err(Error::AlreadyInitialized));
}

struct SilentDoorbell;

impl Doorbell for SilentDoorbell {
    fn ring(&self) {}
}

fn standalone(id: u8) -> Channel {
    let config = TransportConfig::default();
    let platform = Platform {
        cache: Arc::new(Coherent::new(32)),
        doorbell: Arc::new(SilentDoorbell),
        delay: Arc::new(SpinDelay::new(1)),
    };
    let window = HeapWindow::for_config(&config, 32).unwrap();
    Channel::host(id, window, config, platform, Arc::new(Recorder::default())).unwrap()
}

#[test]
fn manager_lifecycle() {
    let manager = ChannelManager::new();
    manager.register(standalone(0)).unwrap();
    manager.register(standalone(1)).unwrap();
    assert_eq!(manager.register(standalone(1)).err(), Some(Error::AlreadyInitialized));
    assert_eq!(manager.len(), 2);

    assert_eq!(manager.submit_outgoing(0, 1, &[b"early"]), Err(Error::NotInitialized));
    manager.init_all().unwrap();
    manager.init_all().unwrap();
    assert_eq!(manager.submit_outgoing(0, 1, &[b"ok"]), Ok(()));
    assert_eq!(manager.submit_outgoing(7, 1, &[b"nowhere"]), Err(Error::NotInitialized));

    manager.shutdown(1).unwrap();
    assert!(!manager.get(1).unwrap().flags().contains(ChannelFlags::UP));
    assert!(manager.get(0).unwrap().flags().contains(ChannelFlags::UP));

    manager.shutdown_all();
    assert!(manager.unregister(0).is_some());
    assert!(manager.get(0).is_none());
    assert_eq!(manager.shutdown(0), Err(Error::NotInitialized));
}

#[test]
fn undersized_window_is_rejected() {
    let config = TransportConfig::default();
    let platform = Platform {
        cache: Arc::new(Coherent::new(32)),
        doorbell: Arc::new(SilentDoorbell),
        delay: Arc::new(SpinDelay::new(1)),
    };
    let window = HeapWindow::allocate(4096, 32).unwrap();
    let result = Channel::device(0, window, config, platform, Arc::new(Recorder::default()));
    assert_eq!(
        result.err(),
        Some(Error::Hal(soc_hal::Error::OutOfRange))
    );
}
