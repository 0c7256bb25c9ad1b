//! Ownership handoff between producers and consumers through a hub

mod common;

use bufhub_core::{
    BufferParams, Consumer, Error, Fence, Hub, PixelFormat, Producer, Readiness, Rect, Usage,
};
use std::time::Duration;

const NOW: Option<Duration> = Some(Duration::ZERO);

fn image_producer(hub: &Hub, metadata_size: usize) -> Producer {
    let params = BufferParams::new(64, 64, PixelFormat::Rgba8888, Usage::CPU_READ_OFTEN | Usage::CPU_WRITE_OFTEN)
        .with_metadata_size(metadata_size);
    let producer = Producer::create(&hub.client(), params);
    assert!(!producer.is_closed(), "{:?}", producer.error());
    producer
}

#[test]
fn test_blob_round_trip() {
    let hub = Hub::new();
    let mut producer = Producer::create_uncached_blob(&hub.client(), 4096);
    assert!(!producer.is_closed(), "{:?}", producer.error());
    let mut consumer = producer.create_consumer_buffer();
    assert!(!consumer.is_closed(), "{:?}", consumer.error());
    assert_eq!(consumer.id(), producer.id());

    {
        let mut guard = producer.lock(Usage::CPU_WRITE_RARELY, Rect::full(4096, 1), 0).unwrap();
        guard.as_mut_slice().unwrap().fill(0xAB);
    }
    producer.post(&Fence::empty(), &[]).unwrap();

    let fence = consumer.acquire(&mut []).unwrap();
    assert_eq!(fence.wait(NOW).unwrap(), Readiness::Ready);
    {
        let guard = consumer.lock(Usage::CPU_READ_RARELY, Rect::full(4096, 1), 0).unwrap();
        assert_eq!(guard.len(), 4096);
        assert!(guard.as_slice().iter().all(|&b| b == 0xAB));
    }
    consumer.release(&Fence::empty()).unwrap();

    producer.gain().unwrap();
}

#[test]
fn test_metadata_reaches_every_consumer() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 16);
    let mut first = producer.create_consumer_buffer();
    let mut second = first.create_consumer_buffer();
    assert!(!second.is_closed(), "{:?}", second.error());

    let metadata: Vec<u8> = (0..16).collect();
    producer.post(&Fence::empty(), &metadata).unwrap();

    for consumer in [&mut first, &mut second] {
        let mut received = [0u8; 16];
        consumer.acquire(&mut received).unwrap();
        assert_eq!(&received[..], &metadata[..]);
    }

    first.release(&Fence::empty()).unwrap();
    assert!(matches!(producer.gain(), Err(Error::Busy(_))));
    second.release(&Fence::empty()).unwrap();
    producer.gain().unwrap();
}

#[test]
fn test_size_mismatch_changes_nothing() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 8);
    let mut consumer = producer.create_consumer_buffer();

    let err = producer.post(&Fence::empty(), &[0; 4]).unwrap_err();
    assert_eq!(err, Error::SizeMismatch { expected: 8, actual: 4 });
    // Still gained: nothing is pending for the consumer.
    assert!(matches!(consumer.acquire(&mut [0; 8]), Err(Error::InvalidState(_))));

    producer.post(&Fence::empty(), &[1; 8]).unwrap();
    let err = consumer.acquire(&mut [0; 9]).unwrap_err();
    assert_eq!(err, Error::SizeMismatch { expected: 8, actual: 9 });
    // The post is still pending after the rejected acquire.
    let mut metadata = [0u8; 8];
    consumer.acquire(&mut metadata).unwrap();
    assert_eq!(metadata, [1; 8]);
}

#[test]
fn test_gain_blocked_until_release() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    // Pending but not yet acquired still holds the buffer.
    assert!(matches!(producer.gain(), Err(Error::Busy(_))));

    consumer.acquire_fence().unwrap();
    assert!(matches!(producer.gain(), Err(Error::Busy(_))));

    consumer.release(&Fence::empty()).unwrap();
    producer.gain().unwrap();
}

#[test]
fn test_ignoring_consumer_does_not_block() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    consumer.set_ignore(true).unwrap();
    producer.post(&Fence::empty(), &[]).unwrap();
    assert!(matches!(consumer.acquire_fence(), Err(Error::InvalidState(_))));
    producer.gain().unwrap();

    consumer.set_ignore(false).unwrap();
    producer.post(&Fence::empty(), &[]).unwrap();
    assert!(matches!(producer.gain(), Err(Error::Busy(_))));
    consumer.acquire_fence().unwrap();
    consumer.release(&Fence::empty()).unwrap();
    producer.gain().unwrap();
}

#[test]
fn test_ignore_while_acquired_releases() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    consumer.acquire_fence().unwrap();
    consumer.set_ignore(true).unwrap();
    producer.gain().unwrap();
}

#[test]
fn test_out_of_order_calls_are_rejected_by_the_service() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    assert!(matches!(producer.gain(), Err(Error::InvalidState(_))));
    assert!(matches!(consumer.acquire_fence(), Err(Error::InvalidState(_))));
    assert!(matches!(consumer.release(&Fence::empty()), Err(Error::InvalidState(_))));

    producer.post(&Fence::empty(), &[]).unwrap();
    assert!(matches!(producer.post(&Fence::empty(), &[]), Err(Error::InvalidState(_))));

    consumer.acquire_fence().unwrap();
    assert!(matches!(consumer.acquire_fence(), Err(Error::InvalidState(_))));

    // Protocol errors never close the objects.
    assert!(!producer.is_closed());
    assert!(!consumer.is_closed());
}

#[test]
fn test_fences_travel_with_ownership() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    let (write_done, write_signal) = Fence::pending().unwrap();
    producer.post(&write_done, &[]).unwrap();
    // Posting only lent the fence.
    assert!(write_done.is_valid());

    let acquire_fence = consumer.acquire_fence().unwrap();
    assert!(acquire_fence.is_valid());
    assert_eq!(acquire_fence.wait(NOW).unwrap(), Readiness::TimedOut);
    write_signal.signal().unwrap();
    assert_eq!(acquire_fence.wait(NOW).unwrap(), Readiness::Ready);

    let (read_done, read_signal) = Fence::pending().unwrap();
    consumer.release(&read_done).unwrap();

    let release_fence = producer.gain().unwrap();
    assert!(release_fence.is_valid());
    assert_eq!(release_fence.wait(NOW).unwrap(), Readiness::TimedOut);
    read_signal.signal().unwrap();
    assert_eq!(release_fence.wait(None).unwrap(), Readiness::Ready);
}

#[test]
fn test_gain_waits_for_every_consumer_release() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut slow = producer.create_consumer_buffer();
    let mut fast = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    slow.acquire_fence().unwrap();
    fast.acquire_fence().unwrap();

    let (slow_done, slow_signal) = Fence::pending().unwrap();
    let (fast_done, fast_signal) = Fence::pending().unwrap();
    slow.release(&slow_done).unwrap();
    fast.release(&fast_done).unwrap();
    fast_signal.signal().unwrap();

    let release_fence = producer.gain().unwrap();
    assert_eq!(release_fence.handle_count(), 2);
    // The first reader is still busy.
    assert_eq!(release_fence.wait(NOW).unwrap(), Readiness::TimedOut);
    slow_signal.signal().unwrap();
    assert_eq!(release_fence.wait(NOW).unwrap(), Readiness::Ready);
}

#[test]
fn test_release_fences_do_not_leak_into_next_cycle() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    consumer.acquire_fence().unwrap();
    let (read_done, _read_signal) = Fence::pending().unwrap();
    consumer.release(&read_done).unwrap();
    assert!(producer.gain().unwrap().is_valid());

    producer.post(&Fence::empty(), &[]).unwrap();
    consumer.acquire_fence().unwrap();
    consumer.discard().unwrap();
    assert!(!producer.gain().unwrap().is_valid());
}

#[test]
fn test_discarded_release_yields_empty_fence() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    consumer.acquire_fence().unwrap();
    consumer.discard().unwrap();

    let fence = producer.gain().unwrap();
    assert!(!fence.is_valid());
}

#[test]
fn test_readiness_follows_transitions() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    assert_eq!(consumer.poll(NOW).unwrap(), Readiness::TimedOut);
    assert_eq!(producer.poll(NOW).unwrap(), Readiness::TimedOut);

    producer.post(&Fence::empty(), &[]).unwrap();
    assert_eq!(consumer.poll(NOW).unwrap(), Readiness::Ready);
    assert_eq!(producer.poll(NOW).unwrap(), Readiness::TimedOut);

    consumer.acquire_fence().unwrap();
    assert_eq!(consumer.poll(NOW).unwrap(), Readiness::TimedOut);

    consumer.release(&Fence::empty()).unwrap();
    assert_eq!(producer.poll(NOW).unwrap(), Readiness::Ready);

    producer.gain().unwrap();
    assert_eq!(producer.poll(Some(Duration::from_millis(5))).unwrap(), Readiness::TimedOut);
}

#[test]
fn test_async_variants() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    consumer.acquire_fence().unwrap();
    consumer.release_async().unwrap();
    producer.gain_async().unwrap();

    // The impulse went through: the producer owns the buffer again.
    producer.post(&Fence::empty(), &[]).unwrap();
}

#[test]
fn test_gain_async_failure_is_silent() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let _consumer = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    // Rejected by the service, but nobody waits for the answer.
    producer.gain_async().unwrap();
    assert!(matches!(producer.post(&Fence::empty(), &[]), Err(Error::InvalidState(_))));
}

#[test]
fn test_dropping_consumer_releases_it() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();

    producer.post(&Fence::empty(), &[]).unwrap();
    consumer.acquire_fence().unwrap();
    drop(consumer);

    assert_eq!(producer.poll(NOW).unwrap(), Readiness::Ready);
    producer.gain().unwrap();
}

#[test]
fn test_consumer_created_after_post_is_pending() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    producer.post(&Fence::empty(), &[]).unwrap();

    let mut late: Consumer = producer.create_consumer_buffer();
    assert_eq!(late.poll(NOW).unwrap(), Readiness::Ready);
    assert!(matches!(producer.gain(), Err(Error::Busy(_))));
    late.acquire_fence().unwrap();
    late.release(&Fence::empty()).unwrap();
    producer.gain().unwrap();
}

#[test]
fn test_abandoned_buffer_reports_peer_gone() {
    let hub = Hub::new();
    let mut producer = image_producer(&hub, 0);
    let mut consumer = producer.create_consumer_buffer();
    producer.post(&Fence::empty(), &[]).unwrap();
    drop(producer);

    assert_eq!(consumer.poll(NOW).unwrap(), Readiness::Ready);
    assert_eq!(consumer.acquire_fence().unwrap_err(), Error::PeerGone);
    assert_eq!(consumer.create_consumer_buffer().error(), Some(&Error::PeerGone));

    drop(consumer);
    assert_eq!(hub.buffer_count(), 0);
}
