//! One producer, several consumers, frames handed around with fences.
//!
//! Run with: cargo run --package bufhub-core --example fanout

use bufhub_core::{BufferParams, Fence, Hub, PixelFormat, Producer, Usage};
use std::thread;

const FRAMES: u32 = 8;
const CONSUMERS: usize = 3;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let hub = Hub::new();
    let params = BufferParams::new(640, 480, PixelFormat::Rgba8888, Usage::CPU_READ_OFTEN | Usage::CPU_WRITE_OFTEN)
        .with_metadata_size(4);
    let mut producer = Producer::create(&hub.client(), params);
    if let Some(e) = producer.error() {
        return Err(e.clone().into());
    }

    let readers: Vec<_> = (0..CONSUMERS)
        .map(|n| {
            let mut consumer = producer.create_consumer_buffer();
            thread::spawn(move || -> bufhub_core::Result<()> {
                for _ in 0..FRAMES {
                    consumer.poll(None)?;
                    let mut metadata = [0u8; 4];
                    let fence = consumer.acquire(&mut metadata)?;
                    fence.wait(None)?;
                    let first = consumer.lock_all(Usage::CPU_READ_OFTEN, 0)?.as_slice()[0];
                    println!("consumer {} got frame {} (first byte {})", n, u32::from_le_bytes(metadata), first);
                    consumer.release(&Fence::empty())?;
                }
                Ok(())
            })
        })
        .collect();

    for frame in 0..FRAMES {
        if frame > 0 {
            producer.poll(None)?;
            producer.gain()?.wait(None)?;
        }
        producer
            .lock_all(Usage::CPU_WRITE_OFTEN, 0)?
            .as_mut_slice()?
            .fill(frame as u8);
        producer.post(&Fence::empty(), &frame.to_le_bytes())?;
    }

    for reader in readers {
        reader.join().expect("consumer thread panicked")?;
    }
    Ok(())
}
