pub mod capture;
pub mod codec;
pub mod device;
pub mod output;
pub mod resample;
pub mod scheduler;

pub use capture::{CpalFrameSource, FrameAssembler, FrameSource, SyntheticFrameSource, SyntheticSignal};
pub use codec::{decode_chunk, encode_frame, from_wire, to_wire};
pub use device::{DeviceManager, Direction};
pub use output::{OutputHandle, OutputNode, Renderer};
pub use resample::LinearResampler;
pub use scheduler::{
    BufferId, ManualClock, NullSink, OutputClock, PlaybackScheduler, PlaybackSink,
    ScheduledPlayback, SystemClock,
};

use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a ring buffer split into producer and consumer halves.
pub fn create_ring_buffer(capacity: usize) -> (HeapProd<f32>, HeapCons<f32>) {
    HeapRb::<f32>::new(capacity).split()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::{Consumer, Producer};

    #[test]
    #[ignore] // Requires audio hardware
    fn test_device_enumeration() {
        let manager = DeviceManager::new();
        for direction in [Direction::Input, Direction::Output] {
            let names = manager.names(direction).unwrap();
            println!("{:?} devices: {}", direction, names.len());
            for name in &names {
                println!("  - {}", name);
            }
        }
    }

    #[test]
    fn test_ring_buffer_preserves_sample_order() {
        let (mut prod, mut cons) = create_ring_buffer(1024);
        let data = vec![0.5, -0.5, 0.25, -0.25];
        prod.push_slice(&data);

        let mut output = vec![0.0f32; 4];
        cons.pop_slice(&mut output);
        assert_eq!(output, data);
    }

    #[test]
    fn test_ring_buffer_rejects_overflow() {
        let (mut prod, _cons) = create_ring_buffer(4);
        assert_eq!(prod.push_slice(&[1.0, 2.0, 3.0, 4.0]), 4);
        assert_eq!(prod.push_slice(&[5.0, 6.0]), 0);
    }
}
