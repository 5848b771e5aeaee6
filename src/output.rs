//! Where rendered blocks go.
//!
//! The render thread opens its [`OutputTarget`] once at startup and then
//! hands every block to the resulting [`OutputSink`]. Sinks never block: when
//! the consumer falls behind, the block is skipped rather than partially
//! written.

use alloc::boxed::Box;

use dasp_graph::Buffer;
use rtrb::{Consumer, Producer, RingBuffer};

#[cfg(feature = "cpal_sink")]
use crate::device::CpalDevice;
use crate::error::Result;

/// Consumer of rendered stereo blocks, owned by the render thread.
pub trait OutputSink {
    /// Write one block. Returns false if the block was dropped.
    fn write_block(&mut self, block: &[Buffer]) -> bool;

    fn channels(&self) -> usize;
}

/// Discards everything. Keeps the render loop running without a device.
#[derive(Debug, Default)]
pub struct NullOutput;

impl OutputSink for NullOutput {
    fn write_block(&mut self, _block: &[Buffer]) -> bool {
        true
    }

    fn channels(&self) -> usize {
        2
    }
}

/// Interleaves blocks into an rtrb ring buffer.
///
/// Useful for recording, analysis, and tests.
pub struct RingOutput {
    producer: Producer<f32>,
    channels: usize,
}

impl RingOutput {
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
        }
    }

    /// Free sample slots
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }
}

impl OutputSink for RingOutput {
    fn write_block(&mut self, block: &[Buffer]) -> bool {
        interleave(&mut self.producer, self.channels, block)
    }

    fn channels(&self) -> usize {
        self.channels
    }
}

fn interleave(producer: &mut Producer<f32>, channels: usize, block: &[Buffer]) -> bool {
    if block.is_empty() {
        return false;
    }
    let needed = Buffer::LEN * channels;
    // skip rather than partially write
    if producer.slots() < needed {
        return false;
    }
    for i in 0..Buffer::LEN {
        for ch in 0..channels {
            let src = ch.min(block.len() - 1);
            let _ = producer.push(block[src][i]);
        }
    }
    true
}

/// Output selection, resolved on the render thread.
pub enum OutputTarget {
    Null,
    Ring {
        producer: Producer<f32>,
        channels: usize,
    },
    #[cfg(feature = "cpal_sink")]
    Device(CpalDevice),
}

impl OutputTarget {
    /// A ring target of `capacity` samples plus the consumer end
    pub fn ring(capacity: usize, channels: usize) -> (Self, Consumer<f32>) {
        let (producer, consumer) = RingBuffer::new(capacity);
        (Self::Ring { producer, channels }, consumer)
    }

    /// The system default device, or [`OutputTarget::Null`] when there is none
    #[cfg(feature = "cpal_sink")]
    pub fn default_device() -> Self {
        CpalDevice::default_output().map_or(Self::Null, Self::Device)
    }

    #[cfg(not(feature = "cpal_sink"))]
    pub fn default_device() -> Self {
        Self::Null
    }

    /// Rate the render graph must run at, if the target dictates one
    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            #[cfg(feature = "cpal_sink")]
            Self::Device(device) => Some(device.sample_rate()),
            _ => None,
        }
    }

    pub(crate) fn open(self) -> Result<Box<dyn OutputSink>> {
        match self {
            Self::Null => Ok(Box::new(NullOutput)),
            Self::Ring { producer, channels } => Ok(Box::new(RingOutput::new(producer, channels))),
            #[cfg(feature = "cpal_sink")]
            Self::Device(device) => Ok(Box::new(cpal_output::CpalOutput::open(&device)?)),
        }
    }
}

impl core::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Ring { channels, .. } => {
                f.debug_struct("Ring").field("channels", channels).finish()
            }
            #[cfg(feature = "cpal_sink")]
            Self::Device(device) => f.debug_tuple("Device").field(device).finish(),
        }
    }
}

#[cfg(feature = "cpal_sink")]
mod cpal_output {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use dasp_graph::Buffer;
    use rtrb::{Consumer, Producer, RingBuffer};
    use tracing::{error, warn};

    use super::{interleave, OutputSink};
    use crate::device::CpalDevice;
    use crate::error::{Error, Result};

    /// Device output. The stream lives on the render thread that opened it.
    pub struct CpalOutput {
        buffer: Producer<f32>,
        channels: usize,
        had_underrun: Arc<AtomicBool>,
        _stream: cpal::Stream,
    }

    impl CpalOutput {
        pub fn open(device: &CpalDevice) -> Result<Self> {
            let channels = device.config.channels() as usize;
            let sample_format = device.config.sample_format();
            let stream_config = device.config.config();

            // ~100 ms of audio to absorb scheduling jitter
            let buffer_samples = ((stream_config.sample_rate.0 as f32 * 0.1) as usize) * channels;
            let (producer, consumer) =
                RingBuffer::<f32>::new(buffer_samples.next_power_of_two().max(8192));

            let had_underrun = Arc::new(AtomicBool::new(false));
            let stream = build_stream(
                &device.device,
                sample_format,
                &stream_config,
                consumer,
                had_underrun.clone(),
            )?;
            stream.play().map_err(|e| Error::AudioDevice(e.to_string()))?;

            Ok(Self {
                buffer: producer,
                channels,
                had_underrun,
                _stream: stream,
            })
        }
    }

    impl OutputSink for CpalOutput {
        fn write_block(&mut self, block: &[Buffer]) -> bool {
            if self.had_underrun.swap(false, Ordering::Relaxed) {
                warn!("audio device underrun");
            }
            interleave(&mut self.buffer, self.channels, block)
        }

        fn channels(&self) -> usize {
            self.channels
        }
    }

    fn build_stream(
        device: &cpal::Device,
        sample_format: SampleFormat,
        stream_config: &StreamConfig,
        mut consumer: Consumer<f32>,
        had_underrun: Arc<AtomicBool>,
    ) -> Result<cpal::Stream> {
        let on_error = |err: cpal::StreamError| error!(?err, "audio stream error");
        let stream = match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                stream_config,
                move |data: &mut [f32], _| {
                    fill(data, &mut consumer, &had_underrun, |s| s);
                },
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                stream_config,
                move |data: &mut [i16], _| {
                    fill(data, &mut consumer, &had_underrun, |s| {
                        (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                    });
                },
                on_error,
                None,
            ),
            SampleFormat::U16 => device.build_output_stream(
                stream_config,
                move |data: &mut [u16], _| {
                    fill(data, &mut consumer, &had_underrun, |s| {
                        ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
                    });
                },
                on_error,
                None,
            ),
            other => return Err(Error::AudioDevice(format!("unsupported sample format {other:?}"))),
        };
        stream.map_err(|e| Error::AudioDevice(e.to_string()))
    }

    #[inline]
    fn fill<T>(
        data: &mut [T],
        consumer: &mut Consumer<f32>,
        had_underrun: &AtomicBool,
        convert: impl Fn(f32) -> T,
    ) {
        let mut underrun = false;
        for sample in data.iter_mut() {
            let s = consumer.pop().unwrap_or_else(|_| {
                underrun = true;
                0.0
            });
            *sample = convert(s);
        }
        if underrun {
            had_underrun.store(true, Ordering::Relaxed);
        }
    }
}
