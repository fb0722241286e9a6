use crate::config::VoiceFieldDesc;
use crate::error::{Result, VoiceFieldError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Render-thread side of the device buffer.
///
/// Blocks rendered by [`AudioManager::render_block`](crate::AudioManager::render_block)
/// are pushed here and drained by the device callback.
pub struct OutputFeed {
    producer: HeapProd<f32>,
    channels: usize,
}

impl OutputFeed {
    /// Queues interleaved samples, returning how many fit.
    pub fn push_block(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            log::debug!(
                "Output buffer full, dropped {} samples",
                samples.len() - written
            );
        }
        written
    }

    /// Frames that can be pushed without dropping anything.
    pub fn vacant_frames(&self) -> usize {
        self.producer.vacant_len() / self.channels
    }

    pub fn buffered_frames(&self) -> usize {
        self.producer.occupied_len() / self.channels
    }
}

/// Plays rendered blocks on the default output device through cpal
pub struct OutputEngine {
    desc: VoiceFieldDesc,
    stream: Option<cpal::Stream>,
    consumer: Option<HeapCons<f32>>,
    is_running: Arc<AtomicBool>,
    frames_played: Arc<AtomicUsize>,
    underruns: Arc<AtomicUsize>,
}

impl OutputEngine {
    /// Creates the engine and the feed that supplies it. No device is opened
    /// until [`start`](Self::start).
    pub fn new(desc: VoiceFieldDesc) -> Result<(Self, OutputFeed)> {
        if desc.channels == 0 || desc.block_size == 0 {
            return Err(VoiceFieldError::Configuration(
                "Output needs at least one channel and a non-empty block".to_string(),
            ));
        }

        let channels = desc.channels as usize;
        let capacity = desc.block_size * channels * desc.output_buffer_blocks.max(1);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let engine = Self {
            desc,
            stream: None,
            consumer: Some(consumer),
            is_running: Arc::new(AtomicBool::new(false)),
            frames_played: Arc::new(AtomicUsize::new(0)),
            underruns: Arc::new(AtomicUsize::new(0)),
        };
        Ok((engine, OutputFeed { producer, channels }))
    }

    /// Opens the default output device on first use, then (re)starts it.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        if self.stream.is_none() {
            self.stream = Some(self.open_stream()?);
        }
        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| {
                VoiceFieldError::AudioDevice(format!("Failed to start stream: {}", e))
            })?;
        }

        self.is_running.store(true, Ordering::Relaxed);
        log::info!(
            "Output started: {} Hz, {} channel(s)",
            self.desc.sample_rate,
            self.desc.channels
        );
        Ok(())
    }

    /// Pauses output. The device keeps its stream until the engine is dropped.
    pub fn stop(&mut self) -> Result<()> {
        self.is_running.store(false, Ordering::Relaxed);
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| {
                VoiceFieldError::AudioDevice(format!("Failed to pause stream: {}", e))
            })?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Frames handed to the device since the stream was opened.
    pub fn frames_played(&self) -> usize {
        self.frames_played.load(Ordering::Relaxed)
    }

    /// Callbacks that ran out of rendered audio.
    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn desc(&self) -> &VoiceFieldDesc {
        &self.desc
    }

    fn open_stream(&mut self) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            VoiceFieldError::AudioDevice("No default output device available".into())
        })?;

        let config = cpal::StreamConfig {
            channels: self.desc.channels,
            sample_rate: cpal::SampleRate(self.desc.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.desc.block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            VoiceFieldError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config),
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config),
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config),
            format => Err(VoiceFieldError::AudioFormat(format!(
                "Unsupported sample format: {:?}",
                format
            ))),
        }
    }

    /// Hands the queue's read side to a device callback, once the device and
    /// its sample format have resolved.
    fn take_consumer(&mut self) -> Result<HeapCons<f32>> {
        self.consumer
            .take()
            .ok_or_else(|| VoiceFieldError::Engine("Output buffer already in use".into()))
    }

    fn create_stream<T>(
        &mut self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let mut consumer = self.take_consumer()?;
        let channels = config.channels as usize;
        let is_running = self.is_running.clone();
        let frames_played = self.frames_played.clone();
        let underruns = self.underruns.clone();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let running = is_running.load(Ordering::Relaxed);
                    let filled = fill_output(data, &mut consumer, running);
                    if running && filled < data.len() {
                        underruns.fetch_add(1, Ordering::Relaxed);
                    }
                    frames_played.fetch_add(data.len() / channels, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| VoiceFieldError::AudioDevice(format!("Failed to build stream: {}", e)))
    }
}

impl Drop for OutputEngine {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        // dropping the stream closes the device
        self.stream.take();
    }
}

/// Copies queued samples into a device buffer, zero-filling whatever the
/// queue cannot cover. Returns the number of queued samples used.
fn fill_output<T>(data: &mut [T], consumer: &mut HeapCons<f32>, running: bool) -> usize
where
    T: SizedSample + FromSample<f32>,
{
    let mut filled = 0;
    if running {
        for (slot, sample) in data.iter_mut().zip(consumer.pop_iter()) {
            *slot = T::from_sample(sample);
            filled += 1;
        }
    }
    for slot in &mut data[filled..] {
        *slot = T::from_sample(0.0f32);
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> (OutputEngine, OutputFeed) {
        let desc = VoiceFieldDesc::new()
            .block_size(4)
            .channels(2)
            .output_buffer_blocks(2);
        OutputEngine::new(desc).unwrap()
    }

    #[test]
    fn test_feed_capacity_follows_desc() {
        let (engine, mut feed) = feed();
        assert!(!engine.is_running());
        assert_eq!(feed.vacant_frames(), 8);
        assert_eq!(feed.push_block(&[0.5; 20]), 16);
        assert_eq!(feed.buffered_frames(), 8);
    }

    #[test]
    fn test_fill_zero_pads_underrun() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(8).split();
        producer.push_slice(&[0.25, -0.25, 0.5]);

        let mut data = [1.0f32; 6];
        assert_eq!(fill_output(&mut data, &mut consumer, true), 3);
        assert_eq!(data, [0.25, -0.25, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_converts_to_integer_formats() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(4).split();
        producer.push_slice(&[0.5, 0.0]);

        let mut data = [7i16; 3];
        assert_eq!(fill_output(&mut data, &mut consumer, true), 2);
        assert!((16383..=16384).contains(&data[0]));
        assert_eq!(&data[1..], &[0, 0]);
    }

    #[test]
    fn test_paused_output_is_silent_and_keeps_queue() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(4).split();
        producer.push_slice(&[0.5, 0.5]);

        let mut data = [0.3f32; 2];
        assert_eq!(fill_output(&mut data, &mut consumer, false), 0);
        assert_eq!(data, [0.0, 0.0]);
        assert_eq!(consumer.occupied_len(), 2);
    }

    #[test]
    fn test_consumer_stays_until_a_device_takes_it() {
        let (mut engine, _feed) = feed();
        assert!(engine.consumer.is_some());
        engine.stop().unwrap();
        assert!(engine.consumer.is_some());

        assert!(engine.take_consumer().is_ok());
        assert!(matches!(
            engine.take_consumer(),
            Err(VoiceFieldError::Engine(_))
        ));
    }

    #[test]
    fn test_rejects_empty_layout() {
        let desc = VoiceFieldDesc::new().channels(0);
        assert!(matches!(
            OutputEngine::new(desc),
            Err(VoiceFieldError::Configuration(_))
        ));
    }
}
