//! Microphone capture using cpal.
//!
//! The audio callback only downmixes, resamples and pushes into a lock-free
//! ring buffer; a drain thread pops from the ring and hands chunks to the
//! consumer callback (the VAD), so slow consumers never block the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use tracing::{debug, info, warn};

use super::resampler::StreamResampler;
use super::util::{device_name, downmix_to_mono, select_input_config};

/// Ring buffer capacity in samples (~4 seconds at 16kHz).
const RING_CAPACITY: usize = 65536;

/// Largest chunk handed to the consumer at once.
const DRAIN_CHUNK: usize = 2048;

type SampleCallback = Box<dyn Fn(&[f32]) + Send + 'static>;

/// Streams mono samples at the requested rate from the default input device.
pub struct Capturer {
    stream: Stream,
    running: Arc<AtomicBool>,                  // Callback forwards samples only while set
    shutdown: Arc<AtomicBool>,                 // Permanent stop for the drain thread
    consumer: Option<HeapCons<f32>>,           // Moved to the drain thread on start
    callback: Option<SampleCallback>,          // Moved to the drain thread on start
    drain_handle: Option<JoinHandle<()>>,
}

impl Capturer {
    /// Open the default input device.
    ///
    /// # Arguments
    /// * `sample_rate` - Rate the consumer expects (16000 for the recognizer)
    /// * `callback` - Receives captured mono samples on the drain thread
    ///
    /// # Errors
    /// Returns an error if:
    /// - No input device is available
    /// - No usable input configuration exists
    /// - The input stream cannot be built
    pub fn new<F>(sample_rate: u32, callback: F) -> Result<Self>
    where
        F: Fn(&[f32]) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host.default_input_device().context("No input device available")?;
        info!("Using input device: {}", device_name(&device));

        let supported_configs = device.supported_input_configs().context("Failed to get supported input configs")?;
        let config = select_input_config(supported_configs, sample_rate)?;
        let device_sample_rate = config.sample_rate();
        let channels = config.channels() as usize;

        let mut resampler = if device_sample_rate != sample_rate {
            info!("Device sample rate {} Hz differs from target {} Hz - resampling will be applied", device_sample_rate, sample_rate);
            Some(StreamResampler::new(device_sample_rate, sample_rate)?)
        } else {
            None
        };

        let (mut producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let running = Arc::new(AtomicBool::new(false));
        let callback_running = running.clone();
        let dropped = AtomicU64::new(0);

        let stream_config: StreamConfig = config.config();
        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !callback_running.load(Ordering::Relaxed) {
                    return;
                }

                let mono = downmix_to_mono(data, channels);
                let samples = match resampler.as_mut() {
                    Some(resampler) => resampler.process(&mono),
                    None => mono,
                };

                if producer.push_slice(&samples) < samples.len() {
                    let count = dropped.fetch_add(1, Ordering::Relaxed);
                    if count.is_multiple_of(100) {
                        warn!("Capture ring buffer full, dropped {} chunks", count + 1);
                    }
                }
            },
            |err| tracing::error!("Audio capture error: {}", err),
            None,
        )?;

        info!("Audio capture configured: device {} Hz -> output {} Hz", device_sample_rate, sample_rate);

        Ok(Self {
            stream,
            running,
            shutdown: Arc::new(AtomicBool::new(false)),
            consumer: Some(consumer),
            callback: Some(Box::new(callback)),
            drain_handle: None,
        })
    }

    /// Start capturing. Spawns the drain thread on first call.
    pub fn start(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.stream.play().context("Failed to start audio stream")?;

        if self.drain_handle.is_some() {
            return Ok(());
        }

        let mut consumer = self.consumer.take().context("Capture consumer already taken")?;
        let callback = self.callback.take().context("Capture callback already taken")?;
        let shutdown = self.shutdown.clone();

        let handle = std::thread::Builder::new()
            .name("capture-drain".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; DRAIN_CHUNK];
                while !shutdown.load(Ordering::Relaxed) {
                    if consumer.occupied_len() == 0 {
                        // Short sleep keeps latency low without busy-waiting
                        std::thread::sleep(Duration::from_micros(500));
                        continue;
                    }

                    let read = consumer.pop_slice(&mut buffer);
                    if read > 0 {
                        callback(&buffer[..read]);
                    }
                }
                debug!("Capture drain thread exiting");
            })
            .context("Failed to spawn capture drain thread")?;

        self.drain_handle = Some(handle);
        info!("Audio capture started");
        Ok(())
    }

    /// Stop the stream and the drain thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stream.pause();

        if let Some(handle) = self.drain_handle.take() {
            if let Err(e) = handle.join() {
                warn!("Failed to join capture drain thread: {:?}", e);
            }
            info!("Audio capture stopped");
        }
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
