//! Decoded-audio access for the FFT workers and the audio player.
//!
//! The source decodes WAV or FLAC into mono floating-point frames and serves
//! random-access reads through a block LRU cache. `read` always returns
//! exactly the requested number of frames, zero-padded before frame 0 and
//! past end-of-file, so callers never deal with short reads.
//!
//! A single lock protects the cache index; cached blocks are immutable and
//! shared by `Arc`. Decoder access is serialized under its own lock, so a
//! cache miss on one thread never blocks hits on others.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};

/// Frames per cached block.
pub const BLOCK_FRAMES: usize = 65536;

/// Default cap on cached blocks; sized to a small multiple of the worst-case
/// FFT working set (max FFT length x workers x 4).
const DEFAULT_MAX_BLOCKS: usize = 32;

enum Decoder {
    /// Streaming WAV access; blocks are decoded on demand via seek.
    Wav {
        reader: hound::WavReader<BufReader<File>>,
        spec: hound::WavSpec,
    },
    /// Whole-file PCM held in memory (FLAC has no cheap random access, and
    /// in-memory sources are used directly by tests and the player).
    Memory { samples: Arc<Vec<f32>> },
}

struct BlockCache {
    blocks: HashMap<u64, Arc<Vec<f32>>>,
    /// LRU order, front = oldest.
    lru: Vec<u64>,
    max_blocks: usize,
}

impl BlockCache {
    fn insert(&mut self, idx: u64, block: Arc<Vec<f32>>) {
        if self.blocks.insert(idx, block).is_none() {
            while self.lru.len() + 1 > self.max_blocks && !self.lru.is_empty() {
                let oldest = self.lru.remove(0);
                self.blocks.remove(&oldest);
            }
        } else {
            self.lru.retain(|&k| k != idx);
        }
        self.lru.push(idx);
    }

    fn touch(&mut self, idx: u64) {
        self.lru.retain(|&k| k != idx);
        self.lru.push(idx);
    }
}

/// Random-access mono PCM with decode-behind caching.
pub struct SampleSource {
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    length_frames: u64,
    decoder: Mutex<Decoder>,
    cache: Mutex<BlockCache>,
}

impl SampleSource {
    /// Opens an audio file, sniffing the container from its magic bytes.
    pub fn open(path: &Path) -> Result<SampleSource> {
        let mut file = File::open(path).with_context(|| format!("cannot open {:?}", path))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .with_context(|| format!("cannot read {:?}", path))?;
        file.seek(SeekFrom::Start(0))?;

        let source = match &magic {
            b"RIFF" => Self::open_wav(path, file)?,
            b"fLaC" => Self::open_flac(path, file)?,
            _ => bail!("{:?}: unsupported audio format (expected WAV or FLAC)", path),
        };

        info!(
            "opened {:?}: {} Hz, {} channel(s), {} frames ({:.2} s)",
            path,
            source.sample_rate,
            source.channels,
            source.length_frames,
            source.duration_secs()
        );
        Ok(source)
    }

    fn open_wav(path: &Path, file: File) -> Result<SampleSource> {
        let reader = hound::WavReader::new(BufReader::new(file))
            .map_err(|e| anyhow!("{:?}: {}", path, e))?;
        let spec = reader.spec();
        let length_frames = reader.duration() as u64;
        Ok(SampleSource {
            path: path.to_path_buf(),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            length_frames,
            decoder: Mutex::new(Decoder::Wav { reader, spec }),
            cache: Mutex::new(BlockCache {
                blocks: HashMap::new(),
                lru: Vec::new(),
                max_blocks: DEFAULT_MAX_BLOCKS,
            }),
        })
    }

    fn open_flac(path: &Path, file: File) -> Result<SampleSource> {
        let mut reader = claxon::FlacReader::new(BufReader::new(file))
            .map_err(|e| anyhow!("{:?}: {}", path, e))?;
        let info = reader.streaminfo();
        let sample_rate = info.sample_rate;
        let channels = info.channels as u16;
        let max_val = (1u64 << (info.bits_per_sample - 1)) as f32;

        let interleaved: Vec<f32> = reader
            .samples()
            .map(|s| s.map(|v| v as f32 / max_val))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("{:?}: {}", path, e))?;
        let samples = mix_to_mono(&interleaved, channels as usize);

        Ok(SampleSource {
            path: path.to_path_buf(),
            sample_rate,
            channels,
            length_frames: samples.len() as u64,
            decoder: Mutex::new(Decoder::Memory {
                samples: Arc::new(samples),
            }),
            cache: Mutex::new(BlockCache {
                blocks: HashMap::new(),
                lru: Vec::new(),
                max_blocks: DEFAULT_MAX_BLOCKS,
            }),
        })
    }

    /// Wraps mono samples already in memory.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> SampleSource {
        SampleSource {
            path: PathBuf::from("<memory>"),
            sample_rate,
            channels: 1,
            length_frames: samples.len() as u64,
            decoder: Mutex::new(Decoder::Memory {
                samples: Arc::new(samples),
            }),
            cache: Mutex::new(BlockCache {
                blocks: HashMap::new(),
                lru: Vec::new(),
                max_blocks: DEFAULT_MAX_BLOCKS,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn length_frames(&self) -> u64 {
        self.length_frames
    }

    pub fn duration_secs(&self) -> f64 {
        self.length_frames as f64 / self.sample_rate as f64
    }

    /// Reads exactly `frames` mono frames starting at `start` (which may be
    /// negative); out-of-range frames are zero.
    pub fn read(&self, start: i64, frames: usize) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; frames];
        if frames == 0 || self.length_frames == 0 {
            return Ok(out);
        }

        let end = start + frames as i64;
        let valid_start = start.max(0) as u64;
        let valid_end = (end.max(0) as u64).min(self.length_frames);
        if valid_start >= valid_end {
            return Ok(out);
        }

        let mut frame = valid_start;
        while frame < valid_end {
            let block_idx = frame / BLOCK_FRAMES as u64;
            let block = self.block(block_idx)?;
            let offset = (frame - block_idx * BLOCK_FRAMES as u64) as usize;
            let run = ((valid_end - frame) as usize).min(block.len() - offset);
            let dst = (frame as i64 - start) as usize;
            out[dst..dst + run].copy_from_slice(&block[offset..offset + run]);
            frame += run as u64;
        }
        Ok(out)
    }

    /// Hint that the working set has jumped; drops cached blocks far from the
    /// new centre so the next reads repopulate around it.
    pub fn reposition(&self, center_time: f64) {
        let center_block =
            (center_time.max(0.0) * self.sample_rate as f64) as u64 / BLOCK_FRAMES as u64;
        let mut guard = self.cache.lock().unwrap();
        let cache = &mut *guard;
        let keep = (cache.max_blocks / 2) as u64;
        let before = cache.blocks.len();
        cache
            .blocks
            .retain(|&idx, _| idx.abs_diff(center_block) <= keep);
        let blocks = &cache.blocks;
        cache.lru.retain(|idx| blocks.contains_key(idx));
        if cache.blocks.len() < before {
            debug!(
                "repositioned sample cache around block {} ({} -> {} blocks)",
                center_block,
                before,
                cache.blocks.len()
            );
        }
    }

    fn block(&self, idx: u64) -> Result<Arc<Vec<f32>>> {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(block) = cache.blocks.get(&idx).cloned() {
                cache.touch(idx);
                return Ok(block);
            }
        }

        // Serialize decoding; re-check the cache once we hold the decoder so
        // two threads missing on the same block decode it only once.
        let mut decoder = self.decoder.lock().unwrap();
        if let Some(block) = self.cache.lock().unwrap().blocks.get(&idx).cloned() {
            return Ok(block);
        }
        let block = Arc::new(self.decode_block(&mut decoder, idx)?);
        self.cache.lock().unwrap().insert(idx, block.clone());
        Ok(block)
    }

    fn decode_block(&self, decoder: &mut Decoder, idx: u64) -> Result<Vec<f32>> {
        let start = idx * BLOCK_FRAMES as u64;
        let frames = BLOCK_FRAMES.min((self.length_frames - start.min(self.length_frames)) as usize);

        match decoder {
            Decoder::Memory { samples } => {
                let s = start as usize;
                Ok(samples[s..s + frames].to_vec())
            }
            Decoder::Wav { reader, spec } => {
                reader
                    .seek(start as u32)
                    .with_context(|| format!("seek to frame {} in {:?}", start, self.path))?;
                let want = frames * spec.channels as usize;
                let interleaved: Vec<f32> = match spec.sample_format {
                    hound::SampleFormat::Float => reader
                        .samples::<f32>()
                        .take(want)
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|e| anyhow!("decode error in {:?}: {}", self.path, e))?,
                    hound::SampleFormat::Int => {
                        let max_val = (1u64 << (spec.bits_per_sample - 1)) as f32;
                        reader
                            .samples::<i32>()
                            .take(want)
                            .collect::<std::result::Result<Vec<_>, _>>()
                            .map_err(|e| anyhow!("decode error in {:?}: {}", self.path, e))?
                            .into_iter()
                            .map(|v| v as f32 / max_val)
                            .collect()
                    }
                };
                if interleaved.len() < want {
                    warn!(
                        "short read in {:?}: wanted {} samples, got {}",
                        self.path,
                        want,
                        interleaved.len()
                    );
                }
                let mut mono = mix_to_mono(&interleaved, spec.channels as usize);
                mono.resize(frames, 0.0);
                Ok(mono)
            }
        }
    }
}

fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32 / n as f32).collect()
    }

    #[test]
    fn reads_are_zero_padded() {
        let source = SampleSource::from_samples(ramp(100), 8000);
        let out = source.read(-10, 120).unwrap();
        assert_eq!(out.len(), 120);
        assert!(out[..10].iter().all(|&v| v == 0.0));
        assert_eq!(out[10], 0.0); // frame 0 of the ramp
        assert_eq!(out[11], 1.0 / 100.0);
        assert!(out[110..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn read_entirely_outside_is_silent() {
        let source = SampleSource::from_samples(ramp(50), 8000);
        assert!(source.read(-100, 20).unwrap().iter().all(|&v| v == 0.0));
        assert!(source.read(1000, 20).unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn reads_cross_block_boundaries() {
        let n = BLOCK_FRAMES + BLOCK_FRAMES / 2;
        let samples: Vec<f32> = (0..n).map(|i| (i % 251) as f32).collect();
        let source = SampleSource::from_samples(samples.clone(), 48000);
        let start = BLOCK_FRAMES - 100;
        let out = source.read(start as i64, 200).unwrap();
        assert_eq!(&out[..], &samples[start..start + 200]);
    }

    #[test]
    fn reposition_keeps_serving_correct_data() {
        let samples: Vec<f32> = (0..BLOCK_FRAMES * 3).map(|i| (i % 17) as f32).collect();
        let source = SampleSource::from_samples(samples.clone(), 48000);
        let _ = source.read(0, 64).unwrap();
        source.reposition(samples.len() as f64 / 48000.0);
        let out = source.read(10, 64).unwrap();
        assert_eq!(&out[..], &samples[10..74]);
    }

    #[test]
    fn wav_file_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("spettro_test_ramp.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for i in 0..1000i32 {
                // Left and right deliberately differ; the source mixes them.
                writer.write_sample((i * 16) as i16).unwrap();
                writer.write_sample((i * 16 + 8) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let source = SampleSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 44100);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.length_frames(), 1000);

        let out = source.read(0, 10).unwrap();
        for (i, &v) in out.iter().enumerate() {
            let expected = ((i as f32 * 16.0) + (i as f32 * 16.0 + 8.0)) / 2.0 / 32768.0;
            assert!((v - expected).abs() < 1e-6, "frame {}: {} vs {}", i, v, expected);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join("spettro_test_garbage.bin");
        std::fs::write(&path, b"not audio at all").unwrap();
        assert!(SampleSource::open(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
