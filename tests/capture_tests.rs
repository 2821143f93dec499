// Integration tests for capture sources
//
// These tests verify that WAV files and raw sample streams are cut into
// fixed-size blocks with the configured rate.

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;
use voice_interviewer::audio::{
    CaptureConfig, CaptureSource, CaptureSourceFactory, InputSource, ReaderCapture, WavCapture,
};

fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[test]
fn test_wav_capture_open() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("mic.wav");
    write_wav(&path, 16000, 1, &vec![0i16; 16000])?;

    let capture = WavCapture::open(&path, CaptureConfig::default())?;

    assert!((capture.duration_seconds - 1.0).abs() < 1e-9);
    assert!(capture.path.contains("mic.wav"));
    assert!(!capture.is_capturing());

    Ok(())
}

#[test]
fn test_wav_capture_rejects_wrong_format() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let stereo = temp_dir.path().join("stereo.wav");
    write_wav(&stereo, 16000, 2, &vec![0i16; 3200])?;
    assert!(WavCapture::open(&stereo, CaptureConfig::default()).is_err());

    let wrong_rate = temp_dir.path().join("44k.wav");
    write_wav(&wrong_rate, 44100, 1, &vec![0i16; 4410])?;
    assert!(WavCapture::open(&wrong_rate, CaptureConfig::default()).is_err());

    Ok(())
}

#[test]
fn test_wav_capture_nonexistent() {
    let result = WavCapture::open("/nonexistent/path/to/mic.wav", CaptureConfig::default());
    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[tokio::test(start_paused = true)]
async fn test_wav_capture_emits_padded_blocks() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("mic.wav");

    // Two and a half blocks at half scale
    let samples = vec![16384i16; 2560];
    write_wav(&path, 16000, 1, &samples)?;

    let mut capture = WavCapture::open(&path, CaptureConfig::default())?;
    let mut rx = capture.start().await?;
    assert!(capture.start().await.is_err(), "Second start should fail");

    let mut blocks = Vec::new();
    while let Some(block) = rx.recv().await {
        blocks.push(block);
    }

    assert_eq!(blocks.len(), 3);
    for block in &blocks {
        assert_eq!(block.samples.len(), 1024);
        assert_eq!(block.sample_rate, 16000);
    }
    assert_eq!(blocks[0].timestamp_ms, 0);
    assert_eq!(blocks[1].timestamp_ms, 64);
    assert!((blocks[0].samples[0] - 0.5).abs() < 1e-6);

    // Last block: 512 samples of audio, then silence
    assert!((blocks[2].samples[511] - 0.5).abs() < 1e-6);
    assert_eq!(blocks[2].samples[512], 0.0);

    capture.stop().await?;
    assert!(!capture.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_reader_capture_cuts_raw_samples() -> Result<()> {
    let config = CaptureConfig {
        block_size: 4,
        ..CaptureConfig::default()
    };

    // Two full blocks plus a partial one, which is discarded
    let raw: Vec<u8> = (0..10)
        .map(|i| i as f32 / 10.0)
        .flat_map(|s| s.to_le_bytes())
        .collect();

    let mut capture = ReaderCapture::new("test", Cursor::new(raw), config);
    let mut rx = capture.start().await?;

    let first = rx.recv().await.expect("first block");
    let second = rx.recv().await.expect("second block");
    assert!(rx.recv().await.is_none());

    assert_eq!(first.samples, vec![0.0, 0.1, 0.2, 0.3]);
    assert_eq!(second.samples, vec![0.4, 0.5, 0.6, 0.7]);
    assert_eq!(second.timestamp_ms, 0);
    assert_eq!(capture.name(), "test");

    Ok(())
}

#[test]
fn test_factory_reports_missing_file() {
    let source = InputSource::from("/nonexistent/mic.wav".to_string());
    let result = CaptureSourceFactory::create(&source, CaptureConfig::default());

    let err = result.err().expect("missing file should fail");
    assert!(format!("{:#}", err).contains("Failed to open capture file"));
}

#[test]
fn test_factory_creates_wav_source() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("mic.wav");
    write_wav(&path, 16000, 1, &vec![0i16; 1600])?;

    let source = InputSource::from(path.display().to_string());
    let capture = CaptureSourceFactory::create(&source, CaptureConfig::default())?;
    assert_eq!(capture.name(), "wav");

    Ok(())
}
