// Unit tests for capture backend abstractions
//
// These tests verify the capture types, the factory and the frame
// assembler that turns device callbacks into uplink frames.

use thandar_coach::audio::pcm::INPUT_SAMPLE_RATE;
use thandar_coach::audio::{
    AudioBackendFactory, AudioFrame, AudioSource, CaptureConfig, FrameAssembler,
    CAPTURE_FRAME_SIZE,
};

#[test]
fn test_capture_config_default() {
    let config = CaptureConfig::default();

    assert_eq!(config.target_sample_rate, 16000, "Uplink audio is 16kHz");
    assert_eq!(config.frame_size, 4096, "Frames are 4096 samples");
    assert!(config.channel_capacity >= 1);
    assert!(config.device_name.is_none(), "Default is the system input");
}

#[test]
fn test_audio_frame_duration() {
    let frame = AudioFrame {
        samples: vec![0.0; CAPTURE_FRAME_SIZE],
        sample_rate: INPUT_SAMPLE_RATE,
        sequence: 0,
        timestamp_ms: 0,
    };

    // 4096 samples at 16kHz = 256ms
    let duration_secs = frame.samples.len() as f64 / frame.sample_rate as f64;
    assert!((duration_secs - 0.256).abs() < 0.001);
}

#[test]
fn test_factory_creates_microphone_backend() {
    let backend = AudioBackendFactory::create(AudioSource::Microphone, CaptureConfig::default())
        .expect("microphone backend is constructed lazily");

    assert_eq!(backend.name(), "microphone");
    assert!(!backend.is_capturing(), "Nothing is acquired before start");
}

#[test]
fn test_factory_creates_file_backend() {
    let source = AudioSource::File("session.wav".into());
    let backend = AudioBackendFactory::create(source, CaptureConfig::default()).unwrap();

    assert_eq!(backend.name(), "file");
    assert!(!backend.is_capturing());
}

#[test]
fn test_assembler_downmixes_and_resamples_device_audio() {
    // 48kHz stereo device, 100ms per callback
    let mut framer = FrameAssembler::new(48_000, 2, INPUT_SAMPLE_RATE, CAPTURE_FRAME_SIZE);
    let callback: Vec<f32> = (0..4_800).flat_map(|_| [0.2f32, 0.4]).collect();

    let mut frames = Vec::new();
    for _ in 0..10 {
        frames.extend(framer.push_interleaved(&callback));
    }

    // One second of audio: 16000 samples, three full frames
    assert_eq!(frames.len(), 3);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.sequence, i as u64);
        assert_eq!(frame.samples.len(), CAPTURE_FRAME_SIZE);
        assert!(frame.samples.iter().all(|&s| (s - 0.3).abs() < 1e-6));
    }
    assert_eq!(frames[1].timestamp_ms, 256);
}
