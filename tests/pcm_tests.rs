// Tests for the PCM wire codec
//
// Microphone samples go out as base64 16-bit PCM; model audio comes back
// the same way. Decoding what was encoded must land within one
// quantization step.

use proptest::prelude::*;
use thandar_coach::audio::pcm::{
    decode_base64, encode_samples, raw_pcm_to_audio_buffer, OUTPUT_SAMPLE_RATE,
};
use thandar_coach::DecodeError;

const STEP: f32 = 1.0 / 32768.0;

#[test]
fn test_known_samples_survive_the_wire() {
    let samples = [0.0f32, 0.5, -0.5, 0.999, -1.0, 0.123_456];
    let bytes = decode_base64(&encode_samples(&samples)).unwrap();
    let buffer = raw_pcm_to_audio_buffer(&bytes, OUTPUT_SAMPLE_RATE, 1).unwrap();

    assert_eq!(buffer.number_of_channels(), 1);
    assert_eq!(buffer.frames(), samples.len());
    for (decoded, original) in buffer.channels[0].iter().zip(samples) {
        assert!((decoded - original).abs() <= STEP);
    }
}

#[test]
fn test_stereo_payload_is_deinterleaved() {
    // L = 0.5, R = -0.5, twice
    let bytes = [0x00, 0x40, 0x00, 0xC0, 0x00, 0x40, 0x00, 0xC0];
    let buffer = raw_pcm_to_audio_buffer(&bytes, 24_000, 2).unwrap();

    assert_eq!(buffer.channels, vec![vec![0.5, 0.5], vec![-0.5, -0.5]]);
    assert_eq!(buffer.to_mono(), vec![0.0, 0.0]);
}

#[test]
fn test_duration_follows_sample_rate() {
    let bytes = vec![0u8; 24_000 * 2];
    let buffer = raw_pcm_to_audio_buffer(&bytes, OUTPUT_SAMPLE_RATE, 1).unwrap();
    assert_eq!(buffer.duration(), 1.0);
}

#[test]
fn test_malformed_payloads_are_rejected() {
    assert!(matches!(
        decode_base64("%%%"),
        Err(DecodeError::InvalidBase64(_))
    ));
    assert!(matches!(
        raw_pcm_to_audio_buffer(&[1, 2, 3], OUTPUT_SAMPLE_RATE, 1),
        Err(DecodeError::MisalignedPcm { len: 3, .. })
    ));
    assert!(matches!(
        raw_pcm_to_audio_buffer(&[0, 0], OUTPUT_SAMPLE_RATE, 0),
        Err(DecodeError::InvalidFormat(_))
    ));
}

#[test]
fn test_empty_payload_is_an_empty_buffer() {
    let buffer = raw_pcm_to_audio_buffer(&[], OUTPUT_SAMPLE_RATE, 1).unwrap();
    assert_eq!(buffer.frames(), 0);
    assert_eq!(buffer.duration(), 0.0);
}

proptest! {
    #[test]
    fn prop_round_trip_within_one_step(samples in prop::collection::vec(-1.0f32..=1.0, 0..2048)) {
        let bytes = decode_base64(&encode_samples(&samples)).unwrap();
        prop_assert_eq!(bytes.len(), samples.len() * 2);

        let buffer = raw_pcm_to_audio_buffer(&bytes, OUTPUT_SAMPLE_RATE, 1).unwrap();
        prop_assert_eq!(buffer.frames(), samples.len());
        for (decoded, original) in buffer.channels[0].iter().zip(&samples) {
            prop_assert!((decoded - original).abs() <= STEP + f32::EPSILON);
        }
    }
}
