pub mod backend;
pub mod devices;
pub mod file;
pub mod framer;
pub mod microphone;
pub mod output;
pub mod pcm;
pub mod speaker;

pub use backend::{
    AudioBackendFactory, AudioFrame, AudioSource, CaptureBackend, CaptureConfig, CAPTURE_FRAME_SIZE,
};
pub use devices::{AudioDevices, SystemDevices};
pub use file::{AudioFile, FileBackend};
pub use framer::FrameAssembler;
pub use microphone::MicrophoneBackend;
pub use output::{AudioOutput, ScheduledVoice, VirtualClock, VirtualOutput, VoiceId};
pub use pcm::AudioBuffer;
pub use speaker::SpeakerOutput;
