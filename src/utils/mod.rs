pub mod audio;
pub use audio::{
    AudioError, decode_pcm16, encode_pcm16, merge_samples, ms_for_samples, pcm16_from_f32,
    samples_for_ms, slice_ms,
};
