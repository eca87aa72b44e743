/// One output channel of the host audio mixer.
///
/// The mixer pulls from devices at its own pace; a device pushes unsigned 8-bit PCM into its
/// channel from inside that pull. Keeping the contract this small makes it easy to bridge to
/// different backends:
/// - an in-memory capture (unit tests and the reference machine)
/// - a resampling mixer feeding a host audio API
pub trait MixerChannel {
    /// Sample rate of subsequently pushed samples.
    fn set_freq(&mut self, hz: u32);

    fn enable(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Flush a short stretch of silence so a stopped stream does not end on a DC offset.
    fn add_silence(&mut self);

    fn add_samples_mono_u8(&mut self, samples: &[u8]);

    /// Push stereo samples interleaved as L0, R0, L1, R1, ...
    fn add_samples_stereo_u8(&mut self, interleaved: &[u8]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixChunk {
    Mono(Vec<u8>),
    Stereo(Vec<u8>),
    Silence,
}

/// Mixer channel that records everything pushed into it.
#[derive(Debug, Clone, Default)]
pub struct CaptureChannel {
    freq_hz: u32,
    enabled: bool,
    chunks: Vec<MixChunk>,
}

impl CaptureChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn freq_hz(&self) -> u32 {
        self.freq_hz
    }

    pub fn chunks(&self) -> &[MixChunk] {
        &self.chunks
    }

    pub fn silence_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c, MixChunk::Silence))
            .count()
    }
}

impl MixerChannel for CaptureChannel {
    fn set_freq(&mut self, hz: u32) {
        self.freq_hz = hz;
    }

    fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn add_silence(&mut self) {
        self.chunks.push(MixChunk::Silence);
    }

    fn add_samples_mono_u8(&mut self, samples: &[u8]) {
        self.chunks.push(MixChunk::Mono(samples.to_vec()));
    }

    fn add_samples_stereo_u8(&mut self, interleaved: &[u8]) {
        self.chunks.push(MixChunk::Stereo(interleaved.to_vec()));
    }
}

impl<M: MixerChannel + ?Sized> MixerChannel for Box<M> {
    fn set_freq(&mut self, hz: u32) {
        (**self).set_freq(hz)
    }

    fn enable(&mut self, enabled: bool) {
        (**self).enable(enabled)
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }

    fn add_silence(&mut self) {
        (**self).add_silence()
    }

    fn add_samples_mono_u8(&mut self, samples: &[u8]) {
        (**self).add_samples_mono_u8(samples)
    }

    fn add_samples_stereo_u8(&mut self, interleaved: &[u8]) {
        (**self).add_samples_stereo_u8(interleaved)
    }
}
