/// One fixed-size block of mono capture samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Sample rate and channel layout of a PCM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Mime descriptor used on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        if self.channels == 1 {
            format!("audio/pcm;rate={}", self.sample_rate)
        } else {
            format!(
                "audio/pcm;rate={};channels={}",
                self.sample_rate, self.channels
            )
        }
    }

    /// Parse the `rate=` and `channels=` parameters of a PCM mime type.
    ///
    /// Parameters that are missing, unparsable or zero keep the value from
    /// `fallback`.
    /// Returns `None` for non-PCM media types.
    pub fn from_mime(mime: &str, fallback: AudioFormat) -> Option<AudioFormat> {
        let mut parts = mime.split(';').map(str::trim);
        let media = parts.next()?.to_ascii_lowercase();
        if media != "audio/pcm" && media != "audio/l16" {
            return None;
        }

        let mut format = fallback;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rate" => {
                    if let Ok(rate @ 1..) = value.trim().parse::<u32>() {
                        format.sample_rate = rate;
                    }
                }
                "channels" => {
                    if let Ok(channels @ 1..) = value.trim().parse::<u16>() {
                        format.channels = channels;
                    }
                }
                _ => {}
            }
        }
        Some(format)
    }
}

/// Little-endian i16 PCM bytes plus the format they were produced at.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

/// De-interleaved PCM ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudioBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average of all channels at `frame`, or silence past the end.
    pub fn mono_sample(&self, frame: usize) -> f32 {
        if self.channels.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .channels
            .iter()
            .map(|ch| ch.get(frame).copied().unwrap_or(0.0))
            .sum();
        sum / self.channels.len() as f32
    }
}

/// One finalized user/model exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub model: String,
}

impl Turn {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }
}
