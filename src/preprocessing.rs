//! Real-time preprocessing of received chunks
//!
//! Each consumer owns its preprocessor: an optional Butterworth frequency
//! filter and an optional notch, both implemented as cascaded second-order
//! sections with per-channel state that persists between chunks, followed by
//! optional integer downsampling.

use crate::error::{AcquisitionError, Result};
use crate::types::DataChunk;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Frequency filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
}

/// Butterworth filter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyFilterSettings {
    #[serde(rename = "type")]
    pub kind: FilterKind,
    /// One cut-off (Hz), or `[low, high]` for bandpass
    pub cutoff: Vec<f64>,
    #[serde(default = "default_order")]
    pub order: usize,
}

fn default_order() -> usize {
    4
}

/// Notch settings: rejects `freq + bandwidth[0] .. freq + bandwidth[1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotchSettings {
    pub freq: f64,
    #[serde(default = "default_bandwidth")]
    pub bandwidth: [f64; 2],
}

fn default_bandwidth() -> [f64; 2] {
    [-0.5, 0.5]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingSettings {
    #[serde(default)]
    pub frequency_filter: Option<FrequencyFilterSettings>,
    #[serde(default)]
    pub notch_filter: Option<NotchSettings>,
    /// Keep one sample out of `downsample`
    #[serde(default = "default_downsample")]
    pub downsample: usize,
}

fn default_downsample() -> usize {
    1
}

impl Default for PreprocessingSettings {
    fn default() -> Self {
        Self {
            frequency_filter: None,
            notch_filter: None,
            downsample: 1,
        }
    }
}

/// Biquad coefficients, `a0` normalized to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Cascade of biquads with Direct Form II Transposed state
#[derive(Debug, Clone)]
pub struct SosFilter {
    sections: Vec<Biquad>,
    state: Vec<[f64; 2]>,
}

impl SosFilter {
    pub fn new(sections: Vec<Biquad>) -> Self {
        let state = vec![[0.0; 2]; sections.len()];
        Self { sections, state }
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Chain `other` after this filter
    pub fn then(mut self, other: SosFilter) -> Self {
        self.sections.extend(other.sections);
        self.state.extend(other.state);
        self
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let mut x = input;
        for (c, z) in self.sections.iter().zip(self.state.iter_mut()) {
            let y = c.b0 * x + z[0];
            z[0] = c.b1 * x - c.a1 * y + z[1];
            z[1] = c.b2 * x - c.a2 * y;
            x = y;
        }
        x
    }

    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|z| *z = [0.0; 2]);
    }
}

/// Butterworth design by bilinear transform
pub struct Butterworth;

impl Butterworth {
    pub fn lowpass(cutoff: f64, rate: f64, order: usize) -> SosFilter {
        Self::design(cutoff, rate, order, false)
    }

    pub fn highpass(cutoff: f64, rate: f64, order: usize) -> SosFilter {
        Self::design(cutoff, rate, order, true)
    }

    pub fn bandpass(low: f64, high: f64, rate: f64, order: usize) -> SosFilter {
        Self::highpass(low, rate, order).then(Self::lowpass(high, rate, order))
    }

    fn design(cutoff: f64, rate: f64, order: usize, highpass: bool) -> SosFilter {
        let k = (PI * cutoff / rate).tan();
        let k2 = k * k;
        let mut sections = Vec::with_capacity(order.div_ceil(2));

        for i in 0..order / 2 {
            // 1/Q of the i-th conjugate pole pair
            let q = 2.0 * (PI * (2 * i + 1) as f64 / (2 * order) as f64).sin();
            let norm = 1.0 / (1.0 + q * k + k2);
            let (b0, b1, b2) = if highpass {
                (norm, -2.0 * norm, norm)
            } else {
                (k2 * norm, 2.0 * k2 * norm, k2 * norm)
            };
            sections.push(Biquad {
                b0,
                b1,
                b2,
                a1: 2.0 * (k2 - 1.0) * norm,
                a2: (1.0 - q * k + k2) * norm,
            });
        }

        if order % 2 == 1 {
            let norm = 1.0 / (1.0 + k);
            let (b0, b1) = if highpass {
                (norm, -norm)
            } else {
                (k * norm, k * norm)
            };
            sections.push(Biquad {
                b0,
                b1,
                b2: 0.0,
                a1: (k - 1.0) * norm,
                a2: 0.0,
            });
        }

        SosFilter::new(sections)
    }
}

/// Second-order notch centered on `freq` with quality `freq / width`
pub fn notch(freq: f64, width: f64, rate: f64) -> SosFilter {
    let w0 = 2.0 * PI * freq / rate;
    let alpha = w0.sin() * width / (2.0 * freq);
    let a0 = 1.0 + alpha;
    SosFilter::new(vec![Biquad {
        b0: 1.0 / a0,
        b1: -2.0 * w0.cos() / a0,
        b2: 1.0 / a0,
        a1: -2.0 * w0.cos() / a0,
        a2: (1.0 - alpha) / a0,
    }])
}

fn invalid(message: String) -> AcquisitionError {
    AcquisitionError::InvalidConfiguration(message)
}

fn check_below_nyquist(freq: f64, rate: f64, what: &str) -> Result<()> {
    let nyquist = rate / 2.0;
    if !(freq > 0.0 && freq < nyquist) {
        return Err(invalid(format!(
            "{} ({} Hz) must be between 0 and Nyquist ({} Hz)",
            what, freq, nyquist
        )));
    }
    Ok(())
}

fn design_frequency_filter(settings: &FrequencyFilterSettings, rate: f64) -> Result<SosFilter> {
    if settings.order == 0 {
        return Err(invalid("Filter order must be at least 1".to_string()));
    }
    match (settings.kind, settings.cutoff.as_slice()) {
        (FilterKind::Lowpass, &[fc]) => {
            check_below_nyquist(fc, rate, "Cut-off")?;
            Ok(Butterworth::lowpass(fc, rate, settings.order))
        }
        (FilterKind::Highpass, &[fc]) => {
            check_below_nyquist(fc, rate, "Cut-off")?;
            Ok(Butterworth::highpass(fc, rate, settings.order))
        }
        (FilterKind::Bandpass, &[low, high]) => {
            if low >= high {
                return Err(invalid(format!(
                    "Low cut-off ({} Hz) must be below high cut-off ({} Hz)",
                    low, high
                )));
            }
            check_below_nyquist(low, rate, "Low cut-off")?;
            check_below_nyquist(high, rate, "High cut-off")?;
            Ok(Butterworth::bandpass(low, high, rate, settings.order))
        }
        (kind, cutoff) => Err(invalid(format!(
            "{:?} filter cannot use {} cut-off frequencies",
            kind,
            cutoff.len()
        ))),
    }
}

fn design_notch(settings: &NotchSettings, rate: f64) -> Result<SosFilter> {
    let [lo, hi] = settings.bandwidth;
    if lo >= hi {
        return Err(invalid(format!(
            "Notch bandwidth [{}, {}] is inverted",
            lo, hi
        )));
    }
    check_below_nyquist(settings.freq + lo, rate, "Notch lower edge")?;
    check_below_nyquist(settings.freq + hi, rate, "Notch upper edge")?;
    Ok(notch(settings.freq, hi - lo, rate))
}

/// Chunk-by-chunk filtering and downsampling for one consumer
#[derive(Debug, Clone)]
pub struct RealTimePreprocessor {
    settings: PreprocessingSettings,
    rate: Option<f64>,
    /// One filter chain per channel
    chains: Vec<SosFilter>,
    /// Samples to skip before the next kept one
    phase: usize,
}

impl RealTimePreprocessor {
    pub fn new(settings: PreprocessingSettings) -> Self {
        Self {
            settings,
            rate: None,
            chains: Vec::new(),
            phase: 0,
        }
    }

    pub fn settings(&self) -> &PreprocessingSettings {
        &self.settings
    }

    /// Design the filters for `rate` Hz and `n_cha` channels, resetting state
    pub fn fit(&mut self, rate: f64, n_cha: usize) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(invalid(format!("Sample rate must be positive, got {}", rate)));
        }
        if self.settings.downsample == 0 {
            return Err(invalid("Downsampling factor must be at least 1".to_string()));
        }

        let mut chain = SosFilter::new(Vec::new());
        if let Some(filter) = &self.settings.frequency_filter {
            chain = chain.then(design_frequency_filter(filter, rate)?);
        }
        if let Some(notch) = &self.settings.notch_filter {
            chain = chain.then(design_notch(notch, rate)?);
        }

        log::debug!(
            "Preprocessor fitted: {} Hz, {} channel(s), {} section(s), downsample {}",
            rate,
            n_cha,
            chain.sections().len(),
            self.settings.downsample
        );
        self.chains = vec![chain; n_cha];
        self.rate = Some(rate);
        self.phase = 0;
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        self.rate.is_some()
    }

    /// Sample rate of the transformed output
    pub fn output_rate(&self) -> Option<f64> {
        self.rate.map(|r| r / self.settings.downsample as f64)
    }

    /// Filter and downsample one chunk.
    ///
    /// Non-finite samples are passed through without touching filter state.
    pub fn transform(&mut self, chunk: &DataChunk) -> Result<DataChunk> {
        if !self.is_fitted() {
            return Err(invalid("Preprocessor used before fit".to_string()));
        }
        let factor = self.settings.downsample;
        let mut out = DataChunk {
            samples: Vec::with_capacity(chunk.num_samples() / factor + 1),
            local_timestamps: Vec::new(),
            source_timestamps: Vec::new(),
        };

        for (i, row) in chunk.samples.iter().enumerate() {
            if row.len() != self.chains.len() {
                return Err(invalid(format!(
                    "Sample has {} channel(s), preprocessor was fitted for {}",
                    row.len(),
                    self.chains.len()
                )));
            }
            let filtered: Vec<f64> = row
                .iter()
                .zip(self.chains.iter_mut())
                .map(|(&x, chain)| if x.is_finite() { chain.process(x) } else { x })
                .collect();

            if self.phase == 0 {
                out.samples.push(filtered);
                if let Some(&ts) = chunk.local_timestamps.get(i) {
                    out.local_timestamps.push(ts);
                }
                if let Some(&ts) = chunk.source_timestamps.get(i) {
                    out.source_timestamps.push(ts);
                }
                self.phase = factor - 1;
            } else {
                self.phase -= 1;
            }
        }

        Ok(out)
    }
}
