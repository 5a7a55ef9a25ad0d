use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

// ---------------------------------------------------------------------------
// CadenceRange – inclusive cadence interval
// ---------------------------------------------------------------------------

/// Inclusive `[start, end]` cadence interval. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(i32, i32)", into = "(i32, i32)")]
pub struct CadenceRange {
    start: i32,
    end: i32,
}

impl CadenceRange {
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            return Err(ValidationError::usage(format!(
                "start cadence, {start}, must not be greater than end cadence, {end}"
            )));
        }
        Ok(CadenceRange { start, end })
    }

    /// Range of `len` cadences beginning at `start`; `len` must be non-zero.
    pub fn with_len(start: i32, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ValidationError::execution(format!(
                "empty cadence range starting at {start}"
            )));
        }
        CadenceRange::new(start, start + len as i32 - 1)
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    /// Number of cadences; never zero.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn contains(&self, cadence: i32) -> bool {
        cadence >= self.start && cadence <= self.end
    }

    pub fn contains_range(&self, other: &CadenceRange) -> bool {
        self.contains(other.start) && self.contains(other.end)
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &CadenceRange) -> CadenceRange {
        CadenceRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Split into consecutive chunks of at most `size` cadences. A size of
    /// zero yields the whole range as one chunk.
    pub fn chunks(&self, size: usize) -> Vec<CadenceRange> {
        if size == 0 || size >= self.len() {
            return vec![*self];
        }
        let mut chunks = Vec::with_capacity(self.len().div_ceil(size));
        let mut start = self.start;
        while start <= self.end {
            let end = (start + size as i32 - 1).min(self.end);
            chunks.push(CadenceRange { start, end });
            start = end + 1;
        }
        chunks
    }

    pub fn cadences(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }
}

impl TryFrom<(i32, i32)> for CadenceRange {
    type Error = ValidationError;

    fn try_from((start, end): (i32, i32)) -> Result<Self> {
        CadenceRange::new(start, end)
    }
}

impl From<CadenceRange> for (i32, i32) {
    fn from(range: CadenceRange) -> Self {
        (range.start, range.end)
    }
}

impl fmt::Display for CadenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Detector coordinates
// ---------------------------------------------------------------------------

/// CCD pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pixel {
    pub row: i32,
    pub column: i32,
}

impl Pixel {
    pub fn new(row: i32, column: i32) -> Self {
        Pixel { row, column }
    }
}

impl fmt::Display for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.column)
    }
}

impl FromStr for Pixel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (row, column) = s
            .split_once(',')
            .ok_or_else(|| format!("'{s}' is not a row,column pair"))?;
        let row = row
            .trim()
            .parse()
            .map_err(|_| format!("'{row}' is not a row"))?;
        let column = column
            .trim()
            .parse()
            .map_err(|_| format!("'{column}' is not a column"))?;
        Ok(Pixel { row, column })
    }
}

/// Pixel position relative to a target's reference pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset {
    pub row: i32,
    pub column: i32,
}

impl Offset {
    pub fn new(row: i32, column: i32) -> Self {
        Offset { row, column }
    }
}

/// Module/output pair identifying one detector channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel {
    pub ccd_module: i32,
    pub ccd_output: i32,
}

impl Channel {
    pub fn new(ccd_module: i32, ccd_output: i32) -> Self {
        Channel {
            ccd_module,
            ccd_output,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ccd_module, self.ccd_output)
    }
}

/// Collateral (non-imaging) pixel region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollateralKind {
    BlackLevel,
    MaskedSmear,
    VirtualSmear,
    BlackMasked,
    BlackVirtual,
}

impl CollateralKind {
    pub fn name(&self) -> &'static str {
        match self {
            CollateralKind::BlackLevel => "black_level",
            CollateralKind::MaskedSmear => "masked_smear",
            CollateralKind::VirtualSmear => "virtual_smear",
            CollateralKind::BlackMasked => "black_masked",
            CollateralKind::BlackVirtual => "black_virtual",
        }
    }
}

impl FromStr for CollateralKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "black_level" => Ok(CollateralKind::BlackLevel),
            "masked_smear" => Ok(CollateralKind::MaskedSmear),
            "virtual_smear" => Ok(CollateralKind::VirtualSmear),
            "black_masked" => Ok(CollateralKind::BlackMasked),
            "black_virtual" => Ok(CollateralKind::BlackVirtual),
            other => Err(format!("unknown collateral type '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityKey – what a compared series belongs to
// ---------------------------------------------------------------------------

/// Identity of the thing a time series describes. The textual form is the
/// `entity` column of the archive export.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Target(i32),
    Pixel(Pixel),
    TargetPixel(i32, Pixel),
    Collateral(CollateralKind, i32),
    Planet(i32, i32),
    Channel,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Target(id) => write!(f, "target:{id}"),
            EntityKey::Pixel(pixel) => write!(f, "pixel:{pixel}"),
            EntityKey::TargetPixel(id, pixel) => write!(f, "target-pixel:{id}:{pixel}"),
            EntityKey::Collateral(kind, offset) => {
                write!(f, "collateral:{}:{offset}", kind.name())
            }
            EntityKey::Planet(id, number) => write!(f, "planet:{id}:{number}"),
            EntityKey::Channel => write!(f, "channel"),
        }
    }
}

impl FromStr for EntityKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse_id = |text: &str| {
            text.parse::<i32>()
                .map_err(|_| format!("'{text}' is not an integer in entity '{s}'"))
        };
        let (kind, rest) = s.split_once(':').unwrap_or((s, ""));
        match kind {
            "target" => Ok(EntityKey::Target(parse_id(rest)?)),
            "pixel" => Ok(EntityKey::Pixel(rest.parse()?)),
            "target-pixel" => {
                let (id, pixel) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("entity '{s}' lacks a pixel"))?;
                Ok(EntityKey::TargetPixel(parse_id(id)?, pixel.parse()?))
            }
            "collateral" => {
                let (kind, offset) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("entity '{s}' lacks an offset"))?;
                Ok(EntityKey::Collateral(kind.parse()?, parse_id(offset)?))
            }
            "planet" => {
                let (id, number) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("entity '{s}' lacks a planet number"))?;
                Ok(EntityKey::Planet(parse_id(id)?, parse_id(number)?))
            }
            "channel" if rest.is_empty() => Ok(EntityKey::Channel),
            _ => Err(format!("unrecognised entity '{s}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Time series
// ---------------------------------------------------------------------------

/// Behaviour shared by every time-series variant. All parallel arrays of a
/// series have the same length.
pub trait TimeSeries: Sized {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn gap_indicators(&self) -> &[bool];

    /// Copy of `len` samples starting at `offset`. Callers guarantee
    /// `offset + len <= self.len()`.
    fn window(&self, offset: usize, len: usize) -> Self;

    /// `self` followed by `other`.
    fn concat(self, other: Self) -> Self;

    /// Describe the first length disagreement between parallel arrays.
    fn check_lengths(&self) -> std::result::Result<(), String>;
}

/// Values plus gap indicators (`true` = missing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleTimeSeries<T> {
    pub values: Vec<T>,
    pub gap_indicators: Vec<bool>,
}

impl<T> SimpleTimeSeries<T> {
    pub fn new(values: Vec<T>, gap_indicators: Vec<bool>) -> Self {
        SimpleTimeSeries {
            values,
            gap_indicators,
        }
    }
}

impl<T: Copy> TimeSeries for SimpleTimeSeries<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn gap_indicators(&self) -> &[bool] {
        &self.gap_indicators
    }

    fn window(&self, offset: usize, len: usize) -> Self {
        SimpleTimeSeries {
            values: self.values[offset..offset + len].to_vec(),
            gap_indicators: self.gap_indicators[offset..offset + len].to_vec(),
        }
    }

    fn concat(mut self, other: Self) -> Self {
        self.values.extend_from_slice(&other.values);
        self.gap_indicators.extend_from_slice(&other.gap_indicators);
        self
    }

    fn check_lengths(&self) -> std::result::Result<(), String> {
        if self.values.len() != self.gap_indicators.len() {
            return Err(format!(
                "{} values but {} gap indicators",
                self.values.len(),
                self.gap_indicators.len()
            ));
        }
        Ok(())
    }
}

/// Values, uncertainties and gap indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundTimeSeries<T> {
    pub values: Vec<T>,
    pub uncertainties: Vec<f32>,
    pub gap_indicators: Vec<bool>,
}

impl<T> CompoundTimeSeries<T> {
    pub fn new(values: Vec<T>, uncertainties: Vec<f32>, gap_indicators: Vec<bool>) -> Self {
        CompoundTimeSeries {
            values,
            uncertainties,
            gap_indicators,
        }
    }
}

impl<T: Copy> TimeSeries for CompoundTimeSeries<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn gap_indicators(&self) -> &[bool] {
        &self.gap_indicators
    }

    fn window(&self, offset: usize, len: usize) -> Self {
        CompoundTimeSeries {
            values: self.values[offset..offset + len].to_vec(),
            uncertainties: self.uncertainties[offset..offset + len].to_vec(),
            gap_indicators: self.gap_indicators[offset..offset + len].to_vec(),
        }
    }

    fn concat(mut self, other: Self) -> Self {
        self.values.extend_from_slice(&other.values);
        self.uncertainties.extend_from_slice(&other.uncertainties);
        self.gap_indicators.extend_from_slice(&other.gap_indicators);
        self
    }

    fn check_lengths(&self) -> std::result::Result<(), String> {
        let n = self.values.len();
        if self.uncertainties.len() != n || self.gap_indicators.len() != n {
            return Err(format!(
                "{n} values, {} uncertainties and {} gap indicators",
                self.uncertainties.len(),
                self.gap_indicators.len()
            ));
        }
        Ok(())
    }
}

pub type SimpleIntTimeSeries = SimpleTimeSeries<i32>;
pub type SimpleFloatTimeSeries = SimpleTimeSeries<f32>;
pub type SimpleDoubleTimeSeries = SimpleTimeSeries<f64>;
pub type CompoundFloatTimeSeries = CompoundTimeSeries<f32>;
pub type CompoundDoubleTimeSeries = CompoundTimeSeries<f64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_range_rejects_inverted_bounds() {
        let err = CadenceRange::new(10, 9).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(CadenceRange::new(10, 10).unwrap().len(), 1);
    }

    #[test]
    fn chunks_cover_range_without_overlap() {
        let range = CadenceRange::new(100, 399).unwrap();
        let chunks = range.chunks(139);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], CadenceRange::new(100, 238).unwrap());
        assert_eq!(chunks[2].end(), 399);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), range.len());
        assert_eq!(range.chunks(0), vec![range]);
    }

    #[test]
    fn entity_keys_parse_their_display_form() {
        let keys = [
            EntityKey::Target(8462852),
            EntityKey::Pixel(Pixel::new(512, 300)),
            EntityKey::TargetPixel(7, Pixel::new(-1, 20)),
            EntityKey::Collateral(CollateralKind::MaskedSmear, 44),
            EntityKey::Planet(7, 2),
            EntityKey::Channel,
        ];
        for key in keys {
            assert_eq!(key.to_string().parse::<EntityKey>().unwrap(), key);
        }
        assert!("star:1".parse::<EntityKey>().is_err());
        assert!("pixel:1".parse::<EntityKey>().is_err());
    }

    #[test]
    fn compound_length_check_reports_mismatch() {
        let series = CompoundFloatTimeSeries::new(vec![1.0, 2.0], vec![0.1], vec![false, false]);
        assert!(series.check_lengths().is_err());
    }
}
