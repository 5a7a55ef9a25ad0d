/// Data layer: core types, decoded fragments, archive and side tables.
///
/// Architecture:
/// ```text
///  task fragments (.bin)          archive export (.parquet / .json / .csv)
///        │                                 │
///        ▼                                 ▼
///   ┌──────────┐                     ┌──────────┐
///   │ fragment │  FragmentRecord     │  loader  │  ArchiveDataset
///   └──────────┘                     └──────────┘
///        │                                 │
///        └──────────────┬──────────────────┘
///                       ▼
///                 ┌──────────┐
///                 │  model   │  CadenceRange, EntityKey, time series
///                 └──────────┘
///                       │
///        ┌──────────────┼──────────────┐
///        ▼              ▼              ▼
///   ┌──────────┐   ┌──────────┐   ┌──────────┐
///   │ aperture │   │  tables  │   │  filter  │  Kepler id filter, sampling
///   └──────────┘   └──────────┘   └──────────┘
/// ```

pub mod aperture;
pub mod filter;
pub mod fragment;
pub mod loader;
pub mod model;
pub mod tables;
