//! Writes a small synthetic task tree and a matching archive export:
//!
//! ```text
//! <out>/tasks.csv
//! <out>/cal-matlab-1-<task>/cal-inputs-0.bin   (one per cadence window)
//! <out>/archive.parquet
//! <out>/cadence-check.toml
//! ```
//!
//! `cadence-check pixels-in --config <out>/cadence-check.toml` should then
//! report agreement. Pass `--corrupt` to flip one archived sample.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int32Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use cadence_check::data::fragment::{CalInputs, FragmentRecord, RawCollateral, RawPixel};
use cadence_check::data::model::{
    CadenceRange, CollateralKind, EntityKey, Pixel, SimpleIntTimeSeries,
};
use parquet::arrow::ArrowWriter;

const INSTANCE_ID: u64 = 1;
const CCD_MODULE: i32 = 7;
const CCD_OUTPUT: i32 = 3;
const WINDOWS: [(u64, i32, i32); 2] = [(10, 1000, 1049), (11, 1050, 1099)];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    /// Uniform integer in `[low, low + span)`.
    fn next_in(&mut self, low: i32, span: u32) -> i32 {
        low + (self.next_u64() % u64::from(span)) as i32
    }

    fn chance(&mut self, one_in: u64) -> bool {
        self.next_u64() % one_in == 0
    }
}

/// One full-range series per entity, later split per window.
struct Synthetic {
    entity: EntityKey,
    values: Vec<i32>,
    gaps: Vec<bool>,
}

fn synthesize(rng: &mut SimpleRng, range: CadenceRange) -> Vec<Synthetic> {
    let mut series = Vec::new();
    let mut push = |entity: EntityKey, base: i32, rng: &mut SimpleRng| {
        let gaps: Vec<bool> = (0..range.len()).map(|_| rng.chance(40)).collect();
        let values = gaps
            .iter()
            .map(|&gap| if gap { 0 } else { rng.next_in(base, 400) })
            .collect();
        series.push(Synthetic {
            entity,
            values,
            gaps,
        });
    };

    for row in 300..304 {
        for column in 500..503 {
            push(EntityKey::Pixel(Pixel::new(row, column)), 200_000, rng);
        }
    }
    for offset in 300..304 {
        push(EntityKey::Collateral(CollateralKind::BlackLevel, offset), 700, rng);
    }
    for offset in 500..503 {
        push(EntityKey::Collateral(CollateralKind::MaskedSmear, offset), 1_500, rng);
    }
    series
}

fn window_of(series: &Synthetic, range: CadenceRange, window: CadenceRange) -> SimpleIntTimeSeries {
    let from = (window.start() - range.start()) as usize;
    let to = from + window.len();
    SimpleIntTimeSeries::new(series.values[from..to].to_vec(), series.gaps[from..to].to_vec())
}

fn write_fragments(out: &Path, series: &[Synthetic], range: CadenceRange) -> Result<()> {
    let mut manifest = String::from(
        "stage,instance_id,task_id,ccd_module,ccd_output,start_cadence,end_cadence\n",
    );
    for (task_id, start, end) in WINDOWS {
        let window = CadenceRange::new(start, end)?;
        manifest.push_str(&format!(
            "cal,{INSTANCE_ID},{task_id},{CCD_MODULE},{CCD_OUTPUT},{start},{end}\n"
        ));

        let mut inputs = CalInputs {
            cadence_range: window,
            pixels: Vec::new(),
            collateral: Vec::new(),
        };
        for s in series {
            let values = window_of(s, range, window);
            match s.entity {
                EntityKey::Pixel(pixel) => inputs.pixels.push(RawPixel { pixel, values }),
                EntityKey::Collateral(kind, offset) => inputs.collateral.push(RawCollateral {
                    kind,
                    offset,
                    values,
                }),
                _ => {}
            }
        }

        let dir = out.join(format!("cal-matlab-{INSTANCE_ID}-{task_id}"));
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let json = serde_json::to_vec(&FragmentRecord::CalInputs(inputs))?;
        std::fs::write(dir.join("cal-inputs-0.bin"), json)?;
    }
    std::fs::write(out.join("tasks.csv"), manifest).context("writing task manifest")?;
    Ok(())
}

fn write_archive(path: &Path, series: &[Synthetic], range: CadenceRange, corrupt: bool) -> Result<()> {
    let mut values = ListBuilder::new(Float64Builder::new());
    let mut gaps = ListBuilder::new(BooleanBuilder::new());
    for (i, s) in series.iter().enumerate() {
        for (j, (&value, &gap)) in s.values.iter().zip(&s.gaps).enumerate() {
            let flip = corrupt && i == 0 && j == 17 && !gap;
            values
                .values()
                .append_value(f64::from(value) + if flip { 1.0 } else { 0.0 });
            gaps.values().append_value(gap);
        }
        values.append(true);
        gaps.append(true);
    }

    let entities: Vec<String> = series.iter().map(|s| s.entity.to_string()).collect();
    let values: ArrayRef = Arc::new(values.finish());
    let gaps: ArrayRef = Arc::new(gaps.finish());
    let schema = Arc::new(Schema::new(vec![
        Field::new("entity", DataType::Utf8, false),
        Field::new("series", DataType::Utf8, false),
        Field::new("start_cadence", DataType::Int32, false),
        Field::new("values", values.data_type().clone(), false),
        Field::new("gaps", gaps.data_type().clone(), false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(entities)),
            Arc::new(StringArray::from(vec!["ORIG_VALUE"; series.len()])),
            Arc::new(Int32Array::from(vec![range.start(); series.len()])),
            values,
            gaps,
        ],
    )
    .context("building archive record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn write_config(out: &Path, range: CadenceRange) -> Result<()> {
    let config = format!(
        "tasks_root = {root:?}\narchive = {archive:?}\ncal_id = {INSTANCE_ID}\n\
         ccd_module = {CCD_MODULE}\nccd_output = {CCD_OUTPUT}\n\
         start_cadence = {}\nend_cadence = {}\nchunk_size = 40\n",
        range.start(),
        range.end(),
        root = out.display().to_string(),
        archive = out.join("archive.parquet").display().to_string(),
    );
    std::fs::write(out.join("cadence-check.toml"), config).context("writing config")?;
    Ok(())
}

fn main() -> Result<()> {
    let mut out = String::from("fixture");
    let mut corrupt = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--corrupt" => corrupt = true,
            other => out = other.to_string(),
        }
    }
    let out = Path::new(&out);
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let range = CadenceRange::new(WINDOWS[0].1, WINDOWS[WINDOWS.len() - 1].2)?;
    let mut rng = SimpleRng::new(42);
    let series = synthesize(&mut rng, range);

    write_fragments(out, &series, range)?;
    write_archive(&out.join("archive.parquet"), &series, range, corrupt)?;
    write_config(out, range)?;

    println!(
        "Wrote {} series over cadences {range} in {} task windows to {}",
        series.len(),
        WINDOWS.len(),
        out.display()
    );
    Ok(())
}
