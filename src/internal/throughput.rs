#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::unwrap_used)]

use lockfree_intmap::LockFreeIntMap;
use plotters::prelude::*;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Instant;

// Thread counts to measure
const THREADS: [usize; 5] = [1, 2, 4, 8, 16];
const OPS_PER_THREAD: usize = 200_000;
// Keys are drawn from 1..=KEY_SPACE
const KEY_SPACE: i32 = 1 << 16;

// Percentage of gets / puts; the rest are removes
const WORKLOADS: [(&str, u32, u32); 3] =
    [("Read Heavy", 90, 8), ("Balanced", 50, 40), ("Write Heavy", 10, 70)];

const IMPLEMENTATIONS: [&str; 2] = ["LockFreeIntMap", "Mutex<HashMap>"];

/// The three operations the experiment issues.
trait IntMap: Send + Sync {
    fn get(&self, key: i32) -> i32;
    fn put(&self, key: i32, value: i32) -> i32;
    fn remove(&self, key: i32) -> i32;
}

impl IntMap for LockFreeIntMap {
    fn get(&self, key: i32) -> i32 {
        Self::get(self, key).unwrap()
    }

    fn put(&self, key: i32, value: i32) -> i32 {
        Self::put(self, key, value).unwrap()
    }

    fn remove(&self, key: i32) -> i32 {
        Self::remove(self, key).unwrap()
    }
}

impl IntMap for Mutex<HashMap<i32, i32>> {
    fn get(&self, key: i32) -> i32 {
        self.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    fn put(&self, key: i32, value: i32) -> i32 {
        self.lock().unwrap().insert(key, value).unwrap_or(0)
    }

    fn remove(&self, key: i32) -> i32 {
        self.lock().unwrap().remove(&key).unwrap_or(0)
    }
}

// Runs one workload on `threads` threads and returns millions of operations per second
fn measure(map: &Arc<dyn IntMap>, threads: usize, get_pct: u32, put_pct: u32) -> f64 {
    let barrier = Arc::new(Barrier::new(threads + 1));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let map = Arc::clone(map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = rand::rng();
                let mut checksum = 0_i64;
                barrier.wait();
                for _ in 0..OPS_PER_THREAD {
                    let key = rng.random_range(1..=KEY_SPACE);
                    let roll = rng.random_range(0..100);
                    let result = if roll < get_pct {
                        map.get(key)
                    } else if roll < get_pct + put_pct {
                        map.put(key, rng.random_range(1..1_000_000))
                    } else {
                        map.remove(key)
                    };
                    checksum += i64::from(result);
                }
                checksum
            })
        })
        .collect();

    barrier.wait();
    let start = Instant::now();
    let checksum: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let elapsed = start.elapsed().as_secs_f64();
    std::hint::black_box(checksum);

    (threads * OPS_PER_THREAD) as f64 / elapsed / 1_000_000.0
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Threads: {THREADS:?}");
    println!("Operations per thread: {OPS_PER_THREAD}, key space: {KEY_SPACE}");

    // results[workload][implementation][thread count index]
    let mut results: Vec<Vec<Vec<f64>>> =
        vec![vec![Vec::new(); IMPLEMENTATIONS.len()]; WORKLOADS.len()];

    for (workload_idx, &(workload, get_pct, put_pct)) in WORKLOADS.iter().enumerate() {
        println!("Workload {workload} ({get_pct}% get, {put_pct}% put)");
        for &threads in &THREADS {
            for (impl_idx, &name) in IMPLEMENTATIONS.iter().enumerate() {
                let map: Arc<dyn IntMap> = match impl_idx {
                    0 => Arc::new(LockFreeIntMap::new()),
                    _ => Arc::new(Mutex::new(HashMap::new())),
                };
                let mops = measure(&map, threads, get_pct, put_pct);
                results[workload_idx][impl_idx].push(mops);
                println!("  {name} x{threads}: {mops:.2} Mops/s");
            }
        }
    }

    let font_family = "sans-serif";
    let colors = [RGBColor(220, 50, 50), RGBColor(50, 90, 220)];
    let line_width = 2;
    let marker_size = 4;
    let text_size = 16;
    let title_size = 35;

    let root = BitMapBackend::new("throughput.png", (1200, 1200)).into_drawing_area();
    root.fill(&WHITE)?;
    let areas = root.split_evenly((WORKLOADS.len(), 1));
    let x_labels: Vec<String> = THREADS.iter().map(ToString::to_string).collect();

    for (workload_idx, &(workload, _, _)) in WORKLOADS.iter().enumerate() {
        let max_mops = results[workload_idx]
            .iter()
            .flat_map(|v| v.iter())
            .fold(0.0, |max: f64, &x| max.max(x)) *
            1.1; // Add 10% margin

        let mut chart = ChartBuilder::on(&areas[workload_idx])
            .caption(format!("{workload} Throughput"), (font_family, title_size))
            .margin(15)
            .x_label_area_size(60)
            .y_label_area_size(60)
            .right_y_label_area_size(10)
            .build_cartesian_2d(0..(THREADS.len() - 1), 0.0..max_mops)?;

        chart
            .configure_mesh()
            .x_labels(THREADS.len())
            .x_label_formatter(&|x| x_labels.get(*x).cloned().unwrap_or_default())
            .x_desc("Threads")
            .y_desc("Million ops / second")
            .axis_desc_style((font_family, text_size))
            .draw()?;

        for (impl_idx, &name) in IMPLEMENTATIONS.iter().enumerate() {
            let color = &colors[impl_idx % colors.len()];
            let line_style = ShapeStyle::from(color).stroke_width(line_width);
            let points = &results[workload_idx][impl_idx];

            chart
                .draw_series(LineSeries::new(points.iter().copied().enumerate(), line_style))?
                .label(name)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], line_style));

            chart.draw_series(
                points
                    .iter()
                    .enumerate()
                    .map(|(i, &mops)| Circle::new((i, mops), marker_size, color.filled())),
            )?;
        }

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .position(SeriesLabelPosition::UpperLeft)
            .draw()?;
    }

    root.present()?;
    println!("Generated plot image: throughput.png");

    Ok(())
}
