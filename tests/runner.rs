use anyhow::{anyhow, Result};
use rowchain::testing::{
    assert_close, assert_fault_at, assert_metric, events_schema, events_source, numeric_rows,
    numeric_source, Probe, EVENTS_TABLE,
};
use rowchain::{
    Count, ExecMode, Lanes, Mask, MemorySource, MemoryTable, Mode, Pipeline, PipelineError,
    Runner, Source, Stage, Sum,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scenario() -> rowchain::Result<Pipeline> {
    Pipeline::new(events_schema())
        .map(|(x, y, _z): (f32, i32, f64)| (y, x))?
        .filter(|(y, _x): (i32, f32)| y <= 5)?
        .map(|(y, _x): (i32, f32)| y * y + 1)
}

/// Keeps rows with y <= 5 and counts them.
fn counting() -> rowchain::Result<Pipeline> {
    Pipeline::new(events_schema())
        .filter(|(_x, y, _z): (f32, i32, f64)| y <= 5)?
        .count()
}

fn count_of(summary: &rowchain::RunSummary) -> Result<u64> {
    let last = summary.stages.len() - 1;
    summary
        .metric(last, "count")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| anyhow!("no count reported"))
}

#[test]
fn sequential_scenario_collects_one_value() -> Result<()> {
    init_tracing();
    let source = events_source()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let summary = scenario()?
        .for_each(move |v: i32| sink.lock().unwrap().push(v))?
        .process(EVENTS_TABLE, &[&source])?;

    assert_eq!(*seen.lock().unwrap(), vec![5]);
    assert_eq!(summary.rows_read, 2);
    assert_eq!(summary.emitted, 1);
    assert_eq!(summary.partitions, 1);
    assert_eq!(summary.mode, Mode::Scalar);
    assert_eq!(summary.exec, ExecMode::Sequential);
    assert!(summary.completed());
    Ok(())
}

#[test]
fn sequential_run_preserves_storage_order() -> Result<()> {
    let source = numeric_source("mem://n", 100, 7)?;
    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);

    Pipeline::new(events_schema())
        .for_each(move |(x, _y, _z): (f32, i32, f64)| sink.lock().unwrap().push(x))?
        .process(EVENTS_TABLE, &[&source])?;

    let expected: Vec<f32> = (0..100).map(|i| (i % 97) as f32).collect();
    assert_eq!(*order.lock().unwrap(), expected);
    Ok(())
}

#[test]
fn parallel_count_matches_sequential_for_any_partitioning() -> Result<()> {
    let rows = 1_000;
    let reference = {
        let source = numeric_source("mem://ref", rows, 0)?;
        count_of(&counting()?.process(EVENTS_TABLE, &[&source])?)?
    };
    let expected = numeric_rows(rows)
        .iter()
        .filter(|r| matches!(r.get(1), Some(rowchain::Value::Int(y)) if y <= 5))
        .count() as u64;
    assert_eq!(reference, expected);

    for cluster_rows in [1, 7, 64, 333, 0] {
        for threads in [1, 2, 8] {
            let source = numeric_source("mem://par", rows, cluster_rows)?;
            let summary = Runner::parallel(threads).run(counting()?, EVENTS_TABLE, &[&source])?;
            assert_eq!(
                count_of(&summary)?,
                reference,
                "cluster_rows={cluster_rows} threads={threads}"
            );
            assert_eq!(summary.rows_read, rows as u64);
        }
    }
    Ok(())
}

#[test]
fn parallel_run_covers_every_source() -> Result<()> {
    let a = numeric_source("mem://a", 250, 16)?;
    let b = numeric_source("mem://b", 90, 40)?;
    let summary = Runner::parallel(4).run(
        Pipeline::new(events_schema()).count()?,
        EVENTS_TABLE,
        &[&a, &b],
    )?;
    assert_eq!(count_of(&summary)?, 340);
    // 16 clusters of a, 3 of b.
    assert_eq!(summary.partitions, 16 + 3);
    assert_eq!(summary.sources, vec!["mem://a".to_string(), "mem://b".to_string()]);
    Ok(())
}

#[test]
fn batched_totals_match_scalar_totals() -> Result<()> {
    let rows = 203; // not a multiple of the lane width
    let scalar_count = Arc::new(Count::new(rowchain::Shape::new(vec![
        rowchain::ScalarType::Int,
        rowchain::ScalarType::Float,
    ])));
    let scalar = Pipeline::new(events_schema())
        .map(|(x, y, _z): (f32, i32, f64)| (y, x))?
        .filter(|(y, _x): (i32, f32)| y <= 5)?
        .sum(1)?
        .stage(Stage::Mapper(scalar_count.clone()))?;

    let batched = Pipeline::new(events_schema())
        .map_batched(|_m: &Mask, (x, y, _z): (Lanes<f32>, Lanes<i32>, Lanes<f64>)| (y, x))?
        .filter_batched(|_m: &Mask, (y, _x): (Lanes<i32>, Lanes<f32>)| y.test(|v| v <= 5))?
        .sum(1)?
        .count()?;
    assert_eq!(batched.mode(), Mode::Batched);

    let source = numeric_source("mem://eq", rows, 50)?;
    let s = scalar.process(EVENTS_TABLE, &[&source])?;
    let b = Runner::parallel(3).run(batched, EVENTS_TABLE, &[&source])?;

    assert_eq!(scalar_count.total(), Some(count_of(&b)?));
    assert_eq!(s.emitted, b.emitted);
    let scalar_sum = s.metric(2, "sum").and_then(serde_json::Value::as_f64);
    let batched_sum = b.metric(2, "sum").and_then(serde_json::Value::as_f64);
    assert_close(
        scalar_sum.ok_or_else(|| anyhow!("scalar sum"))?,
        batched_sum.ok_or_else(|| anyhow!("batched sum"))?,
    );
    // 50-row clusters give 7 batches each (6 full, 1 of 2), 3 rows in the tail.
    assert_eq!(b.batches, 4 * 7 + 1);
    Ok(())
}

#[test]
fn missing_table_fails_before_any_row_is_read() -> Result<()> {
    let present = events_source()?;
    let absent = MemorySource::new("mem://empty");
    let probe = Arc::new(Probe::new(events_schema().shape()));
    let p = Pipeline::create(events_schema(), [Stage::Mapper(probe.clone())])?;

    match p.process(EVENTS_TABLE, &[&present, &absent]) {
        Err(PipelineError::NoSuchSource { table, source_name }) => {
            assert_eq!(table, EVENTS_TABLE);
            assert_eq!(source_name, "mem://empty");
        }
        other => panic!("expected NoSuchSource, got {other:?}"),
    }
    assert_eq!(probe.calls(), 0);
    assert_eq!(probe.finalized(), 0);
    Ok(())
}

#[test]
fn schema_is_bound_against_table_columns() -> Result<()> {
    let renamed = MemorySource::new("mem://r").with_table(
        MemoryTable::new(EVENTS_TABLE)
            .with_column("x", vec![1.0_f32])
            .with_column("yy", vec![2_i32])
            .with_column("z", vec![0.0_f64]),
    )?;
    let err = Pipeline::new(events_schema())
        .count()?
        .process(EVENTS_TABLE, &[&renamed])
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoSuchColumn { ref column, .. } if column == "y"));

    let retyped = MemorySource::new("mem://t").with_table(
        MemoryTable::new(EVENTS_TABLE)
            .with_column("x", vec![1.0_f64])
            .with_column("y", vec![2_i32])
            .with_column("z", vec![0.0_f64]),
    )?;
    let err = Pipeline::new(events_schema())
        .count()?
        .process_parallel(EVENTS_TABLE, &[&retyped])
        .unwrap_err();
    assert!(matches!(err, PipelineError::ColumnTypeMismatch { ref column, .. } if column == "x"));
    Ok(())
}

#[test]
fn schema_may_read_a_subset_of_columns_in_any_order() -> Result<()> {
    let source = events_source()?;
    let schema = rowchain::Schema::new([("z", rowchain::ScalarType::Double), ("y", rowchain::ScalarType::Int)]);
    let total = Arc::new(AtomicU64::new(0));
    let acc = Arc::clone(&total);
    Pipeline::new(schema)
        .for_each(move |(_z, y): (f64, i32)| {
            acc.fetch_add(u64::try_from(y).unwrap_or(0), Ordering::Relaxed);
        })?
        .process(EVENTS_TABLE, &[&source])?;
    assert_eq!(total.load(Ordering::Relaxed), 12);
    Ok(())
}

#[test]
fn stage_fault_aborts_the_run_and_skips_finalize() -> Result<()> {
    init_tracing();
    let source = numeric_source("mem://f", 500, 25)?;
    for runner in [Runner::sequential(), Runner::parallel(4)] {
        let probe = Arc::new(Probe::new(events_schema().shape()).failing_at(40));
        let p = Pipeline::create(events_schema(), [Stage::Mapper(probe.clone())])?.count()?;
        assert_fault_at(runner.run(p, EVENTS_TABLE, &[&source]), 0);
        assert_eq!(probe.finalized(), 0);
    }
    Ok(())
}

#[test]
fn finalize_runs_once_per_stage_in_order() -> Result<()> {
    let source = numeric_source("mem://fin", 64, 8)?;
    let first = Arc::new(Probe::new(events_schema().shape()));
    let second = Arc::new(Probe::new(events_schema().shape()));
    let p = Pipeline::create(
        events_schema(),
        [Stage::Mapper(first.clone()), Stage::Mapper(second.clone())],
    )?;
    let summary = Runner::parallel(4).run(p, EVENTS_TABLE, &[&source])?;

    assert_eq!((first.finalized(), second.finalized()), (1, 1));
    assert_eq!(
        summary.stages.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(summary.metric(1, "rows"), Some(&json!(64)));
    Ok(())
}

#[test]
fn finalize_error_faults_the_run_and_stops_later_stages() -> Result<()> {
    init_tracing();
    let source = numeric_source("mem://finerr", 40, 8)?;
    for runner in [Runner::sequential(), Runner::parallel(3)] {
        let first = Arc::new(Probe::new(events_schema().shape()));
        let failing = Arc::new(Probe::new(events_schema().shape()).failing_finalize());
        let last = Arc::new(Probe::new(events_schema().shape()));
        let p = Pipeline::create(
            events_schema(),
            [
                Stage::Mapper(first.clone()),
                Stage::Mapper(failing.clone()),
                Stage::Mapper(last.clone()),
            ],
        )?;

        match runner.run(p, EVENTS_TABLE, &[&source]) {
            Err(PipelineError::StageFault { stage, name, .. }) => {
                assert_eq!((stage, name.as_str()), (1, "probe"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("finalize failure should fail the run"),
        }
        assert_eq!(failing.rows(), 40);
        assert_eq!((first.finalized(), failing.finalized(), last.finalized()), (1, 1, 0));
    }
    Ok(())
}

#[test]
fn incomplete_stage_marks_the_summary_incomplete() -> Result<()> {
    let source = events_source()?;
    let incomplete = Arc::new(Probe::new(events_schema().shape()).incomplete());
    let p = Pipeline::create(events_schema(), [Stage::Mapper(incomplete.clone())])?.count()?;
    let summary = p.process(EVENTS_TABLE, &[&source])?;

    assert!(!summary.completed());
    assert_eq!(
        summary.stages.iter().map(|s| s.completed).collect::<Vec<_>>(),
        vec![false, true]
    );
    assert_eq!(count_of(&summary)?, 2);
    Ok(())
}

#[test]
fn batched_for_each_sees_every_live_lane() -> Result<()> {
    let rows = 203;
    let source = numeric_source("mem://sink", rows, 50)?;
    let seen = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&seen);

    let p = Pipeline::new(events_schema())
        .filter_batched(|_m: &Mask, (_x, y, _z): (Lanes<f32>, Lanes<i32>, Lanes<f64>)| {
            y.test(|v| v <= 5)
        })?
        .for_each(move |(_x, y, _z): (f32, i32, f64)| {
            assert!(y <= 5);
            sink.fetch_add(1, Ordering::Relaxed);
        })?;
    assert_eq!(p.mode(), Mode::Batched);
    let summary = Runner::parallel(4).run(p, EVENTS_TABLE, &[&source])?;

    let expected = (0..rows).filter(|i| i % 13 <= 5).count() as u64;
    assert_eq!(expected, 96);
    assert_eq!(seen.load(Ordering::Relaxed), expected);
    assert_eq!(summary.emitted, expected);
    Ok(())
}

#[test]
fn shared_counter_reports_each_run_separately() -> Result<()> {
    let source = numeric_source("mem://shared", 10, 4)?;
    let count = Arc::new(Count::new(events_schema().shape()));
    for _ in 0..2 {
        let p = Pipeline::create(events_schema(), [Stage::Mapper(count.clone())])?;
        let summary = Runner::parallel(2).run(p, EVENTS_TABLE, &[&source])?;
        assert_eq!(count_of(&summary)?, 10);
        assert_eq!(count.summary(), "Counter saw 10 events.");
    }
    Ok(())
}

#[test]
fn ran_pipeline_retires_its_clones() -> Result<()> {
    let source = events_source()?;
    let p = Pipeline::new(events_schema()).count()?;
    let copy = p.clone();
    p.process(EVENTS_TABLE, &[&source])?;
    assert!(!copy.is_live());
    assert!(matches!(
        copy.process(EVENTS_TABLE, &[&source]),
        Err(PipelineError::InvalidPipeline)
    ));
    Ok(())
}

#[test]
fn sum_reduces_across_workers() -> Result<()> {
    let rows = 777;
    let source = numeric_source("mem://sum", rows, 10)?;
    let sum = Arc::new(Sum::new(events_schema().shape(), 2)?);
    let p = Pipeline::create(events_schema(), [Stage::Mapper(sum.clone())])?;
    let summary = Runner::parallel(8).run(p, EVENTS_TABLE, &[&source])?;

    let expected: f64 = (0..rows).map(|i| (i % 7) as f64).sum();
    assert_close(sum.total().ok_or_else(|| anyhow!("finalized"))?, expected);
    assert_metric(&summary, 0, "sum", expected);
    Ok(())
}

#[test]
fn empty_table_runs_and_finalizes() -> Result<()> {
    let source = numeric_source("mem://none", 0, 4)?;
    let summary = Runner::parallel(2).run(
        Pipeline::new(events_schema()).count()?,
        EVENTS_TABLE,
        &[&source as &dyn Source],
    )?;
    assert_eq!(summary.rows_read, 0);
    assert_eq!(summary.partitions, 0);
    assert_eq!(count_of(&summary)?, 0);
    Ok(())
}

#[test]
fn runner_config_loads_from_json() -> Result<()> {
    let seq = Runner::from_json(r#"{ "mode": "sequential" }"#)?;
    assert_eq!(seq.mode, ExecMode::Sequential);
    assert!(seq.default_threads >= 1);

    let par = Runner::from_json(r#"{ "mode": { "parallel": { "threads": null } }, "default_threads": 3 }"#)?;
    assert_eq!(par.mode, ExecMode::Parallel { threads: None });
    assert_eq!(par.default_threads, 3);

    assert!(matches!(Runner::from_json("{ \"mode\": 5 }"), Err(PipelineError::Config(_))));
    Ok(())
}

#[test]
fn summary_serializes_to_json() -> Result<()> {
    let source = events_source()?;
    let summary = counting()?.process(EVENTS_TABLE, &[&source])?;
    let doc = summary.to_json();
    assert_eq!(doc["mode"], json!("scalar"));
    assert_eq!(doc["exec"], json!("sequential"));
    assert_eq!(doc["rows_read"], json!(2));
    assert_eq!(doc["stages"][1]["metrics"]["count"], json!(1));
    assert_eq!(doc["stages"][0]["kind"], json!("Filter"));
    Ok(())
}
