use anyhow::{anyhow, bail, Result};
use rowchain::testing::{assert_fault_at, events_rows, events_schema, Probe};
use rowchain::{
    execute_batch, execute_chain, Batch, Lanes, Mask, Pipeline, PipelineError, Record, Row, Stage,
    Value,
};
use std::sync::Arc;

fn scenario() -> rowchain::Result<Pipeline> {
    Pipeline::new(events_schema())
        .map(|(x, y, _z): (f32, i32, f64)| (y, x))?
        .filter(|(y, _x): (i32, f32)| y <= 5)?
        .map(|(y, _x): (i32, f32)| y * y + 1)
}

#[test]
fn scenario_emits_five_for_the_first_row_only() -> Result<()> {
    let p = scenario()?;
    let outputs = events_rows()
        .into_iter()
        .map(|r| execute_chain(&p, r))
        .collect::<rowchain::Result<Vec<_>>>()?;
    assert_eq!(outputs, vec![Some(Record::new(vec![Value::Int(5)])), None]);
    Ok(())
}

#[test]
fn unfiltered_chain_composes_left_to_right() -> Result<()> {
    let f = |(x, y, z): (f32, i32, f64)| (f64::from(x) + z, y * 3);
    let g = |(a, b): (f64, i32)| (b, a * 2.0);
    let h = |(b, a): (i32, f64)| a - f64::from(b);

    let p = Pipeline::new(events_schema()).map(f)?.map(g)?.map(h)?;
    for row in events_rows() {
        let typed = <(f32, i32, f64)>::from_record(&row).ok_or_else(|| anyhow!("row"))?;
        let expected = h(g(f(typed))).into_record();
        assert_eq!(execute_chain(&p, row)?, Some(expected));
    }
    Ok(())
}

#[test]
fn empty_chain_returns_its_input() -> Result<()> {
    let p = Pipeline::new(events_schema());
    let row = events_rows().remove(0);
    assert_eq!(execute_chain(&p, row.clone())?, Some(row));
    Ok(())
}

#[test]
fn rejected_records_reach_no_later_stage() -> Result<()> {
    let shape = events_schema().shape();
    let before = Arc::new(Probe::new(shape.clone()));
    let after = Arc::new(Probe::new(shape));
    let p = Pipeline::create(events_schema(), [Stage::Mapper(before.clone())])?
        .filter(|(_x, y, _z): (f32, i32, f64)| y <= 5)?
        .stage(Stage::Mapper(after.clone()))?;

    for row in events_rows() {
        execute_chain(&p, row)?;
    }
    assert_eq!(before.calls(), 2);
    assert_eq!(after.calls(), 1);
    Ok(())
}

#[test]
fn batched_filter_narrows_the_mask_without_moving_lanes() -> Result<()> {
    let p = Pipeline::new(events_schema())
        .map_batched(|_m: &Mask, (x, y, _z): (Lanes<f32>, Lanes<i32>, Lanes<f64>)| (y, x))?
        // Rejects lane 0 (y = 2), keeps lane 1 (y = 10).
        .filter_batched(|_m: &Mask, (y, _x): (Lanes<i32>, Lanes<f32>)| y.test(|v| v > 5))?;

    let batch = Batch::pack(&events_schema().shape(), &events_rows())
        .ok_or_else(|| anyhow!("pack"))?;
    let out = execute_batch(&p, batch)?.ok_or_else(|| anyhow!("lane 1 survives"))?;

    assert_eq!(out.mask.valid_lanes().collect::<Vec<_>>(), vec![1]);
    assert_eq!(
        out.valid_records(),
        vec![Record::new(vec![Value::Int(10), Value::Float(9.0)])]
    );
    // Lane 0 is masked, not removed: its mapped values are still in place.
    assert_eq!(out.record.lane_record(0), Some(Record::new(vec![Value::Int(2), Value::Float(1.0)])));
    Ok(())
}

#[test]
fn batched_filter_cannot_revive_invalid_lanes() -> Result<()> {
    let probe = Arc::new(Probe::batched(events_schema().shape()));
    let p = Pipeline::new(events_schema())
        .filter_batched(|_m: &Mask, (_x, _y, _z): (Lanes<f32>, Lanes<i32>, Lanes<f64>)| Mask::all())?
        .stage(Stage::Mapper(probe.clone()))?;

    let batch = Batch::pack(&events_schema().shape(), &events_rows())
        .ok_or_else(|| anyhow!("pack"))?;
    let out = execute_batch(&p, batch)?.ok_or_else(|| anyhow!("batch survives"))?;
    assert_eq!(out.mask, Mask::first(2));
    assert_eq!(probe.rows(), 2);
    Ok(())
}

#[test]
fn batch_with_no_live_lane_stops_the_chain() -> Result<()> {
    let probe = Arc::new(Probe::batched(events_schema().shape()));
    let p = Pipeline::new(events_schema())
        .filter_batched(|_m: &Mask, (_x, y, _z): (Lanes<f32>, Lanes<i32>, Lanes<f64>)| {
            y.test(|v| v > 100)
        })?
        .stage(Stage::Mapper(probe.clone()))?;

    let batch = Batch::pack(&events_schema().shape(), &events_rows())
        .ok_or_else(|| anyhow!("pack"))?;
    assert_eq!(execute_batch(&p, batch)?, None);
    assert_eq!(probe.calls(), 0);
    Ok(())
}

#[test]
fn failing_stage_reports_its_index() -> Result<()> {
    let p = Pipeline::new(events_schema())
        .map(|(x, _y, _z): (f32, i32, f64)| x)?
        .try_map(|x: f32| -> Result<f32> {
            if x > 5.0 {
                bail!("x too large: {x}");
            }
            Ok(x)
        })?;

    let mut rows = events_rows().into_iter();
    let first = rows.next().ok_or_else(|| anyhow!("row"))?;
    let second = rows.next().ok_or_else(|| anyhow!("row"))?;
    assert_eq!(execute_chain(&p, first)?, Some(Record::new(vec![Value::Float(1.0)])));

    let err = execute_chain(&p, second).unwrap_err();
    assert_eq!(err.fault_stage(), Some(1));
    match err {
        PipelineError::StageFault { name, source, .. } => {
            assert_eq!(name, "try_map");
            assert!(source.to_string().contains("too large"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn try_filter_errors_become_faults() -> Result<()> {
    let p = Pipeline::new(events_schema())
        .try_filter(|(_x, y, _z): (f32, i32, f64)| -> Result<bool> {
            if y == 10 { bail!("bad row") } else { Ok(true) }
        })?;
    let row = events_rows().remove(1);
    assert_fault_at(execute_chain(&p, row), 0);
    Ok(())
}

#[test]
fn scalar_record_through_batched_chain_is_a_fault() -> Result<()> {
    let p = Pipeline::new(events_schema())
        .map_batched(|_m: &Mask, v: (Lanes<f32>, Lanes<i32>, Lanes<f64>)| v)?;
    assert_fault_at(execute_chain(&p, events_rows().remove(0)), 0);
    Ok(())
}

#[test]
fn retired_handle_cannot_dispatch() -> Result<()> {
    let p = scenario()?;
    let stale = p.clone();
    let _newer = p.count()?;
    assert!(matches!(
        execute_chain(&stale, events_rows().remove(0)),
        Err(PipelineError::InvalidPipeline)
    ));
    Ok(())
}
