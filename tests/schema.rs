use anyhow::Result;
use rowchain::testing::events_schema;
use rowchain::{Record, Row, ScalarType, Schema, Shape, Value};

#[test]
fn schema_shape_follows_field_order() {
    let schema = events_schema();
    assert_eq!(schema.len(), 3);
    assert_eq!(
        schema.shape(),
        Shape::new(vec![ScalarType::Float, ScalarType::Int, ScalarType::Double])
    );
    assert_eq!(schema.shape().to_string(), "(float, int, double)");
    assert_eq!(schema.index_of("y"), Some(1));
    assert_eq!(schema.index_of("w"), None);
}

#[test]
fn tuple_rows_report_their_shape() {
    assert_eq!(
        <(f32, i32, f64)>::shape(),
        Shape::new(vec![ScalarType::Float, ScalarType::Int, ScalarType::Double])
    );
    assert_eq!(<i32>::shape(), <(i32,)>::shape());
    assert_eq!(
        <(u32, i64, bool)>::shape().to_string(),
        "(uint, long, bool)"
    );
}

#[test]
fn rows_convert_to_and_from_records() -> Result<()> {
    let record = (2_i32, 1.0_f32).into_record();
    assert_eq!(record.values(), &[Value::Int(2), Value::Float(1.0)]);

    let back = <(i32, f32)>::from_record(&record).ok_or_else(|| anyhow::anyhow!("no row"))?;
    assert_eq!(back, (2, 1.0));

    // Same arity, wrong types.
    assert!(<(f32, i32)>::from_record(&record).is_none());
    // Wrong arity.
    assert!(<i32>::from_record(&record).is_none());
    Ok(())
}

#[test]
fn values_widen_to_f64_except_bool() {
    assert_eq!(Value::Int(-3).as_f64(), Some(-3.0));
    assert_eq!(Value::UInt(7).as_f64(), Some(7.0));
    assert_eq!(Value::Long(1 << 40).as_f64(), Some(1_099_511_627_776.0));
    assert_eq!(Value::Float(0.5).as_f64(), Some(0.5));
    assert_eq!(Value::Bool(true).as_f64(), None);
    assert!(!ScalarType::Bool.is_numeric());
    assert_eq!(Value::zero(ScalarType::Long), Value::Long(0));
}

#[test]
fn record_shape_is_taken_from_values() {
    let record = Record::new(vec![Value::Bool(false), Value::Double(1.5)]);
    assert_eq!(record.shape(), Shape::new(vec![ScalarType::Bool, ScalarType::Double]));
    assert_eq!(record.get(1), Some(Value::Double(1.5)));
    assert_eq!(record.get(2), None);
}

#[test]
fn schema_round_trips_through_json() -> Result<()> {
    let schema = Schema::new([("a", ScalarType::UInt), ("b", ScalarType::Bool)]);
    let text = serde_json::to_string(&schema)?;
    assert!(text.contains(r#""type":"uint""#));
    let back: Schema = serde_json::from_str(&text)?;
    assert_eq!(back, schema);
    Ok(())
}
