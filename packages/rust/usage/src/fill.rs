use serde_json::Value;

use schemalib_shared::{FieldDescribe, FieldFillRate};

/// Per-field fill rates over `records`, in describe field order.
///
/// A value counts as filled unless it is absent, `null`, or the empty
/// string. The record's `attributes` key is never a field.
pub fn fill_rates(fields: &[FieldDescribe], records: &[Value]) -> Vec<FieldFillRate> {
    let sample_size = records.len();

    fields
        .iter()
        .filter(|f| !f.name.is_empty() && f.name != "attributes")
        .map(|field| {
            let non_null = records
                .iter()
                .filter_map(Value::as_object)
                .filter(|record| is_filled(record.get(&field.name)))
                .count();
            FieldFillRate {
                field: field.name.clone(),
                non_null,
                sample_size,
                non_null_pct: fraction(non_null, sample_size),
            }
        })
        .collect()
}

/// The `top_n` best-populated fields: fill rate descending, then filled
/// count descending; otherwise input order is kept.
pub fn top_fill_rates(mut rates: Vec<FieldFillRate>, top_n: usize) -> Vec<FieldFillRate> {
    rates.sort_by(|a, b| {
        b.non_null_pct
            .total_cmp(&a.non_null_pct)
            .then_with(|| b.non_null.cmp(&a.non_null))
    });
    rates.truncate(top_n);
    rates
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn fraction(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<FieldDescribe> {
        names
            .iter()
            .map(|n| serde_json::from_value(json!({"name": n, "type": "string"})).unwrap())
            .collect()
    }

    #[test]
    fn null_and_empty_are_not_filled() {
        let records = vec![
            json!({"attributes": {"type": "Lead"}, "Name": "A", "Email": null, "Phone": ""}),
            json!({"Name": "B", "Email": "b@example.com", "Phone": 0}),
            json!({"Name": "", "Email": null}),
        ];
        let rates = fill_rates(&fields(&["Name", "Email", "Phone", "Fax"]), &records);

        assert_eq!(rates[0].non_null, 2);
        assert!((rates[0].non_null_pct - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(rates[1].non_null_pct, 1.0 / 3.0);
        assert_eq!(rates[1].non_null, 1);
        assert_eq!(rates[2].non_null, 1);
        assert_eq!(rates[3].non_null, 0);
        assert!(rates.iter().all(|r| r.sample_size == 3));
    }

    #[test]
    fn empty_sample_gives_zero_rates() {
        let rates = fill_rates(&fields(&["Name"]), &[]);
        assert_eq!(rates[0].non_null_pct, 0.0);
        assert_eq!(rates[0].sample_size, 0);
    }

    #[test]
    fn ranking_breaks_ties_by_count_then_keeps_order() {
        let rate = |field: &str, non_null, sample_size, pct| FieldFillRate {
            field: field.into(),
            non_null,
            sample_size,
            non_null_pct: pct,
        };
        let ranked = top_fill_rates(
            vec![
                rate("Low", 1, 10, 0.1),
                rate("FirstFull", 10, 10, 1.0),
                rate("SecondFull", 10, 10, 1.0),
                rate("Mid", 5, 10, 0.5),
                rate("MidMoreRows", 6, 12, 0.5),
            ],
            4,
        );
        let names: Vec<_> = ranked.iter().map(|r| r.field.as_str()).collect();
        assert_eq!(names, vec!["FirstFull", "SecondFull", "MidMoreRows", "Mid"]);
    }
}
