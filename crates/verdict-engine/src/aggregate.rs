use serde::{Deserialize, Serialize};
use verdict_model::Value;

/// Statistic applied to a column within one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunction {
    Mean,
    Sum,
    Min,
    Max,
    /// Number of non-missing values.
    Count,
    /// Number of missing values; the one statistic missing data feeds.
    CountMissing,
    Median,
    /// Geometric mean of `x + shift`, with the shift subtracted again.
    /// Tolerates zero and near-zero values.
    ShiftedGeoMean,
}

impl AggFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggFunction::Mean => "mean",
            AggFunction::Sum => "sum",
            AggFunction::Min => "min",
            AggFunction::Max => "max",
            AggFunction::Count => "count",
            AggFunction::CountMissing => "countmissing",
            AggFunction::Median => "median",
            AggFunction::ShiftedGeoMean => "shmean",
        }
    }

    pub fn from_name(name: &str) -> Option<AggFunction> {
        match name {
            "mean" => Some(AggFunction::Mean),
            "sum" => Some(AggFunction::Sum),
            "min" => Some(AggFunction::Min),
            "max" => Some(AggFunction::Max),
            "count" => Some(AggFunction::Count),
            "countmissing" => Some(AggFunction::CountMissing),
            "median" => Some(AggFunction::Median),
            "shmean" => Some(AggFunction::ShiftedGeoMean),
            _ => None,
        }
    }
}

/// (column, statistic) pair with rendering attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub column: String,
    pub function: AggFunction,
    /// Shift constant for [`AggFunction::ShiftedGeoMean`]; must be positive.
    pub shift: f64,
    /// printf code for rendering the aggregate.
    pub format: Option<String>,
    /// Display name override; defaults to the function name.
    pub name: Option<String>,
}

impl AggregationSpec {
    pub fn new(column: impl Into<String>, function: AggFunction) -> Self {
        Self {
            column: column.into(),
            function,
            shift: 1.0,
            format: None,
            name: None,
        }
    }

    pub fn with_shift(mut self, shift: f64) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_format(mut self, code: impl Into<String>) -> Self {
        self.format = Some(code.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Column label of this aggregate in the summary table, e.g. `Time_shmean`.
    pub fn label(&self) -> String {
        let suffix = self
            .name
            .as_deref()
            .unwrap_or_else(|| self.function.name());
        format!("{}_{}", self.column, suffix)
    }
}

/// Reduce a sequence of values to one statistic.
///
/// Missing values are excluded everywhere except `CountMissing`; an
/// all-missing input aggregates to missing. Counts come back as integers,
/// every other statistic as a number.
pub fn aggregate<'a, I>(values: I, function: AggFunction, shift: f64) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut numbers: Vec<f64> = Vec::new();
    let mut missing = 0usize;
    let mut present = 0usize;
    for value in values {
        if value.is_missing() {
            missing += 1;
            continue;
        }
        present += 1;
        if let Some(x) = value.as_number() {
            numbers.push(x);
        }
    }

    match function {
        AggFunction::Count => return Value::Int(present as i64),
        AggFunction::CountMissing => return Value::Int(missing as i64),
        _ => {}
    }

    if numbers.is_empty() {
        return Value::Missing;
    }
    let n = numbers.len() as f64;

    match function {
        AggFunction::Mean => Value::Number(numbers.iter().sum::<f64>() / n),
        AggFunction::Sum => Value::Number(numbers.iter().sum()),
        AggFunction::Min => Value::Number(numbers.iter().copied().fold(f64::INFINITY, f64::min)),
        AggFunction::Max => {
            Value::Number(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        }
        AggFunction::Median => {
            numbers.sort_by(|a, b| a.total_cmp(b));
            let mid = numbers.len() / 2;
            if numbers.len() % 2 == 1 {
                Value::Number(numbers[mid])
            } else {
                Value::Number((numbers[mid - 1] + numbers[mid]) / 2.0)
            }
        }
        AggFunction::ShiftedGeoMean => {
            // Values that are still non-positive after the shift have no
            // logarithm; exclude them like missing data.
            let logs: Vec<f64> = numbers
                .iter()
                .filter(|&&x| x + shift > 0.0)
                .map(|&x| (x + shift).ln())
                .collect();
            if logs.is_empty() {
                return Value::Missing;
            }
            let mean_log = logs.iter().sum::<f64>() / logs.len() as f64;
            Value::Number(mean_log.exp() - shift)
        }
        AggFunction::Count | AggFunction::CountMissing => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(input: &[Option<f64>]) -> Vec<Value> {
        input
            .iter()
            .map(|v| match v {
                Some(x) => Value::Number(*x),
                None => Value::Missing,
            })
            .collect()
    }

    fn run(input: &[Option<f64>], function: AggFunction) -> Value {
        aggregate(values(input).iter(), function, 1.0)
    }

    #[test]
    fn mean_and_count_exclude_missing() {
        let input = [Some(2.0), None, Some(4.0)];
        assert_eq!(run(&input, AggFunction::Mean), Value::Number(3.0));
        assert_eq!(run(&input, AggFunction::Count), Value::Int(2));
        assert_eq!(run(&input, AggFunction::CountMissing), Value::Int(1));
    }

    #[test]
    fn shifted_geometric_mean_with_unit_shift() {
        // sqrt((0+1)*(3+1)) - 1 == 1.0
        let result = run(&[Some(0.0), Some(3.0)], AggFunction::ShiftedGeoMean);
        let Value::Number(x) = result else {
            panic!("expected a number, got {result:?}");
        };
        assert!((x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn shifted_geometric_mean_honors_custom_shift() {
        let result = aggregate(
            values(&[Some(10.0), Some(10.0)]).iter(),
            AggFunction::ShiftedGeoMean,
            10.0,
        );
        let Value::Number(x) = result else {
            panic!("expected a number, got {result:?}");
        };
        assert!((x - 10.0).abs() < 1e-9);
    }

    #[test]
    fn all_missing_aggregates_to_missing() {
        assert_eq!(run(&[None, None], AggFunction::Mean), Value::Missing);
        assert_eq!(run(&[None, None], AggFunction::Count), Value::Int(0));
        assert_eq!(run(&[None, None], AggFunction::CountMissing), Value::Int(2));
    }

    #[test]
    fn median_midpoints_even_counts() {
        assert_eq!(
            run(&[Some(1.0), Some(9.0), Some(3.0)], AggFunction::Median),
            Value::Number(3.0)
        );
        assert_eq!(
            run(&[Some(1.0), Some(3.0)], AggFunction::Median),
            Value::Number(2.0)
        );
    }

    #[test]
    fn min_max_sum() {
        let input = [Some(4.0), Some(-1.0), None, Some(2.5)];
        assert_eq!(run(&input, AggFunction::Min), Value::Number(-1.0));
        assert_eq!(run(&input, AggFunction::Max), Value::Number(4.0));
        assert_eq!(run(&input, AggFunction::Sum), Value::Number(5.5));
    }

    #[test]
    fn labels_join_column_and_statistic() {
        let spec = AggregationSpec::new("Time", AggFunction::ShiftedGeoMean).with_shift(10.0);
        assert_eq!(spec.label(), "Time_shmean");
        let named = AggregationSpec::new("Time", AggFunction::Mean).with_name("avg");
        assert_eq!(named.label(), "Time_avg");
    }

    #[test]
    fn text_values_count_but_do_not_aggregate() {
        let input = vec![Value::Text("ok".into()), Value::Number(2.0)];
        assert_eq!(aggregate(input.iter(), AggFunction::Count, 1.0), Value::Int(2));
        assert_eq!(
            aggregate(input.iter(), AggFunction::Mean, 1.0),
            Value::Number(2.0)
        );
    }
}
