//! Property tests for the aggregation statistics and group membership.

use proptest::prelude::*;
use verdict_engine::{
    aggregate::aggregate, AggFunction, Filter, FilterGroup, FilterOp, GroupEngine, GroupJoin,
    GroupMember, Operand, Table,
};
use verdict_model::Value;

fn values(input: &[Option<f64>]) -> Vec<Value> {
    input
        .iter()
        .map(|v| match v {
            Some(x) => Value::Number(*x),
            None => Value::Missing,
        })
        .collect()
}

proptest! {
    #[test]
    fn shifted_geomean_stays_within_the_value_range(
        xs in proptest::collection::vec(0.0f64..1e6, 1..50),
        shift in 0.1f64..100.0,
    ) {
        let vals = values(&xs.iter().copied().map(Some).collect::<Vec<_>>());
        let result = aggregate(vals.iter(), AggFunction::ShiftedGeoMean, shift);
        let Value::Number(g) = result else {
            panic!("expected a number over non-empty input");
        };
        let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
        let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(g >= min - 1e-6);
        prop_assert!(g <= max + 1e-6);
    }

    #[test]
    fn mean_ignores_missing_entries(
        xs in proptest::collection::vec(-1e6f64..1e6, 1..30),
        gaps in proptest::collection::vec(any::<bool>(), 0..30),
    ) {
        // Interleave missing entries; the mean must not change.
        let mut with_gaps: Vec<Option<f64>> = xs.iter().copied().map(Some).collect();
        for (idx, gap) in gaps.iter().enumerate() {
            if *gap {
                with_gaps.insert(idx.min(with_gaps.len()), None);
            }
        }
        let dense = aggregate(
            values(&xs.iter().copied().map(Some).collect::<Vec<_>>()).iter(),
            AggFunction::Mean,
            1.0,
        );
        let sparse = aggregate(values(&with_gaps).iter(), AggFunction::Mean, 1.0);
        let (Value::Number(a), Value::Number(b)) = (dense, sparse) else {
            panic!("expected numbers");
        };
        prop_assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0));
    }

    #[test]
    fn count_plus_countmissing_covers_every_row(
        entries in proptest::collection::vec(proptest::option::of(-1e6f64..1e6), 0..40),
    ) {
        let vals = values(&entries);
        let count = aggregate(vals.iter(), AggFunction::Count, 1.0);
        let missing = aggregate(vals.iter(), AggFunction::CountMissing, 1.0);
        let (Value::Int(c), Value::Int(m)) = (count, missing) else {
            panic!("counts are integers");
        };
        prop_assert_eq!(c + m, entries.len() as i64);
    }

    #[test]
    fn membership_is_a_partition_under_negation(
        times in proptest::collection::vec(proptest::option::of(0.0f64..100.0), 1..40),
        threshold in 0.0f64..100.0,
    ) {
        let mut table = Table::new(vec!["Time".to_string()]);
        for t in &times {
            table.push_row(vec![match t {
                Some(x) => Value::Number(*x),
                None => Value::Missing,
            }]);
        }

        let filters = vec![Filter::new(
            "slow",
            "Time",
            FilterOp::Ge,
            Some(Operand::Literal(Value::Number(threshold))),
        )];
        let groups = vec![
            FilterGroup::new("slow", GroupJoin::All)
                .with_member(GroupMember::Filter("slow".to_string())),
            FilterGroup::new("rest", GroupJoin::All)
                .with_member(GroupMember::Filter("slow".to_string()))
                .negated(),
        ];
        let mut engine = GroupEngine::new(&filters, &groups).unwrap();
        let slow = engine.membership("slow", &table).unwrap();
        let rest = engine.membership("rest", &table).unwrap();

        // Disjoint, exhaustive, and in row order.
        let mut union: Vec<usize> = slow.iter().chain(rest.iter()).copied().collect();
        union.sort_unstable();
        let expected: Vec<usize> = (0..times.len()).collect();
        prop_assert_eq!(union, expected);
        prop_assert!(slow.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(rest.windows(2).all(|w| w[0] < w[1]));
    }
}
