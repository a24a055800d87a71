use crate::engine::query::CompareOp;
use crate::engine::types::{DataValue, NULL_VALUE};
use std::cmp::Ordering;

/// Total order over optional values. A missing value sorts before
/// everything, values of different kinds sort by kind.
pub fn compare_values(a: Option<&DataValue>, b: Option<&DataValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(va), Some(vb)) => match (va, vb) {
            (DataValue::Null, DataValue::Null) => Ordering::Equal,
            (DataValue::Bool(ba), DataValue::Bool(bb)) => ba.cmp(bb),
            (DataValue::Number(na), DataValue::Number(nb)) => {
                na.partial_cmp(nb).unwrap_or(Ordering::Equal)
            }
            (DataValue::Str(sa), DataValue::Str(sb)) => sa.cmp(sb),
            (DataValue::Array(aa), DataValue::Array(ab)) => {
                for (ia, ib) in aa.iter().zip(ab.iter()) {
                    let cmp = compare_values(Some(ia), Some(ib));
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                aa.len().cmp(&ab.len())
            }
            (DataValue::Object(oa), DataValue::Object(ob)) => {
                for ((ka, va), (kb, vb)) in oa.iter().zip(ob.iter()) {
                    let cmp = ka
                        .cmp(kb)
                        .then_with(|| compare_values(Some(va), Some(vb)));
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                oa.len().cmp(&ob.len())
            }
            _ => va.type_rank().cmp(&vb.type_rank()),
        },
    }
}

pub fn values_equal(a: &DataValue, b: &DataValue) -> bool {
    compare_values(Some(a), Some(b)) == Ordering::Equal
}

/// Apply `op` between an attribute value (`None` when absent) and a target.
pub fn compare_op(op: CompareOp, actual: Option<&DataValue>, target: &DataValue) -> bool {
    let present = actual.filter(|v| !v.is_null());
    match op {
        CompareOp::Eq => values_equal(actual.unwrap_or(&NULL_VALUE), target),
        CompareOp::Neq => !values_equal(actual.unwrap_or(&NULL_VALUE), target),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let Some(value) = present else {
                return false;
            };
            if target.is_null() || value.type_rank() != target.type_rank() {
                return false;
            }
            let ord = compare_values(Some(value), Some(target));
            match op {
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Gte => ord != Ordering::Less,
                CompareOp::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            }
        }
        CompareOp::In => contains(target, actual.unwrap_or(&NULL_VALUE)),
        CompareOp::Nin => !contains(target, actual.unwrap_or(&NULL_VALUE)),
        CompareOp::Prefix => match (present, target) {
            (Some(DataValue::Str(s)), DataValue::Str(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        CompareOp::Has => present.is_some_and(|value| contains(value, target)),
    }
}

fn contains(haystack: &DataValue, needle: &DataValue) -> bool {
    haystack
        .as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(item, needle)))
}

#[cfg(test)]
mod compare_values_tests {
    use super::*;

    #[test]
    fn test_none_is_minimum() {
        let v = DataValue::Null;
        assert_eq!(compare_values(None, Some(&v)), Ordering::Less);
        assert_eq!(compare_values(Some(&v), None), Ordering::Greater);
        assert_eq!(compare_values(None, None), Ordering::Equal);
    }

    #[test]
    fn test_numbers_and_strings() {
        let a = DataValue::from(1);
        let b = DataValue::from(2.5);
        assert_eq!(compare_values(Some(&a), Some(&b)), Ordering::Less);
        let s1 = DataValue::from("apple");
        let s2 = DataValue::from("banana");
        assert_eq!(compare_values(Some(&s2), Some(&s1)), Ordering::Greater);
    }

    #[test]
    fn test_different_kinds_by_rank() {
        let n = DataValue::from(100);
        let s = DataValue::from("1");
        assert_eq!(compare_values(Some(&n), Some(&s)), Ordering::Less);
    }

    #[test]
    fn test_arrays_lexicographic() {
        let a = DataValue::from(vec![1, 2]);
        let b = DataValue::from(vec![1, 2, 0]);
        let c = DataValue::from(vec![2]);
        assert_eq!(compare_values(Some(&a), Some(&b)), Ordering::Less);
        assert_eq!(compare_values(Some(&c), Some(&b)), Ordering::Greater);
    }
}
