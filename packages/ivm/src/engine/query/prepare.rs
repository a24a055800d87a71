use super::model::{Cardinality, Include, IncludeKey, Query, SyntheticKey};

/// Build the internal form of a query.
///
/// Every `exists` filter gets a mirrored synthetic include (numbered
/// depth-first) and every relational order clause a synthetic single-row
/// include keyed by its relation alias, at every nesting level. The
/// `where` clause itself is left as written.
pub fn prepare(query: &Query) -> Query {
    let mut prepared = query.clone();

    prepared.include = query
        .include
        .iter()
        .map(|(key, include)| {
            (
                key.clone(),
                Include {
                    subquery: prepare(&include.subquery),
                    cardinality: include.cardinality,
                },
            )
        })
        .collect();

    let mut exists = Vec::new();
    for filter in &query.filters {
        filter.collect_exists(&mut exists);
    }
    for (n, subquery) in exists.into_iter().enumerate() {
        prepared.include.insert(
            IncludeKey::Synthetic(SyntheticKey::Exists(n)),
            Include {
                subquery: prepare(subquery),
                cardinality: Cardinality::Many,
            },
        );
    }

    for clause in &query.order {
        let (Some(key), Some(relation)) = (clause.relation_key(), clause.relation.as_deref()) else {
            continue;
        };
        prepared.include.entry(key).or_insert_with(|| Include {
            subquery: prepare(relation),
            cardinality: Cardinality::One,
        });
    }

    prepared
}
