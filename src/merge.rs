use crate::models::{BucketKey, CostRow, UsageRecord, UsageRow};
use std::collections::BTreeMap;

#[derive(Default)]
struct KeyGroup<'a> {
    usage: Vec<&'a UsageRow>,
    cost: Vec<&'a CostRow>,
}

/// Full outer join of usage and cost rows on their bucket.
///
/// Every bucket seen on either side survives. A bucket present on one side
/// only yields records whose other side is `None`. Duplicate keys are not
/// collapsed: a key with `m` usage rows and `n` cost rows yields `m * n`
/// records. Output is ordered by bucket, then usage row, then cost row, each
/// in input order.
pub fn merge(usage: &[UsageRow], cost: &[CostRow]) -> Vec<UsageRecord> {
    let mut groups: BTreeMap<BucketKey, KeyGroup<'_>> = BTreeMap::new();
    for row in usage {
        groups.entry(row.bucket).or_default().usage.push(row);
    }
    for row in cost {
        groups.entry(row.bucket).or_default().cost.push(row);
    }

    let mut merged = Vec::with_capacity(usage.len().max(cost.len()));
    for (bucket, group) in groups {
        match (group.usage.is_empty(), group.cost.is_empty()) {
            (false, false) => {
                for u in &group.usage {
                    for c in &group.cost {
                        merged.push(UsageRecord {
                            bucket,
                            usage: Some(u.usage.clone()),
                            cost: Some(c.cost.clone()),
                        });
                    }
                }
            }
            (false, true) => merged.extend(group.usage.iter().map(|u| UsageRecord {
                bucket,
                usage: Some(u.usage.clone()),
                cost: None,
            })),
            (true, false) => merged.extend(group.cost.iter().map(|c| UsageRecord {
                bucket,
                usage: None,
                cost: Some(c.cost.clone()),
            })),
            (true, true) => {}
        }
    }
    merged
}
