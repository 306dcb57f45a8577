//! Merge strategies
//!
//! A merge strategy combines the hits that successive hierarchy entries
//! produce for one key. Hierarchy order is precedence order: the earlier
//! entry wins on conflict for every strategy.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::value::Value;

/// Options accepted by the `deep` strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeepOptions {
    /// A value with this prefix removes its key from the merge result
    pub knockout_prefix: Option<String>,
    /// Sort merged sequences after concatenation
    pub sort_merged_arrays: bool,
    /// Merge sequences of mappings element-wise instead of concatenating
    pub merge_hash_arrays: bool,
}

/// The rule that combines hits across the hierarchy
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStrategy {
    /// Return the first hit and stop
    First,
    /// Flatten all hits into one de-duplicated sequence
    Unique,
    /// Combine mappings, first-seen key wins
    Hash,
    /// Combine mappings recursively
    Deep(DeepOptions),
}

impl MergeStrategy {
    /// Parse a strategy from its name
    pub fn from_name(name: &str) -> Result<MergeStrategy> {
        match name {
            "first" => Ok(MergeStrategy::First),
            "unique" => Ok(MergeStrategy::Unique),
            "hash" => Ok(MergeStrategy::Hash),
            "deep" => Ok(MergeStrategy::Deep(DeepOptions::default())),
            _ => Err(Error::unknown_merge_strategy(name)),
        }
    }

    /// Parse a strategy from an option value: either a name or a mapping
    /// `{strategy: deep, knockout_prefix: "--", ...}`
    pub fn from_value(value: &Value) -> Result<MergeStrategy> {
        match value {
            Value::String(name) => Self::from_name(name),
            Value::Mapping(map) => {
                let name = map
                    .get("strategy")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::unknown_merge_strategy(value.to_string()))?;
                let strategy = Self::from_name(name)?;
                if let MergeStrategy::Deep(_) = strategy {
                    Ok(MergeStrategy::Deep(DeepOptions {
                        knockout_prefix: map
                            .get("knockout_prefix")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        sort_merged_arrays: map
                            .get("sort_merged_arrays")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        merge_hash_arrays: map
                            .get("merge_hash_arrays")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    }))
                } else {
                    Ok(strategy)
                }
            }
            _ => Err(Error::unknown_merge_strategy(value.to_string())),
        }
    }

    /// The strategy name
    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::First => "first",
            MergeStrategy::Unique => "unique",
            MergeStrategy::Hash => "hash",
            MergeStrategy::Deep(_) => "deep",
        }
    }

    /// Fold a sequence of variants (providers, locations) into one value.
    ///
    /// `value_of` produces the hit for one variant or `None` on a miss.
    /// `first` short-circuits on the first hit; the other strategies visit
    /// every variant and accumulate with earlier-wins precedence.
    pub fn lookup<T>(
        &self,
        variants: &[T],
        inv: &mut Invocation,
        mut value_of: impl FnMut(&T, &mut Invocation) -> Result<Option<Value>>,
    ) -> Result<Option<Value>> {
        if let MergeStrategy::First = self {
            for variant in variants {
                if let Some(found) = value_of(variant, inv)? {
                    return Ok(Some(found));
                }
            }
            return Ok(None);
        }

        inv.with_merge(self, |inv| {
            let mut hits = Vec::new();
            for variant in variants {
                if let Some(found) = value_of(variant, inv)? {
                    hits.push(found);
                }
            }
            let merged = self.merge_hits(hits)?;
            if let Some(v) = &merged {
                inv.report_merge_result(v);
            }
            Ok(merged)
        })
    }

    /// Merge collected hits, highest priority first
    pub fn merge_hits(&self, hits: Vec<Value>) -> Result<Option<Value>> {
        if hits.is_empty() {
            return Ok(None);
        }
        match self {
            MergeStrategy::First => Ok(hits.into_iter().next()),
            MergeStrategy::Unique => flatten_unique(hits).map(Some),
            MergeStrategy::Hash | MergeStrategy::Deep(_) => {
                let mut iter = hits.into_iter();
                let mut acc = iter.next().unwrap();
                for next in iter {
                    acc = self.merge_pair(acc, next)?;
                }
                Ok(Some(acc))
            }
        }
    }

    /// Merge two values, `a` having the higher priority
    fn merge_pair(&self, a: Value, b: Value) -> Result<Value> {
        let (Value::Mapping(high), Value::Mapping(low)) = (a, b) else {
            return Err(Error::type_mismatch("Hash", "scalar or sequence")
                .with_context("merge", self.name()));
        };
        Ok(Value::Mapping(match self {
            MergeStrategy::Hash => merge_shallow(high, low),
            MergeStrategy::Deep(opts) => merge_deep(high, low, opts),
            _ => unreachable!(),
        }))
    }
}

fn merge_shallow(
    mut high: IndexMap<String, Value>,
    low: IndexMap<String, Value>,
) -> IndexMap<String, Value> {
    for (k, v) in low {
        high.entry(k).or_insert(v);
    }
    high
}

fn merge_deep(
    high: IndexMap<String, Value>,
    low: IndexMap<String, Value>,
    opts: &DeepOptions,
) -> IndexMap<String, Value> {
    let mut out = IndexMap::with_capacity(high.len() + low.len());
    let mut low = low;
    for (k, hv) in high {
        if knocked_out(&hv, opts) {
            low.shift_remove(&k);
            continue;
        }
        let merged = match low.shift_remove(&k) {
            Some(lv) => deep_value(hv, lv, opts),
            None => hv,
        };
        out.insert(k, merged);
    }
    for (k, lv) in low {
        if !knocked_out(&lv, opts) {
            out.insert(k, lv);
        }
    }
    out
}

fn deep_value(high: Value, low: Value, opts: &DeepOptions) -> Value {
    match (high, low) {
        (Value::Mapping(h), Value::Mapping(l)) => Value::Mapping(merge_deep(h, l, opts)),
        (Value::Sequence(h), Value::Sequence(l)) => Value::Sequence(merge_sequences(h, l, opts)),
        // Type conflict or scalars: higher priority wins
        (h, _) => h,
    }
}

fn merge_sequences(high: Vec<Value>, low: Vec<Value>, opts: &DeepOptions) -> Vec<Value> {
    if opts.merge_hash_arrays
        && high.iter().all(Value::is_mapping)
        && low.iter().all(Value::is_mapping)
    {
        let mut out = Vec::with_capacity(high.len().max(low.len()));
        let mut low_iter = low.into_iter();
        for h in high {
            match low_iter.next() {
                Some(l) => out.push(deep_value(h, l, opts)),
                None => out.push(h),
            }
        }
        out.extend(low_iter);
        return out;
    }

    let mut out = Vec::with_capacity(high.len() + low.len());
    for v in high.into_iter().chain(low) {
        if knocked_out(&v, opts) {
            continue;
        }
        if !out.contains(&v) {
            out.push(v);
        }
    }
    if opts.sort_merged_arrays {
        out.sort_by_key(|v| v.to_string());
    }
    out
}

fn knocked_out(value: &Value, opts: &DeepOptions) -> bool {
    match (&opts.knockout_prefix, value) {
        (Some(prefix), Value::String(s)) => s.starts_with(prefix.as_str()),
        _ => false,
    }
}

fn flatten_unique(hits: Vec<Value>) -> Result<Value> {
    let mut out: Vec<Value> = Vec::new();
    for hit in hits {
        match hit {
            Value::Mapping(_) => {
                return Err(Error::type_mismatch("scalar or Array", "mapping")
                    .with_context("merge", "unique"));
            }
            Value::Sequence(seq) => {
                for v in seq {
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
            }
            scalar => {
                if !out.contains(&scalar) {
                    out.push(scalar);
                }
            }
        }
    }
    Ok(Value::Sequence(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mapping(entries: &[(&str, Value)]) -> Value {
        let mut map = IndexMap::new();
        for (k, v) in entries {
            map.insert(k.to_string(), v.clone());
        }
        Value::Mapping(map)
    }

    #[test]
    fn test_from_name() {
        assert_eq!(MergeStrategy::from_name("first").unwrap().name(), "first");
        assert_eq!(
            MergeStrategy::from_name("nope").unwrap_err().kind_name(),
            "unknown-merge-strategy"
        );
    }

    #[test]
    fn test_from_value_mapping_form() {
        let opt = mapping(&[
            ("strategy", Value::String("deep".into())),
            ("knockout_prefix", Value::String("--".into())),
            ("sort_merged_arrays", Value::Bool(true)),
        ]);
        let strategy = MergeStrategy::from_value(&opt).unwrap();
        assert_eq!(
            strategy,
            MergeStrategy::Deep(DeepOptions {
                knockout_prefix: Some("--".into()),
                sort_merged_arrays: true,
                merge_hash_arrays: false,
            })
        );
    }

    #[test]
    fn test_hash_first_seen_wins() {
        let a = mapping(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = mapping(&[("y", Value::Int(20)), ("z", Value::Int(3))]);
        let merged = MergeStrategy::Hash.merge_hits(vec![a, b]).unwrap().unwrap();
        assert_eq!(
            merged,
            mapping(&[
                ("x", Value::Int(1)),
                ("y", Value::Int(2)),
                ("z", Value::Int(3)),
            ])
        );
    }

    #[test]
    fn test_hash_rejects_scalars() {
        let err = MergeStrategy::Hash
            .merge_hits(vec![Value::Int(1), Value::Int(2)])
            .unwrap_err();
        assert_eq!(err.kind_name(), "type-mismatch");
    }

    #[test]
    fn test_deep_recurses() {
        let a = mapping(&[("a", mapping(&[("x", Value::Int(1)), ("y", Value::Int(2))]))]);
        let b = mapping(&[("a", mapping(&[("y", Value::Int(20)), ("z", Value::Int(3))]))]);
        let merged = MergeStrategy::Deep(DeepOptions::default())
            .merge_hits(vec![a, b])
            .unwrap()
            .unwrap();
        assert_eq!(
            merged,
            mapping(&[(
                "a",
                mapping(&[
                    ("x", Value::Int(1)),
                    ("y", Value::Int(2)),
                    ("z", Value::Int(3)),
                ])
            )])
        );
    }

    #[test]
    fn test_deep_concatenates_sequences_deduplicated() {
        let a = mapping(&[("s", Value::from(vec!["a", "b"]))]);
        let b = mapping(&[("s", Value::from(vec!["b", "c"]))]);
        let merged = MergeStrategy::Deep(DeepOptions::default())
            .merge_hits(vec![a, b])
            .unwrap()
            .unwrap();
        assert_eq!(merged, mapping(&[("s", Value::from(vec!["a", "b", "c"]))]));
    }

    #[test]
    fn test_deep_knockout_prefix_removes_key() {
        let opts = DeepOptions {
            knockout_prefix: Some("--".into()),
            ..Default::default()
        };
        let a = mapping(&[("gone", Value::String("--".into())), ("kept", Value::Int(1))]);
        let b = mapping(&[("gone", Value::Int(9)), ("extra", Value::Int(2))]);
        let merged = MergeStrategy::Deep(opts)
            .merge_hits(vec![a, b])
            .unwrap()
            .unwrap();
        assert_eq!(
            merged,
            mapping(&[("kept", Value::Int(1)), ("extra", Value::Int(2))])
        );
    }

    #[test]
    fn test_deep_merge_hash_arrays() {
        let opts = DeepOptions {
            merge_hash_arrays: true,
            ..Default::default()
        };
        let a = mapping(&[("s", Value::Sequence(vec![mapping(&[("x", Value::Int(1))])]))]);
        let b = mapping(&[("s", Value::Sequence(vec![mapping(&[("y", Value::Int(2))])]))]);
        let merged = MergeStrategy::Deep(opts)
            .merge_hits(vec![a, b])
            .unwrap()
            .unwrap();
        assert_eq!(
            merged,
            mapping(&[(
                "s",
                Value::Sequence(vec![mapping(&[("x", Value::Int(1)), ("y", Value::Int(2))])])
            )])
        );
    }

    #[test]
    fn test_deep_sort_merged_arrays() {
        let opts = DeepOptions {
            sort_merged_arrays: true,
            ..Default::default()
        };
        let a = mapping(&[("s", Value::from(vec!["c", "a"]))]);
        let b = mapping(&[("s", Value::from(vec!["b"]))]);
        let merged = MergeStrategy::Deep(opts)
            .merge_hits(vec![a, b])
            .unwrap()
            .unwrap();
        assert_eq!(merged, mapping(&[("s", Value::from(vec!["a", "b", "c"]))]));
    }

    #[test]
    fn test_unique_flattens_and_deduplicates() {
        let merged = MergeStrategy::Unique
            .merge_hits(vec![
                Value::from(vec!["a", "b"]),
                Value::String("b".into()),
                Value::String("c".into()),
            ])
            .unwrap()
            .unwrap();
        assert_eq!(merged, Value::from(vec!["a", "b", "c"]));
    }

    #[test]
    fn test_unique_rejects_mappings() {
        let err = MergeStrategy::Unique
            .merge_hits(vec![mapping(&[("a", Value::Int(1))])])
            .unwrap_err();
        assert_eq!(err.kind_name(), "type-mismatch");
    }

    #[test]
    fn test_merge_idempotence() {
        let x = mapping(&[("a", mapping(&[("b", Value::from(vec!["v"]))]))]);
        for strategy in [
            MergeStrategy::Hash,
            MergeStrategy::Deep(DeepOptions::default()),
        ] {
            let merged = strategy
                .merge_hits(vec![x.clone(), x.clone()])
                .unwrap()
                .unwrap();
            assert_eq!(merged, x, "strategy {}", strategy.name());
        }

        let repeated = MergeStrategy::Unique
            .merge_hits(vec![Value::Int(7), Value::Int(7)])
            .unwrap()
            .unwrap();
        assert_eq!(repeated, Value::Sequence(vec![Value::Int(7)]));
    }
}
