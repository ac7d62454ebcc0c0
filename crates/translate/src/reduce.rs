//! Selection of redundant duplicates among existing objects.
//!
//! A reduce chain takes every existing object sharing one identity and
//! narrows it down to the ones that may be deleted.

use konvert_core::store::raw;
use serde_json::Value as Json;

/// Narrows a candidate-for-deletion set.
pub type ReduceFn = fn(Vec<Json>) -> Vec<Json>;

/// Drop programmed objects from the candidates unless every one is programmed.
pub fn filter_out_programmed(objs: Vec<Json>) -> Vec<Json> {
    let programmed = objs.iter().filter(|o| raw::condition_true(o, "Programmed")).count();
    if programmed == 0 || programmed == objs.len() {
        return objs;
    }
    objs.into_iter().filter(|o| !raw::condition_true(o, "Programmed")).collect()
}

/// Drop the most recently created object from the candidates.
pub fn filter_out_youngest(mut objs: Vec<Json>) -> Vec<Json> {
    let youngest = objs
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| raw::creation_ts(a).cmp(&raw::creation_ts(b)).then_with(|| raw::name(a).cmp(raw::name(b))))
        .map(|(i, _)| i);
    if let Some(i) = youngest {
        objs.remove(i);
    }
    objs
}

/// Chain for kinds that report a `Programmed` condition.
pub fn default_chain() -> Vec<ReduceFn> { vec![filter_out_programmed, filter_out_youngest] }

/// Chain for kinds without status.
pub fn plugin_chain() -> Vec<ReduceFn> { vec![filter_out_youngest] }

pub fn run_chain(chain: &[ReduceFn], objs: Vec<Json>) -> Vec<Json> { chain.iter().fold(objs, |acc, f| f(acc)) }
