#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use weave::reactive::{ObservableArray, Value, Watcher, observe};

#[derive(Arbitrary, Debug)]
enum Op {
    Push(i8),
    Pop,
    Shift,
    Unshift(Vec<i8>),
    Insert(u8, i8),
    RemoveAt(u8),
    Splice { start: u8, delete: u8, items: Vec<i8> },
    Truncate(u8),
    Reverse,
    Sort,
    SetAt(u8, i8),
}

fn num(n: i8) -> Value {
    Value::Number(f64::from(n))
}

fn nums(items: &[i8]) -> Vec<Value> {
    items.iter().copied().map(num).collect()
}

fn as_ints(arr: &ObservableArray) -> Vec<Option<i64>> {
    arr.peek_vec()
        .iter()
        .map(|v| v.as_f64().map(|n| n as i64))
        .collect()
}

fuzz_target!(|ops: Vec<Op>| {
    let arr = ObservableArray::new();
    let value = Value::Array(arr.clone());
    observe(&value, None);
    let mut model: Vec<Option<i64>> = Vec::new();

    let watched = value.clone();
    let len = Watcher::new(
        move || Value::from(watched.as_array().map_or(0, ObservableArray::len)),
        |_, _| {},
    );

    for op in ops.into_iter().take(256) {
        match op {
            Op::Push(n) => {
                arr.push(num(n));
                model.push(Some(i64::from(n)));
            }
            Op::Pop => {
                assert_eq!(arr.pop().and_then(|v| v.as_f64()).map(|n| n as i64), model.pop().flatten());
            }
            Op::Shift => {
                let expected = (!model.is_empty()).then(|| model.remove(0)).flatten();
                assert_eq!(arr.shift().and_then(|v| v.as_f64()).map(|n| n as i64), expected);
            }
            Op::Unshift(items) => {
                arr.unshift(nums(&items));
                model.splice(0..0, items.iter().map(|n| Some(i64::from(*n))));
            }
            Op::Insert(idx, n) => {
                arr.insert(usize::from(idx), num(n));
                let idx = usize::from(idx).min(model.len());
                model.insert(idx, Some(i64::from(n)));
            }
            Op::RemoveAt(idx) => {
                let idx = usize::from(idx);
                let expected = (idx < model.len()).then(|| model.remove(idx)).flatten();
                assert_eq!(arr.remove_at(idx).and_then(|v| v.as_f64()).map(|n| n as i64), expected);
            }
            Op::Splice { start, delete, items } => {
                arr.splice(usize::from(start), usize::from(delete), nums(&items));
                let start = usize::from(start).min(model.len());
                let end = start.saturating_add(usize::from(delete)).min(model.len());
                model.splice(start..end, items.iter().map(|n| Some(i64::from(*n))));
            }
            Op::Truncate(len) => {
                arr.truncate(usize::from(len));
                model.truncate(usize::from(len));
            }
            Op::Reverse => {
                arr.reverse();
                model.reverse();
            }
            Op::Sort => {
                arr.sort_by(|a, b| a.as_f64().unwrap_or(0.0).total_cmp(&b.as_f64().unwrap_or(0.0)));
                model.sort_by_key(|v| v.unwrap_or(0));
            }
            Op::SetAt(idx, n) => {
                arr.set_at(usize::from(idx), num(n));
                let idx = usize::from(idx);
                if idx >= model.len() {
                    model.resize(idx + 1, None);
                }
                model[idx] = Some(i64::from(n));
            }
        }
        assert_eq!(as_ints(&arr), model);
    }
    assert_eq!(len.value().as_f64(), Some(model.len() as f64));
});
