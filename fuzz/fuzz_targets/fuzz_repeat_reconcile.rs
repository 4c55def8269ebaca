#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use weave::reactive::Value;
use weave_harness::{Fixture, list_component, rows};

#[derive(Arbitrary, Debug)]
struct Input {
    keyed: bool,
    initial: Vec<u8>,
    steps: Vec<Vec<u8>>,
}

fn ids(raw: &[u8]) -> Vec<u32> {
    raw.iter().take(64).map(|b| u32::from(b % 32)).collect()
}

fuzz_target!(|input: Input| {
    let initial = ids(&input.initial);
    let Ok(fx) = Fixture::boot([list_component(input.keyed, &initial)], "list", None) else {
        return;
    };
    let Some(list) = fx.array("rows") else {
        return;
    };

    for step in input.steps.iter().take(16) {
        let next = ids(step);
        if let Value::Array(fresh) = Value::from_json(rows(&next)) {
            list.replace(fresh.peek_vec());
        }
        fx.settle();

        let expected: Vec<String> = next.iter().map(ToString::to_string).collect();
        assert_eq!(fx.leaves(), expected);
        assert_eq!(fx.root.child_ids().len(), next.len());
    }

    fx.app.destroy();
    assert_eq!(fx.app.vm_count(), 0);
});
