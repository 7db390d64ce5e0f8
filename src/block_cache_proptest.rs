#![cfg(test)]

// Property tests for GenericBlockCache kept inside the crate so they can
// exercise `validate()` alongside the public API.

use crate::block_cache::GenericBlockCache;
use crate::handle::Index;
use proptest::prelude::*;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};

// Pool-indexed operations to improve shrinking: indices shrink to earlier
// blocks, pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize),
    Find(usize),
    Lookup(u32),
    Iterate,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<OpI>)> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..4), 1..=10).prop_flat_map(
        |pool| {
            let idxs: Vec<usize> = (0..pool.len()).collect();
            let idx = proptest::sample::select(idxs);
            let op = prop_oneof![
                3 => idx.clone().prop_map(OpI::Insert),
                1 => idx.clone().prop_map(OpI::Find),
                1 => (0u32..12).prop_map(OpI::Lookup),
                1 => Just(OpI::Iterate),
            ];
            proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
        },
    )
}

fn run_scenario<S: BuildHasher>(
    mut sut: GenericBlockCache<Vec<u8>, S>,
    pool: &[Vec<u8>],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Vec<u8>, Index> = HashMap::new();
    let mut order: Vec<Vec<u8>> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i) => {
                let b = pool[i].clone();
                let got = sut.insert(b.clone()).expect("far below the handle limit");
                match model.get(&b) {
                    Some(&prev) => {
                        prop_assert_eq!(got, prev, "equal content must reuse its index");
                    }
                    None => {
                        prop_assert_eq!(got.as_u32() as usize, order.len() + 1);
                        model.insert(b.clone(), got);
                        order.push(b);
                    }
                }
                prop_assert!(got.is_valid());
            }
            OpI::Find(i) => {
                prop_assert_eq!(sut.find(&pool[i]), model.get(&pool[i]).copied());
            }
            OpI::Lookup(raw) => {
                let idx = Index::new(raw);
                let expect = if raw == 0 {
                    None
                } else {
                    order.get(raw as usize - 1)
                };
                prop_assert_eq!(sut.get(idx), expect);
            }
            OpI::Iterate => {
                let seen: Vec<_> = sut.iter().map(|(_, b)| b.clone()).collect();
                prop_assert_eq!(&seen, &order);
            }
        }

        // Post-conditions after each op
        prop_assert_eq!(sut.count(), model.len());
        for (b, &i) in &model {
            prop_assert_eq!(sut.lookup(i), b);
        }
        sut.validate();
    }
    Ok(())
}

// Property: state-machine equivalence against a HashMap model.
// - Equal content always returns the index issued on first insert.
// - New content receives count + 1; the sentinel is never issued.
// - `find`/`get`/`iter` agree with the model; `validate` always passes.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(GenericBlockCache::new(), &pool, ops)?;
    }
}

#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: same invariants under worst-case collisions (constant hasher),
// with tiny arena chunks to cross chunk boundaries often.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut = GenericBlockCache::with_chunk_size_and_hasher(3, ConstBuildHasher);
        run_scenario(sut, &pool, ops)?;
    }
}
