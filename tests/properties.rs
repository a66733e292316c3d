//! Property tests: ownership isolation and snapshot ordering under
//! arbitrary operation sequences.

use memo_sync::{MemoColor, MemoId, MemoStore, OwnerId};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Op {
    Create { owner: usize, title: String },
    Update { pick: usize, title: String },
    Delete { pick: usize },
}

const OWNERS: [&str; 3] = ["alice", "bob", "carol"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..OWNERS.len(), "[a-z]{0,8}").prop_map(|(owner, title)| Op::Create { owner, title }),
        1 => (any::<usize>(), "[a-z]{0,8}").prop_map(|(pick, title)| Op::Update { pick, title }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

proptest! {
    #[test]
    fn snapshots_hold_only_the_owners_memos_newest_first(
        ops in prop::collection::vec(op_strategy(), 1..60)
    ) {
        let store = MemoStore::in_memory();
        // Model: live memo id -> (owner, title, creation order)
        let mut live: Vec<MemoId> = Vec::new();
        let mut model: HashMap<MemoId, (usize, String, usize)> = HashMap::new();
        let mut created = 0usize;

        for op in ops {
            match op {
                Op::Create { owner, title } => {
                    let memo = store
                        .create(&OwnerId::from(OWNERS[owner]), &title, "", MemoColor::Yellow)
                        .unwrap();
                    model.insert(memo.id.clone(), (owner, title, created));
                    live.push(memo.id);
                    created += 1;
                }
                Op::Update { pick, title } => {
                    if live.is_empty() {
                        continue;
                    }
                    let id = live[pick % live.len()].clone();
                    store.update(&id, &title, "edited").unwrap();
                    if let Some(entry) = model.get_mut(&id) {
                        entry.1 = title;
                    }
                }
                Op::Delete { pick } => {
                    if live.is_empty() {
                        continue;
                    }
                    let id = live.remove(pick % live.len());
                    store.delete(&id).unwrap();
                    model.remove(&id);
                }
            }
        }

        for (index, name) in OWNERS.iter().enumerate() {
            let snapshot = store.snapshot(&OwnerId::from(*name)).unwrap();

            let mut expected: Vec<(&MemoId, &(usize, String, usize))> = model
                .iter()
                .filter(|(_, (owner, _, _))| *owner == index)
                .collect();
            expected.sort_by(|a, b| b.1 .2.cmp(&a.1 .2));

            prop_assert_eq!(snapshot.len(), expected.len());
            for (memo, (id, (_, title, _))) in snapshot.memos.iter().zip(expected) {
                prop_assert_eq!(&memo.id, id);
                prop_assert_eq!(&memo.title, title);
                prop_assert_eq!(memo.owner_id.as_str(), *name);
            }
            prop_assert!(snapshot
                .memos
                .windows(2)
                .all(|pair| pair[0].created_at > pair[1].created_at));
        }
    }

    #[test]
    fn ids_are_unique(count in 1usize..200) {
        let store = MemoStore::in_memory();
        let owner = OwnerId::from("u1");
        let mut seen = std::collections::HashSet::new();
        for _ in 0..count {
            let memo = store.create(&owner, "t", "c", MemoColor::random()).unwrap();
            prop_assert!(seen.insert(memo.id));
        }
    }
}
