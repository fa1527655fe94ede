//! Property tests for the gap-limit lookahead

mod common;

use common::{harness, LOOKAHEAD};
use hsw_core::{AddressPath, Branch};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any payment inside the derived window is found, the window always
    /// reaches `lookahead` past the deepest used index, and every address
    /// below the tip is both in the bloom filter and resolvable in storage.
    #[test]
    fn prop_payments_inside_window_are_found(offsets in prop::collection::vec(0..LOOKAHEAD, 1..6)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = harness();
            let mut deepest = 0u32;
            for (tag, offset) in offsets.iter().enumerate() {
                let index = h.account.depth(Branch::Receive) + offset;
                h.fund(index, 1_000 + tag as u64, tag as u8 + 1).await;
                deepest = deepest.max(index + 1);

                assert_eq!(h.account.coins().unwrap().len(), tag + 1);
                assert_eq!(h.account.depth(Branch::Receive), deepest);
                assert_eq!(
                    h.account.lookahead_tip(Branch::Receive),
                    deepest + LOOKAHEAD
                );
            }
            assert_eq!(h.account.depth(Branch::Change), 0);
            assert_eq!(h.account.lookahead_tip(Branch::Change), LOOKAHEAD);

            let addresses = h.account.addresses();
            let bloom = addresses.bloom();
            let db = h.db.lock();
            for branch in Branch::ALL {
                for index in 0..h.account.lookahead_tip(branch) {
                    let path = AddressPath::new(branch, index);
                    let address = addresses.address(path).unwrap();
                    assert!(bloom.contains_address(&address), "{:?} missing from bloom", path);
                    assert_eq!(addresses.path_of(db.conn(), &address).unwrap(), Some(path));
                }
            }
        });
    }
}
