//! Property-based tests for hsw-core
//!
//! Uses proptest to verify invariants across randomized inputs

use hsw_core::address::{AddressPath, Branch};
use hsw_core::names::{rollout_week, validate_name};
use hsw_core::{
    Address, BloomFilter, Covenant, CovenantType, Decodable, Encodable, Error, FundingCoin, Hash,
    Outpoint, Output, Transaction, TxBuilder,
};
use hsw_core::transaction::Input;
use proptest::prelude::*;

// ============================================================================
// Property Test Strategies
// ============================================================================

fn hash_strategy() -> impl Strategy<Value = Hash> {
    any::<[u8; 32]>().prop_map(Hash)
}

fn address_strategy() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(|h| Address::new(0, h.to_vec()).unwrap())
}

fn coin_pool_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1_000u64..5_000_000, 0..12)
}

fn fee_rate_strategy() -> impl Strategy<Value = u64> {
    1u64..=50
}

fn pool_from(values: &[u64]) -> Vec<FundingCoin> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| FundingCoin {
            outpoint: Outpoint::new(Hash([i as u8; 32]), i as u32),
            value: *v,
            address: Address::new(0, vec![1u8; 20]).unwrap(),
            path: AddressPath::new(Branch::Receive, i as u32),
            covenant_type: CovenantType::None,
        })
        .collect()
}

// ============================================================================
// Bloom Filter Properties
// ============================================================================

proptest! {
    /// Property: anything inserted is always reported present
    #[test]
    fn prop_bloom_no_false_negatives(
        items in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..200)
    ) {
        let mut filter = BloomFilter::new(1_000, 1e-4);
        for item in &items {
            filter.insert(item);
        }
        for item in &items {
            prop_assert!(filter.contains(item));
        }
    }

    /// Property: serialized filters answer identically
    #[test]
    fn prop_bloom_survives_serialization(
        outpoints in prop::collection::vec((hash_strategy(), any::<u32>()), 1..50)
    ) {
        let mut filter = BloomFilter::new(500, 1e-5);
        for (h, i) in &outpoints {
            filter.insert_outpoint(&Outpoint::new(*h, *i));
        }
        let restored = BloomFilter::from_bytes(&filter.to_bytes()).unwrap();
        for (h, i) in &outpoints {
            prop_assert!(restored.contains_outpoint(&Outpoint::new(*h, *i)));
        }
    }
}

// ============================================================================
// Funding Properties
// ============================================================================

proptest! {
    /// Property: inputs always equal outputs plus fee, and the fee covers the estimate
    #[test]
    fn prop_funding_balances(
        pool in coin_pool_strategy(),
        send in 1_000u64..3_000_000,
        rate in fee_rate_strategy(),
        to in address_strategy(),
        change in address_strategy()
    ) {
        let mut builder = TxBuilder::new();
        builder.add_output(Output::payment(to, send));
        let before = builder.clone();

        match builder.fund(&pool_from(&pool), &change, rate) {
            Ok(result) => {
                let inputs = builder.input_value().unwrap();
                let outputs = builder.output_value().unwrap();
                prop_assert_eq!(inputs, outputs + result.fee);
                prop_assert!(result.fee >= builder.estimate_size() as u64 * rate);
                prop_assert_eq!(result.size, builder.estimate_size());
            }
            Err(Error::InsufficientFunds(_)) => {
                prop_assert_eq!(builder, before);
            }
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }

    /// Property: selection takes the smallest coins first
    #[test]
    fn prop_funding_prefers_small_coins(
        pool in coin_pool_strategy(),
        send in 1_000u64..500_000
    ) {
        let mut builder = TxBuilder::new();
        builder.add_output(Output::payment(Address::new(0, vec![2u8; 20]).unwrap(), send));
        if builder.fund(&pool_from(&pool), &Address::new(0, vec![3u8; 20]).unwrap(), 1).is_ok() {
            let mut sorted = pool.clone();
            sorted.sort_unstable();
            let picked: Vec<u64> = builder.coins().iter().map(|c| c.value).collect();
            prop_assert_eq!(&picked[..], &sorted[..picked.len()]);
        }
    }
}

// ============================================================================
// Codec Properties
// ============================================================================

proptest! {
    /// Property: transaction decoding inverts encoding and txid ignores witnesses
    #[test]
    fn prop_transaction_codec(
        prev in hash_strategy(),
        index in any::<u32>(),
        witness in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..80), 0..3),
        value in any::<u64>(),
        addr in address_strategy(),
        name_hash in hash_strategy(),
        height in any::<u32>()
    ) {
        let mut input = Input::new(Outpoint::new(prev, index));
        input.witness = witness;
        let tx = Transaction {
            version: 0,
            inputs: vec![input],
            outputs: vec![Output {
                value,
                address: addr,
                covenant: Covenant::Redeem { name_hash, height },
            }],
            locktime: 0,
        };
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        prop_assert_eq!(decoded.txid(), tx.txid());
        prop_assert_eq!(decoded, tx);
    }

    /// Property: arbitrary bytes never panic the decoder
    #[test]
    fn prop_decoder_rejects_garbage_without_panicking(
        bytes in prop::collection::vec(any::<u8>(), 0..300)
    ) {
        let _ = Transaction::from_bytes(&bytes);
        let _ = Covenant::from_bytes(&bytes);
    }

    /// Property: rollout week is always a valid bucket
    #[test]
    fn prop_rollout_week_in_range(h in hash_strategy()) {
        prop_assert!(rollout_week(&h) < 52);
    }

    /// Property: names from the allowed alphabet validate unless hyphen-bounded
    #[test]
    fn prop_name_charset(name in "[a-z0-9_][a-z0-9_-]{0,61}[a-z0-9_]") {
        prop_assume!(!["example", "invalid", "local", "localhost", "test"].contains(&name.as_str()));
        prop_assert!(validate_name(&name).is_ok());
    }
}
