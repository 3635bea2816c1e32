//! Property tests: every write is readable, wholly and at any offset.

mod common;

use std::io::{Cursor, Read};

use proptest::prelude::*;
use ragzip::RagzipReader;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn roundtrip_bytewise(
        data in proptest::collection::vec(any::<u8>(), 0..20_000),
        page_exponent in 9u8..=12,
        index_exponent in 1u8..=4,
    ) {
        let file = common::encode_to_vec(&data, page_exponent, index_exponent);

        let mut reader = RagzipReader::open(Cursor::new(file.clone())).unwrap();
        prop_assert_eq!(reader.len() as usize, data.len());
        let mut content = Vec::new();
        reader.read_to_end(&mut content).unwrap();
        prop_assert_eq!(&content, &data);

        // Gzip transparency: an independent decoder sees the same bytes.
        prop_assert_eq!(common::gunzip_all(&file), data);
    }

    #[test]
    fn random_positions_match_the_slice(
        data in proptest::collection::vec(any::<u8>(), 1..20_000),
        page_exponent in 9u8..=11,
        index_exponent in 1u8..=3,
        fractions in proptest::collection::vec(0.0f64..1.0, 1..8),
    ) {
        let file = common::encode_to_vec(&data, page_exponent, index_exponent);
        let mut reader = RagzipReader::open(Cursor::new(file)).unwrap();

        for fraction in fractions {
            let pos = ((data.len() - 1) as f64 * fraction) as usize;
            let want = 32.min(data.len() - pos);
            let mut buf = vec![0u8; want];
            let n = reader.read_at(pos as u64, &mut buf).unwrap();
            prop_assert_eq!(n, want);
            prop_assert_eq!(&buf, &data[pos..pos + want]);
        }
    }
}
