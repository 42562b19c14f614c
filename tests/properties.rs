//! Property tests for text segmentation and index search ordering.

use proptest::prelude::*;

use medirag::chunker::{chunk_text, segment_spans};
use medirag::config::IndexKind;
use medirag::vector_store::{build_index, squared_l2};

mod prop_segmentation {
    use super::*;

    fn arb_text() -> impl Strategy<Value = String> {
        "[a-zé ]{0,400}"
    }

    proptest! {
        #[test]
        fn spans_cover_the_text_without_gaps(
            text in arb_text(),
            size in 1usize..80,
            overlap in 0usize..100,
        ) {
            let chars: Vec<char> = text.chars().collect();
            let spans = segment_spans(&chars, size, overlap);

            if chars.is_empty() {
                prop_assert!(spans.is_empty());
            } else {
                prop_assert_eq!(spans[0].0, 0);
                prop_assert_eq!(spans.last().unwrap().1, chars.len());
                for (start, end) in &spans {
                    prop_assert!(start < end);
                    prop_assert!(end - start <= size);
                }
                for pair in spans.windows(2) {
                    prop_assert!(pair[1].0 > pair[0].0);
                    prop_assert!(pair[1].0 <= pair[0].1);
                }
            }
        }

        #[test]
        fn segments_are_trimmed_and_bounded(
            text in arb_text(),
            size in 1usize..80,
            overlap in 0usize..40,
        ) {
            for segment in chunk_text(&text, size, overlap) {
                prop_assert!(!segment.is_empty());
                prop_assert_eq!(segment.trim(), segment.as_str());
                prop_assert!(segment.chars().count() <= size);
            }
        }
    }
}

mod prop_search_ordering {
    use super::*;

    const DIM: usize = 8;

    fn arb_vectors() -> impl Strategy<Value = Vec<Vec<f32>>> {
        proptest::collection::vec(proptest::collection::vec(-10.0f32..10.0, DIM), 0..40)
    }

    proptest! {
        #[test]
        fn flat_results_are_nearest_first(
            vectors in arb_vectors(),
            query in proptest::collection::vec(-10.0f32..10.0, DIM),
            k in 0usize..50,
        ) {
            let index = build_index(IndexKind::Flat, DIM, vectors.clone()).unwrap();
            let hits = index.search(&query, k).unwrap();

            prop_assert_eq!(hits.len(), k.min(vectors.len()));
            for pair in hits.windows(2) {
                prop_assert!(pair[0].distance <= pair[1].distance);
            }
            for hit in &hits {
                prop_assert!(hit.position < vectors.len());
                prop_assert_eq!(hit.distance, squared_l2(&vectors[hit.position], &query));
            }
            // Nothing left out is closer than the farthest hit.
            if let Some(worst) = hits.last() {
                for (position, v) in vectors.iter().enumerate() {
                    if hits.iter().all(|h| h.position != position) {
                        prop_assert!(squared_l2(v, &query) >= worst.distance);
                    }
                }
            }
        }
    }
}
