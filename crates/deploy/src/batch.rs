//! Sequential batching of parallel input lists.
//!
//! Bulk setter calls take several lists that line up index by index (token ids
//! and addresses, chain ids and spokes). The i-th item of a batch is the i-th
//! element of every list; batches are dispatched strictly in order.

use std::future::Future;

use crate::error::BatchError;

/// Split `lists` into batches of at most `batch_size` items and hand each one to `handler`.
///
/// The first list's length decides how many items there are. Any other list
/// of a different length is rejected before the handler runs. The handler is
/// awaited for every full batch, then once more for the remainder if any. A
/// handler error stops processing.
///
/// Returns the number of batches dispatched.
pub async fn process_batches<T, F, Fut>(
    lists: &[Vec<T>],
    batch_size: usize,
    mut handler: F,
) -> Result<usize, BatchError>
where
    T: Clone,
    F: FnMut(Vec<Vec<T>>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    if batch_size == 0 {
        return Err(BatchError::ZeroBatchSize);
    }

    let Some(first) = lists.first() else {
        return Ok(0);
    };
    let expected = first.len();

    for (list, values) in lists.iter().enumerate().skip(1) {
        if values.len() != expected {
            return Err(BatchError::LengthMismatch {
                list,
                expected,
                actual: values.len(),
            });
        }
    }

    let items = (0..expected).map(|i| {
        lists
            .iter()
            .map(|list| list[i].clone())
            .collect::<Vec<_>>()
    });

    let mut batch = Vec::with_capacity(batch_size);
    let mut dispatched = 0;

    for item in items {
        batch.push(item);
        if batch.len() == batch_size {
            tracing::info!(batch = dispatched, size = batch.len(), "handling batch");
            let current = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            handler(current).await.map_err(|source| BatchError::Handler {
                batch: dispatched,
                source,
            })?;
            dispatched += 1;
        }
    }

    if !batch.is_empty() {
        tracing::info!(batch = dispatched, size = batch.len(), "handling final batch");
        handler(batch).await.map_err(|source| BatchError::Handler {
            batch: dispatched,
            source,
        })?;
        dispatched += 1;
    }

    Ok(dispatched)
}

/// Turn a batch of items into one column per input list.
///
/// `[[1, a], [2, b]]` becomes `[[1, 2], [a, b]]`.
pub fn columns<T: Clone>(batch: &[Vec<T>]) -> Vec<Vec<T>> {
    let width = batch.first().map(Vec::len).unwrap_or_default();
    (0..width)
        .map(|column| batch.iter().map(|item| item[column].clone()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn test_batches_are_dispatched_in_order() {
        let mut seen = Vec::new();

        let dispatched = process_batches(&[vec![1, 2, 3, 4, 5]], 2, |batch| {
            seen.push(batch);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(dispatched, 3);
        assert_eq!(
            seen,
            vec![
                vec![vec![1], vec![2]],
                vec![vec![3], vec![4]],
                vec![vec![5]],
            ]
        );
    }

    #[tokio::test]
    async fn test_items_zip_across_lists() {
        let mut seen = Vec::new();

        process_batches(&[vec![1, 2, 3], vec![10, 20, 30]], 3, |batch| {
            seen.push(batch);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(seen, vec![vec![vec![1, 10], vec![2, 20], vec![3, 30]]]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_final_batch() {
        let mut calls = 0;

        let dispatched = process_batches(&[vec![1, 2, 3, 4]], 2, |_| {
            calls += 1;
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(dispatched, 2);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_shorter_list_is_rejected_before_any_call() {
        let mut calls = 0;

        let err = process_batches(&[vec![1, 2, 3], vec![1, 2]], 2, |_| {
            calls += 1;
            async { Ok(()) }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            BatchError::LengthMismatch {
                list: 1,
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_longer_list_is_rejected_before_any_call() {
        let mut calls = 0;

        let err = process_batches(&[vec![1, 2, 3], vec![10, 20, 30, 40]], 2, |_| {
            calls += 1;
            async { Ok(()) }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            BatchError::LengthMismatch {
                list: 1,
                expected: 3,
                actual: 4
            }
        ));
        assert_eq!(err.to_string(), "input list 1 has 4 items, expected 3");
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_each_batch_completes_before_the_next_starts() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let dispatched = process_batches(&[vec![1, 2, 3, 4, 5]], 2, |batch| {
            let events = events.clone();
            let in_flight = in_flight.clone();
            async move {
                let first = batch[0][0];
                assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                events.lock().unwrap().push(format!("start {first}"));

                tokio::time::sleep(Duration::from_millis(5)).await;
                tokio::task::yield_now().await;

                events.lock().unwrap().push(format!("end {first}"));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(dispatched, 3);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start 1", "end 1", "start 3", "end 3", "start 5", "end 5"]
        );
    }

    #[tokio::test]
    async fn test_zero_batch_size() {
        let err = process_batches(&[vec![1]], 0, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::ZeroBatchSize));
    }

    #[tokio::test]
    async fn test_empty_input_dispatches_nothing() {
        let lists: Vec<Vec<u8>> = vec![vec![]];
        let dispatched = process_batches(&lists, 2, |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(dispatched, 0);
    }

    #[tokio::test]
    async fn test_handler_error_stops_processing() {
        let mut calls = 0;

        let err = process_batches(&[vec![1, 2, 3, 4, 5]], 2, |_| {
            calls += 1;
            let call = calls;
            async move {
                if call == 2 {
                    anyhow::bail!("second batch reverted");
                }
                Ok(())
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BatchError::Handler { batch: 1, .. }));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_columns() {
        let batch = vec![vec![1, 10], vec![2, 20]];
        assert_eq!(columns(&batch), vec![vec![1, 2], vec![10, 20]]);
        assert!(columns::<u8>(&[]).is_empty());
    }
}
