use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Copy a fallible stream into `n` independent output streams, driving the
/// input exactly once.
///
/// Each output observes the input's items in input order. The driver offers
/// every item to every still-active output over a bounded hand-off of
/// capacity 1, and does not advance the input until each of them has accepted
/// the item, so the outputs must be consumed concurrently. Dropping an output
/// removes it from the active set without disturbing its siblings; when no
/// active outputs remain, the input stops being iterated. An Err item is
/// delivered to every active output and then ends the fan-out.
///
/// The returned token tears the whole fan-out down: every output ends and the
/// input is no longer polled.
///
/// `n == 0` yields no outputs and never polls the input; `n == 1` yields the
/// input itself.
pub fn fan_out<T, E, S>(input: S, n: usize) -> (Vec<BoxStream<'static, Result<T, E>>>, CancellationToken)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
{
    let cancel = CancellationToken::new();

    if n == 0 {
        return (Vec::new(), cancel);
    } else if n == 1 {
        let output = input.take_until(cancel.clone().cancelled_owned()).boxed();
        return (vec![output], cancel);
    }

    let mut txs = Vec::with_capacity(n);
    let mut outputs: Vec<BoxStream<'static, Result<T, E>>> = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        txs.push(Some(tx));
        outputs.push(ReceiverStream::new(rx).boxed());
    }

    tokio::spawn(drive(input, txs, cancel.clone()));

    (outputs, cancel)
}

async fn drive<T, E, S>(
    input: S,
    mut txs: Vec<Option<tokio::sync::mpsc::Sender<Result<T, E>>>>,
    cancel: CancellationToken,
) where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: Stream<Item = Result<T, E>> + Send + 'static,
{
    tokio::pin!(input);

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = input.next() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let terminal = item.is_err();

        let mut sends = Vec::new();
        for (i, tx) in txs.iter().enumerate() {
            if let Some(tx) = tx {
                let item = item.clone();
                sends.push(async move { (i, tx.send(item).await) });
            }
        }
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = futures::future::join_all(sends) => accepted,
        };

        // A failed send means that output's receiver is gone: prune it and
        // keep driving the rest.
        for (i, result) in accepted {
            if result.is_err() {
                txs[i] = None;
            }
        }
        if terminal || txs.iter().all(Option::is_none) {
            break;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::stream;

    fn items(n: usize) -> Vec<Result<usize, String>> {
        (0..n).map(Ok).collect()
    }

    #[tokio::test]
    async fn test_outputs_reproduce_the_input() {
        let (outputs, _cancel) = fan_out(stream::iter(items(5)), 3);
        assert_eq!(outputs.len(), 3);

        let collectors: Vec<_> = outputs
            .into_iter()
            .map(|output| tokio::spawn(output.collect::<Vec<_>>()))
            .collect();
        for collector in collectors {
            assert_eq!(collector.await.unwrap(), items(5));
        }
    }

    #[tokio::test]
    async fn test_early_exit_does_not_disturb_siblings() {
        let (mut outputs, _cancel) = fan_out(stream::iter(items(6)), 2);
        let survivor = outputs.pop().unwrap();
        let mut quitter = outputs.pop().unwrap();

        let survivor = tokio::spawn(survivor.collect::<Vec<_>>());

        assert_eq!(quitter.next().await, Some(Ok(0)));
        assert_eq!(quitter.next().await, Some(Ok(1)));
        drop(quitter);

        assert_eq!(survivor.await.unwrap(), items(6));
    }

    #[tokio::test]
    async fn test_input_stops_when_all_outputs_exit() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let input = stream::iter(items(1000)).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (outputs, _cancel) = fan_out(input, 2);
        for mut output in outputs {
            assert_eq!(output.next().await, Some(Ok(0)));
            drop(output);
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // The driver stopped pulling the input shortly after losing its
        // last output, far before the 1000 items it was offered.
        assert!(polled.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test]
    async fn test_error_is_broadcast_and_terminal() {
        let input = stream::iter(vec![Ok(1), Err("boom".to_string()), Ok(2)]);
        let (outputs, _cancel) = fan_out(input, 2);

        let collectors: Vec<_> = outputs
            .into_iter()
            .map(|output| tokio::spawn(output.collect::<Vec<_>>()))
            .collect();
        for collector in collectors {
            assert_eq!(
                collector.await.unwrap(),
                vec![Ok(1), Err("boom".to_string())],
            );
        }
    }

    #[tokio::test]
    async fn test_cancel_closes_every_output() {
        let input = stream::iter(items(100)).chain(stream::pending());
        let (outputs, cancel) = fan_out(input, 2);

        let collectors: Vec<_> = outputs
            .into_iter()
            .map(|output| tokio::spawn(output.collect::<Vec<_>>()))
            .collect();
        cancel.cancel();

        for collector in collectors {
            // Each output ends after at most the items already in flight.
            assert!(collector.await.unwrap().len() <= 2);
        }
    }

    #[tokio::test]
    async fn test_degenerate_widths() {
        let (outputs, _cancel) = fan_out(stream::iter(items(3)), 0);
        assert!(outputs.is_empty());

        let (mut outputs, _cancel) = fan_out(stream::iter(items(3)), 1);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs.pop().unwrap().collect::<Vec<_>>().await, items(3));
    }

    #[tokio::test]
    async fn test_fans_out_meta_records() {
        let meta = fbc::Meta::parse(bytes::Bytes::from_static(
            b"{\"schema\":\"olm.package\",\"name\":\"p\"}\n",
        ))
        .unwrap();
        let input = stream::iter(vec![Ok::<_, fbc::Error>(meta.clone())]);

        let (outputs, _cancel) = fan_out(input, 2);
        for output in outputs {
            let collected = tokio::spawn(output.collect::<Vec<_>>());
            // Both sinks see the same blob bytes.
            let collected = collected.await.unwrap();
            assert_eq!(collected.len(), 1);
            assert_eq!(collected[0].as_ref().unwrap().blob, meta.blob);
        }
    }
}
