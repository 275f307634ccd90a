use crate::Error;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

type Flight<V> = Shared<BoxFuture<'static, Result<V, Arc<Error>>>>;

/// Group collapses concurrent calls for the same key into a single execution
/// whose result every caller shares. A completed call's entry is removed, so
/// later calls execute afresh.
pub struct Group<V> {
    flights: Mutex<HashMap<String, Flight<V>>>,
}

impl<V: Clone + Send + 'static> Group<V> {
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, unless a call for the same key is already in
    /// flight, in which case await and share its result instead.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<V, Arc<Error>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
    {
        let flight = {
            let mut flights = self.flights.lock().unwrap();
            match flights.get(key) {
                Some(flight) => flight.clone(),
                None => {
                    let flight = work().map(|result| result.map_err(Arc::new)).boxed().shared();
                    flights.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };
        let result = flight.clone().await;

        // Retire the completed flight, unless a newer one took the key.
        let mut flights = self.flights.lock().unwrap();
        if flights.get(key).is_some_and(|current| Shared::ptr_eq(current, &flight)) {
            flights.remove(key);
        }
        result
    }
}

impl<V: Clone + Send + 'static> Default for Group<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let group = Arc::new(Group::<usize>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut calls = Vec::new();
        for _ in 0..10 {
            let group = group.clone();
            let executions = executions.clone();
            calls.push(tokio::spawn(async move {
                group
                    .run("key", move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(42)
                    })
                    .await
            }));
        }
        for call in calls {
            assert_eq!(call.await.unwrap().unwrap(), 42);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_execute_afresh() {
        let group = Group::<usize>::new();
        let executions = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = group
                .run("key", || {
                    executions.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7) }
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_not_sticky() {
        let group = Group::<usize>::new();

        let result = group
            .run("key", || async {
                Err(Error::NotFound("cat".to_string()))
            })
            .await;
        assert!(matches!(*result.unwrap_err(), Error::NotFound(_)));

        // A later call runs again rather than replaying the failure.
        let value = group.run("key", || async { Ok(9) }).await.unwrap();
        assert_eq!(value, 9);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let group = Group::<usize>::new();
        let executions = AtomicUsize::new(0);

        for key in ["a", "b"] {
            executions.fetch_add(1, Ordering::SeqCst);
            assert!(group.run(key, || async { Ok(1) }).await.is_ok());
        }
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }
}
