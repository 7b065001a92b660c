//! Property tests for the executing counter and its notifications

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_command::{AsyncCommand, CancellationToken, InvocationContext, PropertyName};
use proptest::prelude::*;

struct Observation {
    notifications: Vec<bool>,
    peak: usize,
    final_count: usize,
}

fn run_overlapping(delays: Vec<u64>) -> Observation {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let gate = CancellationToken::new();
        let work_gate = gate.clone();
        let command = AsyncCommand::new(move |delay: u64, _ctx: InvocationContext| {
            let gate = work_gate.clone();
            async move {
                gate.cancelled().await;
                tokio::time::sleep(Duration::from_micros(delay)).await;
                Ok(())
            }
        });

        let notifications = Arc::new(Mutex::new(Vec::new()));
        {
            let sink = notifications.clone();
            let observed = command.clone();
            command.subscribe_property_changed(move |property| {
                if property == PropertyName::IsExecuting {
                    sink.lock().unwrap().push(observed.is_executing());
                }
            });
        }

        let tasks: Vec<_> = delays
            .iter()
            .map(|delay| {
                let command = command.clone();
                let delay = *delay;
                tokio::spawn(async move { command.execute_async(delay).await })
            })
            .collect();

        let expected = delays.len();
        while command.executing_count() != expected {
            tokio::task::yield_now().await;
        }
        let peak = command.executing_count();

        gate.cancel();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let notifications = notifications.lock().unwrap().clone();
        Observation {
            notifications,
            peak,
            final_count: command.executing_count(),
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_executing_flips_exactly_twice(delays in prop::collection::vec(0u64..500, 1..24)) {
        let n = delays.len();
        let observed = run_overlapping(delays);

        prop_assert_eq!(observed.peak, n);
        prop_assert_eq!(observed.final_count, 0);
        prop_assert_eq!(observed.notifications, vec![true, false]);
    }
}
