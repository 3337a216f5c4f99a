/// Integration tests for the recovery coordinator
///
/// Every scenario runs on tokio's paused clock so backoff and breaker
/// timing can be asserted exactly.
mod common;

use common::{
    assert_delay, breaker, collect, config, retry, CallLog, FailingSink, RecordingChannel,
    RecordingSink,
};
use resilient_exec::error::{
    Alert, CircuitState, ErrorClassifier, ErrorCode, ExecutionContext, NoFallback,
    RecoveryCoordinator, RetryConfig, Severity, StaticFallback,
};
use resilient_exec::OperationError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn always_failing(
    coordinator: &RecoveryCoordinator,
    context: &ExecutionContext,
    log: &CallLog,
    error: &str,
) -> Result<u32, resilient_exec::ErrorRecord> {
    coordinator
        .execute(context, || {
            log.mark();
            let error = OperationError::from(error);
            async move { Err::<u32, _>(error) }
        })
        .await
        .map(|outcome| outcome.value)
}

#[tokio::test(start_paused = true)]
async fn test_econnreset_is_retried_with_exponential_backoff() {
    let coordinator = RecoveryCoordinator::new(config(retry(3, 100, 1000), breaker(5, 60_000)));
    let context = ExecutionContext::for_verification("batch-1");
    let log = CallLog::new();

    let result = always_failing(&coordinator, &context, &log, "ECONNRESET").await;

    let record = result.unwrap_err();
    assert_eq!(record.code(), ErrorCode::NetworkError);
    assert!(record.retryable());
    assert_eq!(record.attempt(), 3);
    assert_eq!(record.batch_id(), Some("batch-1"));

    assert_eq!(log.count(), 3);
    let gaps = log.gaps();
    assert_delay(gaps[0], 100);
    assert_delay(gaps[1], 200);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped_at_max_delay() {
    let coordinator = RecoveryCoordinator::new(config(retry(5, 100, 300), breaker(10, 60_000)));
    let context = ExecutionContext::new("database_read");
    let log = CallLog::new();

    let record = always_failing(&coordinator, &context, &log, "connection refused")
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::NetworkError);
    assert_eq!(log.count(), 5);
    let gaps = log.gaps();
    assert_delay(gaps[0], 100);
    assert_delay(gaps[1], 200);
    assert_delay(gaps[2], 300);
    assert_delay(gaps[3], 300);
}

#[tokio::test(start_paused = true)]
async fn test_jitter_stays_within_bound() {
    let mut policy = retry(4, 100, 10_000);
    policy.jitter_ms = 50;
    let coordinator = RecoveryCoordinator::new(config(policy, breaker(10, 60_000)));
    let context = ExecutionContext::new("verification_risk");
    let log = CallLog::new();

    let _ = always_failing(&coordinator, &context, &log, "socket hang up").await;

    assert_eq!(log.count(), 4);
    for (gap, base) in log.gaps().into_iter().zip([100u64, 200, 400]) {
        assert!(gap >= Duration::from_millis(base), "gap {:?} below {}ms", gap, base);
        assert!(
            gap <= Duration::from_millis(base + 51),
            "gap {:?} above {}ms + jitter",
            gap,
            base
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_is_invoked_once() {
    let coordinator = RecoveryCoordinator::new(config(retry(5, 100, 1000), breaker(5, 60_000)));
    let context = ExecutionContext::new("verification_identity");
    let log = CallLog::new();

    let record = coordinator
        .execute(&context, || {
            log.mark();
            async { Err::<u32, _>(OperationError::http(401, "token expired")) }
        })
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::AuthError);
    assert!(!record.retryable());
    assert_eq!(log.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_without_invoking_operation() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(2, 1000)));
    let context = ExecutionContext::for_payment_file("batch-9");
    let log = CallLog::new();

    for _ in 0..2 {
        let record = always_failing(&coordinator, &context, &log, "service unavailable")
            .await
            .unwrap_err();
        assert_eq!(record.code(), ErrorCode::ServiceUnavailable);
    }
    assert_eq!(
        coordinator.get_circuit_breaker_status()["payment_file_generate"].state,
        CircuitState::Open
    );

    tokio::time::advance(Duration::from_millis(500)).await;
    let record = always_failing(&coordinator, &context, &log, "service unavailable")
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::CircuitBreakerOpen);
    assert_eq!(record.severity(), Severity::High);
    assert!(!record.retryable());
    assert_eq!(log.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_success_closes_breaker() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(2, 1000)));
    let context = ExecutionContext::new("verification_batch");
    let log = CallLog::new();

    for _ in 0..2 {
        let _ = always_failing(&coordinator, &context, &log, "ETIMEDOUT").await;
    }
    tokio::time::advance(Duration::from_millis(1000)).await;

    let outcome = coordinator
        .execute(&context, || async { Ok::<_, OperationError>(42u32) })
        .await
        .unwrap();

    assert_eq!(outcome.value, 42);
    let status = &coordinator.get_circuit_breaker_status()["verification_batch"];
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
    assert!(status.next_attempt_time.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_failure_reopens_breaker() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(2, 1000)));
    let context = ExecutionContext::new("verification_batch");
    let log = CallLog::new();

    for _ in 0..2 {
        let _ = always_failing(&coordinator, &context, &log, "ECONNRESET").await;
    }
    tokio::time::advance(Duration::from_millis(1000)).await;

    // Probe goes through and fails
    let record = always_failing(&coordinator, &context, &log, "ECONNRESET")
        .await
        .unwrap_err();
    assert_eq!(record.code(), ErrorCode::NetworkError);
    assert_eq!(log.count(), 3);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["verification_batch"].state,
        CircuitState::Open
    );

    // The reopened breaker waits a full reset timeout again
    tokio::time::advance(Duration::from_millis(999)).await;
    let record = always_failing(&coordinator, &context, &log, "ECONNRESET")
        .await
        .unwrap_err();
    assert_eq!(record.code(), ErrorCode::CircuitBreakerOpen);
    assert_eq!(log.count(), 3);

    tokio::time::advance(Duration::from_millis(1)).await;
    let _ = always_failing(&coordinator, &context, &log, "ECONNRESET").await;
    assert_eq!(log.count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_call_stops_retrying_once_reopened() {
    let coordinator = RecoveryCoordinator::new(config(retry(3, 100, 1000), breaker(1, 1000)));
    let context = ExecutionContext::new("verification_batch");
    let log = CallLog::new();

    // The first failure opens the breaker and ends the call
    let record = always_failing(&coordinator, &context, &log, "ECONNRESET")
        .await
        .unwrap_err();
    assert_eq!(record.attempt(), 1);
    assert_eq!(log.count(), 1);

    tokio::time::advance(Duration::from_millis(1000)).await;
    let record = always_failing(&coordinator, &context, &log, "ECONNRESET")
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::NetworkError);
    assert_eq!(record.attempt(), 1);
    assert_eq!(log.count(), 2);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["verification_batch"].state,
        CircuitState::Open
    );
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_half_open_call_frees_its_slot() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(1, 1000)));
    let context = ExecutionContext::new("payment_file_generate");
    let log = CallLog::new();

    let _ = always_failing(&coordinator, &context, &log, "ECONNRESET").await;
    tokio::time::advance(Duration::from_millis(1000)).await;

    // The caller's own deadline drops each call mid-attempt
    for _ in 0..2 {
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            coordinator.execute(&context, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, OperationError>(0u32)
            }),
        )
        .await;
        assert!(abandoned.is_err());

        let status = &coordinator.get_circuit_breaker_status()["payment_file_generate"];
        assert_eq!(status.state, CircuitState::HalfOpen);
        assert_eq!(status.half_open_attempts, 0);
    }

    tokio::time::advance(Duration::from_secs(3600)).await;
    let outcome = coordinator
        .execute(&context, || async { Ok::<_, OperationError>(7u32) })
        .await
        .unwrap();

    assert_eq!(outcome.value, 7);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["payment_file_generate"].state,
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_half_open_call_frees_its_slot() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(1, 1000)));
    let context = ExecutionContext::new("verification_batch");
    let log = CallLog::new();

    let _ = always_failing(&coordinator, &context, &log, "ECONNRESET").await;
    tokio::time::advance(Duration::from_millis(1000)).await;

    for _ in 0..2 {
        let token = CancellationToken::new();
        let cancellable = context.clone().with_cancellation(token.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let record = coordinator
            .execute(&cancellable, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, OperationError>(0u32)
            })
            .await
            .unwrap_err();
        assert_eq!(record.code(), ErrorCode::Cancelled);

        let status = &coordinator.get_circuit_breaker_status()["verification_batch"];
        assert_eq!(status.state, CircuitState::HalfOpen);
        assert_eq!(status.half_open_attempts, 0);
    }

    let outcome = coordinator
        .execute(&context, || async { Ok::<_, OperationError>(1u32) })
        .await
        .unwrap();
    assert_eq!(outcome.value, 1);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["verification_batch"].state,
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_call_during_attempt_leaves_breaker_usable() {
    let coordinator = RecoveryCoordinator::new(config(retry(3, 100, 1000), breaker(5, 60_000)));
    let context = ExecutionContext::new("database_read");
    let log = CallLog::new();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        coordinator.execute(&context, || {
            log.mark();
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, OperationError>(0u32)
            }
        }),
    )
    .await;
    assert!(abandoned.is_err());

    // Nothing keeps running once the call is gone
    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(log.count(), 1);

    let status = &coordinator.get_circuit_breaker_status()["database_read"];
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);

    let outcome = coordinator
        .execute(&context, || async { Ok::<_, OperationError>(3u32) })
        .await
        .unwrap();
    assert_eq!(outcome.value, 3);
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_call_during_backoff_cancels_remaining_attempts() {
    let coordinator =
        RecoveryCoordinator::new(config(retry(3, 1000, 10_000), breaker(5, 60_000)));
    let context = ExecutionContext::new("verification_risk");
    let log = CallLog::new();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        always_failing(&coordinator, &context, &log, "ECONNRESET"),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(log.count(), 1);

    // The backoff timer went with the call
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(log.count(), 1);

    let status = &coordinator.get_circuit_breaker_status()["verification_risk"];
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 1);

    let outcome = coordinator
        .execute(&context, || async { Ok::<_, OperationError>(9u32) })
        .await
        .unwrap();
    assert_eq!(outcome.value, 9);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["verification_risk"].failure_count,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_isolated_per_operation() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(1, 60_000)));
    let log = CallLog::new();

    let _ = always_failing(
        &coordinator,
        &ExecutionContext::new("database_write"),
        &log,
        "PGRST301",
    )
    .await;

    let outcome = coordinator
        .execute(&ExecutionContext::new("database_read"), || async {
            Ok::<_, OperationError>(vec![1u8, 2, 3])
        })
        .await
        .unwrap();
    assert_eq!(outcome.value, vec![1, 2, 3]);

    let status = coordinator.get_circuit_breaker_status();
    assert_eq!(status["database_write"].state, CircuitState::Open);
    assert_eq!(status["database_read"].state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_degradation_serves_stale_fallback() {
    let coordinator = RecoveryCoordinator::new(config(retry(2, 100, 1000), breaker(5, 60_000)))
        .with_fallback(
            "verification_*",
            Arc::new(StaticFallback(serde_json::json!({"score": 50}))),
        )
        .unwrap()
        .with_fallback("database_*", Arc::new(NoFallback))
        .unwrap();

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct RiskScore {
        score: u32,
    }

    let outcome = coordinator
        .execute(&ExecutionContext::new("verification_risk"), || async {
            Err::<RiskScore, _>(OperationError::http(503, "provider down"))
        })
        .await
        .unwrap();
    assert_eq!(outcome.value, RiskScore { score: 50 });
    assert!(outcome.stale);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(
        outcome.degraded_from.map(|r| r.code()),
        Some(ErrorCode::ServiceUnavailable)
    );

    // NoFallback only logs; the error propagates unchanged
    let record = coordinator
        .execute(&ExecutionContext::new("database_read"), || async {
            Err::<RiskScore, _>(OperationError::database("PGRST116", "no rows"))
        })
        .await
        .unwrap_err();
    assert_eq!(record.code(), ErrorCode::DatabaseError);

    assert_eq!(
        coordinator.degradation().served().get("verification_risk"),
        Some(&1)
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_failed_attempt_is_forwarded_and_counted() {
    let (sink, mut records) = RecordingSink::new();
    let coordinator =
        RecoveryCoordinator::new(config(retry(3, 100, 1000), breaker(5, 60_000)))
            .with_error_sink(sink);
    let context = ExecutionContext::new("verification_batch").with_user("user-1");
    let log = CallLog::new();

    let _ = always_failing(&coordinator, &context, &log, "ECONNRESET").await;

    let forwarded = collect(&mut records, 3).await;
    assert_eq!(forwarded.len(), 3);
    assert_eq!(
        forwarded.iter().map(|r| r.attempt()).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(forwarded
        .iter()
        .all(|r| r.user_id() == Some("user-1") && r.correlation_id() == context.correlation_id));

    let stats = coordinator.get_error_statistics(Duration::from_secs(60));
    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.top_errors, vec![(ErrorCode::NetworkError, 3)]);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["verification_batch"].failure_count,
        3
    );
}

#[tokio::test(start_paused = true)]
async fn test_circuit_open_rejection_is_reported_but_not_counted() {
    let (sink, mut records) = RecordingSink::new();
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(1, 60_000)))
            .with_error_sink(sink);
    let context = ExecutionContext::new("payment_file_generate");
    let log = CallLog::new();

    let _ = always_failing(&coordinator, &context, &log, "ECONNRESET").await;
    let _ = always_failing(&coordinator, &context, &log, "ECONNRESET").await;

    let forwarded = collect(&mut records, 2).await;
    assert_eq!(forwarded[1].code(), ErrorCode::CircuitBreakerOpen);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["payment_file_generate"].failure_count,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_never_fails_the_call() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(5, 60_000)))
            .with_error_sink(Arc::new(FailingSink));
    let context = ExecutionContext::new("verification_batch");
    let log = CallLog::new();

    let record = always_failing(&coordinator, &context, &log, "ECONNRESET")
        .await
        .unwrap_err();
    assert_eq!(record.code(), ErrorCode::NetworkError);

    let outcome = coordinator
        .execute(&context, || async { Ok::<_, OperationError>(1u8) })
        .await
        .unwrap();
    assert_eq!(outcome.value, 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_rate_alert_reaches_configured_channel() {
    let (channel, mut alerts) = RecordingChannel::new();
    let mut settings = config(retry(3, 100, 1000), breaker(10, 60_000));
    settings.alerting.error_rate_threshold = 3;
    settings.alerting.channels = vec!["log".to_string(), RecordingChannel::NAME.to_string()];
    let coordinator = RecoveryCoordinator::new(settings).with_alert_channel(channel);
    let log = CallLog::new();

    let _ = always_failing(
        &coordinator,
        &ExecutionContext::new("verification_batch"),
        &log,
        "ECONNRESET",
    )
    .await;

    let delivered = collect(&mut alerts, 1).await;
    match delivered.first() {
        Some(Alert::ErrorRate {
            count, threshold, ..
        }) => {
            assert_eq!(*count, 3);
            assert_eq!(*threshold, 3);
        }
        other => panic!("expected an error-rate alert, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_critical_severity_alerts_immediately() {
    let (channel, mut alerts) = RecordingChannel::new();
    let mut settings = config(RetryConfig::no_retry(), breaker(10, 60_000));
    settings.alerting.channels = vec![RecordingChannel::NAME.to_string()];

    let mut classifier = ErrorClassifier::new();
    classifier.set_severity(ErrorCode::DatabaseError, Severity::Critical);

    let coordinator = RecoveryCoordinator::new(settings)
        .with_classifier(classifier)
        .with_alert_channel(channel);

    let record = coordinator
        .execute(&ExecutionContext::new("database_write"), || async {
            Err::<u32, _>(OperationError::database("PGRST000", "connection pool exhausted"))
        })
        .await
        .unwrap_err();
    assert_eq!(record.severity(), Severity::Critical);

    let delivered = collect(&mut alerts, 1).await;
    assert!(matches!(delivered.first(), Some(Alert::Critical { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_consumes_a_retry_slot() {
    let mut policy = retry(2, 100, 1000);
    policy.timeout_ms = Some(50);
    let coordinator = RecoveryCoordinator::new(config(policy, breaker(5, 60_000)));
    let context = ExecutionContext::new("verification_slow");
    let log = CallLog::new();

    let record = coordinator
        .execute(&context, || {
            log.mark();
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, OperationError>(0u32)
            }
        })
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::TimeoutError);
    assert_eq!(log.count(), 2);
    assert_delay(log.gaps()[0], 150);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff_skips_degradation() {
    let coordinator = RecoveryCoordinator::new(config(retry(3, 1000, 10_000), breaker(5, 60_000)))
        .with_fallback("verification_*", Arc::new(StaticFallback(serde_json::json!(0))))
        .unwrap();
    let token = CancellationToken::new();
    let context = ExecutionContext::new("verification_batch").with_cancellation(token.clone());
    let log = CallLog::new();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    let record = always_failing(&coordinator, &context, &log, "ECONNRESET")
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::Cancelled);
    assert_eq!(log.count(), 1);
    assert_eq!(
        coordinator.get_circuit_breaker_status()["verification_batch"].failure_count,
        1
    );
    assert!(coordinator.degradation().served().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_attempt_is_not_a_breaker_failure() {
    let coordinator = RecoveryCoordinator::new(config(retry(3, 100, 1000), breaker(1, 60_000)));
    let token = CancellationToken::new();
    let context = ExecutionContext::new("payment_file_generate").with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let record = coordinator
        .execute(&context, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, OperationError>(0u32)
        })
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::Cancelled);
    assert_eq!(record.severity(), Severity::Low);
    let status = &coordinator.get_circuit_breaker_status()["payment_file_generate"];
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_per_call_retry_config_overrides_default() {
    let coordinator = RecoveryCoordinator::new(config(retry(5, 100, 1000), breaker(10, 60_000)));
    let context = ExecutionContext::new("verification_batch");
    let log = CallLog::new();

    let record = coordinator
        .execute_with_retry_config(&context, &RetryConfig::no_retry(), || {
            log.mark();
            async { Err::<u32, _>(OperationError::from("ECONNRESET")) }
        })
        .await
        .unwrap_err();

    assert_eq!(record.code(), ErrorCode::NetworkError);
    assert_eq!(log.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wrapped_operation_recovers_after_transient_failure() {
    let coordinator = Arc::new(RecoveryCoordinator::new(config(
        retry(3, 100, 1000),
        breaker(5, 60_000),
    )));
    let log = CallLog::new();
    let calls = Arc::clone(&log);

    let mut wrapped = coordinator.wrap("payment_file_generate", move || {
        let call = calls.mark();
        async move {
            if call == 1 {
                Err(OperationError::http(429, "rate limit exceeded"))
            } else {
                Ok(format!("file-{}", call))
            }
        }
    });

    let outcome = wrapped
        .call(ExecutionContext::new("ignored").with_batch("batch-3"))
        .await
        .unwrap();

    assert_eq!(outcome.value, "file-2");
    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.stale);
    assert_delay(log.gaps()[0], 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_recorded() {
    let coordinator = Arc::new(RecoveryCoordinator::new(config(
        RetryConfig::no_retry(),
        breaker(1_000, 60_000),
    )));

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .execute(&ExecutionContext::new("verification_batch"), || async {
                        Err::<u32, _>(OperationError::from("ECONNRESET"))
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().is_err());
    }

    let status = &coordinator.get_circuit_breaker_status()["verification_batch"];
    assert_eq!(status.failure_count, 50);
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(
        coordinator
            .get_error_statistics(Duration::from_secs(60))
            .total_errors,
        50
    );
}

#[tokio::test(start_paused = true)]
async fn test_reset_all_circuit_breakers() {
    let coordinator =
        RecoveryCoordinator::new(config(RetryConfig::no_retry(), breaker(1, 60_000)));
    let log = CallLog::new();

    for name in ["database_read", "verification_batch"] {
        let _ = always_failing(&coordinator, &ExecutionContext::new(name), &log, "ECONNRESET")
            .await;
    }
    assert!(coordinator
        .get_circuit_breaker_status()
        .values()
        .all(|s| s.state == CircuitState::Open));

    coordinator.reset_all_circuit_breakers();

    let outcome = coordinator
        .execute(&ExecutionContext::new("database_read"), || async {
            Ok::<_, OperationError>(true)
        })
        .await
        .unwrap();
    assert!(outcome.value);
    assert!(coordinator
        .get_circuit_breaker_status()
        .values()
        .all(|s| s.state == CircuitState::Closed));
}
