mod common;

use std::sync::Arc;
use std::time::Duration;

use blaster::{
  Blaster, Error, RequestOptions, RequestResult, RetryPolicy,
};

use common::{endpoint, fail, ok, user, within, ScriptedExecutor, Step};

#[tokio::test(start_paused = true)]
async fn test_job_surfaces_last_error_after_max_retries()
{   let ep = endpoint("east", 1);
    let executor = Arc::new(
      ScriptedExecutor::new(fail(Error::ServerError
      {   status: 503
        , message: "overloaded".to_string()
      }))
    );
    let blaster = Blaster::new(
      vec![Arc::clone(&ep)],
      executor.clone(),
      2,
      3
    ).unwrap();

    let result = within(
      blaster.chat_completion(user("hi"), RequestOptions::default())
    ).await;

    assert_eq!(
      result,
      Err(Error::ServerError
      {   status: 503
        , message: "overloaded".to_string()
      })
    );
    assert_eq!(executor.calls().len(), 3);
    assert_eq!(ep.failure_streak(), 3);
    assert!(!ep.is_disabled());

    // never retried again
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(executor.calls().len(), 3);
    blaster.close(true).await;
}

#[tokio::test(start_paused = true)]
async fn test_generic_error_when_retries_exhausted_without_error()
{   let executor = Arc::new(ScriptedExecutor::new(Step::Raw(
      RequestResult
      {   ok: false
        , retryable: true
        , response: None
        , error: None
      }
    )));
    let blaster = Blaster::new(
      vec![endpoint("east", 1)],
      executor.clone(),
      1,
      2
    ).unwrap();

    let result = within(
      blaster.chat_completion(user("hi"), RequestOptions::default())
    ).await;
    assert_eq!(result, Err(Error::RetriesExhausted(2)));
    assert_eq!(executor.calls().len(), 2);
}

#[tokio::test]
async fn test_malformed_request_is_fatal_and_harmless()
{   let ep = endpoint("east", 1);
    let executor = Arc::new(ScriptedExecutor::new(
      fail(Error::BadRequest("unknown field".to_string()))
    ));
    let blaster = Blaster::new(
      vec![Arc::clone(&ep)],
      executor.clone(),
      4,
      5
    ).unwrap();

    let result = within(
      blaster.chat_completion(user("hi"), RequestOptions::default())
    ).await;

    assert_eq!(
      result,
      Err(Error::BadRequest("unknown field".to_string()))
    );
    assert_eq!(executor.calls().len(), 1);
    assert_eq!(ep.failure_streak(), 0);
    assert!(!ep.is_disabled());
    assert!(ep.available(tokio::time::Instant::now()));
}

#[tokio::test]
async fn test_fatal_without_error_gets_generic_failure()
{   let executor = Arc::new(ScriptedExecutor::new(Step::Raw(
      RequestResult
      {   ok: false
        , retryable: false
        , response: None
        , error: None
      }
    )));
    let blaster = Blaster::new(
      vec![endpoint("east", 1)],
      executor,
      1,
      5
    ).unwrap();

    let result = within(
      blaster.chat_completion(user("hi"), RequestOptions::default())
    ).await;
    assert!(matches!(result, Err(Error::Other(_))), "{:?}", result);
}

#[tokio::test]
async fn test_success_without_response_is_empty_string()
{   let executor = Arc::new(ScriptedExecutor::new(Step::Raw(
      RequestResult
      {   ok: true
        , retryable: false
        , response: None
        , error: None
      }
    )));
    let blaster = Blaster::new(
      vec![endpoint("east", 1)],
      executor,
      1,
      5
    ).unwrap();

    let result = within(
      blaster.chat_completion(user("hi"), RequestOptions::default())
    ).await;
    assert_eq!(result, Ok(String::new()));
}

#[tokio::test]
async fn test_cancelled_job_is_skipped()
{   let executor = Arc::new(ScriptedExecutor::new(ok("done")));
    let blaster = Blaster::new(
      vec![endpoint("east", 1)],
      executor.clone(),
      1,
      5
    ).unwrap();

    let first = blaster
      .submit_chat_completion(user("wait-1"), RequestOptions::default())
      .unwrap();
    let mut second = blaster
      .submit_chat_completion(user("second"), RequestOptions::default())
      .unwrap();
    second.cancel();
    executor.release();

    assert_eq!(within(first).await, Ok("done".to_string()));
    let third = blaster
      .chat_completion(user("third"), RequestOptions::default());
    assert_eq!(within(third).await, Ok("done".to_string()));

    assert_eq!(executor.prompts(), vec!["wait-1", "third"]);
    assert_eq!(within(second).await, Err(Error::JobAbandoned));
}

#[tokio::test]
async fn test_submit_after_close_fails()
{   let executor = Arc::new(ScriptedExecutor::new(ok("done")));
    let blaster = Blaster::new(
      vec![endpoint("east", 1)],
      executor,
      3,
      5
    ).unwrap();

    blaster.close(true).await;
    assert!(blaster.is_closed());
    let err = tokio_test::assert_err!(
      blaster.submit_chat_completion(user("hi"), RequestOptions::default())
    );
    assert_eq!(err, Error::DispatcherClosed);
    // closing twice is harmless
    blaster.close(true).await;
}

#[tokio::test]
async fn test_queued_jobs_are_abandoned_on_shutdown()
{   let executor = Arc::new(ScriptedExecutor::new(ok("done")));
    let blaster = Blaster::new(
      vec![endpoint("east", 1)],
      executor.clone(),
      1,
      5
    ).unwrap();

    let first = blaster
      .submit_chat_completion(user("wait-1"), RequestOptions::default())
      .unwrap();
    let mut queued = blaster
      .submit_chat_completion(user("queued"), RequestOptions::default())
      .unwrap();

    blaster.close(false).await;
    executor.release();

    // in-flight work finishes
    assert_eq!(within(first).await, Ok("done".to_string()));
    // close alone resolves nothing
    assert!(queued.try_result().is_none());

    drop(blaster);
    assert_eq!(within(queued).await, Err(Error::JobAbandoned));
    assert_eq!(executor.prompts(), vec!["wait-1"]);
}

#[tokio::test]
async fn test_close_interrupts_worker_waiting_on_cooldown()
{   let ep = endpoint("east", 1);
    ep.set_cooldown(
      tokio::time::Instant::now() + Duration::from_secs(3600),
      None
    );
    let executor = Arc::new(ScriptedExecutor::new(ok("done")));
    let blaster = Blaster::new(
      vec![Arc::clone(&ep)],
      executor.clone(),
      1,
      5
    ).unwrap();

    let handle = blaster
      .submit_chat_completion(user("hi"), RequestOptions::default())
      .unwrap();
    // let the worker pick the job up and park on the cooldown
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio_test::assert_ok!(
      tokio::time::timeout(Duration::from_secs(5), blaster.close(true))
        .await
    );
    assert!(executor.calls().is_empty());

    drop(blaster);
    assert_eq!(within(handle).await, Err(Error::JobAbandoned));
}

#[tokio::test]
async fn test_all_endpoints_disabled_resolves_with_terminal_error()
{   let ep = endpoint("east", 2);
    ep.disable("auth error");
    let executor = Arc::new(ScriptedExecutor::new(ok("done")));
    let blaster = Blaster::new(
      vec![ep],
      executor.clone(),
      2,
      5
    ).unwrap();

    let result = within(
      blaster.chat_completion(user("hi"), RequestOptions::default())
    ).await;
    assert_eq!(result, Err(Error::NoAvailableEndpoint));
    assert!(executor.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retries_spread_over_other_endpoints()
{   let policy = RetryPolicy::new(
      5,
      Duration::from_secs(1),
      Duration::from_secs(30)
    );
    let executor = Arc::new(
      ScriptedExecutor::new(ok("fine"))
        .with_policy(policy)
        .script("flaky", vec![fail(Error::Timeout); 10])
    );
    let flaky = endpoint("flaky", 1);
    let steady = endpoint("steady", 1);
    let blaster = Blaster::new(
      vec![Arc::clone(&flaky), Arc::clone(&steady)],
      executor.clone(),
      1,
      5
    ).unwrap();

    for i in 0..6
    {   let prompt = format!("job-{}", i);
        let result = within(
          blaster.chat_completion(user(&prompt), RequestOptions::default())
        ).await;
        assert_eq!(result, Ok("fine".to_string()));
    }

    assert_eq!(steady.total_requests(), 6);
    assert_eq!(flaky.total_requests(), 0);
    assert!(flaky.failure_streak() >= 1);
}

#[tokio::test]
async fn test_construction_requires_endpoints_and_workers()
{   let executor = Arc::new(ScriptedExecutor::new(ok("done")));

    let no_endpoints
      = Blaster::<()>::new(vec![], executor.clone(), 1, 5);
    assert!(matches!(
      no_endpoints,
      Err(Error::InvalidConfiguration(_))
    ));

    let no_workers = Blaster::new(vec![endpoint("a", 1)], executor, 0, 5);
    assert!(matches!(
      no_workers,
      Err(Error::InvalidConfiguration(_))
    ));
}
